//! Group and role assignment derived from an external profile.
//!
//! Every rule is evaluated; all that hold contribute (union, not first match). All lookups
//! happen before the first membership write, so a missing group or role leaves
//! authorization state untouched.

use serde_json::Value;
use tracing::{debug, info};

use super::Expression;
use crate::core::config::{parse_role_value, MappingRuleConfig};
use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::{
    Group, MembershipReference, MembershipRole, MembershipUser, RoleScope, DEFAULT_REFERENCE_ID,
};
use crate::observability::metrics;
use crate::repository::RepositoryGateway;

/// A compiled group rule
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub condition: Expression,
    /// Group names
    pub values: Vec<String>,
}

/// A compiled role rule
#[derive(Debug, Clone)]
pub struct RoleMappingRule {
    pub condition: Expression,
    pub roles: Vec<MembershipRole>,
}

/// Result of applying the mappings to one user
#[derive(Debug, Clone, PartialEq)]
pub struct MappingOutcome {
    pub groups: Vec<Group>,
    pub roles: Vec<MembershipRole>,
    pub memberships_applied: usize,
}

pub struct GroupRoleMapper {
    gateway: RepositoryGateway,
    groups: Vec<MappingRule>,
    roles: Vec<RoleMappingRule>,
}

impl GroupRoleMapper {
    /// Compile the configured rules; a condition that does not parse fails here
    pub fn new(
        gateway: RepositoryGateway,
        groups: &[MappingRuleConfig],
        roles: &[MappingRuleConfig],
    ) -> ManagementResult<Self> {
        let groups = groups
            .iter()
            .map(|rule| -> ManagementResult<MappingRule> {
                Ok(MappingRule {
                    condition: Expression::parse(&rule.condition)?,
                    values: rule.values.clone(),
                })
            })
            .collect::<ManagementResult<Vec<_>>>()?;

        let roles = roles
            .iter()
            .map(|rule| -> ManagementResult<RoleMappingRule> {
                let condition = Expression::parse(&rule.condition)?;
                let roles = rule
                    .values
                    .iter()
                    .map(|value| {
                        parse_role_value(value).map(|(scope, name)| MembershipRole::new(scope, name))
                    })
                    .collect::<ManagementResult<Vec<_>>>()?;
                Ok(RoleMappingRule { condition, roles })
            })
            .collect::<ManagementResult<Vec<_>>>()?;

        Ok(Self {
            gateway,
            groups,
            roles,
        })
    }

    /// Group names whose rule holds, deduplicated in first-seen order
    pub fn matching_groups(&self, profile: &Value) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for rule in self.groups.iter().filter(|rule| rule.condition.evaluate(profile)) {
            for name in &rule.values {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Roles whose rule holds, deduplicated in first-seen order
    pub fn matching_roles(&self, profile: &Value) -> Vec<MembershipRole> {
        let mut roles: Vec<MembershipRole> = Vec::new();
        for rule in self.roles.iter().filter(|rule| rule.condition.evaluate(profile)) {
            for role in &rule.roles {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }
        roles
    }

    /// Apply every matching group and role to the user
    pub async fn apply(&self, user: &MembershipUser, profile: &Value) -> ManagementResult<MappingOutcome> {
        let group_names = self.matching_groups(profile);
        let mapped_roles = self.matching_roles(profile);

        let mut groups = Vec::with_capacity(group_names.len());
        for name in &group_names {
            let group = self
                .gateway
                .groups
                .find_by_name(name)
                .await?
                .ok_or_else(|| ManagementError::GroupNotFound { name: name.clone() })?;
            groups.push(group);
        }

        let default_roles = if groups.is_empty() {
            Vec::new()
        } else {
            self.gateway
                .roles
                .find_default_roles_by_scopes(&[RoleScope::Api, RoleScope::Application])
                .await?
        };

        for role in &mapped_roles {
            if self
                .gateway
                .roles
                .find_by_id(role.scope, &role.name)
                .await?
                .is_none()
            {
                return Err(ManagementError::RoleNotFound {
                    scope: role.scope.to_string(),
                    name: role.name.clone(),
                });
            }
        }

        let mut applied = 0;
        for group in &groups {
            let reference = MembershipReference::group(group.id.clone());
            for role in &default_roles {
                self.gateway
                    .memberships
                    .add_or_update_member(&reference, user, &role.to_membership_role())
                    .await?;
                applied += 1;
            }
            debug!(user_id = %user.id, group = %group.name, "Applied group mapping");
        }

        for role in &mapped_roles {
            let Some(reference_type) = role.scope.default_reference_type() else {
                continue;
            };
            let reference = MembershipReference::new(reference_type, DEFAULT_REFERENCE_ID);
            self.gateway
                .memberships
                .add_or_update_member(&reference, user, role)
                .await?;
            applied += 1;
        }

        info!(
            user_id = %user.id,
            groups = groups.len(),
            roles = mapped_roles.len(),
            memberships = applied,
            "Applied group and role mappings"
        );
        metrics::record_mapping_application(groups.len(), mapped_roles.len());

        Ok(MappingOutcome {
            groups,
            roles: mapped_roles,
            memberships_applied: applied,
        })
    }
}
