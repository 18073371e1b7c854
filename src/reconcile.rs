//! # Reconciliation Module
//!
//! Moves persisted state toward a [`DefinitionDocument`] with the minimal set of
//! create/update calls. Nothing is ever deleted.
//!
//! ## Order of Operations
//!
//! 1. Planning: every member reference is resolved, every member role looked up and every
//!    group name looked up (missing groups are created). An unresolvable member or an unknown
//!    role aborts here, before any group, API, membership, page or plan write.
//! 2. The API record is created or updated and stamped with the `default` export version.
//! 3. On creation, the acting user becomes primary owner.
//! 4. Members, pages and plans are reconciled in document order, each against a snapshot of
//!    current state read once.
//!
//! Natural keys: members by user id, pages by name, plans by (name, security type). When a
//! document repeats a key, the first occurrence wins.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::{
    Api, MembershipReference, MembershipRole, MembershipUser, NewGroup, PageQuery,
    PlanQuery, PlanSecurityType, PlanStatus, RoleScope, PRIMARY_OWNER,
};
use crate::definition::{self, DefinitionDocument, MemberSpec};
use crate::export::ExportVersion;
use crate::identity::IdentityService;
use crate::observability::metrics::{self, Action, Entity};
use crate::repository::RepositoryGateway;

/// A definition member resolved to an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMember {
    pub user: MembershipUser,
    pub role: MembershipRole,
}

/// Mutations issued by one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Summary {
    members_applied: usize,
    members_skipped: usize,
    pages_created: usize,
    pages_updated: usize,
    plans_created: usize,
    plans_updated: usize,
}

/// Import service reconciling API definitions into the repositories
pub struct ApiReconciler {
    gateway: RepositoryGateway,
    identities: Arc<IdentityService>,
}

impl ApiReconciler {
    pub fn new(gateway: RepositoryGateway, identities: Arc<IdentityService>) -> Self {
        Self { gateway, identities }
    }

    /// Import a raw definition, creating a new API or updating `existing_api_id`
    pub async fn import(
        &self,
        existing_api_id: Option<&str>,
        raw: &[u8],
        acting_user: Option<&str>,
    ) -> ManagementResult<Api> {
        let result = self.load_and_reconcile(existing_api_id, raw, acting_user).await;
        match &result {
            Ok(api) => {
                metrics::record_import("success");
                info!(api_id = %api.id, "API definition imported");
            }
            Err(e) => {
                metrics::record_import(e.error_type());
                warn!(error = %e, "API definition import failed");
            }
        }
        result
    }

    async fn load_and_reconcile(
        &self,
        existing_api_id: Option<&str>,
        raw: &[u8],
        acting_user: Option<&str>,
    ) -> ManagementResult<Api> {
        let existing = match existing_api_id {
            Some(api_id) => Some(
                self.gateway
                    .apis
                    .find_by_id(api_id)
                    .await?
                    .ok_or_else(|| ManagementError::ApiNotFound {
                        api_id: api_id.to_string(),
                    })?,
            ),
            None => None,
        };

        let definition = definition::parse(raw)?;
        self.reconcile(existing, &definition, acting_user).await
    }

    /// Reconcile persisted state with a parsed definition
    pub async fn reconcile(
        &self,
        existing: Option<Api>,
        definition: &DefinitionDocument,
        acting_user: Option<&str>,
    ) -> ManagementResult<Api> {
        let members = self.resolve_members(&definition.members).await?;
        let group_ids = self.resolve_groups(&definition.groups).await?;

        let created = existing.is_none();
        let api = self.save_api(existing, definition, group_ids).await?;

        if created {
            if let Some(username) = acting_user {
                self.assign_primary_owner(&api, username).await?;
            }
        }

        let mut summary = Summary::default();
        self.reconcile_members(&api, &members, &mut summary).await?;
        self.reconcile_pages(&api, definition, acting_user, &mut summary).await?;
        self.reconcile_plans(&api, definition, &mut summary).await?;

        info!(
            api_id = %api.id,
            created,
            members_applied = summary.members_applied,
            members_skipped = summary.members_skipped,
            pages_created = summary.pages_created,
            pages_updated = summary.pages_updated,
            plans_created = summary.plans_created,
            plans_updated = summary.plans_updated,
            "Reconciled API definition"
        );

        Ok(api)
    }

    /// Resolve every definition member through the identity chain and check that every
    /// role it names exists, before anything is written
    pub async fn resolve_members(&self, members: &[MemberSpec]) -> ManagementResult<Vec<PlannedMember>> {
        let mut planned = Vec::with_capacity(members.len());
        for member in members {
            let identity = self
                .identities
                .resolve_member(&member.reference, member.source.as_deref())
                .await
                .ok_or_else(|| ManagementError::unresolvable_member(member.reference.clone()))?;

            debug!(reference = %member.reference, user_id = %identity.id, "Resolved member");
            planned.push(PlannedMember {
                user: MembershipUser::new(identity.id)
                    .with_reference(identity.reference)
                    .with_source(identity.source),
                role: MembershipRole::new(RoleScope::Api, member.role.clone()),
            });
        }

        let mut checked = HashSet::new();
        for member in &planned {
            if !checked.insert(member.role.name.as_str()) {
                continue;
            }
            if self
                .gateway
                .roles
                .find_by_id(member.role.scope, &member.role.name)
                .await?
                .is_none()
            {
                return Err(ManagementError::RoleNotFound {
                    scope: member.role.scope.to_string(),
                    name: member.role.name.clone(),
                });
            }
        }

        Ok(planned)
    }

    /// Group ids for the named groups, creating the missing ones
    async fn resolve_groups(&self, names: &[String]) -> ManagementResult<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        for name in names {
            let group = match self.gateway.groups.find_by_name(name).await? {
                Some(group) => group,
                None => {
                    let group = self.gateway.groups.create(NewGroup { name: name.clone() }).await?;
                    metrics::record_mutation(Entity::Group, Action::Create);
                    info!(group = %group.name, group_id = %group.id, "Created group referenced by definition");
                    group
                }
            };
            ids.insert(group.id);
        }
        Ok(ids)
    }

    async fn save_api(
        &self,
        existing: Option<Api>,
        definition: &DefinitionDocument,
        group_ids: BTreeSet<String>,
    ) -> ManagementResult<Api> {
        match existing {
            Some(mut api) => {
                definition.apply_to(&mut api);
                api.groups.extend(group_ids);
                api.set_export_version(ExportVersion::Default.as_str());
                api.updated_at = Utc::now();

                let api = self.gateway.apis.update(api).await?;
                metrics::record_mutation(Entity::Api, Action::Update);
                info!(api_id = %api.id, "Updated API from definition");
                Ok(api)
            }
            None => {
                let mut api = Api::new(Uuid::new_v4().to_string(), &definition.name, &definition.version);
                definition.apply_to(&mut api);
                api.groups = group_ids;
                api.set_export_version(ExportVersion::Default.as_str());

                let api = self.gateway.apis.create(api).await?;
                metrics::record_mutation(Entity::Api, Action::Create);
                info!(api_id = %api.id, "Created API from definition");
                Ok(api)
            }
        }
    }

    async fn assign_primary_owner(&self, api: &Api, username: &str) -> ManagementResult<()> {
        let user = MembershipUser::new(username).with_reference(username);
        self.gateway
            .memberships
            .add_or_update_member(
                &MembershipReference::api(api.id.clone()),
                &user,
                &MembershipRole::new(RoleScope::Api, PRIMARY_OWNER),
            )
            .await?;
        metrics::record_mutation(Entity::Member, Action::Create);
        info!(api_id = %api.id, user = %username, "Assigned primary owner");
        Ok(())
    }

    async fn reconcile_members(
        &self,
        api: &Api,
        members: &[PlannedMember],
        summary: &mut Summary,
    ) -> ManagementResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let reference = MembershipReference::api(api.id.clone());
        let current: HashMap<String, String> = self
            .gateway
            .memberships
            .get_members(&reference, RoleScope::Api)
            .await?
            .into_iter()
            .map(|member| (member.id, member.role))
            .collect();
        let mut has_primary_owner = !self
            .gateway
            .memberships
            .find_by_reference_and_role(&reference, &MembershipRole::new(RoleScope::Api, PRIMARY_OWNER))
            .await?
            .is_empty();

        let mut seen = HashSet::new();
        for member in members {
            let user_id = member.user.id.as_str();
            if !seen.insert(user_id) {
                warn!(api_id = %api.id, user_id = %user_id, "Member listed twice in definition, keeping first");
                continue;
            }

            let current_role = current.get(user_id).map(String::as_str);
            if current_role == Some(member.role.name.as_str()) {
                debug!(api_id = %api.id, user_id = %user_id, role = %member.role.name, "Member already up to date");
                metrics::record_skip(Entity::Member);
                summary.members_skipped += 1;
                continue;
            }

            if current_role == Some(PRIMARY_OWNER) {
                warn!(api_id = %api.id, user_id = %user_id, "Primary owner role cannot be replaced by import");
                summary.members_skipped += 1;
                continue;
            }

            if member.role.name == PRIMARY_OWNER {
                if has_primary_owner {
                    warn!(api_id = %api.id, user_id = %user_id, "API already has a primary owner, skipping");
                    summary.members_skipped += 1;
                    continue;
                }
                has_primary_owner = true;
            }

            self.gateway
                .memberships
                .add_or_update_member(&reference, &member.user, &member.role)
                .await?;
            let action = if current_role.is_some() { Action::Update } else { Action::Create };
            metrics::record_mutation(Entity::Member, action);
            info!(api_id = %api.id, user_id = %user_id, role = %member.role.name, "Applied member");
            summary.members_applied += 1;
        }

        Ok(())
    }

    async fn reconcile_pages(
        &self,
        api: &Api,
        definition: &DefinitionDocument,
        acting_user: Option<&str>,
        summary: &mut Summary,
    ) -> ManagementResult<()> {
        if definition.pages.is_empty() {
            return Ok(());
        }

        let mut current: HashMap<String, String> = HashMap::new();
        for page in self.gateway.pages.search(&PageQuery::by_api(api.id.clone())).await? {
            current.entry(page.name).or_insert(page.id);
        }

        let mut seen = HashSet::new();
        for page in &definition.pages {
            if !seen.insert(page.name.as_str()) {
                warn!(api_id = %api.id, page = %page.name, "Page listed twice in definition, keeping first");
                continue;
            }

            match current.get(&page.name) {
                Some(page_id) => {
                    self.gateway
                        .pages
                        .update(page_id, page.to_update_page(acting_user))
                        .await?;
                    metrics::record_mutation(Entity::Page, Action::Update);
                    info!(api_id = %api.id, page = %page.name, "Updated page");
                    summary.pages_updated += 1;
                }
                None => {
                    self.gateway
                        .pages
                        .create_api_page(&api.id, page.to_new_page(acting_user))
                        .await?;
                    metrics::record_mutation(Entity::Page, Action::Create);
                    info!(api_id = %api.id, page = %page.name, "Created page");
                    summary.pages_created += 1;
                }
            }
        }

        Ok(())
    }

    async fn reconcile_plans(
        &self,
        api: &Api,
        definition: &DefinitionDocument,
        summary: &mut Summary,
    ) -> ManagementResult<()> {
        if definition.plans.is_empty() {
            return Ok(());
        }

        let mut current: HashMap<(String, PlanSecurityType), String> = HashMap::new();
        for plan in self.gateway.plans.search(&PlanQuery::by_api(api.id.clone())).await? {
            if plan.status == PlanStatus::Closed {
                continue;
            }
            current.entry(plan.natural_key()).or_insert(plan.id);
        }

        let mut seen = HashSet::new();
        for plan in &definition.plans {
            let key = plan.natural_key();
            if !seen.insert(key.clone()) {
                warn!(api_id = %api.id, plan = %plan.name, "Plan listed twice in definition, keeping first");
                continue;
            }

            match current.get(&key) {
                Some(plan_id) => {
                    self.gateway.plans.update(plan.to_update_plan(plan_id)).await?;
                    metrics::record_mutation(Entity::Plan, Action::Update);
                    info!(api_id = %api.id, plan = %plan.name, "Updated plan");
                    summary.plans_updated += 1;
                }
                None => {
                    self.gateway.plans.create(plan.to_new_plan(&api.id)).await?;
                    metrics::record_mutation(Entity::Plan, Action::Create);
                    info!(api_id = %api.id, plan = %plan.name, "Created plan");
                    summary.plans_created += 1;
                }
            }
        }

        Ok(())
    }
}
