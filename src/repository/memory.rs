//! # In-Memory Repositories
//!
//! A single store implementing every repository contract, used by the binary and by tests.
//! Every mutation is counted in [`RepositoryStats`] so callers can assert exactly which
//! writes a reconciliation issued.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::{
    ApiRepository, GroupRepository, MembershipRepository, PageRepository, PlanRepository,
    RoleRepository,
};
use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::{
    Api, Group, MemberEntity, MemberType, Membership, MembershipReference, MembershipReferenceType,
    MembershipRole, MembershipUser, NewGroup, NewPage, NewPlan, Page, PageListItem, PageQuery, Plan,
    PlanQuery, Role, RoleScope, UpdatePage, UpdatePlan, PRIMARY_OWNER,
};

/// Mutation counters
#[derive(Debug, Default)]
pub struct RepositoryStats {
    api_creates: AtomicU64,
    api_updates: AtomicU64,
    member_upserts: AtomicU64,
    page_creates: AtomicU64,
    page_updates: AtomicU64,
    plan_creates: AtomicU64,
    plan_updates: AtomicU64,
    group_creates: AtomicU64,
}

/// Point-in-time copy of [`RepositoryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStatsSnapshot {
    pub api_creates: u64,
    pub api_updates: u64,
    pub member_upserts: u64,
    pub page_creates: u64,
    pub page_updates: u64,
    pub plan_creates: u64,
    pub plan_updates: u64,
    pub group_creates: u64,
}

impl RepositoryStats {
    pub fn snapshot(&self) -> RepositoryStatsSnapshot {
        RepositoryStatsSnapshot {
            api_creates: self.api_creates.load(Ordering::Relaxed),
            api_updates: self.api_updates.load(Ordering::Relaxed),
            member_upserts: self.member_upserts.load(Ordering::Relaxed),
            page_creates: self.page_creates.load(Ordering::Relaxed),
            page_updates: self.page_updates.load(Ordering::Relaxed),
            plan_creates: self.plan_creates.load(Ordering::Relaxed),
            plan_updates: self.plan_updates.load(Ordering::Relaxed),
            group_creates: self.group_creates.load(Ordering::Relaxed),
        }
    }
}

impl RepositoryStatsSnapshot {
    /// Mutations issued since `earlier`
    pub fn since(&self, earlier: &RepositoryStatsSnapshot) -> RepositoryStatsSnapshot {
        RepositoryStatsSnapshot {
            api_creates: self.api_creates - earlier.api_creates,
            api_updates: self.api_updates - earlier.api_updates,
            member_upserts: self.member_upserts - earlier.member_upserts,
            page_creates: self.page_creates - earlier.page_creates,
            page_updates: self.page_updates - earlier.page_updates,
            plan_creates: self.plan_creates - earlier.plan_creates,
            plan_updates: self.plan_updates - earlier.plan_updates,
            group_creates: self.group_creates - earlier.group_creates,
        }
    }

    pub fn total_mutations(&self) -> u64 {
        self.api_creates
            + self.api_updates
            + self.member_upserts
            + self.page_creates
            + self.page_updates
            + self.plan_creates
            + self.plan_updates
            + self.group_creates
    }
}

type MembershipKey = (MembershipReferenceType, String, String);

/// In-memory implementation of every repository contract
pub struct InMemoryRepositories {
    apis: DashMap<String, Api>,
    memberships: RwLock<BTreeMap<MembershipKey, Membership>>,
    /// Insertion ordered
    pages: RwLock<Vec<Page>>,
    plans: RwLock<Vec<Plan>>,
    groups: RwLock<Vec<Group>>,
    roles: RwLock<Vec<Role>>,
    stats: RepositoryStats,
}

impl Default for InMemoryRepositories {
    fn default() -> Self {
        Self::new()
    }
}

fn system_role(scope: RoleScope, name: &str, default_role: bool) -> Role {
    Role {
        scope,
        name: name.to_string(),
        description: None,
        default_role,
        system: true,
    }
}

impl InMemoryRepositories {
    /// Create a store seeded with the built-in roles
    pub fn new() -> Self {
        let mut roles = Vec::new();
        for scope in [RoleScope::Api, RoleScope::Application] {
            roles.push(system_role(scope, PRIMARY_OWNER, false));
            roles.push(system_role(scope, "OWNER", false));
            roles.push(system_role(scope, "USER", true));
        }
        for scope in [RoleScope::Management, RoleScope::Portal] {
            roles.push(system_role(scope, "ADMIN", false));
            roles.push(system_role(scope, "USER", true));
        }

        Self {
            apis: DashMap::new(),
            memberships: RwLock::new(BTreeMap::new()),
            pages: RwLock::new(Vec::new()),
            plans: RwLock::new(Vec::new()),
            groups: RwLock::new(Vec::new()),
            roles: RwLock::new(roles),
            stats: RepositoryStats::default(),
        }
    }

    pub fn stats(&self) -> &RepositoryStats {
        &self.stats
    }

    /// Register an additional custom role
    pub fn add_role(&self, role: Role) {
        let mut roles = self.roles.write();
        roles.retain(|r| !(r.scope == role.scope && r.name == role.name));
        roles.push(role);
    }

    /// Insert or replace a group directly, without counting a mutation
    pub fn insert_group(&self, group: Group) {
        let mut groups = self.groups.write();
        groups.retain(|g| g.id != group.id);
        groups.push(group);
    }

    /// Every membership currently stored, in key order
    pub fn memberships(&self) -> Vec<Membership> {
        self.memberships.read().values().cloned().collect()
    }

    /// Memberships attached to a reference
    pub fn memberships_of(&self, reference: &MembershipReference) -> Vec<Membership> {
        self.memberships
            .read()
            .values()
            .filter(|m| m.reference_type == reference.reference_type && m.reference_id == reference.reference_id)
            .cloned()
            .collect()
    }

    fn role_exists(&self, role: &MembershipRole) -> bool {
        self.roles
            .read()
            .iter()
            .any(|r| r.scope == role.scope && r.name == role.name)
    }
}

fn to_member_entity(membership: &Membership, scope: RoleScope) -> Option<MemberEntity> {
    let role = membership.roles.get(&scope)?;
    Some(MemberEntity {
        id: membership.user_id.clone(),
        reference: membership.user_reference.clone(),
        source: membership.user_source.clone(),
        display_name: membership
            .user_reference
            .clone()
            .or_else(|| Some(membership.user_id.clone())),
        email: None,
        role: role.clone(),
        member_type: MemberType::User,
        permissions: BTreeMap::new(),
        created_at: membership.created_at,
        updated_at: membership.updated_at,
    })
}

#[async_trait]
impl ApiRepository for InMemoryRepositories {
    async fn find_by_id(&self, id: &str) -> ManagementResult<Option<Api>> {
        Ok(self.apis.get(id).map(|entry| entry.value().clone()))
    }

    async fn create(&self, api: Api) -> ManagementResult<Api> {
        if self.apis.contains_key(&api.id) {
            return Err(ManagementError::repository(
                "create_api",
                format!("API {} already exists", api.id),
            ));
        }
        self.apis.insert(api.id.clone(), api.clone());
        self.stats.api_creates.fetch_add(1, Ordering::Relaxed);
        Ok(api)
    }

    async fn update(&self, mut api: Api) -> ManagementResult<Api> {
        let mut entry = self
            .apis
            .get_mut(&api.id)
            .ok_or_else(|| ManagementError::ApiNotFound { api_id: api.id.clone() })?;
        api.created_at = entry.created_at;
        api.updated_at = Utc::now();
        *entry = api.clone();
        self.stats.api_updates.fetch_add(1, Ordering::Relaxed);
        Ok(api)
    }
}

#[async_trait]
impl MembershipRepository for InMemoryRepositories {
    async fn get_members(
        &self,
        reference: &MembershipReference,
        scope: RoleScope,
    ) -> ManagementResult<Vec<MemberEntity>> {
        Ok(self
            .memberships_of(reference)
            .iter()
            .filter_map(|m| to_member_entity(m, scope))
            .collect())
    }

    async fn find_by_reference_and_role(
        &self,
        reference: &MembershipReference,
        role: &MembershipRole,
    ) -> ManagementResult<Vec<Membership>> {
        Ok(self
            .memberships_of(reference)
            .into_iter()
            .filter(|m| m.roles.get(&role.scope) == Some(&role.name))
            .collect())
    }

    async fn add_or_update_member(
        &self,
        reference: &MembershipReference,
        user: &MembershipUser,
        role: &MembershipRole,
    ) -> ManagementResult<MemberEntity> {
        if !self.role_exists(role) {
            return Err(ManagementError::RoleNotFound {
                scope: role.scope.to_string(),
                name: role.name.clone(),
            });
        }

        let key = (reference.reference_type, reference.reference_id.clone(), user.id.clone());
        let now = Utc::now();

        let mut memberships = self.memberships.write();
        let membership = memberships.entry(key).or_insert_with(|| Membership {
            user_id: user.id.clone(),
            reference_type: reference.reference_type,
            reference_id: reference.reference_id.clone(),
            roles: BTreeMap::new(),
            user_reference: None,
            user_source: None,
            created_at: now,
            updated_at: now,
        });
        membership.roles.insert(role.scope, role.name.clone());
        if user.reference.is_some() {
            membership.user_reference = user.reference.clone();
        }
        if user.source.is_some() {
            membership.user_source = user.source.clone();
        }
        membership.updated_at = now;

        let entity = to_member_entity(membership, role.scope).ok_or_else(|| {
            ManagementError::internal("membership lost the role it was just given")
        })?;
        drop(memberships);

        self.stats.member_upserts.fetch_add(1, Ordering::Relaxed);
        Ok(entity)
    }
}

#[async_trait]
impl PageRepository for InMemoryRepositories {
    async fn search(&self, query: &PageQuery) -> ManagementResult<Vec<PageListItem>> {
        Ok(self
            .pages
            .read()
            .iter()
            .filter(|p| query.api.as_deref().map_or(true, |api| p.api_id == api))
            .filter(|p| query.name.as_deref().map_or(true, |name| p.name == name))
            .map(PageListItem::from)
            .collect())
    }

    async fn find_by_id(&self, page_id: &str) -> ManagementResult<Option<Page>> {
        Ok(self.pages.read().iter().find(|p| p.id == page_id).cloned())
    }

    async fn create_api_page(&self, api_id: &str, page: NewPage) -> ManagementResult<Page> {
        let now = Utc::now();
        let created = Page {
            id: Uuid::new_v4().to_string(),
            api_id: api_id.to_string(),
            name: page.name,
            page_type: page.page_type,
            content: page.content,
            order: page.order,
            published: page.published,
            homepage: page.homepage,
            configuration: page.configuration,
            source: page.source,
            last_contributor: page.last_contributor,
            created_at: now,
            updated_at: now,
        };
        self.pages.write().push(created.clone());
        self.stats.page_creates.fetch_add(1, Ordering::Relaxed);
        Ok(created)
    }

    async fn update(&self, page_id: &str, page: UpdatePage) -> ManagementResult<Page> {
        let mut pages = self.pages.write();
        let existing = pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| ManagementError::repository("update_page", format!("page {} not found", page_id)))?;

        existing.name = page.name;
        existing.content = page.content;
        existing.order = page.order;
        existing.published = page.published;
        existing.homepage = page.homepage;
        existing.configuration = page.configuration;
        existing.source = page.source;
        existing.last_contributor = page.last_contributor;
        existing.updated_at = Utc::now();
        let updated = existing.clone();
        drop(pages);

        self.stats.page_updates.fetch_add(1, Ordering::Relaxed);
        Ok(updated)
    }
}

#[async_trait]
impl PlanRepository for InMemoryRepositories {
    async fn search(&self, query: &PlanQuery) -> ManagementResult<Vec<Plan>> {
        Ok(self
            .plans
            .read()
            .iter()
            .filter(|p| query.api.as_deref().map_or(true, |api| p.api_id == api))
            .cloned()
            .collect())
    }

    async fn create(&self, plan: NewPlan) -> ManagementResult<Plan> {
        let now = Utc::now();
        let created = Plan {
            id: Uuid::new_v4().to_string(),
            api_id: plan.api_id,
            name: plan.name,
            description: plan.description,
            security: plan.security,
            security_definition: plan.security_definition,
            validation: plan.validation,
            status: plan.status,
            order: plan.order,
            characteristics: plan.characteristics,
            paths: plan.paths,
            tags: plan.tags,
            excluded_groups: plan.excluded_groups,
            selection_rule: plan.selection_rule,
            comment_required: plan.comment_required,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };
        self.plans.write().push(created.clone());
        self.stats.plan_creates.fetch_add(1, Ordering::Relaxed);
        Ok(created)
    }

    async fn update(&self, plan: UpdatePlan) -> ManagementResult<Plan> {
        let mut plans = self.plans.write();
        let existing = plans
            .iter_mut()
            .find(|p| p.id == plan.id)
            .ok_or_else(|| ManagementError::repository("update_plan", format!("plan {} not found", plan.id)))?;

        existing.name = plan.name;
        existing.description = plan.description;
        existing.security_definition = plan.security_definition;
        existing.validation = plan.validation;
        existing.order = plan.order;
        existing.characteristics = plan.characteristics;
        existing.paths = plan.paths;
        existing.tags = plan.tags;
        existing.excluded_groups = plan.excluded_groups;
        existing.selection_rule = plan.selection_rule;
        existing.comment_required = plan.comment_required;
        existing.updated_at = Utc::now();
        let updated = existing.clone();
        drop(plans);

        self.stats.plan_updates.fetch_add(1, Ordering::Relaxed);
        Ok(updated)
    }
}

#[async_trait]
impl GroupRepository for InMemoryRepositories {
    async fn find_by_ids(&self, ids: &BTreeSet<String>) -> ManagementResult<Vec<Group>> {
        Ok(self
            .groups
            .read()
            .iter()
            .filter(|g| ids.contains(&g.id))
            .cloned()
            .collect())
    }

    async fn find_by_name(&self, name: &str) -> ManagementResult<Option<Group>> {
        Ok(self.groups.read().iter().find(|g| g.name == name).cloned())
    }

    async fn create(&self, group: NewGroup) -> ManagementResult<Group> {
        let now = Utc::now();
        let created = Group {
            id: Uuid::new_v4().to_string(),
            name: group.name,
            created_at: now,
            updated_at: now,
        };
        self.groups.write().push(created.clone());
        self.stats.group_creates.fetch_add(1, Ordering::Relaxed);
        Ok(created)
    }
}

#[async_trait]
impl RoleRepository for InMemoryRepositories {
    async fn find_default_roles_by_scopes(&self, scopes: &[RoleScope]) -> ManagementResult<Vec<Role>> {
        let roles = self.roles.read();
        let defaults: Vec<Role> = scopes
            .iter()
            .flat_map(|scope| roles.iter().filter(move |r| r.scope == *scope && r.default_role))
            .cloned()
            .collect();
        Ok(defaults)
    }

    async fn find_by_id(&self, scope: RoleScope, name: &str) -> ManagementResult<Option<Role>> {
        Ok(self
            .roles
            .read()
            .iter()
            .find(|r| r.scope == scope && r.name == name)
            .cloned())
    }
}
