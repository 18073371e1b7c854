//! # Repository Module
//!
//! Persistence contracts the import/export engine reads current state from and writes
//! mutations to. Implementations own their consistency guarantees; the engine imposes no
//! locking of its own.
//!
//! [`RepositoryGateway`] bundles one implementation of each contract so services can be
//! wired with a single cheap-to-clone value.

pub mod memory;

pub use memory::{InMemoryRepositories, RepositoryStats, RepositoryStatsSnapshot};

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::error::ManagementResult;
use crate::core::types::{
    Api, Group, MemberEntity, Membership, MembershipReference, MembershipRole, MembershipUser,
    NewGroup, NewPage, NewPlan, Page, PageListItem, PageQuery, Plan, PlanQuery, Role, RoleScope,
    UpdatePage, UpdatePlan,
};

#[async_trait]
pub trait ApiRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ManagementResult<Option<Api>>;

    async fn create(&self, api: Api) -> ManagementResult<Api>;

    /// Replace a persisted API; fails with `ApiNotFound` when it does not exist
    async fn update(&self, api: Api) -> ManagementResult<Api>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Members holding a role of `scope` on the reference
    async fn get_members(
        &self,
        reference: &MembershipReference,
        scope: RoleScope,
    ) -> ManagementResult<Vec<MemberEntity>>;

    /// Memberships on the reference holding exactly `role`
    async fn find_by_reference_and_role(
        &self,
        reference: &MembershipReference,
        role: &MembershipRole,
    ) -> ManagementResult<Vec<Membership>>;

    /// Create the membership or replace the role it holds in the role's scope
    async fn add_or_update_member(
        &self,
        reference: &MembershipReference,
        user: &MembershipUser,
        role: &MembershipRole,
    ) -> ManagementResult<MemberEntity>;
}

#[async_trait]
pub trait PageRepository: Send + Sync {
    async fn search(&self, query: &PageQuery) -> ManagementResult<Vec<PageListItem>>;

    async fn find_by_id(&self, page_id: &str) -> ManagementResult<Option<Page>>;

    async fn create_api_page(&self, api_id: &str, page: NewPage) -> ManagementResult<Page>;

    async fn update(&self, page_id: &str, page: UpdatePage) -> ManagementResult<Page>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn search(&self, query: &PlanQuery) -> ManagementResult<Vec<Plan>>;

    async fn create(&self, plan: NewPlan) -> ManagementResult<Plan>;

    async fn update(&self, plan: UpdatePlan) -> ManagementResult<Plan>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_by_ids(&self, ids: &BTreeSet<String>) -> ManagementResult<Vec<Group>>;

    async fn find_by_name(&self, name: &str) -> ManagementResult<Option<Group>>;

    async fn create(&self, group: NewGroup) -> ManagementResult<Group>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Default roles of the given scopes, in scope order
    async fn find_default_roles_by_scopes(&self, scopes: &[RoleScope]) -> ManagementResult<Vec<Role>>;

    async fn find_by_id(&self, scope: RoleScope, name: &str) -> ManagementResult<Option<Role>>;
}

/// One implementation of every repository contract
#[derive(Clone)]
pub struct RepositoryGateway {
    pub apis: Arc<dyn ApiRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub pages: Arc<dyn PageRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub roles: Arc<dyn RoleRepository>,
}

impl RepositoryGateway {
    /// Gateway whose every contract is served by the same in-memory store
    pub fn in_memory(store: Arc<InMemoryRepositories>) -> Self {
        Self {
            apis: store.clone(),
            memberships: store.clone(),
            pages: store.clone(),
            plans: store.clone(),
            groups: store.clone(),
            roles: store,
        }
    }
}
