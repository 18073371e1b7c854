//! # Core Types Module
//!
//! This module defines the persisted entities the management plane works with: APIs and the
//! collections hanging off them (memberships, pages, plans), plus groups and roles.
//!
//! ## Ownership Model
//!
//! An [`Api`] owns its memberships, pages and plans *by reference*: each of them is persisted
//! independently and points back at the API id. Nothing here is composed into the API
//! record itself, which is why reconciliation works collection by collection.
//!
//! Collections that are emitted on the wire use ordered containers (`BTreeMap`,
//! `BTreeSet`) so that the same state always serializes the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::core::error::ManagementError;

/// Metadata key holding the export version tag of an API
pub const METADATA_EXPORT_VERSION: &str = "exportVersion";

/// Role name of the distinguished, unique owner of an API
pub const PRIMARY_OWNER: &str = "PRIMARY_OWNER";

/// Reference id used for environment-wide (MANAGEMENT / PORTAL) memberships
pub const DEFAULT_REFERENCE_ID: &str = "DEFAULT";

/// Visibility of an API in the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

/// Persisted API record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Api {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub tags: BTreeSet<String>,
    pub picture: Option<String>,
    pub proxy: Option<Value>,
    pub paths: BTreeMap<String, Value>,
    pub services: Option<Value>,
    pub resources: Vec<Value>,
    pub properties: Option<Value>,
    pub views: BTreeSet<String>,
    pub labels: Vec<String>,
    pub path_mappings: BTreeSet<String>,
    pub response_templates: Option<Value>,
    /// Ids of the groups the API belongs to
    pub groups: BTreeSet<String>,
    /// Internal metadata, never emitted on the export wire format
    #[serde(default, skip_serializing)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Api {
    /// Create an empty API record with the given identity
    pub fn new<I, N, V>(id: I, name: N, version: V) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        V: Into<String>,
    {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: None,
            visibility: Visibility::default(),
            tags: BTreeSet::new(),
            picture: None,
            proxy: None,
            paths: BTreeMap::new(),
            services: None,
            resources: Vec::new(),
            properties: None,
            views: BTreeSet::new(),
            labels: Vec::new(),
            path_mappings: BTreeSet::new(),
            response_templates: None,
            groups: BTreeSet::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The export version tag recorded on this API, if any
    pub fn export_version(&self) -> Option<&str> {
        self.metadata.get(METADATA_EXPORT_VERSION).map(String::as_str)
    }

    /// Record the export version tag
    pub fn set_export_version<S: Into<String>>(&mut self, version: S) {
        self.metadata
            .insert(METADATA_EXPORT_VERSION.to_string(), version.into());
    }
}

/// Kind of entity a membership points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MembershipReferenceType {
    Api,
    Application,
    Group,
    Management,
    Portal,
}

/// Scope a role applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleScope {
    Management,
    Portal,
    Api,
    Application,
}

impl RoleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleScope::Management => "MANAGEMENT",
            RoleScope::Portal => "PORTAL",
            RoleScope::Api => "API",
            RoleScope::Application => "APPLICATION",
        }
    }

    /// Reference type of the environment-wide membership carrying a role of this scope
    pub fn default_reference_type(&self) -> Option<MembershipReferenceType> {
        match self {
            RoleScope::Management => Some(MembershipReferenceType::Management),
            RoleScope::Portal => Some(MembershipReferenceType::Portal),
            RoleScope::Api | RoleScope::Application => None,
        }
    }
}

impl fmt::Display for RoleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleScope {
    type Err = ManagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MANAGEMENT" => Ok(RoleScope::Management),
            "PORTAL" => Ok(RoleScope::Portal),
            "API" => Ok(RoleScope::Api),
            "APPLICATION" => Ok(RoleScope::Application),
            other => Err(ManagementError::config(format!("Unknown role scope '{}'", other))),
        }
    }
}

/// The entity a membership is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipReference {
    pub reference_type: MembershipReferenceType,
    pub reference_id: String,
}

impl MembershipReference {
    pub fn new<S: Into<String>>(reference_type: MembershipReferenceType, reference_id: S) -> Self {
        Self {
            reference_type,
            reference_id: reference_id.into(),
        }
    }

    pub fn api<S: Into<String>>(api_id: S) -> Self {
        Self::new(MembershipReferenceType::Api, api_id)
    }

    pub fn group<S: Into<String>>(group_id: S) -> Self {
        Self::new(MembershipReferenceType::Group, group_id)
    }
}

/// The user side of a membership
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipUser {
    /// User id as known by the identity source
    pub id: String,
    /// External reference of the user (username, DN, subject)
    pub reference: Option<String>,
    /// Identity source the user comes from
    pub source: Option<String>,
}

impl MembershipUser {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            reference: None,
            source: None,
        }
    }

    pub fn with_reference<R: Into<String>>(mut self, reference: R) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_source<R: Into<String>>(mut self, source: R) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A role within a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipRole {
    pub scope: RoleScope,
    pub name: String,
}

impl MembershipRole {
    pub fn new<S: Into<String>>(scope: RoleScope, name: S) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

/// Persisted membership: unique on (reference type, reference id, user id),
/// holding at most one role per scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: String,
    pub reference_type: MembershipReferenceType,
    pub reference_id: String,
    pub roles: BTreeMap<RoleScope, String>,
    pub user_reference: Option<String>,
    pub user_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether a member is a user or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberType {
    User,
    Group,
}

/// Read projection of a membership for one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEntity {
    /// User id
    pub id: String,
    pub reference: Option<String>,
    pub source: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: String,
    pub member_type: MemberType,
    pub permissions: BTreeMap<String, Vec<char>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Type of documentation page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PageType {
    #[default]
    Markdown,
    Swagger,
    Raml,
    Folder,
}

/// Persisted documentation page of an API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub api_id: String,
    pub name: String,
    pub page_type: PageType,
    pub content: Option<String>,
    pub order: i32,
    pub published: bool,
    pub homepage: bool,
    pub configuration: BTreeMap<String, String>,
    pub source: Option<Value>,
    pub last_contributor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight page listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageListItem {
    pub id: String,
    pub name: String,
    pub page_type: PageType,
    pub order: i32,
    pub published: bool,
}

impl From<&Page> for PageListItem {
    fn from(page: &Page) -> Self {
        Self {
            id: page.id.clone(),
            name: page.name.clone(),
            page_type: page.page_type,
            order: page.order,
            published: page.published,
        }
    }
}

/// Command creating a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPage {
    pub name: String,
    pub page_type: PageType,
    pub content: Option<String>,
    pub order: i32,
    pub published: bool,
    pub homepage: bool,
    pub configuration: BTreeMap<String, String>,
    pub source: Option<Value>,
    pub last_contributor: Option<String>,
}

/// Command replacing the content of a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePage {
    pub name: String,
    pub content: Option<String>,
    pub order: i32,
    pub published: bool,
    pub homepage: bool,
    pub configuration: BTreeMap<String, String>,
    pub source: Option<Value>,
    pub last_contributor: Option<String>,
}

/// Page search criteria
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageQuery {
    pub api: Option<String>,
    pub name: Option<String>,
}

impl PageQuery {
    pub fn by_api<S: Into<String>>(api_id: S) -> Self {
        Self {
            api: Some(api_id.into()),
            name: None,
        }
    }
}

/// Lifecycle status of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    #[default]
    Staging,
    Published,
    Deprecated,
    Closed,
}

/// Security type of a plan, part of its natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PlanSecurityType {
    #[default]
    #[serde(rename = "KEY_LESS")]
    KeyLess,
    #[serde(rename = "API_KEY")]
    ApiKey,
    #[serde(rename = "OAUTH2")]
    OAuth2,
    #[serde(rename = "JWT")]
    Jwt,
}

/// Subscription validation mode of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanValidation {
    #[default]
    Auto,
    Manual,
}

/// Persisted plan of an API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub api_id: String,
    pub name: String,
    pub description: Option<String>,
    pub security: PlanSecurityType,
    pub security_definition: Option<String>,
    pub validation: PlanValidation,
    pub status: PlanStatus,
    pub order: i32,
    pub characteristics: Vec<String>,
    pub paths: BTreeMap<String, Value>,
    pub tags: BTreeSet<String>,
    pub excluded_groups: Vec<String>,
    pub selection_rule: Option<String>,
    pub comment_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Natural key used to match plans during reconciliation
    pub fn natural_key(&self) -> (String, PlanSecurityType) {
        (self.name.clone(), self.security)
    }
}

/// Command creating a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub api_id: String,
    pub name: String,
    pub description: Option<String>,
    pub security: PlanSecurityType,
    pub security_definition: Option<String>,
    pub validation: PlanValidation,
    pub status: PlanStatus,
    pub order: i32,
    pub characteristics: Vec<String>,
    pub paths: BTreeMap<String, Value>,
    pub tags: BTreeSet<String>,
    pub excluded_groups: Vec<String>,
    pub selection_rule: Option<String>,
    pub comment_required: bool,
}

/// Command updating a plan; security type and status are not changed by an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub security_definition: Option<String>,
    pub validation: PlanValidation,
    pub order: i32,
    pub characteristics: Vec<String>,
    pub paths: BTreeMap<String, Value>,
    pub tags: BTreeSet<String>,
    pub excluded_groups: Vec<String>,
    pub selection_rule: Option<String>,
    pub comment_required: bool,
}

/// Plan search criteria
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanQuery {
    pub api: Option<String>,
}

impl PlanQuery {
    pub fn by_api<S: Into<String>>(api_id: S) -> Self {
        Self {
            api: Some(api_id.into()),
        }
    }
}

/// Persisted user group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Command creating a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub scope: RoleScope,
    pub name: String,
    pub description: Option<String>,
    /// Assigned to new members of the scope when nothing else is specified
    pub default_role: bool,
    /// Built-in role that cannot be deleted
    pub system: bool,
}

impl Role {
    pub fn to_membership_role(&self) -> MembershipRole {
        MembershipRole::new(self.scope, self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_scope_parsing_is_case_insensitive() {
        assert_eq!("management".parse::<RoleScope>().unwrap(), RoleScope::Management);
        assert_eq!(" Portal ".parse::<RoleScope>().unwrap(), RoleScope::Portal);
        assert!("ENVIRONMENT".parse::<RoleScope>().is_err());
    }

    #[test]
    fn test_export_version_metadata_is_not_serialized() {
        let mut api = Api::new("id-api", "My API", "1.0");
        api.set_export_version("1.15");

        assert_eq!(api.export_version(), Some("1.15"));
        let json = serde_json::to_value(&api).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_plan_security_wire_names() {
        let json = serde_json::to_value(PlanSecurityType::KeyLess).unwrap();
        assert_eq!(json, serde_json::json!("KEY_LESS"));
        let parsed: PlanSecurityType = serde_json::from_value(serde_json::json!("OAUTH2")).unwrap();
        assert_eq!(parsed, PlanSecurityType::OAuth2);
    }
}
