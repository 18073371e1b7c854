//! Integration tests for group and role mapping of external profiles

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use api_management::core::config::MappingRuleConfig;
use api_management::core::types::{
    Group, MembershipReference, MembershipReferenceType, MembershipUser, RoleScope,
    DEFAULT_REFERENCE_ID,
};
use api_management::mapping::GroupRoleMapper;
use api_management::repository::{InMemoryRepositories, RepositoryGateway};
use api_management::ManagementError;

fn rule(condition: &str, values: &[&str]) -> MappingRuleConfig {
    MappingRuleConfig {
        condition: condition.to_string(),
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

fn store_with_groups(names: &[&str]) -> Arc<InMemoryRepositories> {
    let repositories = Arc::new(InMemoryRepositories::new());
    for name in names {
        repositories.insert_group(Group {
            id: format!("group-{}", name.to_lowercase()),
            name: name.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
    }
    repositories
}

fn jane() -> MembershipUser {
    MembershipUser::new("jane").with_reference("jane").with_source("oauth2")
}

fn profile() -> serde_json::Value {
    json!({
        "sub": "jane",
        "job_id": "API_BREAKER",
        "department": "engineering",
        "admin": true
    })
}

#[tokio::test]
async fn test_every_matching_rule_contributes() {
    let repositories = store_with_groups(&["Breakers", "Engineers"]);
    let mapper = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
        &[
            rule("{#jsonPath(#profile, '$.job_id') == 'API_BREAKER'}", &["Breakers"]),
            rule("{#profile['department'] == 'engineering'}", &["Engineers"]),
            rule("{#profile['department'] == 'sales'}", &["Sales"]),
        ],
        &[],
    )
    .unwrap();

    let outcome = mapper.apply(&jane(), &profile()).await.unwrap();

    let names: Vec<&str> = outcome.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["Breakers", "Engineers"]);
    // API and APPLICATION default roles for each group
    assert_eq!(outcome.memberships_applied, 4);

    for group_id in ["group-breakers", "group-engineers"] {
        let memberships = repositories.memberships_of(&MembershipReference::group(group_id));
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].user_id, "jane");
        assert_eq!(memberships[0].roles.get(&RoleScope::Api).map(String::as_str), Some("USER"));
        assert_eq!(
            memberships[0].roles.get(&RoleScope::Application).map(String::as_str),
            Some("USER")
        );
    }
}

#[tokio::test]
async fn test_missing_group_leaves_memberships_untouched() {
    let repositories = store_with_groups(&["Breakers"]);
    let mapper = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
        &[rule("true", &["Breakers", "Ghosts"])],
        &[rule("true", &["MANAGEMENT:ADMIN"])],
    )
    .unwrap();

    let err = mapper.apply(&jane(), &profile()).await.unwrap_err();

    assert_eq!(err, ManagementError::GroupNotFound { name: "Ghosts".to_string() });
    assert!(repositories.memberships().is_empty());
}

#[tokio::test]
async fn test_missing_role_leaves_memberships_untouched() {
    let repositories = store_with_groups(&["Breakers"]);
    let mapper = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
        &[rule("true", &["Breakers"])],
        &[rule("true", &["PORTAL:WRITER"])],
    )
    .unwrap();

    let err = mapper.apply(&jane(), &profile()).await.unwrap_err();

    assert!(matches!(err, ManagementError::RoleNotFound { .. }));
    assert!(repositories.memberships().is_empty());
}

#[tokio::test]
async fn test_roles_are_applied_on_default_environment() {
    let repositories = store_with_groups(&[]);
    let mapper = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
        &[],
        &[
            rule("{#profile['admin'] == true}", &["MANAGEMENT:ADMIN", "portal:admin"]),
            rule("{#profile['admin'] == false}", &["PORTAL:USER"]),
        ],
    )
    .unwrap();

    let outcome = mapper.apply(&jane(), &profile()).await.unwrap();
    assert_eq!(outcome.roles.len(), 2);
    assert_eq!(outcome.memberships_applied, 2);

    let management = repositories.memberships_of(&MembershipReference::new(
        MembershipReferenceType::Management,
        DEFAULT_REFERENCE_ID,
    ));
    assert_eq!(management.len(), 1);
    assert_eq!(
        management[0].roles.get(&RoleScope::Management).map(String::as_str),
        Some("ADMIN")
    );

    let portal = repositories.memberships_of(&MembershipReference::new(
        MembershipReferenceType::Portal,
        DEFAULT_REFERENCE_ID,
    ));
    assert_eq!(portal[0].roles.get(&RoleScope::Portal).map(String::as_str), Some("ADMIN"));
}

#[test]
fn test_invalid_condition_fails_at_load_time() {
    let result = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::new(InMemoryRepositories::new())),
        &[rule("Some Soup", &["Breakers"])],
        &[],
    );

    assert!(matches!(
        result,
        Err(ManagementError::InvalidMappingExpression { .. })
    ));
}

#[test]
fn test_api_scoped_role_values_are_rejected() {
    let result = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::new(InMemoryRepositories::new())),
        &[],
        &[rule("true", &["API:OWNER"])],
    );

    assert!(matches!(result, Err(ManagementError::Configuration { .. })));
}

#[tokio::test]
async fn test_no_matching_rule_applies_nothing() {
    let repositories = store_with_groups(&["Breakers"]);
    let mapper = GroupRoleMapper::new(
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
        &[rule("{#profile['department'] == 'sales'}", &["Breakers"])],
        &[],
    )
    .unwrap();

    let outcome = mapper.apply(&jane(), &json!({})).await.unwrap();

    assert!(outcome.groups.is_empty());
    assert_eq!(outcome.memberships_applied, 0);
    assert!(repositories.memberships().is_empty());
}
