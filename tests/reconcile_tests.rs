//! Integration tests for definition import and reconciliation

use serde_json::json;
use std::sync::Arc;

use api_management::core::config::{MemoryProviderConfig, MemoryUserConfig};
use api_management::core::types::{
    MembershipReference, NewPlan, PlanQuery, PlanSecurityType, PlanStatus, PlanValidation,
    RoleScope, PageQuery, PRIMARY_OWNER,
};
use api_management::identity::{IdentityResolver, IdentityService, InMemoryIdentityLookup};
use api_management::repository::{
    ApiRepository, InMemoryRepositories, PageRepository, PlanRepository, RepositoryGateway,
};
use api_management::{ApiReconciler, ManagementError};

fn user(username: &str) -> MemoryUserConfig {
    MemoryUserConfig {
        username: username.to_string(),
        firstname: None,
        lastname: None,
        email: Some(format!("{}@example.com", username)),
    }
}

fn setup() -> (Arc<InMemoryRepositories>, ApiReconciler) {
    let repositories = Arc::new(InMemoryRepositories::new());
    let directory = MemoryProviderConfig {
        source: "memory".to_string(),
        users: vec![user("admin"), user("alice"), user("bob")],
    };
    let identities = IdentityService::new(vec![IdentityResolver::InMemory(
        InMemoryIdentityLookup::from_config(&directory),
    )]);
    let reconciler = ApiReconciler::new(
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
        Arc::new(identities),
    );
    (repositories, reconciler)
}

fn definition(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

fn owner_and_intro() -> Vec<u8> {
    definition(json!({
        "name": "Echo",
        "version": "1.0",
        "members": [{"source": "memory", "reference": "alice", "role": "OWNER"}],
        "pages": [{"name": "intro", "type": "MARKDOWN", "content": "# Echo"}]
    }))
}

fn role_of(repositories: &InMemoryRepositories, api_id: &str, user_id: &str) -> Option<String> {
    repositories
        .memberships_of(&MembershipReference::api(api_id))
        .into_iter()
        .find(|m| m.user_id == user_id)
        .and_then(|m| m.roles.get(&RoleScope::Api).cloned())
}

#[tokio::test]
async fn test_first_import_creates_api_member_and_page() {
    let (repositories, reconciler) = setup();

    let api = reconciler.import(None, &owner_and_intro(), None).await.unwrap();
    let stats = repositories.stats().snapshot();

    assert_eq!(stats.api_creates, 1);
    assert_eq!(stats.member_upserts, 1);
    assert_eq!(stats.page_creates, 1);
    assert_eq!(stats.page_updates, 0);
    assert_eq!(role_of(&repositories, &api.id, "alice").as_deref(), Some("OWNER"));
    assert_eq!(api.export_version(), Some("default"));
}

#[tokio::test]
async fn test_second_import_issues_no_redundant_calls() {
    let (repositories, reconciler) = setup();

    let api = reconciler.import(None, &owner_and_intro(), None).await.unwrap();
    let before = repositories.stats().snapshot();

    reconciler
        .import(Some(&api.id), &owner_and_intro(), None)
        .await
        .unwrap();
    let delta = repositories.stats().snapshot().since(&before);

    assert_eq!(delta.api_creates, 0);
    assert_eq!(delta.member_upserts, 0);
    assert_eq!(delta.page_creates, 0);
    assert_eq!(delta.page_updates, 1);

    let pages = PageRepository::search(repositories.as_ref(), &PageQuery::by_api(api.id.clone()))
        .await
        .unwrap();
    assert_eq!(pages.len(), 1);
}

#[tokio::test]
async fn test_page_with_existing_name_is_updated_not_created() {
    let (repositories, reconciler) = setup();
    let api = reconciler
        .import(
            None,
            &definition(json!({"name": "Echo", "version": "1.0", "pages": [{"name": "toto", "content": "v1"}]})),
            None,
        )
        .await
        .unwrap();
    let before = repositories.stats().snapshot();

    reconciler
        .import(
            Some(&api.id),
            &definition(json!({"name": "Echo", "version": "1.0", "pages": [{"name": "toto", "content": "v2"}]})),
            None,
        )
        .await
        .unwrap();
    let delta = repositories.stats().snapshot().since(&before);

    assert_eq!(delta.page_updates, 1);
    assert_eq!(delta.page_creates, 0);

    let pages = PageRepository::search(repositories.as_ref(), &PageQuery::by_api(api.id.clone()))
        .await
        .unwrap();
    let page = PageRepository::find_by_id(repositories.as_ref(), &pages[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.content.as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_import_never_deletes() {
    let (repositories, reconciler) = setup();
    let api = reconciler
        .import(
            None,
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "members": [{"reference": "alice", "role": "OWNER"}],
                "pages": [{"name": "first"}]
            })),
            None,
        )
        .await
        .unwrap();

    reconciler
        .import(
            Some(&api.id),
            &definition(json!({"name": "Echo", "version": "1.1", "pages": [{"name": "second"}]})),
            None,
        )
        .await
        .unwrap();

    let pages = PageRepository::search(repositories.as_ref(), &PageQuery::by_api(api.id.clone()))
        .await
        .unwrap();
    let names: Vec<&str> = pages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert_eq!(role_of(&repositories, &api.id, "alice").as_deref(), Some("OWNER"));

    let stored = ApiRepository::find_by_id(repositories.as_ref(), &api.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, "1.1");
}

#[tokio::test]
async fn test_acting_user_becomes_primary_owner_on_create() {
    let (repositories, reconciler) = setup();

    let api = reconciler
        .import(None, &owner_and_intro(), Some("admin"))
        .await
        .unwrap();

    assert_eq!(role_of(&repositories, &api.id, "admin").as_deref(), Some(PRIMARY_OWNER));
    assert_eq!(role_of(&repositories, &api.id, "alice").as_deref(), Some("OWNER"));
}

#[tokio::test]
async fn test_primary_owner_is_never_replaced() {
    let (repositories, reconciler) = setup();
    let api = reconciler
        .import(None, &definition(json!({"name": "Echo", "version": "1.0"})), Some("admin"))
        .await
        .unwrap();
    let before = repositories.stats().snapshot();

    reconciler
        .import(
            Some(&api.id),
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "members": [
                    {"reference": "admin", "role": "OWNER"},
                    {"reference": "bob", "role": "PRIMARY_OWNER"}
                ]
            })),
            Some("alice"),
        )
        .await
        .unwrap();

    let delta = repositories.stats().snapshot().since(&before);
    assert_eq!(delta.member_upserts, 0);
    assert_eq!(role_of(&repositories, &api.id, "admin").as_deref(), Some(PRIMARY_OWNER));
    assert_eq!(role_of(&repositories, &api.id, "bob"), None);
    assert_eq!(role_of(&repositories, &api.id, "alice"), None);
}

#[tokio::test]
async fn test_member_role_change_is_applied() {
    let (repositories, reconciler) = setup();
    let api = reconciler.import(None, &owner_and_intro(), None).await.unwrap();

    reconciler
        .import(
            Some(&api.id),
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "members": [{"reference": "alice", "role": "user"}]
            })),
            None,
        )
        .await
        .unwrap();

    assert_eq!(role_of(&repositories, &api.id, "alice").as_deref(), Some("USER"));
}

#[tokio::test]
async fn test_unresolvable_member_aborts_before_any_write() {
    let (repositories, reconciler) = setup();

    let err = reconciler
        .import(
            None,
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "groups": ["Developers"],
                "members": [
                    {"reference": "alice", "role": "OWNER"},
                    {"reference": "ghost", "role": "OWNER"}
                ],
                "pages": [{"name": "intro"}]
            })),
            Some("admin"),
        )
        .await
        .unwrap_err();

    assert_eq!(err, ManagementError::unresolvable_member("ghost"));
    assert_eq!(repositories.stats().snapshot().total_mutations(), 0);
    assert!(repositories.memberships().is_empty());
}

#[tokio::test]
async fn test_unknown_member_role_aborts_before_any_write() {
    let (repositories, reconciler) = setup();

    let err = reconciler
        .import(
            None,
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "groups": ["Dev"],
                "members": [{"reference": "alice", "role": "OWNR"}],
                "pages": [{"name": "intro"}]
            })),
            Some("admin"),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ManagementError::RoleNotFound {
            scope: "API".to_string(),
            name: "OWNR".to_string()
        }
    );
    assert_eq!(repositories.stats().snapshot().total_mutations(), 0);
    assert!(repositories.memberships().is_empty());
}

#[tokio::test]
async fn test_update_of_unknown_api_fails() {
    let (repositories, reconciler) = setup();

    let err = reconciler
        .import(Some("missing"), &owner_and_intro(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ManagementError::ApiNotFound { .. }));
    assert_eq!(repositories.stats().snapshot().total_mutations(), 0);
}

#[tokio::test]
async fn test_malformed_definition_is_rejected() {
    let (repositories, reconciler) = setup();

    for raw in [&b"{\"name\": "[..], &b""[..], &b"{\"version\": \"1.0\"}"[..]] {
        let err = reconciler.import(None, raw, None).await.unwrap_err();
        assert!(matches!(err, ManagementError::MalformedDefinition { .. }), "{:?}", err);
    }
    assert_eq!(repositories.stats().snapshot().total_mutations(), 0);
}

#[tokio::test]
async fn test_yaml_definition_is_accepted() {
    let (repositories, reconciler) = setup();
    let raw = b"name: Echo\nversion: '2.0'\nmembers:\n  - reference: bob\n    role: OWNER\n";

    let api = reconciler.import(None, raw, None).await.unwrap();

    assert_eq!(api.version, "2.0");
    assert_eq!(role_of(&repositories, &api.id, "bob").as_deref(), Some("OWNER"));
}

#[tokio::test]
async fn test_groups_are_created_once_and_attached() {
    let (repositories, reconciler) = setup();
    let raw = definition(json!({"name": "Echo", "version": "1.0", "groups": ["Developers"]}));

    let api = reconciler.import(None, &raw, None).await.unwrap();
    assert_eq!(api.groups.len(), 1);

    let before = repositories.stats().snapshot();
    let updated = reconciler.import(Some(&api.id), &raw, None).await.unwrap();

    assert_eq!(repositories.stats().snapshot().since(&before).group_creates, 0);
    assert_eq!(updated.groups, api.groups);
}

fn plan(name: &str, security: &str) -> serde_json::Value {
    json!({"name": name, "security": security, "validation": "AUTO", "status": "PUBLISHED"})
}

#[tokio::test]
async fn test_plans_match_by_name_and_security() {
    let (repositories, reconciler) = setup();
    let api = reconciler
        .import(
            None,
            &definition(json!({"name": "Echo", "version": "1.0", "plans": [plan("Free", "KEY_LESS")]})),
            None,
        )
        .await
        .unwrap();
    let before = repositories.stats().snapshot();

    reconciler
        .import(
            Some(&api.id),
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "plans": [plan("Free", "KEY_LESS"), plan("Free", "API_KEY")]
            })),
            None,
        )
        .await
        .unwrap();

    let delta = repositories.stats().snapshot().since(&before);
    assert_eq!(delta.plan_updates, 1);
    assert_eq!(delta.plan_creates, 1);

    let plans = PlanRepository::search(repositories.as_ref(), &PlanQuery::by_api(api.id.clone()))
        .await
        .unwrap();
    assert_eq!(plans.len(), 2);
}

#[tokio::test]
async fn test_closed_plan_is_not_reused() {
    let (repositories, reconciler) = setup();
    let api = reconciler
        .import(None, &definition(json!({"name": "Echo", "version": "1.0"})), None)
        .await
        .unwrap();

    PlanRepository::create(
        repositories.as_ref(),
        NewPlan {
            api_id: api.id.clone(),
            name: "Free".to_string(),
            description: None,
            security: PlanSecurityType::KeyLess,
            security_definition: None,
            validation: PlanValidation::Auto,
            status: PlanStatus::Closed,
            order: 0,
            characteristics: Vec::new(),
            paths: Default::default(),
            tags: Default::default(),
            excluded_groups: Vec::new(),
            selection_rule: None,
            comment_required: false,
        },
    )
    .await
    .unwrap();
    let before = repositories.stats().snapshot();

    reconciler
        .import(
            Some(&api.id),
            &definition(json!({"name": "Echo", "version": "1.0", "plans": [plan("Free", "KEY_LESS")]})),
            None,
        )
        .await
        .unwrap();

    let delta = repositories.stats().snapshot().since(&before);
    assert_eq!(delta.plan_creates, 1);
    assert_eq!(delta.plan_updates, 0);
}

#[tokio::test]
async fn test_duplicate_keys_in_definition_keep_first() {
    let (repositories, reconciler) = setup();

    let api = reconciler
        .import(
            None,
            &definition(json!({
                "name": "Echo",
                "version": "1.0",
                "members": [
                    {"reference": "alice", "role": "OWNER"},
                    {"reference": "alice", "role": "USER"}
                ],
                "pages": [{"name": "intro", "content": "a"}, {"name": "intro", "content": "b"}]
            })),
            None,
        )
        .await
        .unwrap();

    let stats = repositories.stats().snapshot();
    assert_eq!(stats.member_upserts, 1);
    assert_eq!(stats.page_creates, 1);
    assert_eq!(role_of(&repositories, &api.id, "alice").as_deref(), Some("OWNER"));
}
