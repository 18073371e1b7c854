//! External login against a mocked userinfo endpoint

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use api_management::auth::ExternalAuthenticator;
use api_management::core::config::{MappingRuleConfig, OAuth2ProviderConfig};
use api_management::core::types::{Group, MembershipReference};
use api_management::identity::{IdentityLookup, IdentityReference, OAuth2IdentityLookup};
use api_management::repository::{InMemoryRepositories, RepositoryGateway};
use api_management::ManagementError;

async fn mount_userinfo(server: &MockServer, token: &str, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

struct Fixture {
    repositories: Arc<InMemoryRepositories>,
    identities: Arc<OAuth2IdentityLookup>,
    authenticator: ExternalAuthenticator,
}

fn fixture(server: &MockServer) -> Fixture {
    let repositories = Arc::new(InMemoryRepositories::new());
    repositories.insert_group(Group {
        id: "group-breakers".to_string(),
        name: "Breakers".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });

    let config = OAuth2ProviderConfig {
        source: "github".to_string(),
        userinfo_endpoint: format!("{}/userinfo", server.uri()),
        groups: vec![MappingRuleConfig {
            condition: "{#jsonPath(#profile, '$.job_id') == 'API_BREAKER'}".to_string(),
            values: vec!["Breakers".to_string()],
        }],
        ..Default::default()
    };
    let identities = Arc::new(OAuth2IdentityLookup::new("github"));
    let authenticator = ExternalAuthenticator::new(
        &config,
        Arc::clone(&identities),
        RepositoryGateway::in_memory(Arc::clone(&repositories)),
    )
    .unwrap();

    Fixture {
        repositories,
        identities,
        authenticator,
    }
}

#[tokio::test]
async fn test_connect_registers_user_and_applies_mappings() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "good-token",
        200,
        json!({
            "sub": "12345",
            "email": "jane@example.com",
            "given_name": "Jane",
            "family_name": "Doe",
            "job_id": "API_BREAKER"
        }),
    )
    .await;
    let fixture = fixture(&server);

    let login = fixture.authenticator.connect("good-token").await.unwrap();

    assert_eq!(login.user.id, "12345");
    assert_eq!(login.user.display_name, "Jane Doe");
    assert_eq!(login.user.source, "github");
    assert_eq!(login.mapping.groups.len(), 1);

    let registered = fixture
        .identities
        .retrieve(&IdentityReference::new("github", "12345"))
        .await
        .unwrap();
    assert_eq!(registered.email.as_deref(), Some("jane@example.com"));

    let memberships = fixture
        .repositories
        .memberships_of(&MembershipReference::group("group-breakers"));
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].user_source.as_deref(), Some("github"));
}

#[tokio::test]
async fn test_rejected_token_fails_authentication() {
    let server = MockServer::start().await;
    mount_userinfo(&server, "bad-token", 401, json!({"error": "invalid_token"})).await;
    let fixture = fixture(&server);

    let err = fixture.authenticator.connect("bad-token").await.unwrap_err();

    assert!(matches!(err, ManagementError::Authentication { .. }));
    assert!(fixture.repositories.memberships().is_empty());
}

#[tokio::test]
async fn test_profile_without_email_is_rejected() {
    let server = MockServer::start().await;
    mount_userinfo(&server, "token", 200, json!({"sub": "12345", "job_id": "API_BREAKER"})).await;
    let fixture = fixture(&server);

    let err = fixture.authenticator.connect("token").await.unwrap_err();

    assert!(matches!(err, ManagementError::Authentication { .. }));
    assert!(fixture
        .identities
        .retrieve(&IdentityReference::new("github", "12345"))
        .await
        .is_none());
    assert!(fixture.repositories.memberships().is_empty());
}

#[tokio::test]
async fn test_repeated_login_keeps_a_single_membership() {
    let server = MockServer::start().await;
    mount_userinfo(
        &server,
        "token",
        200,
        json!({"sub": "12345", "email": "jane@example.com", "job_id": "API_BREAKER"}),
    )
    .await;
    let fixture = fixture(&server);

    fixture.authenticator.connect("token").await.unwrap();
    let login = fixture.authenticator.connect("token").await.unwrap();

    assert_eq!(login.user.display_name, "jane@example.com");
    assert_eq!(
        fixture
            .repositories
            .memberships_of(&MembershipReference::group("group-breakers"))
            .len(),
        1
    );
}
