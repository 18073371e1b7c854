//! Integration tests for versioned API export

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use api_management::core::error::ManagementResult;
use api_management::core::types::{
    Api, MemberEntity, MemberType, Membership, MembershipReference, MembershipRole, MembershipUser,
    NewPage, NewPlan, PageType, PlanSecurityType, PlanStatus, PlanValidation, RoleScope,
};
use api_management::export::{parse_filtered_fields, ApiSerializer, ExportVersion, SerializerChain};
use api_management::repository::{
    ApiRepository, InMemoryRepositories, MembershipRepository, PageRepository, PlanRepository,
    RepositoryGateway,
};
use api_management::ManagementError;

/// Membership store that reports full user details, including fields an export must hide
struct DetailedMemberships;

#[async_trait]
impl MembershipRepository for DetailedMemberships {
    async fn get_members(
        &self,
        _reference: &MembershipReference,
        _scope: RoleScope,
    ) -> ManagementResult<Vec<MemberEntity>> {
        let member = |id: &str, role: &str| MemberEntity {
            id: id.to_string(),
            reference: Some(format!("{}-ref", id)),
            source: Some("ldap".to_string()),
            display_name: Some(id.to_uppercase()),
            email: Some(format!("{}@example.com", id)),
            role: role.to_string(),
            member_type: MemberType::User,
            permissions: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        Ok(vec![member("zoe", "USER"), member("adam", "OWNER")])
    }

    async fn find_by_reference_and_role(
        &self,
        _reference: &MembershipReference,
        _role: &MembershipRole,
    ) -> ManagementResult<Vec<Membership>> {
        Ok(Vec::new())
    }

    async fn add_or_update_member(
        &self,
        _reference: &MembershipReference,
        _user: &MembershipUser,
        _role: &MembershipRole,
    ) -> ManagementResult<MemberEntity> {
        Err(ManagementError::internal("read only"))
    }
}

fn page(name: &str, order: i32) -> NewPage {
    NewPage {
        name: name.to_string(),
        page_type: PageType::Markdown,
        content: Some(format!("# {}", name)),
        order,
        published: true,
        homepage: false,
        configuration: BTreeMap::new(),
        source: None,
        last_contributor: None,
    }
}

fn plan(api_id: &str, name: &str, status: PlanStatus) -> NewPlan {
    NewPlan {
        api_id: api_id.to_string(),
        name: name.to_string(),
        description: None,
        security: PlanSecurityType::ApiKey,
        security_definition: None,
        validation: PlanValidation::Manual,
        status,
        order: 1,
        characteristics: Vec::new(),
        paths: BTreeMap::new(),
        tags: ["public".to_string()].into_iter().collect(),
        excluded_groups: Vec::new(),
        selection_rule: None,
        comment_required: true,
    }
}

async fn seeded(version: Option<&str>) -> (Arc<InMemoryRepositories>, Api) {
    let repositories = Arc::new(InMemoryRepositories::new());
    let mut api = Api::new("api-1", "Echo", "1.0");
    api.path_mappings.insert("/users/:id".to_string());
    if let Some(version) = version {
        api.set_export_version(version);
    }
    let api = ApiRepository::create(repositories.as_ref(), api).await.unwrap();

    PageRepository::create_api_page(repositories.as_ref(), &api.id, page("zeta", 1))
        .await
        .unwrap();
    PageRepository::create_api_page(repositories.as_ref(), &api.id, page("alpha", 1))
        .await
        .unwrap();
    PlanRepository::create(repositories.as_ref(), plan(&api.id, "Gold", PlanStatus::Published))
        .await
        .unwrap();
    PlanRepository::create(repositories.as_ref(), plan(&api.id, "Legacy", PlanStatus::Closed))
        .await
        .unwrap();

    (repositories, api)
}

fn detailed_gateway(repositories: Arc<InMemoryRepositories>) -> RepositoryGateway {
    RepositoryGateway {
        memberships: Arc::new(DetailedMemberships),
        ..RepositoryGateway::in_memory(repositories)
    }
}

#[tokio::test]
async fn test_tagged_version_wins_regardless_of_registration_order() {
    let (repositories, api) = seeded(Some("1.15")).await;
    let gateway = RepositoryGateway::in_memory(repositories);

    for order in [
        vec![ExportVersion::Default, ExportVersion::V1_15],
        vec![ExportVersion::V1_15, ExportVersion::Default],
    ] {
        let chain = SerializerChain::with_serializers(
            gateway.clone(),
            order.into_iter().map(ApiSerializer::new).collect(),
        );

        assert_eq!(chain.select(&api).unwrap().version(), ExportVersion::V1_15);
        let document = chain
            .serialize(&api, ExportVersion::Default, &Default::default())
            .await
            .unwrap();
        assert!(document.get("path_mappings").is_none());
        assert!(document["plans"][0].get("tags").is_none());
    }
}

#[tokio::test]
async fn test_member_projection_hides_email_and_id() {
    let (repositories, api) = seeded(Some("1.15")).await;
    let chain = SerializerChain::new(detailed_gateway(repositories));

    let document = chain
        .serialize(&api, ExportVersion::Default, &Default::default())
        .await
        .unwrap();

    assert_eq!(
        document["members"],
        json!([
            {"source": "ldap", "reference": "adam-ref", "role": "OWNER", "type": "USER"},
            {"source": "ldap", "reference": "zoe-ref", "role": "USER", "type": "USER"}
        ])
    );
    for member in document["members"].as_array().unwrap() {
        assert!(member.get("email").is_none());
        assert!(member.get("id").is_none());
        assert!(member.get("display_name").is_none());
    }
}

#[tokio::test]
async fn test_default_export_content() {
    let (repositories, api) = seeded(None).await;
    let chain = SerializerChain::new(RepositoryGateway::in_memory(repositories));

    let document = chain
        .serialize(&api, ExportVersion::Default, &Default::default())
        .await
        .unwrap();

    assert_eq!(document["name"], "Echo");
    assert_eq!(document["path_mappings"], json!(["/users/:id"]));
    assert!(document.get("members").is_none());
    assert!(document.get("id").is_none());

    let pages: Vec<&Value> = document["pages"].as_array().unwrap().iter().collect();
    assert_eq!(pages[0]["name"], "alpha");
    assert_eq!(pages[1]["name"], "zeta");
    assert!(pages.iter().all(|page| page.get("id").is_none()));

    let plans = document["plans"].as_array().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0]["name"], "Gold");
    assert_eq!(plans[0]["tags"], json!(["public"]));
    assert_eq!(plans[0]["comment_required"], true);
}

#[tokio::test]
async fn test_export_is_deterministic() {
    let (repositories, api) = seeded(None).await;
    let chain = SerializerChain::new(RepositoryGateway::in_memory(repositories));

    let first = chain
        .export(&api, ExportVersion::V1_15, &Default::default())
        .await
        .unwrap();
    let second = chain
        .export(&api, ExportVersion::V1_15, &Default::default())
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn test_filtered_sections_are_left_out() {
    let (repositories, api) = seeded(None).await;
    let chain = SerializerChain::new(detailed_gateway(repositories));

    let document = chain
        .export(&api, ExportVersion::Default, &parse_filtered_fields("members, plans,unknown"))
        .await
        .unwrap();

    assert!(document.get("members").is_none());
    assert!(document.get("plans").is_none());
    assert!(document.get("pages").is_some());
}

#[tokio::test]
async fn test_unknown_tag_has_no_serializer() {
    let (repositories, api) = seeded(Some("0.9")).await;
    let chain = SerializerChain::new(RepositoryGateway::in_memory(repositories));

    let err = chain
        .serialize(&api, ExportVersion::Default, &Default::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ManagementError::NoSerializerForVersion {
            version: "0.9".to_string()
        }
    );
}

#[tokio::test]
async fn test_reimport_of_export_is_a_no_op() {
    use api_management::core::config::{MemoryProviderConfig, MemoryUserConfig};
    use api_management::identity::{IdentityResolver, IdentityService, InMemoryIdentityLookup};
    use api_management::ApiReconciler;

    let repositories = Arc::new(InMemoryRepositories::new());
    let gateway = RepositoryGateway::in_memory(Arc::clone(&repositories));
    let directory = MemoryProviderConfig {
        source: "memory".to_string(),
        users: vec![MemoryUserConfig {
            username: "alice".to_string(),
            firstname: None,
            lastname: None,
            email: None,
        }],
    };
    let reconciler = ApiReconciler::new(
        gateway.clone(),
        Arc::new(IdentityService::new(vec![IdentityResolver::InMemory(
            InMemoryIdentityLookup::from_config(&directory),
        )])),
    );

    let raw = serde_json::to_vec(&json!({
        "name": "Echo",
        "version": "1.0",
        "members": [{"source": "memory", "reference": "alice", "role": "OWNER"}],
        "pages": [{"name": "intro"}],
        "plans": [{"name": "Free", "security": "KEY_LESS", "status": "PUBLISHED"}]
    }))
    .unwrap();
    let api = reconciler.import(None, &raw, None).await.unwrap();

    let exported = SerializerChain::new(gateway)
        .serialize(&api, ExportVersion::Default, &Default::default())
        .await
        .unwrap();
    let before = repositories.stats().snapshot();

    reconciler
        .import(Some(&api.id), &serde_json::to_vec(&exported).unwrap(), None)
        .await
        .unwrap();
    let delta = repositories.stats().snapshot().since(&before);

    assert_eq!(delta.member_upserts, 0);
    assert_eq!(delta.page_creates, 0);
    assert_eq!(delta.plan_creates, 0);
}
