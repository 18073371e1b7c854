//! # Management Admin Interface
//!
//! HTTP surface of the management plane: definition import, API lookup, export and
//! external login.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{ExternalAuthenticator, ExternalLogin};
use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::{Api, Group, MembershipRole};
use crate::export::{parse_filtered_fields, ExportVersion, SerializerChain};
use crate::identity::User;
use crate::reconcile::ApiReconciler;
use crate::repository::RepositoryGateway;

/// Header naming the user performing an import
pub const ACTING_USER_HEADER: &str = "x-acting-user";

/// Shared state of the admin handlers
#[derive(Clone)]
pub struct ManagementState {
    pub reconciler: Arc<ApiReconciler>,
    pub exporter: SerializerChain,
    pub gateway: RepositoryGateway,
    /// Version used when an export request does not name one
    pub default_export_version: ExportVersion,
    /// External authenticators keyed by lower-cased source
    pub authenticators: Arc<HashMap<String, Arc<ExternalAuthenticator>>>,
}

impl ManagementState {
    pub fn new(
        reconciler: Arc<ApiReconciler>,
        gateway: RepositoryGateway,
        default_export_version: ExportVersion,
    ) -> Self {
        Self {
            reconciler,
            exporter: SerializerChain::new(gateway.clone()),
            gateway,
            default_export_version,
            authenticators: Arc::new(HashMap::new()),
        }
    }

    pub fn with_authenticators(mut self, authenticators: Vec<ExternalAuthenticator>) -> Self {
        let keyed = authenticators
            .into_iter()
            .map(|authenticator| (authenticator.source().to_lowercase(), Arc::new(authenticator)))
            .collect();
        self.authenticators = Arc::new(keyed);
        self
    }
}

/// Management admin router
pub struct ManagementRouter;

impl ManagementRouter {
    /// Create the management router
    pub fn create_router(state: ManagementState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/apis/import", post(import_api))
            .route("/apis/:api_id", get(get_api))
            .route("/apis/:api_id/import", put(update_api))
            .route("/apis/:api_id/export", get(export_api))
            .route("/auth/:source/connect", post(connect))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Export query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    /// Requested export version; the API's own tag is used when absent
    pub version: Option<String>,
    /// Comma-separated sections to leave out
    pub exclude: Option<String>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub external_providers: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// External login response
#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub user: User,
    pub groups: Vec<String>,
    pub roles: Vec<MembershipRole>,
    pub memberships_applied: usize,
}

impl From<ExternalLogin> for ConnectResponse {
    fn from(login: ExternalLogin) -> Self {
        Self {
            user: login.user,
            groups: login.mapping.groups.into_iter().map(|group: Group| group.name).collect(),
            roles: login.mapping.roles,
            memberships_applied: login.mapping.memberships_applied,
        }
    }
}

fn acting_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTING_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> ManagementResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ManagementError::auth("missing bearer token"))
}

async fn health(State(state): State<ManagementState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        external_providers: state.authenticators.len(),
        timestamp: chrono::Utc::now(),
    })
}

/// Create an API from a definition
pub async fn import_api(
    State(state): State<ManagementState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Api>), ManagementError> {
    let user = acting_user(&headers);
    let api = state.reconciler.import(None, &body, user.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(api)))
}

/// Reconcile an existing API with a definition
pub async fn update_api(
    State(state): State<ManagementState>,
    Path(api_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Api>, ManagementError> {
    let user = acting_user(&headers);
    let api = state
        .reconciler
        .import(Some(&api_id), &body, user.as_deref())
        .await?;
    Ok(Json(api))
}

async fn find_api(gateway: &RepositoryGateway, api_id: &str) -> ManagementResult<Api> {
    gateway
        .apis
        .find_by_id(api_id)
        .await?
        .ok_or_else(|| ManagementError::ApiNotFound {
            api_id: api_id.to_string(),
        })
}

pub async fn get_api(
    State(state): State<ManagementState>,
    Path(api_id): Path<String>,
) -> Result<Json<Api>, ManagementError> {
    Ok(Json(find_api(&state.gateway, &api_id).await?))
}

/// Export an API as a definition document
pub async fn export_api(
    State(state): State<ManagementState>,
    Path(api_id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Json<serde_json::Value>, ManagementError> {
    let api = find_api(&state.gateway, &api_id).await?;
    let filtered = params
        .exclude
        .as_deref()
        .map(parse_filtered_fields)
        .unwrap_or_default();

    let document = match params.version.as_deref() {
        Some(version) => {
            let version: ExportVersion = version.parse()?;
            state.exporter.export(&api, version, &filtered).await?
        }
        None => {
            state
                .exporter
                .serialize(&api, state.default_export_version, &filtered)
                .await?
        }
    };

    info!(api_id = %api.id, "API exported");
    Ok(Json(document))
}

/// Complete an external login with the caller's access token
pub async fn connect(
    State(state): State<ManagementState>,
    Path(source): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConnectResponse>, ManagementError> {
    let authenticator = state
        .authenticators
        .get(&source.to_lowercase())
        .cloned()
        .ok_or_else(|| ManagementError::auth(format!("unknown identity provider '{}'", source)))?;

    let login = authenticator.connect(bearer_token(&headers)?).await?;
    Ok(Json(login.into()))
}
