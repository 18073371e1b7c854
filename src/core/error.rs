//! # Error Handling Module
//!
//! This module provides the error taxonomy of the management plane using the `thiserror` crate.
//! Every operation of the import/export engine returns a [`ManagementResult`], and every
//! error knows which HTTP status a transport layer should surface for it.
//!
//! ## Error Classes
//!
//! - Client errors: the caller sent something we cannot interpret (a malformed definition).
//! - Processing errors: the definition is well-formed but cannot be applied (a member no
//!   identity provider knows about, a group mapping pointing at a missing group).
//! - Infrastructure errors: repositories, identity providers, I/O.
//!
//! The engine never retries internally; errors are reported synchronously to the caller,
//! which owns any compensating action.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the management plane
pub type ManagementResult<T> = Result<T, ManagementError>;

/// Error types for the management plane
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display`
/// with the specified message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ManagementError {
    /// The API definition is not valid JSON/YAML or misses required fields
    #[error("Malformed API definition: {reason}")]
    MalformedDefinition { reason: String },

    /// A member referenced by a definition is unknown to every identity provider
    #[error("Member '{reference}' cannot be resolved by any identity provider")]
    UnresolvableMember { reference: String },

    /// A group/role mapping condition does not compile
    #[error("Invalid mapping expression '{expression}': {reason}")]
    InvalidMappingExpression { expression: String, reason: String },

    /// Export requested for an API whose version tag has no serializer
    #[error("No serializer can handle export version '{version}'")]
    NoSerializerForVersion { version: String },

    /// The API to update does not exist
    #[error("API not found: {api_id}")]
    ApiNotFound { api_id: String },

    /// A group named by a mapping rule does not exist
    #[error("Group not found: {name}")]
    GroupNotFound { name: String },

    /// A role named by a mapping rule or a default role lookup does not exist
    #[error("Role not found: {scope}:{name}")]
    RoleNotFound { scope: String, name: String },

    /// External authentication failed (userinfo rejected the token, missing claims)
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// A repository operation failed
    #[error("Repository error ({operation}): {message}")]
    Repository { operation: String, message: String },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O errors (configuration files, sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors when calling identity providers
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Unexpected internal failures
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ManagementError {
    /// Create a malformed definition error
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedDefinition {
            reason: reason.into(),
        }
    }

    /// Create an unresolvable member error
    pub fn unresolvable_member<S: Into<String>>(reference: S) -> Self {
        Self::UnresolvableMember {
            reference: reference.into(),
        }
    }

    /// Create an invalid mapping expression error
    pub fn invalid_expression<E: Into<String>, R: Into<String>>(expression: E, reason: R) -> Self {
        Self::InvalidMappingExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create a repository error for the named operation
    pub fn repository<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Repository {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code a transport layer should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedDefinition { .. } => StatusCode::BAD_REQUEST,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::ApiNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::UnresolvableMember { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidMappingExpression { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoSerializerForVersion { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::GroupNotFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RoleNotFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Repository { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedDefinition { .. } => "malformed_definition",
            Self::UnresolvableMember { .. } => "unresolvable_member",
            Self::InvalidMappingExpression { .. } => "invalid_mapping_expression",
            Self::NoSerializerForVersion { .. } => "no_serializer_for_version",
            Self::ApiNotFound { .. } => "api_not_found",
            Self::GroupNotFound { .. } => "group_not_found",
            Self::RoleNotFound { .. } => "role_not_found",
            Self::Authentication { .. } => "authentication_error",
            Self::Repository { .. } => "repository_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the error was caused by the caller's input rather than by the server
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<std::io::Error> for ManagementError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ManagementError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ManagementError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ManagementError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// Convert errors into structured JSON responses so handlers can use `?`
impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
