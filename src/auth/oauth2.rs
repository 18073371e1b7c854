//! OAuth2 external login: userinfo fetch, identity registration and group/role mapping.

use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::{OAuth2ProviderConfig, UserFieldMapping};
use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::MembershipUser;
use crate::identity::{compose_display_name, OAuth2IdentityLookup, User};
use crate::mapping::{GroupRoleMapper, MappingOutcome};
use crate::observability::metrics;
use crate::repository::RepositoryGateway;

/// Client of an OAuth2 userinfo endpoint
pub struct OAuth2UserInfoClient {
    http_client: Client,
    endpoint: String,
}

impl OAuth2UserInfoClient {
    pub fn new(config: &OAuth2ProviderConfig) -> ManagementResult<Self> {
        let http_client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http_client,
            endpoint: config.userinfo_endpoint.clone(),
        })
    }

    /// Fetch the profile of the token's owner
    pub async fn fetch_profile(&self, access_token: &str) -> ManagementResult<Value> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ManagementError::auth(format!(
                "userinfo endpoint answered {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

/// A completed external login
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalLogin {
    pub user: User,
    pub mapping: MappingOutcome,
}

/// Connects users authenticated by an OAuth2 provider
pub struct ExternalAuthenticator {
    source: String,
    user_mapping: UserFieldMapping,
    client: OAuth2UserInfoClient,
    identities: Arc<OAuth2IdentityLookup>,
    mapper: GroupRoleMapper,
}

fn claim(profile: &Value, name: &str) -> Option<String> {
    match profile.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ExternalAuthenticator {
    /// Build from provider configuration; mapping conditions are compiled here
    pub fn new(
        config: &OAuth2ProviderConfig,
        identities: Arc<OAuth2IdentityLookup>,
        gateway: RepositoryGateway,
    ) -> ManagementResult<Self> {
        Ok(Self {
            source: config.source.clone(),
            user_mapping: config.user_mapping.clone(),
            client: OAuth2UserInfoClient::new(config)?,
            identities,
            mapper: GroupRoleMapper::new(gateway, &config.groups, &config.roles)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Turn a userinfo profile into a user, requiring the id and email claims
    pub fn user_from_profile(&self, profile: &Value) -> ManagementResult<User> {
        let id = claim(profile, &self.user_mapping.id).ok_or_else(|| {
            ManagementError::auth(format!("profile has no '{}' claim", self.user_mapping.id))
        })?;
        let email = claim(profile, &self.user_mapping.email).ok_or_else(|| {
            ManagementError::auth(format!("profile has no '{}' claim", self.user_mapping.email))
        })?;

        let firstname = claim(profile, &self.user_mapping.firstname);
        let lastname = claim(profile, &self.user_mapping.lastname);
        let display_name = compose_display_name(firstname.as_deref(), lastname.as_deref())
            .unwrap_or_else(|| email.clone());

        Ok(User {
            reference: id.clone(),
            id,
            source: self.source.clone(),
            email: Some(email),
            firstname,
            lastname,
            display_name,
            picture: claim(profile, &self.user_mapping.picture),
        })
    }

    /// Complete a login from an access token
    pub async fn connect(&self, access_token: &str) -> ManagementResult<ExternalLogin> {
        let result = self.try_connect(access_token).await;
        match &result {
            Ok(login) => {
                metrics::record_external_login("success");
                info!(user_id = %login.user.id, source = %self.source, "External login completed");
            }
            Err(e) => {
                metrics::record_external_login(e.error_type());
                warn!(source = %self.source, error = %e, "External login failed");
            }
        }
        result
    }

    async fn try_connect(&self, access_token: &str) -> ManagementResult<ExternalLogin> {
        let profile = self.client.fetch_profile(access_token).await?;
        let user = self.identities.register(self.user_from_profile(&profile)?);

        let member = MembershipUser::new(user.id.clone())
            .with_reference(user.reference.clone())
            .with_source(user.source.clone());
        let mapping = self.mapper.apply(&member, &profile).await?;

        Ok(ExternalLogin { user, mapping })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryRepositories, RepositoryGateway};
    use serde_json::json;

    fn authenticator() -> ExternalAuthenticator {
        let config = OAuth2ProviderConfig {
            userinfo_endpoint: "http://127.0.0.1:1/userinfo".to_string(),
            user_mapping: UserFieldMapping {
                id: "email".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        ExternalAuthenticator::new(
            &config,
            Arc::new(OAuth2IdentityLookup::new("oauth2")),
            RepositoryGateway::in_memory(Arc::new(InMemoryRepositories::new())),
        )
        .unwrap()
    }

    #[test]
    fn test_user_from_profile() {
        let user = authenticator()
            .user_from_profile(&json!({
                "email": "jane@example.com",
                "given_name": "Jane",
                "family_name": "Doe"
            }))
            .unwrap();
        assert_eq!(user.id, "jane@example.com");
        assert_eq!(user.display_name, "Jane Doe");
        assert_eq!(user.source, "oauth2");
    }

    #[test]
    fn test_missing_email_is_rejected() {
        let err = authenticator()
            .user_from_profile(&json!({"sub": "42"}))
            .unwrap_err();
        assert!(matches!(err, ManagementError::Authentication { .. }));
    }

    #[test]
    fn test_numeric_claims_are_accepted() {
        assert_eq!(claim(&json!({"sub": 42}), "sub").as_deref(), Some("42"));
        assert_eq!(claim(&json!({"sub": ""}), "sub"), None);
        assert_eq!(claim(&json!({"sub": null}), "sub"), None);
    }
}
