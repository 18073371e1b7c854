//! # Configuration Module
//!
//! This module handles configuration of the management plane.
//! It provides the configuration structures and loading mechanisms.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support
//! - Validation that reports every problem at once
//! - Mapping conditions compiled at load time, so a broken expression fails startup
//!   instead of a login

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::RoleScope;
use crate::export::ExportVersion;
use crate::mapping::Expression;

/// Main management plane configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Admin HTTP server settings
    pub server: ServerConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Export settings
    pub export: ExportConfig,

    /// Identity providers, in resolution order
    pub identity: IdentityConfig,
}

impl ManagementConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ManagementResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManagementError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ManagementConfig = serde_yaml::from_str(&content)
            .map_err(|e| ManagementError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> ManagementResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManagementError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ManagementConfig = serde_json::from_str(&content)
            .map_err(|e| ManagementError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: MGMT_<SECTION>_<FIELD>
    /// For example: MGMT_SERVER_PORT=9000
    pub fn apply_env_overrides(&mut self) -> ManagementResult<()> {
        use std::env;

        if let Ok(addr) = env::var("MGMT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("MGMT_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ManagementError::config(format!("Invalid MGMT_SERVER_PORT: {}", e)))?;
        }

        if let Ok(timeout) = env::var("MGMT_SERVER_REQUEST_TIMEOUT") {
            self.server.request_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                ManagementError::config(format!("Invalid MGMT_SERVER_REQUEST_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(level) = env::var("MGMT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("MGMT_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(version) = env::var("MGMT_EXPORT_DEFAULT_VERSION") {
            self.export.default_version = version;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem into one error
    pub fn validate(&self) -> ManagementResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if let Err(e) = self.export.default_version.parse::<ExportVersion>() {
            errors.push(e.to_string());
        }

        for (index, provider) in self.identity.providers.iter().enumerate() {
            match provider {
                IdentityProviderConfig::Memory(memory) => {
                    for user in &memory.users {
                        if user.username.trim().is_empty() {
                            errors.push(format!(
                                "Identity provider {} has a user with an empty username",
                                index
                            ));
                        }
                    }
                }
                IdentityProviderConfig::Ldap(ldap) => {
                    if ldap.url.is_empty() {
                        errors.push(format!("LDAP provider {} url cannot be empty", index));
                    } else if let Err(e) = Url::parse(&ldap.url) {
                        errors.push(format!("LDAP provider {} has invalid url '{}': {}", index, ldap.url, e));
                    }
                    if ldap.context_source_base.is_empty() {
                        errors.push(format!("LDAP provider {} context_source_base cannot be empty", index));
                    }
                    if !ldap.user_search_filter.contains('=') {
                        errors.push(format!(
                            "LDAP provider {} user_search_filter must look like 'attribute={{0}}'",
                            index
                        ));
                    }
                }
                IdentityProviderConfig::OAuth2(oauth2) => {
                    if let Err(e) = Url::parse(&oauth2.userinfo_endpoint) {
                        errors.push(format!(
                            "OAuth2 provider {} has invalid userinfo_endpoint '{}': {}",
                            index, oauth2.userinfo_endpoint, e
                        ));
                    }
                    for rule in oauth2.groups.iter().chain(oauth2.roles.iter()) {
                        if let Err(e) = Expression::parse(&rule.condition) {
                            errors.push(e.to_string());
                        }
                    }
                    for rule in &oauth2.roles {
                        for value in &rule.values {
                            if let Err(e) = parse_role_value(value) {
                                errors.push(e.to_string());
                            }
                        }
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(ManagementError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Parse a role mapping value of the form `SCOPE:ROLE`.
///
/// Only environment-wide scopes can be granted by a mapping. The role name is upper-cased.
pub fn parse_role_value(value: &str) -> ManagementResult<(RoleScope, String)> {
    let (scope, role) = value.split_once(':').ok_or_else(|| {
        ManagementError::config(format!("Role mapping '{}' must be of the form SCOPE:ROLE", value))
    })?;

    let scope: RoleScope = scope.parse()?;
    match scope {
        RoleScope::Management | RoleScope::Portal => {}
        other => {
            return Err(ManagementError::config(format!(
                "Role mapping '{}' uses scope {} (only MANAGEMENT and PORTAL are allowed)",
                value, other
            )))
        }
    }

    let role = role.trim();
    if role.is_empty() {
        return Err(ManagementError::config(format!(
            "Role mapping '{}' has an empty role name",
            value
        )));
    }

    Ok((scope, role.to_uppercase()))
}

/// Admin HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the admin server to
    pub bind_address: String,

    /// Admin server port
    pub port: u16,

    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8083,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Version used for APIs that carry no export version tag
    pub default_version: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_version: ExportVersion::Default.as_str().to_string(),
        }
    }
}

/// Identity provider chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub providers: Vec<IdentityProviderConfig>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            providers: vec![IdentityProviderConfig::Memory(MemoryProviderConfig::default())],
        }
    }
}

/// One identity provider, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IdentityProviderConfig {
    Memory(MemoryProviderConfig),
    Ldap(LdapProviderConfig),
    OAuth2(OAuth2ProviderConfig),
}

/// In-memory directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryProviderConfig {
    /// Source name identities of this provider are tagged with
    pub source: String,
    pub users: Vec<MemoryUserConfig>,
}

impl Default for MemoryProviderConfig {
    fn default() -> Self {
        Self {
            source: "memory".to_string(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUserConfig {
    pub username: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
}

/// LDAP directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapProviderConfig {
    pub source: String,
    pub url: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub context_source_base: String,
    pub user_search_base: Option<String>,
    /// Lookup filter, e.g. `uid={0}`; its attribute names the user identifier
    pub user_search_filter: String,
    pub user_search_objectclass: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for LdapProviderConfig {
    fn default() -> Self {
        Self {
            source: "ldap".to_string(),
            url: "ldap://localhost:389".to_string(),
            bind_dn: None,
            bind_password: None,
            context_source_base: String::new(),
            user_search_base: None,
            user_search_filter: "uid={0}".to_string(),
            user_search_objectclass: "person".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// OAuth2 external provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2ProviderConfig {
    pub source: String,
    pub userinfo_endpoint: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub user_mapping: UserFieldMapping,
    /// Group mapping rules
    pub groups: Vec<MappingRuleConfig>,
    /// Role mapping rules
    pub roles: Vec<MappingRuleConfig>,
}

impl Default for OAuth2ProviderConfig {
    fn default() -> Self {
        Self {
            source: "oauth2".to_string(),
            userinfo_endpoint: String::new(),
            timeout: Duration::from_secs(10),
            user_mapping: UserFieldMapping::default(),
            groups: Vec::new(),
            roles: Vec::new(),
        }
    }
}

/// Names of the userinfo claims carrying each user field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFieldMapping {
    pub id: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub picture: String,
}

impl Default for UserFieldMapping {
    fn default() -> Self {
        Self {
            id: "sub".to_string(),
            email: "email".to_string(),
            firstname: "given_name".to_string(),
            lastname: "family_name".to_string(),
            picture: "picture".to_string(),
        }
    }
}

/// A condition and the values granted when it holds
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingRuleConfig {
    pub condition: String,
    #[serde(default)]
    pub values: Vec<String>,
}
