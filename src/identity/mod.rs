//! # Identity Module
//!
//! Resolves member references of an API definition to identities known by an identity
//! provider. Providers form an ordered chain built from configuration:
//!
//! ```text
//! reference ──► [InMemory] ──► [Ldap] ──► [OAuth2]
//!                  search results are concatenated in chain order
//! ```
//!
//! Provider failures never surface here: an unreachable directory and an unknown user both
//! come back as "nothing found".

pub mod ldap;
pub mod memory;
pub mod oauth2;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::core::config::{IdentityConfig, IdentityProviderConfig};

pub use ldap::LdapIdentityLookup;
pub use memory::InMemoryIdentityLookup;
pub use oauth2::OAuth2IdentityLookup;

/// Reference to an identity inside a given source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityReference {
    pub source: String,
    pub reference: String,
}

impl IdentityReference {
    pub fn new<S: Into<String>, R: Into<String>>(source: S, reference: R) -> Self {
        Self {
            source: source.into(),
            reference: reference.into(),
        }
    }
}

/// Search result projection of an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableUser {
    pub id: String,
    pub reference: String,
    pub source: String,
    pub display_name: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

/// Full identity as returned by a retrieve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub reference: String,
    pub source: String,
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub display_name: String,
    pub picture: Option<String>,
}

impl From<&User> for SearchableUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            reference: user.reference.clone(),
            source: user.source.clone(),
            display_name: user.display_name.clone(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
        }
    }
}

/// `"first last"` with missing parts omitted, `None` when both are absent
pub(crate) fn compose_display_name(firstname: Option<&str>, lastname: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [firstname, lastname]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Capability every identity provider offers to the import engine
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Source name identities of this provider carry
    fn source(&self) -> &str;

    /// Free-text search; never fails, errors degrade to an empty result
    async fn search(&self, query: &str) -> Vec<SearchableUser>;

    fn can_handle(&self, reference: &IdentityReference) -> bool {
        reference.source.eq_ignore_ascii_case(self.source())
    }

    async fn retrieve(&self, reference: &IdentityReference) -> Option<User>;
}

/// Closed set of identity provider kinds
pub enum IdentityResolver {
    InMemory(InMemoryIdentityLookup),
    Ldap(LdapIdentityLookup),
    OAuth2(Arc<OAuth2IdentityLookup>),
}

impl IdentityResolver {
    fn lookup(&self) -> &dyn IdentityLookup {
        match self {
            IdentityResolver::InMemory(lookup) => lookup,
            IdentityResolver::Ldap(lookup) => lookup,
            IdentityResolver::OAuth2(lookup) => lookup.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IdentityResolver::InMemory(_) => "memory",
            IdentityResolver::Ldap(_) => "ldap",
            IdentityResolver::OAuth2(_) => "oauth2",
        }
    }
}

#[async_trait]
impl IdentityLookup for IdentityResolver {
    fn source(&self) -> &str {
        self.lookup().source()
    }

    async fn search(&self, query: &str) -> Vec<SearchableUser> {
        self.lookup().search(query).await
    }

    fn can_handle(&self, reference: &IdentityReference) -> bool {
        self.lookup().can_handle(reference)
    }

    async fn retrieve(&self, reference: &IdentityReference) -> Option<User> {
        self.lookup().retrieve(reference).await
    }
}

/// Ordered chain of identity resolvers
#[derive(Default)]
pub struct IdentityService {
    resolvers: Vec<IdentityResolver>,
}

impl IdentityService {
    pub fn new(resolvers: Vec<IdentityResolver>) -> Self {
        Self { resolvers }
    }

    /// Build the chain in configuration order
    pub fn from_config(config: &IdentityConfig) -> Self {
        let resolvers = config
            .providers
            .iter()
            .map(|provider| match provider {
                IdentityProviderConfig::Memory(memory) => {
                    IdentityResolver::InMemory(InMemoryIdentityLookup::from_config(memory))
                }
                IdentityProviderConfig::Ldap(ldap) => {
                    IdentityResolver::Ldap(LdapIdentityLookup::new(ldap.clone()))
                }
                IdentityProviderConfig::OAuth2(oauth2) => {
                    IdentityResolver::OAuth2(Arc::new(OAuth2IdentityLookup::new(oauth2.source.clone())))
                }
            })
            .collect();

        Self { resolvers }
    }

    pub fn resolvers(&self) -> &[IdentityResolver] {
        &self.resolvers
    }

    /// The OAuth2 registry identities from external logins are recorded in
    pub fn oauth2_lookup(&self, source: &str) -> Option<Arc<OAuth2IdentityLookup>> {
        self.resolvers.iter().find_map(|resolver| match resolver {
            IdentityResolver::OAuth2(lookup) if lookup.source().eq_ignore_ascii_case(source) => {
                Some(Arc::clone(lookup))
            }
            _ => None,
        })
    }

    /// Search every resolver, concatenating results in chain order
    pub async fn search(&self, query: &str) -> Vec<SearchableUser> {
        let mut results = Vec::new();
        for resolver in &self.resolvers {
            results.extend(resolver.search(query).await);
        }
        results
    }

    /// Retrieve through the first resolver able to handle the reference
    pub async fn retrieve(&self, reference: &IdentityReference) -> Option<User> {
        match self.resolvers.iter().find(|r| r.can_handle(reference)) {
            Some(resolver) => resolver.retrieve(reference).await,
            None => {
                debug!(source = %reference.source, "No identity resolver handles source");
                None
            }
        }
    }

    /// Resolve a definition member to an identity.
    ///
    /// With a source, the identity is retrieved from that source, falling back to a search
    /// restricted to it. Without one, the whole chain is searched and an exact match on id or
    /// reference is preferred over the first result.
    pub async fn resolve_member(&self, reference: &str, source: Option<&str>) -> Option<SearchableUser> {
        match source {
            Some(source) => {
                let identity = IdentityReference::new(source, reference);
                if let Some(user) = self.retrieve(&identity).await {
                    return Some(SearchableUser::from(&user));
                }

                let mut candidates = Vec::new();
                for resolver in self.resolvers.iter().filter(|r| r.can_handle(&identity)) {
                    candidates.extend(resolver.search(reference).await);
                }
                pick_exact_or_first(candidates, reference)
            }
            None => pick_exact_or_first(self.search(reference).await, reference),
        }
    }
}

fn pick_exact_or_first(candidates: Vec<SearchableUser>, reference: &str) -> Option<SearchableUser> {
    let exact = candidates
        .iter()
        .position(|user| user.id == reference || user.reference == reference);

    match exact {
        Some(index) => candidates.into_iter().nth(index),
        None => candidates.into_iter().next(),
    }
}
