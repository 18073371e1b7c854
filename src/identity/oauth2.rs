//! Registry of identities that logged in through an OAuth2 provider.
//!
//! There is no directory to query behind an OAuth2 provider; identities become known once
//! their userinfo profile has been fetched during an external login.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{IdentityLookup, IdentityReference, SearchableUser, User};

pub struct OAuth2IdentityLookup {
    source: String,
    users: DashMap<String, User>,
}

impl OAuth2IdentityLookup {
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            source: source.into(),
            users: DashMap::new(),
        }
    }

    /// Record or refresh an identity
    pub fn register(&self, mut user: User) -> User {
        user.source = self.source.clone();
        debug!(user_id = %user.id, source = %self.source, "Registering OAuth2 identity");
        self.users.insert(user.id.clone(), user.clone());
        user
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityLookup for OAuth2IdentityLookup {
    fn source(&self) -> &str {
        &self.source
    }

    async fn search(&self, query: &str) -> Vec<SearchableUser> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<SearchableUser> = self
            .users
            .iter()
            .filter(|entry| {
                let user = entry.value();
                [
                    Some(user.id.as_str()),
                    user.email.as_deref(),
                    user.firstname.as_deref(),
                    user.lastname.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle))
            })
            .map(|entry| SearchableUser::from(entry.value()))
            .collect();

        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    async fn retrieve(&self, reference: &IdentityReference) -> Option<User> {
        if !self.can_handle(reference) {
            return None;
        }
        self.users.get(&reference.reference).map(|entry| entry.value().clone())
    }
}
