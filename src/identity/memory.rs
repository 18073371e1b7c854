//! In-memory directory of users declared in configuration.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{compose_display_name, IdentityLookup, IdentityReference, SearchableUser, User};
use crate::core::config::MemoryProviderConfig;

pub struct InMemoryIdentityLookup {
    source: String,
    /// Keyed by username, kept sorted for stable search results
    users: BTreeMap<String, User>,
}

impl InMemoryIdentityLookup {
    pub fn from_config(config: &MemoryProviderConfig) -> Self {
        let users = config
            .users
            .iter()
            .filter(|user| !user.username.trim().is_empty())
            .map(|user| {
                let username = user.username.trim().to_string();
                let display_name = compose_display_name(user.firstname.as_deref(), user.lastname.as_deref())
                    .unwrap_or_else(|| username.clone());
                let entry = User {
                    id: username.clone(),
                    reference: username.clone(),
                    source: config.source.clone(),
                    email: user.email.clone(),
                    firstname: user.firstname.clone(),
                    lastname: user.lastname.clone(),
                    display_name,
                    picture: None,
                };
                (username, entry)
            })
            .collect();

        Self {
            source: config.source.clone(),
            users,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn contains_ignore_case(value: Option<&str>, needle: &str) -> bool {
    value.map_or(false, |v| v.to_lowercase().contains(needle))
}

#[async_trait]
impl IdentityLookup for InMemoryIdentityLookup {
    fn source(&self) -> &str {
        &self.source
    }

    async fn search(&self, query: &str) -> Vec<SearchableUser> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        self.users
            .values()
            .filter(|user| {
                user.id.to_lowercase().contains(&needle)
                    || contains_ignore_case(user.firstname.as_deref(), &needle)
                    || contains_ignore_case(user.lastname.as_deref(), &needle)
                    || contains_ignore_case(user.email.as_deref(), &needle)
            })
            .map(SearchableUser::from)
            .collect()
    }

    async fn retrieve(&self, reference: &IdentityReference) -> Option<User> {
        if !self.can_handle(reference) {
            return None;
        }
        self.users.get(reference.reference.trim()).cloned()
    }
}
