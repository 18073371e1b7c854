//! LDAP directory lookup.
//!
//! A connection is opened per call and dropped afterwards. Searches are bounded to 20
//! entries and 5 seconds; a directory that answers with `sizeLimitExceeded` is treated as
//! "too many results to pick from" and yields nothing.

use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use tracing::{debug, error, info, warn};

use super::{compose_display_name, IdentityLookup, IdentityReference, SearchableUser, User};
use crate::core::config::LdapProviderConfig;

const SEARCH_SIZE_LIMIT: i32 = 20;
const SEARCH_TIME_LIMIT_SECS: i32 = 5;

const RC_SUCCESS: u32 = 0;
const RC_TIME_LIMIT_EXCEEDED: u32 = 3;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_DN_SYNTAX: u32 = 34;

const ATTR_FIRSTNAME: &str = "givenName";
const ATTR_LASTNAME: &str = "sn";
const ATTR_EMAIL: &str = "mail";
const ATTR_DISPLAY_NAME: &str = "displayName";

#[derive(Debug)]
enum LookupFailure {
    LimitExceeded,
    Unavailable(String),
}

pub struct LdapIdentityLookup {
    config: LdapProviderConfig,
    identifier_attribute: String,
}

impl LdapIdentityLookup {
    pub fn new(config: LdapProviderConfig) -> Self {
        let identifier_attribute = config
            .user_search_filter
            .split('=')
            .next()
            .map(|attr| attr.trim().trim_start_matches('(').trim())
            .filter(|attr| !attr.is_empty())
            .unwrap_or("uid")
            .to_string();

        Self {
            config,
            identifier_attribute,
        }
    }

    pub fn identifier_attribute(&self) -> &str {
        &self.identifier_attribute
    }

    /// `user_search_base,context_source_base`, or the context base alone
    pub fn search_base(&self) -> String {
        match self.config.user_search_base.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => format!("{},{}", base, self.config.context_source_base),
            _ => self.config.context_source_base.clone(),
        }
    }

    /// `(&(objectclass=<cls>)(|(cn=*w1*w2*)(<id>=<q>)))`
    pub fn build_search_filter(&self, query: &str) -> String {
        format!(
            "(&(objectclass={})(|(cn={})({}={})))",
            ldap_escape(self.config.user_search_objectclass.as_str()),
            whitespace_wildcards(query),
            self.identifier_attribute,
            ldap_escape(query.trim()),
        )
    }

    fn attributes(&self) -> Vec<String> {
        vec![
            ATTR_FIRSTNAME.to_string(),
            ATTR_LASTNAME.to_string(),
            ATTR_EMAIL.to_string(),
            ATTR_DISPLAY_NAME.to_string(),
            self.identifier_attribute.clone(),
        ]
    }

    async fn connect(&self) -> Result<Ldap, LookupFailure> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.config.connect_timeout);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url)
            .await
            .map_err(|e| LookupFailure::Unavailable(format!("connect to {} failed: {}", self.config.url, e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        if let Some(bind_dn) = self.config.bind_dn.as_deref() {
            let password = self.config.bind_password.as_deref().unwrap_or("");
            let result = ldap
                .simple_bind(bind_dn, password)
                .await
                .map_err(|e| LookupFailure::Unavailable(format!("bind failed for {}: {}", bind_dn, e)))?;

            if result.rc != RC_SUCCESS {
                return Err(LookupFailure::Unavailable(format!(
                    "bind failed with code {}: {}",
                    result.rc, result.text
                )));
            }
        }

        Ok(ldap)
    }

    async fn try_search(&self, query: &str) -> Result<Vec<SearchableUser>, LookupFailure> {
        let mut ldap = self.connect().await?;
        let base = self.search_base();
        let filter = self.build_search_filter(query);

        debug!(base = %base, filter = %filter, "Searching LDAP users");

        let result = ldap
            .with_search_options(
                SearchOptions::new()
                    .sizelimit(SEARCH_SIZE_LIMIT)
                    .timelimit(SEARCH_TIME_LIMIT_SECS),
            )
            .search(&base, Scope::Subtree, &filter, self.attributes())
            .await
            .map_err(|e| LookupFailure::Unavailable(format!("search failed: {}", e)));
        let _ = ldap.unbind().await;

        let ldap3::SearchResult(entries, status) = result?;
        match status.rc {
            RC_SUCCESS => Ok(entries
                .into_iter()
                .map(SearchEntry::construct)
                .map(|entry| SearchableUser::from(&self.entry_to_user(entry)))
                .collect()),
            RC_SIZE_LIMIT_EXCEEDED | RC_TIME_LIMIT_EXCEEDED => Err(LookupFailure::LimitExceeded),
            rc => Err(LookupFailure::Unavailable(format!(
                "search failed with code {}: {}",
                rc, status.text
            ))),
        }
    }

    async fn try_retrieve(&self, dn: &str) -> Result<Option<User>, LookupFailure> {
        let mut ldap = self.connect().await?;

        let result = ldap
            .search(dn, Scope::Base, "(objectClass=*)", self.attributes())
            .await
            .map_err(|e| LookupFailure::Unavailable(format!("lookup failed: {}", e)));
        let _ = ldap.unbind().await;

        let ldap3::SearchResult(entries, status) = result?;
        match status.rc {
            RC_SUCCESS => Ok(entries
                .into_iter()
                .next()
                .map(SearchEntry::construct)
                .map(|entry| self.entry_to_user(entry))),
            RC_NO_SUCH_OBJECT | RC_INVALID_DN_SYNTAX => Ok(None),
            rc => Err(LookupFailure::Unavailable(format!(
                "lookup failed with code {}: {}",
                rc, status.text
            ))),
        }
    }

    fn entry_to_user(&self, entry: SearchEntry) -> User {
        let first = |attr: &str| {
            entry
                .attrs
                .get(attr)
                .and_then(|values| values.first())
                .filter(|value| !value.is_empty())
                .cloned()
        };

        let firstname = first(ATTR_FIRSTNAME);
        let lastname = first(ATTR_LASTNAME);
        let id = first(&self.identifier_attribute).unwrap_or_else(|| entry.dn.clone());
        let display_name = first(ATTR_DISPLAY_NAME)
            .or_else(|| compose_display_name(firstname.as_deref(), lastname.as_deref()))
            .unwrap_or_else(|| id.clone());

        User {
            id,
            reference: entry.dn.clone(),
            source: self.config.source.clone(),
            email: first(ATTR_EMAIL),
            firstname,
            lastname,
            display_name,
            picture: None,
        }
    }
}

/// `*w1*w2*` from the whitespace-separated words of the query
fn whitespace_wildcards(query: &str) -> String {
    let mut filter = String::from("*");
    for word in query.split_whitespace() {
        filter.push_str(&ldap_escape(word));
        filter.push('*');
    }
    filter
}

#[async_trait]
impl IdentityLookup for LdapIdentityLookup {
    fn source(&self) -> &str {
        &self.config.source
    }

    async fn search(&self, query: &str) -> Vec<SearchableUser> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        match self.try_search(query).await {
            Ok(users) => users,
            Err(LookupFailure::LimitExceeded) => {
                info!(query = %query, "LDAP search limit exceeded, returning no result");
                Vec::new()
            }
            Err(LookupFailure::Unavailable(reason)) => {
                error!(url = %self.config.url, reason = %reason, "LDAP directory unavailable");
                Vec::new()
            }
        }
    }

    async fn retrieve(&self, reference: &IdentityReference) -> Option<User> {
        if !self.can_handle(reference) {
            return None;
        }

        match self.try_retrieve(&reference.reference).await {
            Ok(user) => user,
            Err(LookupFailure::LimitExceeded) => None,
            Err(LookupFailure::Unavailable(reason)) => {
                error!(url = %self.config.url, reason = %reason, "LDAP directory unavailable");
                None
            }
        }
    }
}
