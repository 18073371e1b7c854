//! # Authentication Module
//!
//! External authentication flows feeding identities and group/role mappings into the
//! management plane.

pub mod oauth2;

pub use oauth2::{ExternalAuthenticator, ExternalLogin, OAuth2UserInfoClient};
