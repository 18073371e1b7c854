//! # Mapping Module
//!
//! Derives group memberships and environment roles from an external user profile.

pub mod expression;
pub mod mapper;

pub use expression::Expression;
pub use mapper::{GroupRoleMapper, MappingOutcome, MappingRule, RoleMappingRule};
