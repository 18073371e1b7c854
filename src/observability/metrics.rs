//! # Metrics
//!
//! Counters recorded through the `metrics` facade. Nothing is exported unless a recorder is
//! installed; the binary installs the Prometheus one and serves it on `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::error::{ManagementError, ManagementResult};

pub const RECONCILE_MUTATIONS_TOTAL: &str = "api_management_reconcile_mutations_total";
pub const RECONCILE_SKIPS_TOTAL: &str = "api_management_reconcile_skips_total";
pub const IMPORTS_TOTAL: &str = "api_management_imports_total";
pub const EXPORTS_TOTAL: &str = "api_management_exports_total";
pub const MAPPING_APPLICATIONS_TOTAL: &str = "api_management_mapping_applications_total";
pub const EXTERNAL_LOGINS_TOTAL: &str = "api_management_external_logins_total";

/// Reconciled collection a mutation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Api,
    Member,
    Page,
    Plan,
    Group,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Api => "api",
            Entity::Member => "member",
            Entity::Page => "page",
            Entity::Plan => "plan",
            Entity::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
        }
    }
}

pub fn record_mutation(entity: Entity, action: Action) {
    metrics::counter!(RECONCILE_MUTATIONS_TOTAL, "entity" => entity.as_str(), "action" => action.as_str())
        .increment(1);
}

pub fn record_skip(entity: Entity) {
    metrics::counter!(RECONCILE_SKIPS_TOTAL, "entity" => entity.as_str()).increment(1);
}

pub fn record_import(outcome: &'static str) {
    metrics::counter!(IMPORTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_export(version: &str) {
    metrics::counter!(EXPORTS_TOTAL, "version" => version.to_string()).increment(1);
}

pub fn record_mapping_application(groups: usize, roles: usize) {
    metrics::counter!(MAPPING_APPLICATIONS_TOTAL, "kind" => "group").increment(groups as u64);
    metrics::counter!(MAPPING_APPLICATIONS_TOTAL, "kind" => "role").increment(roles as u64);
}

pub fn record_external_login(outcome: &'static str) {
    metrics::counter!(EXTERNAL_LOGINS_TOTAL, "outcome" => outcome).increment(1);
}

/// Install the Prometheus recorder as the global metrics recorder
pub fn install_prometheus_recorder() -> ManagementResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ManagementError::internal(format!("Failed to install metrics recorder: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_values() {
        assert_eq!(Entity::Member.as_str(), "member");
        assert_eq!(Action::Update.as_str(), "update");
    }

    #[test]
    fn test_recording_without_recorder_is_a_no_op() {
        record_mutation(Entity::Page, Action::Create);
        record_skip(Entity::Member);
        record_export("1.15");
        record_mapping_application(2, 1);
    }

    #[test]
    fn test_counters_are_rendered_by_prometheus() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_mutation(Entity::Plan, Action::Update);
            record_import("success");
        });

        let rendered = handle.render();
        assert!(rendered.contains(RECONCILE_MUTATIONS_TOTAL));
        assert!(rendered.contains("entity=\"plan\""));
        assert!(rendered.contains(IMPORTS_TOTAL));
    }
}
