use crate::scope::ScopeKey;
use errors::FixtureError;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Lifecycle counters for provisioned scopes.
///
/// Recording is a no-op when metrics are disabled in the observability
/// configuration.
#[derive(Debug, Clone)]
pub struct FixtureTelemetry {
    enabled: bool
}

impl Default for FixtureTelemetry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FixtureTelemetry {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_config(config: &config::ObservabilityConfig) -> Self {
        Self::new(config.metrics_enabled)
    }

    pub fn record_provision(&self, scope: &ScopeKey, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let labels = [("scope_kind", scope.kind.as_str().to_string())];
        counter!("fixture_provisions_total", &labels).increment(1);
        histogram!("fixture_provision_duration_seconds", &labels).record(elapsed.as_secs_f64());
    }

    pub fn record_provision_failure(&self, scope: &ScopeKey, error: &FixtureError) {
        if !self.enabled {
            return;
        }
        let labels = [
            ("scope_kind", scope.kind.as_str().to_string()),
            ("error", error_type(error).to_string())
        ];
        counter!("fixture_provision_failures_total", &labels).increment(1);
    }

    pub fn record_teardown(&self, scope: &ScopeKey) {
        if !self.enabled {
            return;
        }
        let labels = [("scope_kind", scope.kind.as_str().to_string())];
        counter!("fixture_teardowns_total", &labels).increment(1);
    }

    pub fn set_live_scopes(&self, count: usize) {
        if !self.enabled {
            return;
        }
        gauge!("fixture_live_scopes").set(count as f64);
    }
}

fn error_type(error: &FixtureError) -> &'static str {
    use errors::ProvisionError;

    match error {
        FixtureError::Provision(ProvisionError::DaemonUnreachable { .. }) => "daemon_unreachable",
        FixtureError::Provision(ProvisionError::ImagePull { .. }) => "image_pull",
        FixtureError::Provision(ProvisionError::PortExhausted { .. }) => "port_exhausted",
        FixtureError::Provision(ProvisionError::PortCollision { .. }) => "port_collision",
        FixtureError::Provision(ProvisionError::Runtime { .. }) => "runtime",
        FixtureError::ReadinessTimeout(_) => "readiness_timeout",
        FixtureError::Scope(_) => "scope",
        FixtureError::Abandoned { .. } => "abandoned"
    }
}
