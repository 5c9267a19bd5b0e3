//! Shared test tooling for the fixture workspace.
//!
//! - [`FakeDriver`] and [`FakeProbe`] drive the scope manager without Docker
//! - [`fake_fixture`] wires them into a [`Fixture`]
//! - [`docker_available`] gates tests that need a real daemon
//! - [`init_tracing`] installs a test subscriber once per process

mod fixtures;

pub use fixtures::*;
use fixture::Fixture;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

static TRACING: Once = Once::new();

/// Install the test subscriber at the level configured through the
/// environment (`OB_LOGGING_LEVEL`, `RUST_LOG` wins when set).
pub fn init_tracing() {
    let observability = config::load_from_env()
        .map(|config| config.observability)
        .unwrap_or_default();
    init_tracing_with(&observability);
}

/// Install the test subscriber at `observability.logging_level`. Only the
/// first call in a process takes effect.
pub fn init_tracing_with(observability: &config::ObservabilityConfig) {
    TRACING.call_once(|| {
        let filter = log_filter(std::env::var("RUST_LOG").ok(), observability);
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .try_init();
    });
}

fn log_filter(directives: Option<String>, observability: &config::ObservabilityConfig) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(&observability.logging_level))
}

static DOCKER: OnceCell<bool> = OnceCell::const_new();

/// Whether a Docker daemon answers `docker info`. Checked once per process.
pub async fn docker_available() -> bool {
    *DOCKER
        .get_or_init(|| async {
            let status = tokio::process::Command::new("docker")
                .arg("info")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if status.success() => true,
                Ok(status) => {
                    tracing::warn!("docker info exited with {}, skipping Docker tests", status);
                    false
                }
                Err(e) => {
                    tracing::warn!("docker not runnable ({}), skipping Docker tests", e);
                    false
                }
            }
        })
        .await
}

/// A fixture over a fresh [`FakeDriver`] and a healthy [`FakeProbe`].
pub fn fake_fixture(config: config::FixtureConfig) -> (Fixture, Arc<FakeDriver>, Arc<FakeProbe>) {
    fake_fixture_with(config, FakeDriver::new())
}

pub fn fake_fixture_with(
    config: config::FixtureConfig,
    driver: FakeDriver,
) -> (Fixture, Arc<FakeDriver>, Arc<FakeProbe>) {
    let driver = Arc::new(driver);
    let probe = Arc::new(FakeProbe::healthy());
    let fixture = Fixture::new(config, driver.clone(), probe.clone());
    (fixture, driver, probe)
}

/// Config for fakes: the given drain grace and a short readiness budget.
pub fn config_with_grace(drain_grace_ms: u64) -> config::FixtureConfig {
    let mut config = config::FixtureConfig::default();
    config.scope.drain_grace_ms = drain_grace_ms;
    config.readiness.timeout_seconds = 2;
    config.readiness.interval_ms = 50;
    config.readiness.jitter_ms = 0;
    config
}
