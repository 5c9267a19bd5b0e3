//! Public entry point.
//!
//! [`Fixture`] wires driver, prober, publisher and manager from a
//! [`config::FixtureConfig`]. Tests either call [`Fixture::acquire`] and
//! [`Fixture::release`] directly or [`Fixture::declare`] a scope and keep
//! the returned guard for as long as they need the services.
//!
//! An autouse declaration patches the process environment for as long as
//! its guard lives. The patch belongs to the guard, not to the scope: other
//! holders of the same scope are not affected by it, and releasing the guard
//! restores the environment even while the scope itself keeps draining.

use crate::ambient::AmbientPatch;
use crate::driver::{ContainerDriver, DockerDriver};
use crate::manager::{ManagerSettings, ScopeManager, ScopePhase};
use crate::ports::PortPool;
use crate::publisher::{EndpointBinding, EndpointPublisher};
use crate::readiness::{HealthProbe, NetworkProbe, ProbeSchedule, ReadinessProber};
use crate::scope::ScopeKey;
use crate::service::{ServiceCatalog, ServiceSpec};
use crate::telemetry::FixtureTelemetry;
use config::FixtureConfig;
use errors::{FixtureResult, ScopeError};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// What a test asks for: a scope, the services it uses, and whether the
/// process environment should point at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureDeclaration {
    pub scope: ScopeKey,
    pub services: Vec<String>,
    pub autouse: bool
}

impl FixtureDeclaration {
    pub fn new(scope: ScopeKey) -> Self {
        Self {
            scope,
            services: Vec::new(),
            autouse: false
        }
    }

    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.services.push(name.into());
        self
    }

    pub fn services<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.services.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn autouse(mut self, autouse: bool) -> Self {
        self.autouse = autouse;
        self
    }
}

#[derive(Clone)]
pub struct Fixture {
    manager: ScopeManager,
    catalog: ServiceCatalog,
    config: Arc<FixtureConfig>
}

impl Fixture {
    pub fn new(config: FixtureConfig, driver: Arc<dyn ContainerDriver>, probe: Arc<dyn HealthProbe>) -> Self {
        let prober = ReadinessProber::new(
            probe,
            config.endpoint.host.clone(),
            ProbeSchedule::from_config(&config.readiness)
        );
        let manager = ScopeManager::new(
            driver,
            prober,
            EndpointPublisher::from_config(&config.endpoint),
            FixtureTelemetry::from_config(&config.observability),
            ManagerSettings::from_config(&config)
        );
        Self {
            manager,
            catalog: ServiceCatalog::localstack(config.container.image_ref()),
            config: Arc::new(config)
        }
    }

    /// Docker-backed fixture with network health probes.
    pub fn docker(config: FixtureConfig) -> Self {
        let pool = Arc::new(PortPool::from_config(&config.ports));
        let driver = DockerDriver::new(
            pool,
            config.container.stop_timeout(),
            config.ports.collision_retries
        );
        let probe = NetworkProbe::new(config.readiness.connect_timeout());
        Self::new(config, Arc::new(driver), Arc::new(probe))
    }

    /// Docker-backed fixture configured from defaults, an optional file and
    /// `LOCALSTACK_*` variables.
    pub fn from_env(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        Ok(Self::docker(config::load(file)?))
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn manager(&self) -> &ScopeManager {
        &self.manager
    }

    pub async fn acquire(&self, scope: &ScopeKey, services: &[ServiceSpec]) -> FixtureResult<EndpointBinding> {
        self.manager.acquire(scope, services).await
    }

    /// Acquire by service name, resolved against the catalog.
    pub async fn acquire_services<S: AsRef<str>>(
        &self,
        scope: &ScopeKey,
        services: &[S],
    ) -> FixtureResult<EndpointBinding> {
        let specs = self.catalog.specs(services)?;
        self.manager.acquire(scope, &specs).await
    }

    pub fn release(&self, scope: &ScopeKey) -> Result<(), ScopeError> {
        self.manager.release(scope)
    }

    /// Acquire the declared scope and hold it until the guard is dropped.
    pub async fn declare(&self, declaration: FixtureDeclaration) -> FixtureResult<FixtureGuard> {
        let binding = self
            .acquire_services(&declaration.scope, &declaration.services)
            .await?;
        let ambient = declaration.autouse.then(|| {
            tracing::debug!("Patching ambient configuration for {}", binding.scope());
            AmbientPatch::apply(binding.env_assignments())
        });
        Ok(FixtureGuard {
            fixture: self.clone(),
            binding,
            ambient,
            released: false
        })
    }

    pub fn phase(&self, scope: &ScopeKey) -> ScopePhase {
        self.manager.phase(scope)
    }

    pub async fn logs(&self, scope: &ScopeKey) -> FixtureResult<String> {
        self.manager.logs(scope).await
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

/// Hold on a declared scope. Restores its ambient patch, if any, and
/// releases on drop.
pub struct FixtureGuard {
    fixture: Fixture,
    binding: EndpointBinding,
    ambient: Option<AmbientPatch>,
    released: bool
}

impl FixtureGuard {
    pub fn binding(&self) -> &EndpointBinding {
        &self.binding
    }

    /// Whether this guard holds an ambient patch.
    pub fn is_ambient(&self) -> bool {
        self.ambient.is_some()
    }

    pub fn release(mut self) -> Result<(), ScopeError> {
        self.released = true;
        self.restore_ambient();
        self.fixture.release(self.binding.scope())
    }

    fn restore_ambient(&mut self) {
        if let Some(patch) = self.ambient.take()
            && let Err(e) = patch.restore()
        {
            tracing::warn!(
                "Ambient configuration of {} restored over external change: {}",
                self.binding.scope(),
                e
            );
        }
    }
}

impl Deref for FixtureGuard {
    type Target = EndpointBinding;

    fn deref(&self) -> &Self::Target {
        &self.binding
    }
}

impl Drop for FixtureGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.restore_ambient();
        if let Err(e) = self.fixture.release(self.binding.scope()) {
            tracing::warn!("Releasing {} on drop: {}", self.binding.scope(), e);
        }
    }
}
