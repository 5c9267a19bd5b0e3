//! Container driver.
//!
//! [`ContainerDriver`] is the seam between the scope manager and the
//! container runtime. [`DockerDriver`] is the production implementation on
//! top of `testcontainers`.

use crate::instance::ContainerInstance;
use crate::ports::PortPool;
use crate::scope::ScopeKey;
use crate::service::ServiceSpec;
use async_trait::async_trait;
use dashmap::DashMap;
use errors::ProvisionError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::ContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ContainerRequest, GenericImage, ImageExt};

/// What to launch for one scope.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub scope: ScopeKey,
    pub services: Vec<ServiceSpec>,
    pub env: BTreeMap<String, String>,
    /// Container names become `<prefix>-<scope slug>-<random>`.
    pub name_prefix: Option<String>
}

impl StartRequest {
    /// Image shared by every requested service.
    pub fn image(&self) -> Option<&str> {
        self.services.first().map(|s| s.image.as_str())
    }

    /// Distinct internal ports, in ascending order.
    pub fn internal_ports(&self) -> Vec<u16> {
        self.services
            .iter()
            .map(|s| s.internal_port)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Launch the emulator and return as soon as the runtime reports it
    /// started. The instance is in [`InstanceStatus::Starting`].
    ///
    /// [`InstanceStatus::Starting`]: crate::instance::InstanceStatus::Starting
    async fn start(&self, request: &StartRequest) -> Result<ContainerInstance, ProvisionError>;

    /// Stop and remove the container. Stopping an unknown or already
    /// stopped instance succeeds.
    async fn stop(&self, instance: &ContainerInstance) -> Result<(), ProvisionError>;

    /// Container output for diagnostics.
    async fn logs(&self, instance: &ContainerInstance) -> Result<String, ProvisionError>;
}

struct RunningContainer {
    container: ContainerAsync<GenericImage>,
    host_ports: Vec<u16>
}

/// Docker-backed driver.
pub struct DockerDriver {
    pool: Arc<PortPool>,
    containers: DashMap<String, RunningContainer>,
    stop_timeout: Duration,
    collision_retries: u32
}

impl DockerDriver {
    pub fn new(pool: Arc<PortPool>, stop_timeout: Duration, collision_retries: u32) -> Self {
        Self {
            pool,
            containers: DashMap::new(),
            stop_timeout,
            collision_retries
        }
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }

    /// Containers started by this driver and not yet stopped.
    pub fn running(&self) -> usize {
        self.containers.len()
    }

    fn build_request(
        request: &StartRequest,
        repository: &str,
        tag: &str,
        mapping: &BTreeMap<u16, u16>,
    ) -> ContainerRequest<GenericImage> {
        let mut image = GenericImage::new(repository, tag);
        for internal in mapping.keys() {
            image = image.with_exposed_port(ContainerPort::Tcp(*internal));
        }

        let mut container = ContainerRequest::from(image);
        for (name, value) in &request.env {
            container = container.with_env_var(name, value);
        }
        for (internal, host) in mapping {
            container = container.with_mapped_port(*host, ContainerPort::Tcp(*internal));
        }
        if let Some(prefix) = &request.name_prefix {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            container = container.with_container_name(format!(
                "{}-{}-{}",
                prefix,
                request.scope.slug(),
                &suffix[..8]
            ));
        }
        container
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn start(&self, request: &StartRequest) -> Result<ContainerInstance, ProvisionError> {
        let image_ref = request.image().ok_or_else(|| ProvisionError::Runtime {
            reason: format!("no services requested for {}", request.scope)
        })?;
        let (repository, tag) = split_image(image_ref);

        let (container, mapping) = start_with_port_retries(
            &self.pool,
            &request.scope,
            image_ref,
            &request.internal_ports(),
            self.collision_retries,
            |mapping| {
                let start = Self::build_request(request, repository, tag, mapping).start();
                async move { start.await.map_err(|e| e.to_string()) }
            }
        )
        .await?;

        let id = container.id().to_string();
        let service_ports = request
            .services
            .iter()
            .filter_map(|s| mapping.get(&s.internal_port).map(|h| (s.name.clone(), *h)))
            .collect();
        self.containers.insert(
            id.clone(),
            RunningContainer {
                container,
                host_ports: mapping.values().copied().collect()
            }
        );
        tracing::info!("Container {} started for {}", id, request.scope);
        Ok(ContainerInstance::new(
            id,
            request.scope.clone(),
            request.services.clone(),
            service_ports
        ))
    }

    async fn stop(&self, instance: &ContainerInstance) -> Result<(), ProvisionError> {
        let Some((id, running)) = self.containers.remove(instance.id()) else {
            tracing::debug!("Container {} already stopped", instance.id());
            return Ok(());
        };

        match tokio::time::timeout(self.stop_timeout, running.container.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Stop of {} failed, forcing removal: {}", id, e),
            Err(_) => tracing::warn!(
                "Container {} did not stop within {:?}, forcing removal",
                id,
                self.stop_timeout
            )
        }
        if let Err(e) = running.container.rm().await {
            tracing::debug!("Removal of {} reported {}, treating as gone", id, e);
        }
        self.pool.release(&running.host_ports);
        tracing::info!("Container {} removed", id);
        Ok(())
    }

    async fn logs(&self, instance: &ContainerInstance) -> Result<String, ProvisionError> {
        let Some(running) = self.containers.get(instance.id()) else {
            return Ok(String::new());
        };
        let stdout = running
            .container
            .stdout_to_vec()
            .await
            .map_err(|e| ProvisionError::Runtime {
                reason: e.to_string()
            })?;
        let stderr = running
            .container
            .stderr_to_vec()
            .await
            .map_err(|e| ProvisionError::Runtime {
                reason: e.to_string()
            })?;
        let mut text = String::from_utf8_lossy(&stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&stderr));
        Ok(text)
    }
}

/// Reserve host ports for `internal_ports` and hand the mapping to `launch`.
///
/// A launch failing on a host port collision gives its ports back and is
/// retried with fresh ones, up to `collision_retries` times. Any other
/// failure releases the ports and is returned as classified.
pub(crate) async fn start_with_port_retries<T, F, Fut>(
    pool: &PortPool,
    scope: &ScopeKey,
    image: &str,
    internal_ports: &[u16],
    collision_retries: u32,
    mut launch: F,
) -> Result<(T, BTreeMap<u16, u16>), ProvisionError>
where
    F: FnMut(&BTreeMap<u16, u16>) -> Fut,
    Fut: Future<Output = Result<T, String>>
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let host_ports = pool.reserve(scope, internal_ports.len())?;
        let mapping: BTreeMap<u16, u16> = internal_ports
            .iter()
            .copied()
            .zip(host_ports.iter().copied())
            .collect();

        tracing::info!(
            "Starting {} for {} (attempt {}), port mapping {:?}",
            image,
            scope,
            attempt,
            mapping
        );

        let reason = match launch(&mapping).await {
            Ok(started) => return Ok((started, mapping)),
            Err(reason) => reason
        };
        pool.release(&host_ports);

        match classify_start_error(image, &reason) {
            ProvisionError::PortCollision { .. } if attempt <= collision_retries => {
                tracing::warn!(
                    "Host port collision starting {} for {}: {}; retrying with new ports",
                    image,
                    scope,
                    reason
                );
            }
            ProvisionError::PortCollision { .. } => {
                return Err(ProvisionError::PortCollision {
                    attempts: attempt,
                    reason
                });
            }
            other => return Err(other)
        }
    }
}

/// Split `repository[:tag]`, keeping registry ports (`host:5000/img`) intact.
pub fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, tag),
        _ => (image, "latest")
    }
}

/// Map a runtime error message onto the provisioning taxonomy.
pub fn classify_start_error(image: &str, message: &str) -> ProvisionError {
    let lower = message.to_lowercase();
    if lower.contains("port is already allocated")
        || lower.contains("address already in use")
        || lower.contains("ports are not available")
    {
        ProvisionError::PortCollision {
            attempts: 1,
            reason: message.to_string()
        }
    } else if lower.contains("no such image")
        || lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("failed to pull")
    {
        ProvisionError::ImagePull {
            image: image.to_string(),
            reason: message.to_string()
        }
    } else if lower.contains("connection refused")
        || lower.contains("error trying to connect")
        || lower.contains("socket not found")
        || lower.contains("is the docker daemon running")
        || lower.contains("failed to initialize")
    {
        ProvisionError::DaemonUnreachable {
            reason: message.to_string()
        }
    } else {
        ProvisionError::Runtime {
            reason: message.to_string()
        }
    }
}
