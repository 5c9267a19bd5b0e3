//! A running (or formerly running) emulator container.

use crate::scope::ScopeKey;
use crate::service::ServiceSpec;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    Starting,
    Ready,
    Failed,
    Stopped
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped")
        }
    }
}

/// Handle on one emulator container.
///
/// Ports and services are fixed at creation; only the status moves.
#[derive(Debug)]
pub struct ContainerInstance {
    id: String,
    scope: ScopeKey,
    services: Vec<ServiceSpec>,
    host_ports: BTreeMap<String, u16>,
    status: RwLock<InstanceStatus>
}

impl ContainerInstance {
    pub fn new(
        id: impl Into<String>,
        scope: ScopeKey,
        services: Vec<ServiceSpec>,
        host_ports: BTreeMap<String, u16>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            services,
            host_ports,
            status: RwLock::new(InstanceStatus::Starting)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Host port published for `service`.
    pub fn host_port(&self, service: &str) -> Option<u16> {
        self.host_ports.get(service).copied()
    }

    pub fn host_ports(&self) -> &BTreeMap<String, u16> {
        &self.host_ports
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: InstanceStatus) {
        let mut current = self.status.write();
        if *current != status {
            tracing::debug!("Container {} {} -> {}", self.id, *current, status);
            *current = status;
        }
    }
}
