//! In-memory stand-ins for the container runtime and health checks.

use async_trait::async_trait;
use dashmap::DashMap;
use errors::ProvisionError;
use fixture::{ContainerDriver, ContainerInstance, HealthProbe, Protocol, ScopeKey, StartRequest};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

/// Driver that "starts" containers by handing out ports from a counter.
///
/// Counts starts and stops, and records the highest number of containers
/// alive at once for any scope key.
pub struct FakeDriver {
    next_port: AtomicU16,
    next_id: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    start_delay: Mutex<Duration>,
    failures: Mutex<VecDeque<ProvisionError>>,
    live: DashMap<String, ScopeKey>,
    max_live_per_scope: AtomicUsize,
    requests: Mutex<Vec<StartRequest>>,
    logs: Mutex<String>
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            next_port: AtomicU16::new(50000),
            next_id: AtomicUsize::new(1),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            start_delay: Mutex::new(Duration::ZERO),
            failures: Mutex::new(VecDeque::new()),
            live: DashMap::new(),
            max_live_per_scope: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            logs: Mutex::new(String::new())
        }
    }

    pub fn with_start_delay(self, delay: Duration) -> Self {
        *self.start_delay.lock() = delay;
        self
    }

    /// Make the next `start` fail with `error`.
    pub fn fail_next_start(&self, error: ProvisionError) {
        self.failures.lock().push_back(error);
    }

    pub fn set_logs(&self, logs: impl Into<String>) {
        *self.logs.lock() = logs.into();
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn live_for(&self, scope: &ScopeKey) -> usize {
        self.live.iter().filter(|entry| entry.value() == scope).count()
    }

    pub fn max_live_per_scope(&self) -> usize {
        self.max_live_per_scope.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<StartRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn start(&self, request: &StartRequest) -> Result<ContainerInstance, ProvisionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let delay = *self.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let mut by_internal: BTreeMap<u16, u16> = BTreeMap::new();
        for internal in request.internal_ports() {
            by_internal.insert(internal, self.next_port.fetch_add(1, Ordering::SeqCst));
        }
        let host_ports = request
            .services
            .iter()
            .filter_map(|s| by_internal.get(&s.internal_port).map(|p| (s.name.clone(), *p)))
            .collect();

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.insert(id.clone(), request.scope.clone());
        self.max_live_per_scope
            .fetch_max(self.live_for(&request.scope), Ordering::SeqCst);

        Ok(ContainerInstance::new(
            id,
            request.scope.clone(),
            request.services.clone(),
            host_ports
        ))
    }

    async fn stop(&self, instance: &ContainerInstance) -> Result<(), ProvisionError> {
        if self.live.remove(instance.id()).is_some() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn logs(&self, _instance: &ContainerInstance) -> Result<String, ProvisionError> {
        Ok(self.logs.lock().clone())
    }
}

/// Probe whose answer is flipped by the test.
pub struct FakeProbe {
    healthy: AtomicBool,
    probes: AtomicUsize
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            probes: AtomicUsize::new(0)
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, _host: &str, _port: u16, _protocol: Protocol) -> Result<(), String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection refused".to_string())
        }
    }
}
