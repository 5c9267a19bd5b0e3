//! Scope manager.
//!
//! One slot per scope key moves through `Absent -> Starting -> Ready ->
//! Draining -> Absent`. The first acquire of a key spawns a provisioning
//! task; every acquire that arrives while it runs waits on the same `watch`
//! channel, so a key is never provisioned twice. When the last holder
//! releases, the slot drains for the configured grace before the container
//! is stopped; an acquire inside that window takes the scope back.
//!
//! Provisioning and teardown run as detached tasks. A caller that gives up
//! while waiting only drops its own hold; the container keeps starting and is
//! drained if nobody else wants it.

use crate::driver::{ContainerDriver, StartRequest};
use crate::instance::{ContainerInstance, InstanceStatus};
use crate::publisher::{EndpointBinding, EndpointPublisher};
use crate::readiness::ReadinessProber;
use crate::scope::ScopeKey;
use crate::service::ServiceSpec;
use crate::telemetry::FixtureTelemetry;
use errors::{FixtureError, FixtureResult, ScopeError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Container output lines kept on a readiness failure.
const LOGS_TAIL_LINES: usize = 40;

/// Observable lifecycle phase of a scope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopePhase {
    Absent,
    Starting,
    Ready,
    /// No holders left. Covers both the grace window and the stop itself.
    Draining
}

/// Timing and container settings applied to every scope.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub ready_timeout: Duration,
    pub drain_grace: Duration,
    pub base_env: BTreeMap<String, String>,
    pub name_prefix: Option<String>
}

impl ManagerSettings {
    pub fn from_config(config: &config::FixtureConfig) -> Self {
        let mut base_env = config.container.extra_env.clone();
        base_env
            .entry("DEFAULT_REGION".to_string())
            .or_insert_with(|| config.endpoint.region.clone());
        Self {
            ready_timeout: config.readiness.timeout(),
            drain_grace: config.scope.drain_grace(),
            base_env,
            name_prefix: config.container.name_prefix.clone()
        }
    }

    fn start_request(&self, scope: &ScopeKey, services: Vec<ServiceSpec>) -> StartRequest {
        let mut env = self.base_env.clone();
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        env.insert("SERVICES".to_string(), names.join(","));
        StartRequest {
            scope: scope.clone(),
            services,
            env,
            name_prefix: self.name_prefix.clone()
        }
    }
}

type Outcome = Option<Result<Arc<LiveScope>, FixtureError>>;

struct LiveScope {
    instance: Arc<ContainerInstance>,
    binding: EndpointBinding
}

enum SlotState {
    Starting(watch::Receiver<Outcome>),
    Ready(Arc<LiveScope>),
    Draining { live: Arc<LiveScope>, drain_id: u64 },
    Stopping(watch::Receiver<bool>)
}

struct Slot {
    generation: u64,
    holders: usize,
    services: Vec<ServiceSpec>,
    state: SlotState
}

enum Step {
    Wait(u64, watch::Receiver<Outcome>),
    AwaitStop(u64, watch::Receiver<bool>)
}

struct Inner {
    driver: Arc<dyn ContainerDriver>,
    prober: ReadinessProber,
    publisher: EndpointPublisher,
    telemetry: FixtureTelemetry,
    settings: ManagerSettings,
    slots: Mutex<HashMap<ScopeKey, Slot>>,
    next_id: AtomicU64
}

/// Reference-counted scopes over a [`ContainerDriver`].
#[derive(Clone)]
pub struct ScopeManager {
    inner: Arc<Inner>
}

impl ScopeManager {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        prober: ReadinessProber,
        publisher: EndpointPublisher,
        telemetry: FixtureTelemetry,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                prober,
                publisher,
                telemetry,
                settings,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1)
            })
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Take a hold on `key`, provisioning its container if needed, and
    /// return the endpoints once every service is ready.
    pub async fn acquire(&self, key: &ScopeKey, services: &[ServiceSpec]) -> FixtureResult<EndpointBinding> {
        check_single_image(key, services)?;

        loop {
            let step = {
                let mut slots = self.inner.slots.lock();
                match slots.get_mut(key) {
                    None => {
                        let generation = self.inner.next_id();
                        let (tx, rx) = watch::channel(None);
                        slots.insert(
                            key.clone(),
                            Slot {
                                generation,
                                holders: 1,
                                services: services.to_vec(),
                                state: SlotState::Starting(rx.clone())
                            }
                        );
                        self.inner.telemetry.set_live_scopes(slots.len());
                        tracing::info!("Provisioning {} with {} services", key, services.len());

                        let inner = self.inner.clone();
                        let (key, services) = (key.clone(), services.to_vec());
                        spawn_detached(async move {
                            inner.provision(key, generation, services, tx).await;
                        });
                        Step::Wait(generation, rx)
                    }
                    Some(slot) => match &slot.state {
                        SlotState::Stopping(done) => Step::AwaitStop(slot.generation, done.clone()),
                        SlotState::Starting(outcome) => {
                            ensure_provisioned(key, &slot.services, services)?;
                            slot.holders += 1;
                            Step::Wait(slot.generation, outcome.clone())
                        }
                        SlotState::Ready(live) => {
                            ensure_provisioned(key, &slot.services, services)?;
                            slot.holders += 1;
                            tracing::debug!("{} joined ({} holders)", key, slot.holders);
                            return Ok(live.binding.clone());
                        }
                        SlotState::Draining { live, .. } => {
                            ensure_provisioned(key, &slot.services, services)?;
                            let live = live.clone();
                            slot.holders += 1;
                            slot.state = SlotState::Ready(live.clone());
                            tracing::info!("Drain of {} cancelled by a new acquire", key);
                            return Ok(live.binding.clone());
                        }
                    }
                }
            };

            match step {
                Step::Wait(generation, mut outcome) => {
                    let mut hold = PendingHold {
                        inner: &self.inner,
                        key,
                        generation,
                        armed: true
                    };
                    let result = match outcome.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        Err(_) => None
                    };
                    hold.armed = false;
                    return match result {
                        Some(result) => result.map(|live| live.binding.clone()),
                        None => {
                            self.inner.forget(key, generation);
                            Err(FixtureError::Abandoned {
                                scope: key.to_string(),
                                reason: "provisioning task ended without an outcome".to_string()
                            })
                        }
                    };
                }
                Step::AwaitStop(generation, mut done) => {
                    tracing::debug!("{} is stopping, waiting to provision afresh", key);
                    if done.wait_for(|stopped| *stopped).await.is_err() {
                        self.inner.forget(key, generation);
                    }
                }
            }
        }
    }

    /// Drop one hold on `key`. The last release starts the drain.
    pub fn release(&self, key: &ScopeKey) -> Result<(), ScopeError> {
        let mut slots = self.inner.slots.lock();
        let slot = match slots.get_mut(key) {
            Some(slot) if slot.holders > 0 && matches!(slot.state, SlotState::Ready(_)) => slot,
            _ => {
                return Err(ScopeError::NotAcquired {
                    scope: key.to_string()
                });
            }
        };

        slot.holders -= 1;
        tracing::debug!("{} released ({} holders left)", key, slot.holders);
        if slot.holders == 0 {
            self.inner.begin_drain(key, slot);
        }
        Ok(())
    }

    pub fn phase(&self, key: &ScopeKey) -> ScopePhase {
        match self.inner.slots.lock().get(key).map(|slot| &slot.state) {
            None => ScopePhase::Absent,
            Some(SlotState::Starting(_)) => ScopePhase::Starting,
            Some(SlotState::Ready(_)) => ScopePhase::Ready,
            Some(SlotState::Draining { .. }) | Some(SlotState::Stopping(_)) => ScopePhase::Draining
        }
    }

    pub fn holders(&self, key: &ScopeKey) -> usize {
        self.inner.slots.lock().get(key).map_or(0, |slot| slot.holders)
    }

    /// Keys that currently have a slot, in any phase.
    pub fn scopes(&self) -> Vec<ScopeKey> {
        let mut keys: Vec<ScopeKey> = self.inner.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Container output of a live scope.
    pub async fn logs(&self, key: &ScopeKey) -> FixtureResult<String> {
        let instance = {
            let slots = self.inner.slots.lock();
            match slots.get(key).map(|slot| &slot.state) {
                Some(SlotState::Ready(live)) | Some(SlotState::Draining { live, .. }) => {
                    live.instance.clone()
                }
                _ => {
                    return Err(ScopeError::NotAcquired {
                        scope: key.to_string()
                    }
                    .into());
                }
            }
        };
        Ok(self.inner.driver.logs(&instance).await?)
    }

    /// Tear every scope down now, regardless of holders, and wait until all
    /// containers are stopped. Scopes still starting are awaited first.
    pub async fn shutdown(&self) {
        enum Pending {
            Start(ScopeKey, u64, watch::Receiver<Outcome>),
            Stop(ScopeKey, u64, watch::Receiver<bool>)
        }

        loop {
            let pending: Vec<Pending> = {
                let mut slots = self.inner.slots.lock();
                if slots.is_empty() {
                    break;
                }
                tracing::info!("Shutting down {} scopes", slots.len());
                slots
                    .iter_mut()
                    .map(|(key, slot)| {
                        let live = match &slot.state {
                            SlotState::Starting(outcome) => {
                                return Pending::Start(key.clone(), slot.generation, outcome.clone());
                            }
                            SlotState::Stopping(done) => {
                                return Pending::Stop(key.clone(), slot.generation, done.clone());
                            }
                            SlotState::Ready(live) | SlotState::Draining { live, .. } => live.clone()
                        };
                        slot.holders = 0;
                        let done = self.inner.stop_slot(key, slot, live);
                        Pending::Stop(key.clone(), slot.generation, done)
                    })
                    .collect()
            };

            for wait in pending {
                match wait {
                    Pending::Start(key, generation, mut outcome) => {
                        if outcome.wait_for(Option::is_some).await.is_err() {
                            self.inner.forget(&key, generation);
                        }
                    }
                    Pending::Stop(key, generation, mut done) => {
                        if done.wait_for(|stopped| *stopped).await.is_err() {
                            self.inner.forget(&key, generation);
                        }
                    }
                }
            }
        }
        tracing::info!("All scopes shut down");
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn provision(
        self: Arc<Self>,
        key: ScopeKey,
        generation: u64,
        services: Vec<ServiceSpec>,
        outcome: watch::Sender<Outcome>,
    ) {
        let started = Instant::now();
        let request = self.settings.start_request(&key, services);

        let instance = match self.driver.start(&request).await {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                self.fail(&key, generation, &outcome, e.into(), None).await;
                return;
            }
        };

        if let Err(mut e) = self.prober.wait_ready(&instance, self.settings.ready_timeout).await {
            e.logs_tail = self.logs_tail(&instance).await;
            self.fail(&key, generation, &outcome, e.into(), Some(instance))
                .await;
            return;
        }

        let live = Arc::new(LiveScope {
            binding: self.publisher.publish(&instance),
            instance: instance.clone()
        });

        let orphaned = {
            let mut slots = self.slots.lock();
            match slots.get_mut(&key) {
                Some(slot) if slot.generation == generation => {
                    slot.state = SlotState::Ready(live.clone());
                    if slot.holders == 0 {
                        tracing::debug!("Every waiter of {} left before it was ready", key);
                        self.begin_drain(&key, slot);
                    }
                    false
                }
                _ => true
            }
        };

        if orphaned {
            tracing::warn!("Scope {} vanished while starting, stopping container", key);
            self.stop_instance(&instance).await;
            outcome.send_replace(Some(Err(FixtureError::Abandoned {
                scope: key.to_string(),
                reason: "scope removed while starting".to_string()
            })));
            return;
        }

        self.telemetry.record_provision(&key, started.elapsed());
        tracing::info!(
            "Scope {} ready in {:?} on container {}",
            key,
            started.elapsed(),
            instance.id()
        );
        outcome.send_replace(Some(Ok(live)));
    }

    async fn fail(
        &self,
        key: &ScopeKey,
        generation: u64,
        outcome: &watch::Sender<Outcome>,
        error: FixtureError,
        instance: Option<Arc<ContainerInstance>>,
    ) {
        tracing::warn!("Provisioning {} failed: {}", key, error);
        self.telemetry.record_provision_failure(key, &error);

        let Some(instance) = instance else {
            self.forget(key, generation);
            outcome.send_replace(Some(Err(error)));
            return;
        };

        let (done_tx, done_rx) = watch::channel(false);
        if let Some(slot) = self.slots.lock().get_mut(key)
            && slot.generation == generation
        {
            slot.state = SlotState::Stopping(done_rx);
        }
        outcome.send_replace(Some(Err(error)));
        self.stop_instance(&instance).await;
        self.forget(key, generation);
        done_tx.send_replace(true);
    }

    async fn logs_tail(&self, instance: &ContainerInstance) -> Option<String> {
        match self.driver.logs(instance).await {
            Ok(text) => {
                let lines: Vec<&str> = text.lines().collect();
                let start = lines.len().saturating_sub(LOGS_TAIL_LINES);
                let tail = lines[start..].join("\n");
                (!tail.is_empty()).then_some(tail)
            }
            Err(e) => {
                tracing::debug!("Could not read logs of {}: {}", instance.id(), e);
                None
            }
        }
    }

    /// Called with the slot lock held, once holders reached zero.
    fn begin_drain(self: &Arc<Self>, key: &ScopeKey, slot: &mut Slot) {
        let SlotState::Ready(live) = &slot.state else {
            return;
        };
        let live = live.clone();

        if self.settings.drain_grace.is_zero() {
            self.stop_slot(key, slot, live);
            return;
        }

        let drain_id = self.next_id();
        slot.state = SlotState::Draining { live, drain_id };
        tracing::info!("Draining {} for {:?}", key, self.settings.drain_grace);

        let inner = self.clone();
        let (key, generation) = (key.clone(), slot.generation);
        spawn_detached(async move {
            tokio::time::sleep(inner.settings.drain_grace).await;
            inner.expire_drain(&key, generation, drain_id);
        });
    }

    fn expire_drain(self: &Arc<Self>, key: &ScopeKey, generation: u64, drain_id: u64) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        let live = match &slot.state {
            SlotState::Draining { live, drain_id: current } if *current == drain_id => live.clone(),
            _ => return
        };
        self.stop_slot(key, slot, live);
    }

    /// Move the slot to stopping and spawn its teardown. Called with the slot
    /// lock held.
    fn stop_slot(self: &Arc<Self>, key: &ScopeKey, slot: &mut Slot, live: Arc<LiveScope>) -> watch::Receiver<bool> {
        let (done_tx, done_rx) = watch::channel(false);
        slot.state = SlotState::Stopping(done_rx.clone());

        let inner = self.clone();
        let (key, generation) = (key.clone(), slot.generation);
        spawn_detached(async move {
            inner.teardown(&key, generation, live, done_tx).await;
        });
        done_rx
    }

    async fn teardown(&self, key: &ScopeKey, generation: u64, live: Arc<LiveScope>, done: watch::Sender<bool>) {
        self.stop_instance(&live.instance).await;
        self.forget(key, generation);
        self.telemetry.record_teardown(key);
        tracing::info!("Scope {} torn down", key);
        done.send_replace(true);
    }

    async fn stop_instance(&self, instance: &ContainerInstance) {
        if let Err(e) = self.driver.stop(instance).await {
            tracing::debug!("Stop of container {} reported {}", instance.id(), e);
        }
        instance.set_status(InstanceStatus::Stopped);
    }

    /// Remove the slot of `key` if it still belongs to `generation`.
    fn forget(&self, key: &ScopeKey, generation: u64) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|slot| slot.generation == generation) {
            slots.remove(key);
        }
        self.telemetry.set_live_scopes(slots.len());
    }
}

/// Hold taken by a waiting acquire. Dropped while armed (the caller was
/// cancelled), it gives the hold back.
struct PendingHold<'a> {
    inner: &'a Arc<Inner>,
    key: &'a ScopeKey,
    generation: u64,
    armed: bool
}

impl Drop for PendingHold<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.inner.slots.lock();
        let Some(slot) = slots.get_mut(self.key) else {
            return;
        };
        if slot.generation != self.generation {
            return;
        }
        slot.holders = slot.holders.saturating_sub(1);
        tracing::debug!(
            "Waiter on {} abandoned ({} holders left)",
            self.key,
            slot.holders
        );
        if slot.holders == 0 {
            self.inner.begin_drain(self.key, slot);
        }
    }
}

fn check_single_image(key: &ScopeKey, services: &[ServiceSpec]) -> Result<(), ScopeError> {
    let Some(first) = services.first() else {
        return Ok(());
    };
    match services.iter().find(|s| s.image != first.image) {
        Some(other) => Err(ScopeError::MixedImages {
            scope: key.to_string(),
            first: first.image.clone(),
            second: other.image.clone()
        }),
        None => Ok(())
    }
}

fn ensure_provisioned(key: &ScopeKey, running: &[ServiceSpec], requested: &[ServiceSpec]) -> Result<(), ScopeError> {
    match requested
        .iter()
        .find(|wanted| !running.iter().any(|s| s.name == wanted.name))
    {
        Some(missing) => Err(ScopeError::ServiceNotProvisioned {
            scope: key.to_string(),
            service: missing.name.clone()
        }),
        None => Ok(())
    }
}

/// Run `task` on the current runtime, or on a private one when called from
/// outside any runtime (a guard dropped after its test runtime ended).
fn spawn_detached<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(task);
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("fixture-scope".to_string())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(task),
                Err(e) => tracing::warn!("No runtime for scope task: {}", e)
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Could not spawn scope task thread: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Protocol, ServiceCatalog};

    #[test]
    fn test_single_image_check() {
        let key = ScopeKey::module("images");
        let a = ServiceSpec::new("s3", "localstack/localstack:0.10.9", 4572, Protocol::Http, "S3");
        let b = ServiceSpec::new("sqs", "localstack/localstack:latest", 4576, Protocol::Http, "SQS");
        assert!(check_single_image(&key, &[a.clone()]).is_ok());
        assert!(matches!(
            check_single_image(&key, &[a, b]),
            Err(ScopeError::MixedImages { .. })
        ));
    }

    #[test]
    fn test_ensure_provisioned_reports_missing_service() {
        let catalog = ServiceCatalog::localstack("localstack/localstack:0.10.9");
        let key = ScopeKey::function("subset");
        let running = catalog.specs(&["s3", "sqs"]).unwrap();
        assert!(ensure_provisioned(&key, &running, &catalog.specs(&["sqs"]).unwrap()).is_ok());
        let err = ensure_provisioned(&key, &running, &catalog.specs(&["sns"]).unwrap()).unwrap_err();
        assert_eq!(
            err,
            ScopeError::ServiceNotProvisioned {
                scope: "function:subset".to_string(),
                service: "sns".to_string()
            }
        );
    }

    #[test]
    fn test_start_request_env() {
        let config = config::FixtureConfig::default();
        let settings = ManagerSettings::from_config(&config);
        let catalog = ServiceCatalog::localstack(config.container.image_ref());
        let request = settings.start_request(&ScopeKey::session(), catalog.specs(&["s3", "sqs"]).unwrap());
        assert_eq!(request.env.get("SERVICES").map(String::as_str), Some("s3,sqs"));
        assert_eq!(request.env.get("DEFAULT_REGION").map(String::as_str), Some("us-east-1"));
        assert_eq!(request.name_prefix.as_deref(), Some("localstack-fixture"));
    }
}
