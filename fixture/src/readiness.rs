//! Readiness probing.
//!
//! The prober polls every declared service of an instance until all of them
//! answer or the budget runs out. Each round sleeps for the configured
//! interval plus random jitter.

use crate::instance::{ContainerInstance, InstanceStatus};
use crate::service::Protocol;
use async_trait::async_trait;
use errors::{ReadinessTimeoutError, ServiceFailure};
use futures_util::future::join_all;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// A single health check against one published port.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, protocol: Protocol) -> Result<(), String>;
}

/// TCP connect or HTTP GET against the host.
pub struct NetworkProbe {
    client: reqwest::Client,
    connect_timeout: Duration
}

impl NetworkProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(connect_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client for probes: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            connect_timeout
        }
    }
}

#[async_trait]
impl HealthProbe for NetworkProbe {
    async fn probe(&self, host: &str, port: u16, protocol: Protocol) -> Result<(), String> {
        match protocol {
            Protocol::Tcp => {
                match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
                    .await
                {
                    Ok(Ok(_stream)) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("connect timed out after {:?}", self.connect_timeout))
                }
            }
            Protocol::Http => {
                let response = self
                    .client
                    .get(format!("http://{host}:{port}/"))
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                let status = response.status();
                if status.is_server_error() {
                    Err(format!("status {status}"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Polling schedule.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    pub interval: Duration,
    pub jitter: Duration
}

impl ProbeSchedule {
    pub fn from_config(config: &config::ReadinessConfig) -> Self {
        Self {
            interval: config.interval(),
            jitter: config.jitter()
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.interval + Duration::from_millis(extra)
    }
}

struct PendingService {
    port: u16,
    protocol: Protocol,
    attempts: u32,
    last_error: String
}

pub struct ReadinessProber {
    probe: Arc<dyn HealthProbe>,
    host: String,
    schedule: ProbeSchedule
}

impl ReadinessProber {
    pub fn new(probe: Arc<dyn HealthProbe>, host: impl Into<String>, schedule: ProbeSchedule) -> Self {
        Self {
            probe,
            host: host.into(),
            schedule
        }
    }

    /// Block until every service of `instance` answers, or `timeout`
    /// elapses.
    ///
    /// On success the instance is marked ready; on timeout it is marked
    /// failed and the error lists, per service still down, how many attempts
    /// were made and the last failure seen.
    pub async fn wait_ready(
        &self,
        instance: &ContainerInstance,
        timeout: Duration,
    ) -> Result<(), ReadinessTimeoutError> {
        let started = Instant::now();
        let deadline = started + timeout;

        let mut pending: BTreeMap<String, PendingService> = instance
            .services()
            .iter()
            .filter_map(|spec| {
                instance.host_port(&spec.name).map(|port| {
                    (
                        spec.name.clone(),
                        PendingService {
                            port,
                            protocol: spec.protocol,
                            attempts: 0,
                            last_error: "not probed".to_string()
                        }
                    )
                })
            })
            .collect();

        loop {
            let results = join_all(pending.iter().map(|(name, svc)| {
                let probe = self.probe.clone();
                let host = self.host.clone();
                let name = name.clone();
                let (port, protocol) = (svc.port, svc.protocol);
                async move { (name, probe.probe(&host, port, protocol).await) }
            }))
            .await;

            for (name, result) in results {
                match result {
                    Ok(()) => {
                        tracing::debug!("{} of {} is healthy", name, instance.scope());
                        pending.remove(&name);
                    }
                    Err(error) => {
                        if let Some(svc) = pending.get_mut(&name) {
                            svc.attempts += 1;
                            svc.last_error = error;
                        }
                    }
                }
            }

            if pending.is_empty() {
                instance.set_status(InstanceStatus::Ready);
                tracing::info!(
                    "All services of {} ready after {:?}",
                    instance.scope(),
                    started.elapsed()
                );
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                instance.set_status(InstanceStatus::Failed);
                return Err(ReadinessTimeoutError {
                    scope: instance.scope().to_string(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    failures: pending
                        .into_iter()
                        .map(|(service, svc)| ServiceFailure {
                            service,
                            port: svc.port,
                            attempts: svc.attempts,
                            last_error: svc.last_error
                        })
                        .collect(),
                    logs_tail: None
                });
            }

            tokio::time::sleep(self.schedule.next_delay().min(deadline - now)).await;
        }
    }
}
