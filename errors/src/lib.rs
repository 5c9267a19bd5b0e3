//! # Fixture Errors
//!
//! Error taxonomy for the emulated cloud-stack fixture.
//!
//! - Uses `thiserror` for structured error definitions
//! - Every error is `Clone` so one provisioning outcome can be handed to all
//!   callers waiting on the same scope

use thiserror::Error;

/// The container could not be started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Container runtime unreachable: {reason}")]
    DaemonUnreachable { reason: String },

    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Port pool exhausted: requested {requested} ports, {available} free")]
    PortExhausted { requested: usize, available: usize },

    #[error("Host port collision after {attempts} attempts: {reason}")]
    PortCollision { attempts: u32, reason: String },

    #[error("Container runtime error: {reason}")]
    Runtime { reason: String }
}

/// Health detail for one service that never answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    pub service: String,
    pub port: u16,
    pub attempts: u32,
    pub last_error: String
}

impl std::fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (port {}, {} attempts): {}",
            self.service, self.port, self.attempts, self.last_error
        )
    }
}

/// The container started but its services never became healthy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Services of {scope} not ready after {waited_ms}ms: {}", format_failures(.failures))]
pub struct ReadinessTimeoutError {
    pub scope: String,
    pub waited_ms: u64,
    pub failures: Vec<ServiceFailure>,
    /// Last lines of the container output, when the runtime could provide them.
    pub logs_tail: Option<String>
}

fn format_failures(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Prior ambient client configuration could not be restored exactly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationRestoreError {
    #[error("Variable {variable} was modified outside the fixture while patched")]
    Modified { variable: String }
}

/// Misuse of the scope reference-counting contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Release of {scope} without a matching acquire")]
    NotAcquired { scope: String },

    #[error("Scope {scope} is live without service {service}")]
    ServiceNotProvisioned { scope: String, service: String },

    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Services for {scope} must share one image, got {first} and {second}")]
    MixedImages {
        scope: String,
        first: String,
        second: String
    }
}

/// Top-level error returned by the fixture façade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FixtureError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    ReadinessTimeout(#[from] ReadinessTimeoutError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("Provisioning of {scope} was abandoned: {reason}")]
    Abandoned { scope: String, reason: String }
}

pub type FixtureResult<T> = Result<T, FixtureError>;
