//! # Emulated cloud-stack fixture
//!
//! Lifecycle management for LocalStack containers shared by tests.
//!
//! - [`driver`]: start and stop containers (`testcontainers`)
//! - [`ports`]: host port pool shared by every scope
//! - [`readiness`]: wait until every declared service answers
//! - [`manager`]: reference-counted, single-flight scopes with drain grace
//! - [`publisher`] and [`ambient`]: hand endpoints to SDK clients
//! - [`facade`]: [`Fixture`], the entry point tests use
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use fixture::{Fixture, FixtureDeclaration, ScopeKey};
//!
//! let fixture = Fixture::docker(config::FixtureConfig::default());
//! let guard = fixture
//!     .declare(FixtureDeclaration::new(ScopeKey::module("storage")).services(["s3", "sqs"]))
//!     .await?;
//! let s3 = aws_sdk_s3::Client::new(&guard.sdk_config("s3").await?);
//! # drop(s3);
//! # Ok(())
//! # }
//! ```

pub mod ambient;
pub mod driver;
pub mod facade;
pub mod instance;
pub mod manager;
pub mod ports;
pub mod publisher;
pub mod readiness;
pub mod scope;
pub mod service;
pub mod telemetry;

pub use ambient::{AmbientPatch, EnvAssignment};
pub use driver::{ContainerDriver, DockerDriver, StartRequest};
pub use facade::{Fixture, FixtureDeclaration, FixtureGuard};
pub use instance::{ContainerInstance, InstanceStatus};
pub use manager::{ManagerSettings, ScopeManager, ScopePhase};
pub use ports::PortPool;
pub use publisher::{ClientConfig, EndpointBinding, EndpointPublisher, FakeCredentials, ServiceEndpoint};
pub use readiness::{HealthProbe, NetworkProbe, ProbeSchedule, ReadinessProber};
pub use scope::{ScopeKey, ScopeKind};
pub use service::{Protocol, ServiceCatalog, ServiceSpec};
pub use telemetry::FixtureTelemetry;
