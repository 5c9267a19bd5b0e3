//! Endpoint publishing.
//!
//! Turns a ready [`ContainerInstance`] into an [`EndpointBinding`]: the URL,
//! region and placeholder credentials each service client needs. The binding
//! is a plain value. Hand [`ClientConfig`] or the `SdkConfig` it loads to a
//! client constructor; use [`crate::ambient::AmbientPatch`] only for code
//! that reads configuration from the environment.

use crate::ambient::EnvAssignment;
use crate::instance::ContainerInstance;
use crate::scope::ScopeKey;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use errors::ScopeError;
use std::collections::BTreeMap;

const CREDENTIALS_PROVIDER: &str = "localstack-fixture";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>
}

impl FakeCredentials {
    pub fn to_sdk(&self) -> Credentials {
        Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            self.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service: String,
    pub host: String,
    pub port: u16,
    pub url: String,
    /// Service-specific endpoint override variable, `AWS_ENDPOINT_URL_<SDK_ID>`.
    pub env_var: String
}

/// Explicit configuration for one service client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub service: String,
    pub endpoint_url: String,
    pub region: String,
    pub credentials: FakeCredentials
}

impl ClientConfig {
    /// Load an `SdkConfig` pointing at the emulated service.
    ///
    /// Region, endpoint and credentials are all set explicitly, so nothing is
    /// read from the environment or instance metadata.
    pub async fn load(&self) -> SdkConfig {
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .endpoint_url(self.endpoint_url.clone())
            .credentials_provider(self.credentials.to_sdk())
            .load()
            .await
    }
}

/// Resolved connection parameters for every service of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointBinding {
    scope: ScopeKey,
    container_id: String,
    region: String,
    credentials: FakeCredentials,
    endpoints: BTreeMap<String, ServiceEndpoint>
}

impl EndpointBinding {
    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn credentials(&self) -> &FakeCredentials {
        &self.credentials
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.endpoints.values()
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn endpoint(&self, service: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.get(service)
    }

    pub fn url(&self, service: &str) -> Option<&str> {
        self.endpoint(service).map(|e| e.url.as_str())
    }

    pub fn port(&self, service: &str) -> Option<u16> {
        self.endpoint(service).map(|e| e.port)
    }

    pub fn client_config(&self, service: &str) -> Result<ClientConfig, ScopeError> {
        let endpoint = self
            .endpoint(service)
            .ok_or_else(|| ScopeError::ServiceNotProvisioned {
                scope: self.scope.to_string(),
                service: service.to_string()
            })?;
        Ok(ClientConfig {
            service: service.to_string(),
            endpoint_url: endpoint.url.clone(),
            region: self.region.clone(),
            credentials: self.credentials.clone()
        })
    }

    pub async fn sdk_config(&self, service: &str) -> Result<SdkConfig, ScopeError> {
        Ok(self.client_config(service)?.load().await)
    }

    /// Environment a default-chain SDK client needs to reach this binding.
    ///
    /// Each service gets its own `AWS_ENDPOINT_URL_<SDK_ID>`; a session token
    /// inherited from the real environment is hidden unless one is
    /// configured.
    pub fn env_assignments(&self) -> Vec<EnvAssignment> {
        let mut vars: Vec<EnvAssignment> = self
            .endpoints
            .values()
            .map(|e| (e.env_var.clone(), Some(e.url.clone())))
            .collect();
        vars.push(("AWS_REGION".to_string(), Some(self.region.clone())));
        vars.push(("AWS_DEFAULT_REGION".to_string(), Some(self.region.clone())));
        vars.push((
            "AWS_ACCESS_KEY_ID".to_string(),
            Some(self.credentials.access_key_id.clone())
        ));
        vars.push((
            "AWS_SECRET_ACCESS_KEY".to_string(),
            Some(self.credentials.secret_access_key.clone())
        ));
        vars.push((
            "AWS_SESSION_TOKEN".to_string(),
            self.credentials.session_token.clone()
        ));
        vars.push(("AWS_EC2_METADATA_DISABLED".to_string(), Some("true".to_string())));
        vars
    }
}

/// Builds bindings from instances.
#[derive(Debug, Clone)]
pub struct EndpointPublisher {
    host: String,
    region: String,
    credentials: FakeCredentials
}

impl EndpointPublisher {
    pub fn new(host: impl Into<String>, region: impl Into<String>, credentials: FakeCredentials) -> Self {
        Self {
            host: host.into(),
            region: region.into(),
            credentials
        }
    }

    pub fn from_config(config: &config::EndpointConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.region.clone(),
            FakeCredentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                session_token: config.session_token.clone()
            },
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn publish(&self, instance: &ContainerInstance) -> EndpointBinding {
        let endpoints = instance
            .services()
            .iter()
            .filter_map(|spec| {
                instance.host_port(&spec.name).map(|port| {
                    (
                        spec.name.clone(),
                        ServiceEndpoint {
                            service: spec.name.clone(),
                            host: self.host.clone(),
                            port,
                            url: format!("http://{}:{}", self.host, port),
                            env_var: spec.endpoint_env_var()
                        }
                    )
                })
            })
            .collect();

        EndpointBinding {
            scope: instance.scope().clone(),
            container_id: instance.id().to_string(),
            region: self.region.clone(),
            credentials: self.credentials.clone(),
            endpoints
        }
    }
}
