//! Emulated service definitions.

use errors::ScopeError;
use serde::{Deserialize, Serialize};

/// How a service is probed for health.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// A successful TCP connect is enough.
    Tcp,
    /// Any non-5xx answer to `GET /`.
    Http
}

/// One emulated service inside the emulator image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceSpec {
    pub name: String,
    /// `repository:tag`
    pub image: String,
    pub internal_port: u16,
    pub protocol: Protocol,
    /// SDK service id, upper snake case, used for `AWS_ENDPOINT_URL_<ID>`.
    pub sdk_id: String
}

impl ServiceSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        internal_port: u16,
        protocol: Protocol,
        sdk_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            internal_port,
            protocol,
            sdk_id: sdk_id.into()
        }
    }

    /// Name of the service-specific endpoint override variable.
    pub fn endpoint_env_var(&self) -> String {
        format!("AWS_ENDPOINT_URL_{}", self.sdk_id)
    }
}

/// (name, legacy port, sdk id)
const LOCALSTACK_SERVICES: &[(&str, u16, &str)] = &[
    ("apigateway", 4567, "API_GATEWAY"),
    ("kinesis", 4568, "KINESIS"),
    ("dynamodb", 4569, "DYNAMODB"),
    ("dynamodbstreams", 4570, "DYNAMODB_STREAMS"),
    ("s3", 4572, "S3"),
    ("firehose", 4573, "FIREHOSE"),
    ("lambda", 4574, "LAMBDA"),
    ("sns", 4575, "SNS"),
    ("sqs", 4576, "SQS"),
    ("redshift", 4577, "REDSHIFT"),
    ("es", 4578, "ELASTICSEARCH_SERVICE"),
    ("ses", 4579, "SES"),
    ("route53", 4580, "ROUTE_53"),
    ("cloudformation", 4581, "CLOUDFORMATION"),
    ("cloudwatch", 4582, "CLOUDWATCH"),
    ("ssm", 4583, "SSM"),
    ("secretsmanager", 4584, "SECRETS_MANAGER"),
    ("stepfunctions", 4585, "SFN"),
    ("logs", 4586, "CLOUDWATCH_LOGS"),
    ("sts", 4592, "STS"),
    ("iam", 4593, "IAM"),
];

/// Catalog of the services a LocalStack image exposes, one port per service.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    image: String
}

impl ServiceCatalog {
    pub fn localstack(image: impl Into<String>) -> Self {
        Self {
            image: image.into()
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn spec(&self, name: &str) -> Option<ServiceSpec> {
        LOCALSTACK_SERVICES
            .iter()
            .find(|(service, _, _)| *service == name)
            .map(|(service, port, sdk_id)| {
                ServiceSpec::new(*service, self.image.clone(), *port, Protocol::Http, *sdk_id)
            })
    }

    /// Resolve a list of names, failing on the first unknown one.
    pub fn specs<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ServiceSpec>, ScopeError> {
        names
            .iter()
            .map(|name| {
                self.spec(name.as_ref()).ok_or_else(|| ScopeError::UnknownService {
                    service: name.as_ref().to_string()
                })
            })
            .collect()
    }

    pub fn all(&self) -> Vec<ServiceSpec> {
        LOCALSTACK_SERVICES
            .iter()
            .filter_map(|(name, _, _)| self.spec(name))
            .collect()
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        LOCALSTACK_SERVICES.iter().map(|(name, _, _)| *name)
    }
}
