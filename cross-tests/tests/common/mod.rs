//! Shared setup for the Docker-backed suites.

#![allow(dead_code)]

use fixture::{Fixture, FixtureDeclaration, ScopeKey};

/// Every service the suites talk to.
pub const SERVICES: [&str; 15] = [
    "apigateway",
    "cloudformation",
    "cloudwatch",
    "dynamodb",
    "dynamodbstreams",
    "es",
    "firehose",
    "kinesis",
    "lambda",
    "redshift",
    "route53",
    "s3",
    "ses",
    "sns",
    "sqs"
];

/// Services with resource collections worth paging through.
pub const COLLECTION_SERVICES: [&str; 6] = ["cloudformation", "cloudwatch", "dynamodb", "s3", "sns", "sqs"];

/// A Docker-backed fixture, or `None` (with a note) when no daemon answers.
pub async fn docker_fixture() -> Option<Fixture> {
    let config = match config::load(None) {
        Ok(config) => config,
        Err(e) => panic!("fixture configuration is invalid: {e}")
    };
    testing::init_tracing_with(&config.observability);
    if !testing::docker_available().await {
        eprintln!("Skipping test: Docker not available");
        return None;
    }
    Some(Fixture::docker(config))
}

pub fn module_declaration(name: &str, services: &[&str]) -> FixtureDeclaration {
    FixtureDeclaration::new(ScopeKey::module(testing::unique_id(name))).services(services.iter().copied())
}

pub fn s3_client(config: &aws_config::SdkConfig) -> aws_sdk_s3::Client {
    let s3_config = aws_sdk_s3::config::Builder::from(config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
