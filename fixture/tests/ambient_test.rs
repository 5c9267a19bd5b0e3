//! Process environment around autouse scopes.

use fixture::{FixtureDeclaration, ScopeKey, ScopePhase};
use serial_test::serial;
use std::env;
use std::time::Duration;
use testing::{config_with_grace, fake_fixture, unique_id};

const WATCHED: [&str; 6] = [
    "AWS_ENDPOINT_URL_S3",
    "AWS_ENDPOINT_URL_SQS",
    "AWS_REGION",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN"
];

fn snapshot() -> Vec<Option<String>> {
    WATCHED.iter().map(|name| env::var(name).ok()).collect()
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_autouse_patches_and_restores_environment() {
    unsafe {
        env::set_var("AWS_REGION", "eu-west-3");
        env::set_var("AWS_SESSION_TOKEN", "real-session");
        env::remove_var("AWS_ENDPOINT_URL_S3");
    }
    let before = snapshot();

    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(0));
    let key = ScopeKey::module(unique_id("ambient"));
    let guard = fixture
        .declare(
            FixtureDeclaration::new(key.clone())
                .services(["s3", "sqs"])
                .autouse(true)
        )
        .await
        .unwrap();

    assert_eq!(env::var("AWS_ENDPOINT_URL_S3").ok().as_deref(), guard.url("s3"));
    assert_eq!(env::var("AWS_ENDPOINT_URL_SQS").ok().as_deref(), guard.url("sqs"));
    assert_eq!(env::var("AWS_REGION").ok().as_deref(), Some("us-east-1"));
    assert_eq!(env::var("AWS_ACCESS_KEY_ID").ok().as_deref(), Some("accesskey"));
    assert!(env::var("AWS_SESSION_TOKEN").is_err());

    drop(guard);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
    assert_eq!(snapshot(), before);

    unsafe {
        env::remove_var("AWS_REGION");
        env::remove_var("AWS_SESSION_TOKEN");
    }
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_plain_declaration_leaves_environment_alone() {
    unsafe {
        env::remove_var("AWS_ENDPOINT_URL_S3");
    }
    let before = snapshot();

    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(0));
    let guard = fixture
        .declare(FixtureDeclaration::new(ScopeKey::function(unique_id("plain"))).service("s3"))
        .await
        .unwrap();

    assert_eq!(snapshot(), before);
    let config = guard.client_config("s3").unwrap();
    assert_eq!(Some(config.endpoint_url.as_str()), guard.url("s3"));
    guard.release().unwrap();
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_nested_scopes_restore_in_any_order() {
    unsafe {
        env::remove_var("AWS_ENDPOINT_URL_S3");
    }
    let before = snapshot();

    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(0));
    let outer = fixture
        .declare(
            FixtureDeclaration::new(ScopeKey::module(unique_id("outer")))
                .service("s3")
                .autouse(true)
        )
        .await
        .unwrap();
    let inner = fixture
        .declare(
            FixtureDeclaration::new(ScopeKey::function(unique_id("inner")))
                .service("s3")
                .autouse(true)
        )
        .await
        .unwrap();
    assert_ne!(outer.url("s3"), inner.url("s3"));
    assert_eq!(env::var("AWS_ENDPOINT_URL_S3").ok().as_deref(), inner.url("s3"));

    let inner_url = inner.url("s3").map(str::to_string);
    drop(outer);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(env::var("AWS_ENDPOINT_URL_S3").ok(), inner_url);

    drop(inner);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(snapshot(), before);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_release_restores_environment_while_scope_drains() {
    unsafe {
        env::remove_var("AWS_ENDPOINT_URL_S3");
    }
    let before = snapshot();

    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(500));
    let key = ScopeKey::module(unique_id("draining"));
    let guard = fixture
        .declare(FixtureDeclaration::new(key.clone()).service("s3").autouse(true))
        .await
        .unwrap();
    assert!(guard.is_ambient());
    assert_eq!(env::var("AWS_ENDPOINT_URL_S3").ok().as_deref(), guard.url("s3"));

    drop(guard);
    assert_eq!(fixture.phase(&key), ScopePhase::Draining);
    assert_eq!(snapshot(), before);

    let next = fixture
        .declare(FixtureDeclaration::new(ScopeKey::function(unique_id("next"))).service("s3"))
        .await
        .unwrap();
    assert!(!next.is_ambient());
    assert!(env::var("AWS_ENDPOINT_URL_S3").is_err());
    assert_eq!(fixture.phase(&key), ScopePhase::Draining);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_patch_belongs_to_the_autouse_guard_only() {
    unsafe {
        env::remove_var("AWS_ENDPOINT_URL_S3");
    }
    let before = snapshot();

    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(500));
    let key = ScopeKey::module(unique_id("shared"));
    let plain = fixture
        .declare(FixtureDeclaration::new(key.clone()).service("s3"))
        .await
        .unwrap();
    let autouse = fixture
        .declare(FixtureDeclaration::new(key.clone()).service("s3").autouse(true))
        .await
        .unwrap();
    assert_eq!(env::var("AWS_ENDPOINT_URL_S3").ok().as_deref(), plain.url("s3"));

    autouse.release().unwrap();
    assert_eq!(fixture.phase(&key), ScopePhase::Ready);
    assert_eq!(fixture.manager().holders(&key), 1);
    assert_eq!(snapshot(), before);

    drop(plain);
    assert_eq!(fixture.phase(&key), ScopePhase::Draining);
    assert_eq!(snapshot(), before);
}
