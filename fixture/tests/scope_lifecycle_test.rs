//! Scope manager behavior over the in-memory driver.
//!
//! Time is paused in most tests, so drain grace and readiness sleeps
//! advance instantly. The worker test runs on real threads.

use errors::{FixtureError, ProvisionError, ScopeError};
use fixture::{FixtureDeclaration, ScopeKey, ScopePhase};
use futures_util::future::join_all;
use std::time::Duration;
use testing::{FakeDriver, config_with_grace, fake_fixture, fake_fixture_with, unique_id};

fn module(prefix: &str) -> ScopeKey {
    ScopeKey::module(unique_id(prefix))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_start_once() {
    let (fixture, driver, _probe) = fake_fixture_with(
        config_with_grace(100),
        FakeDriver::new().with_start_delay(Duration::from_millis(200))
    );
    let key = module("single-flight");

    let results = join_all((0..8).map(|_| fixture.acquire_services(&key, &["s3", "sqs"]))).await;

    let bindings: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(driver.starts(), 1);
    assert!(bindings.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(fixture.manager().holders(&key), 8);
    assert_eq!(fixture.phase(&key), ScopePhase::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_share_one_container() {
    let (fixture, driver, _probe) = fake_fixture_with(
        config_with_grace(100),
        FakeDriver::new().with_start_delay(Duration::from_millis(50))
    );
    let key = module("workers");

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let (fixture, key) = (fixture.clone(), key.clone());
            tokio::spawn(async move { fixture.acquire_services(&key, &["s3", "sqs"]).await })
        })
        .collect();
    let bindings: Vec<_> = join_all(workers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(driver.starts(), 1);
    assert_eq!(driver.max_live_per_scope(), 1);
    assert!(bindings.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(fixture.manager().holders(&key), 16);

    let releases: Vec<_> = (0..16)
        .map(|_| {
            let (fixture, key) = (fixture.clone(), key.clone());
            tokio::spawn(async move { fixture.release(&key) })
        })
        .collect();
    for released in join_all(releases).await {
        released.unwrap().unwrap();
    }
    assert_eq!(fixture.manager().holders(&key), 0);
    assert_ne!(fixture.phase(&key), ScopePhase::Ready);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
    assert_eq!(driver.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_without_acquire_is_rejected() {
    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(100));
    let key = module("never-acquired");

    assert_eq!(
        fixture.release(&key),
        Err(ScopeError::NotAcquired {
            scope: key.to_string()
        })
    );

    fixture.acquire_services(&key, &["s3"]).await.unwrap();
    fixture.release(&key).unwrap();
    assert!(matches!(fixture.release(&key), Err(ScopeError::NotAcquired { .. })));
    assert_eq!(fixture.manager().holders(&key), 0);
}

#[tokio::test(start_paused = true)]
async fn test_last_release_drains_then_reprovisions() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(200));
    let key = module("drain");

    let first = fixture.acquire_services(&key, &["sqs"]).await.unwrap();
    fixture.release(&key).unwrap();
    assert_eq!(fixture.phase(&key), ScopePhase::Draining);
    assert_eq!(driver.stops(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
    assert_eq!(driver.stops(), 1);
    assert_eq!(driver.live(), 0);

    let second = fixture.acquire_services(&key, &["sqs"]).await.unwrap();
    assert_eq!(driver.starts(), 2);
    assert_ne!(first.container_id(), second.container_id());
}

#[tokio::test(start_paused = true)]
async fn test_reacquire_within_grace_keeps_container() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(500));
    let key = module("grace");

    let first = fixture.acquire_services(&key, &["s3"]).await.unwrap();
    fixture.release(&key).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = fixture.acquire_services(&key, &["s3"]).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fixture.phase(&key), ScopePhase::Ready);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fixture.phase(&key), ScopePhase::Ready);
    assert_eq!(driver.starts(), 1);
    assert_eq!(driver.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_grace_tears_down_on_last_release() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(0));
    let key = module("immediate");

    fixture.acquire_services(&key, &["s3"]).await.unwrap();
    fixture.acquire_services(&key, &["s3"]).await.unwrap();
    fixture.release(&key).unwrap();
    assert_eq!(fixture.phase(&key), ScopePhase::Ready);

    fixture.release(&key).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
    assert_eq!(driver.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_reaches_every_waiter_and_resets() {
    let (fixture, driver, _probe) = fake_fixture_with(
        config_with_grace(0),
        FakeDriver::new().with_start_delay(Duration::from_millis(50))
    );
    driver.fail_next_start(ProvisionError::DaemonUnreachable {
        reason: "connection refused".to_string()
    });
    let key = module("daemon-down");

    let results = join_all((0..3).map(|_| fixture.acquire_services(&key, &["s3"]))).await;
    for result in results {
        assert!(matches!(
            result,
            Err(FixtureError::Provision(ProvisionError::DaemonUnreachable { .. }))
        ));
    }
    assert_eq!(driver.starts(), 1);
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);

    fixture.acquire_services(&key, &["s3"]).await.unwrap();
    assert_eq!(driver.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_stops_container_with_logs() {
    let (fixture, driver, probe) = fake_fixture(config_with_grace(0));
    probe.set_healthy(false);
    driver.set_logs("Starting mock S3 service\nStarting mock SQS service\nERROR: boom");
    let key = module("never-ready");

    let err = fixture.acquire_services(&key, &["s3", "sqs"]).await.unwrap_err();
    let FixtureError::ReadinessTimeout(timeout) = err else {
        panic!("expected a readiness timeout");
    };
    assert_eq!(timeout.scope, key.to_string());
    let services: Vec<&str> = timeout.failures.iter().map(|f| f.service.as_str()).collect();
    assert_eq!(services, vec!["s3", "sqs"]);
    assert!(timeout.failures.iter().all(|f| f.attempts > 1));
    let attempts: usize = timeout.failures.iter().map(|f| f.attempts as usize).sum();
    assert_eq!(probe.probes(), attempts);
    assert!(timeout.logs_tail.as_deref().is_some_and(|tail| tail.ends_with("ERROR: boom")));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(driver.stops(), 1);
    assert_eq!(driver.live(), 0);
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_live_scope_rejects_unprovisioned_service() {
    let (fixture, _driver, _probe) = fake_fixture(config_with_grace(100));
    let key = module("subset");

    fixture.acquire_services(&key, &["s3", "sqs"]).await.unwrap();
    fixture.acquire_services(&key, &["sqs"]).await.unwrap();

    let err = fixture.acquire_services(&key, &["sns"]).await.unwrap_err();
    assert_eq!(
        err,
        FixtureError::Scope(ScopeError::ServiceNotProvisioned {
            scope: key.to_string(),
            service: "sns".to_string()
        })
    );
    assert_eq!(fixture.manager().holders(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_service_name() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(100));
    let err = fixture
        .acquire_services(&module("typo"), &["s4"])
        .await
        .unwrap_err();
    assert!(matches!(err, FixtureError::Scope(ScopeError::UnknownService { .. })));
    assert_eq!(driver.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_never_two_containers_for_one_key() {
    let (fixture, driver, _probe) = fake_fixture_with(
        config_with_grace(0),
        FakeDriver::new().with_start_delay(Duration::from_millis(20))
    );
    let key = module("churn");

    for _ in 0..5 {
        fixture.acquire_services(&key, &["s3"]).await.unwrap();
        fixture.release(&key).unwrap();
        // Lands while the previous container is still stopping.
        fixture.acquire_services(&key, &["s3"]).await.unwrap();
        fixture.release(&key).unwrap();
    }
    fixture.shutdown().await;

    assert_eq!(driver.max_live_per_scope(), 1);
    assert_eq!(driver.live(), 0);
    assert_eq!(driver.starts(), driver.stops());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_waiter_drops_its_hold() {
    let (fixture, driver, _probe) = fake_fixture_with(
        config_with_grace(100),
        FakeDriver::new().with_start_delay(Duration::from_millis(500))
    );
    let key = module("abandoned");

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        fixture.acquire_services(&key, &["s3"])
    )
    .await;
    assert!(waited.is_err());
    assert_eq!(fixture.manager().holders(&key), 0);
    assert_eq!(fixture.phase(&key), ScopePhase::Starting);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(driver.starts(), 1);
    assert_eq!(driver.stops(), 1);
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_container_env_lists_services() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(100));
    let key = ScopeKey::function("env");

    fixture.acquire_services(&key, &["dynamodb", "kinesis"]).await.unwrap();

    let requests = driver.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].env.get("SERVICES").map(String::as_str),
        Some("dynamodb,kinesis")
    );
    assert_eq!(requests[0].env.get("DEFAULT_REGION").map(String::as_str), Some("us-east-1"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_scope() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(60_000));

    for name in ["a", "b", "c"] {
        fixture
            .acquire_services(&module(name), &["s3"])
            .await
            .unwrap();
    }
    let drained = module("d");
    fixture.acquire_services(&drained, &["s3"]).await.unwrap();
    fixture.release(&drained).unwrap();

    fixture.shutdown().await;
    assert_eq!(driver.stops(), 4);
    assert!(fixture.manager().scopes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_guard_releases_on_drop() {
    let (fixture, driver, _probe) = fake_fixture(config_with_grace(0));
    let key = module("guard");

    {
        let guard = fixture
            .declare(FixtureDeclaration::new(key.clone()).services(["s3", "sns"]))
            .await
            .unwrap();
        assert!(guard.url("sns").is_some());
        assert_eq!(fixture.manager().holders(&key), 1);
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fixture.phase(&key), ScopePhase::Absent);
    assert_eq!(driver.stops(), 1);

    let guard = fixture
        .declare(FixtureDeclaration::new(key.clone()).service("s3"))
        .await
        .unwrap();
    guard.release().unwrap();
    assert!(matches!(fixture.release(&key), Err(ScopeError::NotAcquired { .. })));
}
