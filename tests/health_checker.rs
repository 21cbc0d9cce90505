//! Health monitoring against live backends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use proxy_pass::health::{HealthChecker, ProbeSettings, TargetPool};
use proxy_pass::http::client::build_client;

mod common;

fn checker(hosts: &[String]) -> HealthChecker {
    checker_with(hosts, Method::HEAD)
}

fn checker_with(hosts: &[String], method: Method) -> HealthChecker {
    let settings = ProbeSettings {
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(1),
        method,
    };
    HealthChecker::new(
        TargetPool::from_hosts(hosts).unwrap(),
        build_client(&Default::default()),
        settings,
    )
    .unwrap()
}

#[tokio::test]
async fn start_probes_before_returning() {
    let backend = common::start_mock_backend("ok").await;
    let checker = checker(&[backend.to_string()]);

    checker.start().await;

    assert!(checker.is_running());
    assert!(checker.is_healthy(&backend.to_string()));
    assert_eq!(checker.snapshot().generation(), 1);
    assert_eq!(checker.healthy_targets().len(), 1);
    checker.stop().await;
    assert!(!checker.is_running());
}

#[tokio::test]
async fn fastest_is_the_lowest_latency_target() {
    let hits = Arc::new(AtomicU32::new(0));
    let slow = common::start_slow_backend(Duration::from_millis(200), hits.clone()).await;
    let fast = common::start_slow_backend(Duration::ZERO, hits.clone()).await;
    let checker = checker(&[slow.to_string(), fast.to_string()]);

    let snapshot = checker.check_all().await;

    let fastest = checker.fastest().unwrap();
    assert_eq!(fastest.key(), format!("http://{fast}"));
    let times = checker.response_times();
    assert_eq!(times.len(), 2);
    assert!(snapshot.status(0).unwrap().latency_ms > snapshot.status(1).unwrap().latency_ms);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fastest_is_none_when_everything_is_down() {
    let dead = common::dead_addr().await;
    let checker = checker(&[dead.to_string()]);

    checker.check_all().await;

    assert!(checker.fastest().is_none());
    assert!(checker.response_times().is_empty());
}

#[tokio::test]
async fn single_failure_flips_health_and_success_restores_it() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            match counter.fetch_add(1, Ordering::SeqCst) {
                1 => (500, "down".to_string()),
                _ => (200, "up".to_string()),
            }
        }
    })
    .await;
    let host = backend.to_string();
    let checker = checker(&[host.clone()]);

    checker.check_all().await;
    assert!(checker.is_healthy(&host));

    checker.check_all().await;
    assert!(!checker.is_healthy(&host));
    let status = checker.snapshot();
    assert_eq!(status.status(0).unwrap().consecutive_failures, 1);

    checker.check_all().await;
    assert!(checker.is_healthy(&host));
}

#[tokio::test]
async fn loop_keeps_running_through_failures() {
    let good = common::start_mock_backend("ok").await;
    let dead = common::dead_addr().await;
    let checker = checker(&[dead.to_string(), good.to_string()]);

    checker.start().await;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let snapshot = checker.snapshot();
    assert!(snapshot.generation() >= 3, "generation {}", snapshot.generation());
    assert!(!snapshot.is_healthy(0));
    assert!(snapshot.is_healthy(1));
    checker.stop().await;
}

#[tokio::test]
async fn dropping_the_guard_stops_probing() {
    let hits = Arc::new(AtomicU32::new(0));
    let backend = common::start_slow_backend(Duration::ZERO, hits.clone()).await;
    let checker = Arc::new(checker(&[backend.to_string()]));

    let guard = checker.start_scoped().await;
    assert!(guard.checker().is_running());
    drop(guard);
    assert!(!checker.is_running());

    let seen = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), seen);
}

#[tokio::test]
async fn custom_ping_path_is_probed() {
    let backend = common::start_capture_backend().await;
    let checker = checker(&[backend.to_string()]);
    checker.set_ping_path("status");

    checker.check_all().await;
    assert!(checker.is_healthy(&backend.to_string()));
    assert_eq!(checker.ping_path(), "/status");
}

#[tokio::test]
async fn stop_during_the_first_pass_is_not_undone() {
    let hits = Arc::new(AtomicU32::new(0));
    let backend = common::start_slow_backend(Duration::from_millis(500), hits.clone()).await;
    let checker = Arc::new(checker(&[backend.to_string()]));

    let starting = tokio::spawn({
        let checker = checker.clone();
        async move { checker.start().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    checker.stop().await;
    starting.await.unwrap();

    assert!(!checker.is_running());
    assert_eq!(checker.snapshot().generation(), 1);
}

#[tokio::test]
async fn get_probes_keep_their_connection() {
    let (backend, connections) = common::start_counting_backend("healthy and a bit chatty").await;
    let checker = checker_with(&[backend.to_string()], Method::GET);

    for _ in 0..3 {
        checker.check_all().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(checker.is_healthy(&backend.to_string()));
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}
