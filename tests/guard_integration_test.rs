//! End-to-end checks of stacked wrappers
//!
//! Each test builds a realistic guard (counter, breaker, regulator, monitor)
//! around a fake dependency and drives it with paused tokio time.

use orbit_guard::prelude::*;
use orbit_guard::{GuardConfig, OpenReason, RequestCounts};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Fake downstream service that can be switched between healthy and failing
#[derive(Default)]
struct Dependency {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl Dependency {
    async fn call(&self) -> Result<u32, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
        if self.failing.load(Ordering::SeqCst) {
            Err(ServiceError::msg("dependency unavailable"))
        } else {
            Ok(n)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn test_breaker_shields_dependency_and_counter_sees_vetoes() {
    orbit_guard::logging::init_test_logging();

    let counter = Arc::new(RequestCounter::new());
    let breaker = Arc::new(CircuitBreaker::new(
        "payments",
        CircuitBreakerConfig::new()
            .with_failure_threshold(3)
            .with_reset(Duration::from_secs(10)),
    ));
    let guard = ServiceWrapperChain::default()
        .push(counter.clone())
        .push(breaker.clone());
    let dependency = Dependency::default();

    assert_ok!(guard.invoke(|| dependency.call()).await);

    dependency.failing.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        assert_err!(guard.invoke(|| dependency.call()).await);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Vetoed calls never reach the dependency but still count as failures
    for _ in 0..4 {
        let err = guard.invoke(|| dependency.call()).await.unwrap_err();
        assert!(err.is_circuit_open());
    }
    assert_eq!(dependency.calls(), 4);
    assert_eq!(
        counter.sample(),
        RequestCounts {
            total: 8,
            success: 1,
            failure: 7
        }
    );

    // Recovery through a single trial
    dependency.failing.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_ok!(guard.invoke(|| dependency.call()).await);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.status(), Status::Up);
}

#[tokio::test(start_paused = true)]
async fn test_regulator_inside_breaker() {
    let breaker = Arc::new(CircuitBreaker::new(
        "search",
        CircuitBreakerConfig::new().with_failure_threshold(2),
    ));
    let regulator = Arc::new(ConstantFlowRegulator::new(
        "search",
        2,
        Duration::from_secs(1),
    ));
    let guard = ServiceWrapperChain::default()
        .push(breaker.clone())
        .push(regulator.clone());
    let dependency = Dependency::default();

    assert_ok!(guard.invoke(|| dependency.call()).await);
    assert_ok!(guard.invoke(|| dependency.call()).await);

    // Inner rejections are failures from the breaker's point of view
    let err = guard.invoke(|| dependency.call()).await.unwrap_err();
    assert!(err.is_flow_rate_exceeded());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_err!(guard.invoke(|| dependency.call()).await);
    assert_eq!(breaker.state(), CircuitState::Open);

    assert_eq!(dependency.calls(), 2);
    assert_eq!(regulator.admitted(), 2);
    assert_eq!(regulator.rejected(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_wrappers_built_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[circuit_breakers.db]
failure_rate_percent = 50.0
min_requests = 4
period_ms = 30000
reset_ms = 2000

[flow_regulators.db]
max_requests = 10
period_ms = 1000

[performance_monitors.db]
latency_window_ms = 5000
"#
    )
    .unwrap();

    let config = GuardConfig::from_file(file.path()).unwrap();
    let monitor = Arc::new(config.performance_monitor("db").unwrap());
    let breaker = Arc::new(config.circuit_breaker("db").unwrap());
    let regulator = Arc::new(config.flow_regulator("db").unwrap());
    let guard = ServiceWrapperChain::default()
        .push(monitor.clone())
        .push(breaker.clone())
        .push(regulator);

    let dependency = Dependency::default();
    assert_ok!(guard.invoke(|| dependency.call()).await);
    assert_ok!(guard.invoke(|| dependency.call()).await);
    dependency.failing.store(true, Ordering::SeqCst);
    assert_err!(guard.invoke(|| dependency.call()).await);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_err!(guard.invoke(|| dependency.call()).await);
    assert_eq!(breaker.state(), CircuitState::Open);

    match guard.invoke(|| dependency.call()).await {
        Err(ServiceError::CircuitOpen(err)) => {
            assert_eq!(err.breaker, "db");
            assert_eq!(
                err.reason,
                OpenReason::Tripped {
                    retry_in: Duration::from_secs(2)
                }
            );
        }
        other => panic!("expected circuit-open veto, got {:?}", other),
    }

    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.total, 5);
    assert_eq!(snapshot.success, 2);
    assert_eq!(snapshot.failure, 3);
}

#[tokio::test(start_paused = true)]
async fn test_rollup_follows_breakers() {
    let payments = Arc::new(CircuitBreaker::new(
        "payments",
        CircuitBreakerConfig::new().with_failure_threshold(1),
    ));
    let recommendations = Arc::new(CircuitBreaker::new(
        "recommendations",
        CircuitBreakerConfig::new().with_failure_threshold(1),
    ));
    let health = RolledUpStatus::new()
        .with_critical(payments.clone())
        .with_noncritical(recommendations.clone());

    assert_eq!(health.status(), Status::Up);

    recommendations.trip();
    assert_eq!(health.status(), Status::Degraded);
    assert_eq!(health.status().signal(), "YELLOW");

    payments.trip();
    assert_eq!(health.status(), Status::Down);

    payments.reset();
    recommendations.reset();
    assert_eq!(health.status(), Status::Up);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_trial_under_concurrency() {
    let breaker = Arc::new(CircuitBreaker::new(
        "contended",
        CircuitBreakerConfig::new()
            .with_failure_threshold(1)
            .with_reset(Duration::from_millis(50)),
    ));
    breaker.trip();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let trials = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let mut tasks = Vec::new();

    for _ in 0..32 {
        let breaker = Arc::clone(&breaker);
        let trials = Arc::clone(&trials);
        let finished = Arc::clone(&finished);
        let mut release = release_rx.clone();
        tasks.push(tokio::spawn(async move {
            let result = breaker
                .invoke_void(|| async move {
                    trials.fetch_add(1, Ordering::SeqCst);
                    let _ = release.wait_for(|go| *go).await;
                    Ok(())
                })
                .await;
            finished.fetch_add(1, Ordering::SeqCst);
            result
        }));
    }

    // Everyone but the parked trial gets turned away before it is released
    tokio::time::timeout(Duration::from_secs(5), async {
        while finished.load(Ordering::SeqCst) < 31 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("vetoed callers should return promptly");
    release_tx.send(true).unwrap();

    let mut vetoed = 0;
    for task in tasks {
        if let Err(err) = task.await.unwrap() {
            assert!(err.is_circuit_open());
            vetoed += 1;
        }
    }

    assert_eq!(trials.load(Ordering::SeqCst), 1);
    assert_eq!(vetoed, 31);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
