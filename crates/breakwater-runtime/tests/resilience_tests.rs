use async_trait::async_trait;
use breakwater_core::{
    CircuitOpenReason, CircuitSettings, CircuitState, ResilienceConfig, RetryOverrides,
    RetrySettings,
};
use breakwater_runtime::{
    run_with_retry, run_with_retry_cancellable, CancellationToken, CircuitBreaker, FetchError,
    HttpResponse, MessageError, RequestOptions, ResilienceError, ResilienceRegistry,
    ResilientCall, RetryPolicy, Transport,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn no_jitter(max_retries: u32, initial_ms: u64, max_ms: u64) -> RetrySettings {
    RetrySettings {
        max_retries,
        initial_delay: Duration::from_millis(initial_ms),
        max_delay: Duration::from_millis(max_ms),
        factor: 2.0,
        jitter: false,
    }
}

fn breaker(settings: CircuitSettings) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new("dependency", settings).unwrap())
}

async fn fail_through(cb: &CircuitBreaker) {
    let _: Result<(), _> = cb
        .execute(|| async { Err(MessageError::from("boom")) })
        .await;
}

// ---------------------------------------------------------------------------
// Retry engine
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_last_error() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 100, 1000)).retry_if(|_| true);

    let result: Result<(), _> = run_with_retry(
        || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(MessageError(format!("failure #{n}")))
        },
        &policy,
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        result.unwrap_err().into_operation(),
        Some(MessageError::from("failure #4"))
    );
}

#[tokio::test(start_paused = true)]
async fn fail_once_then_succeed() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 100, 1000));

    let result = run_with_retry(
        || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(MessageError::from("ETIMEDOUT"))
            } else {
                Ok("value")
            }
        },
        &policy,
    )
    .await;

    assert_eq!(result.unwrap(), "value");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn permanent_error_is_not_retried() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 100, 1000));

    let result: Result<(), _> = run_with_retry(
        || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MessageError::from("validation failed: sku missing"))
        },
        &policy,
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        result.unwrap_err().to_string(),
        "validation failed: sku missing"
    );
}

#[tokio::test(start_paused = true)]
async fn retries_wait_for_backoff_schedule() {
    let start = tokio::time::Instant::now();
    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 100, 1000)).retry_if(|_| true);

    let _: Result<(), _> =
        run_with_retry(|| async { Err(MessageError::from("down")) }, &policy).await;

    // 100 + 200 + 400
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(700), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(710), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn on_retry_sees_each_retry_number() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let policy = RetryPolicy::<MessageError>::new(no_jitter(2, 10, 100))
        .retry_if(|_| true)
        .on_retry(move |err, retry| sink.lock().push((retry, err.to_string())));

    let _: Result<(), _> =
        run_with_retry(|| async { Err(MessageError::from("down")) }, &policy).await;

    assert_eq!(
        *seen.lock(),
        vec![(1, "down".to_string()), (2, "down".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_retry_sequence() {
    let calls = AtomicU32::new(0);
    let token = CancellationToken::new();
    let policy = RetryPolicy::<MessageError>::new(no_jitter(5, 100, 1000)).retry_if(|_| true);

    let result: Result<(), _> = run_with_retry_cancellable(
        || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                token.cancel();
            }
            Err(MessageError::from("down"))
        },
        &policy,
        &token,
    )
    .await;

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_running_attempt() {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 100, 1000));
    let result: Result<(), _> = run_with_retry_cancellable(
        || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        },
        &policy,
        &token,
    )
    .await;

    assert!(result.unwrap_err().is_cancelled());
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn volume_threshold_then_open() {
    let cb = breaker(CircuitSettings::default());

    for _ in 0..9 {
        fail_through(&cb).await;
    }
    assert_eq!(cb.state(), CircuitState::Closed);

    fail_through(&cb).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_never_invokes_operation() {
    let cb = breaker(CircuitSettings::default());
    for _ in 0..10 {
        fail_through(&cb).await;
    }

    let calls = AtomicU32::new(0);
    let result: Result<(), ResilienceError<MessageError>> = cb
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    match result {
        Err(ResilienceError::CircuitOpen(err)) => {
            assert_eq!(err.name, "dependency");
            assert_eq!(err.reason, CircuitOpenReason::Open);
        }
        other => panic!("expected circuit-open rejection, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn half_open_probe_success_closes_with_zero_counters() {
    let cb = breaker(CircuitSettings::default());
    for _ in 0..10 {
        fail_through(&cb).await;
    }

    tokio::time::advance(Duration::from_secs(30)).await;

    let result: Result<u8, ResilienceError<MessageError>> = cb.execute(|| async { Ok(1) }).await;
    assert_eq!(result.unwrap(), 1);

    let stats = cb.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(
        (stats.failures, stats.successes, stats.total_requests),
        (0, 0, 0)
    );
    assert_eq!(stats.next_attempt, None);
}

#[tokio::test(start_paused = true)]
async fn half_open_probe_failure_reopens() {
    let cb = breaker(CircuitSettings::default());
    for _ in 0..10 {
        fail_through(&cb).await;
    }

    tokio::time::advance(Duration::from_secs(30)).await;
    fail_through(&cb).await;
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(29)).await;
    let result: Result<(), ResilienceError<MessageError>> = cb.execute(|| async { Ok(()) }).await;
    assert!(result.unwrap_err().is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn only_one_half_open_probe_at_a_time() {
    let cb = breaker(CircuitSettings::default());
    cb.force_open();
    tokio::time::advance(Duration::from_secs(30)).await;

    let probe_cb = Arc::clone(&cb);
    let probe = tokio::spawn(async move {
        probe_cb
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, MessageError>("recovered")
            })
            .await
    });
    tokio::task::yield_now().await;
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    let calls = AtomicU32::new(0);
    let second: Result<(), ResilienceError<MessageError>> = cb
        .execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    match second {
        Err(ResilienceError::CircuitOpen(err)) => {
            assert_eq!(err.reason, CircuitOpenReason::ProbeInFlight)
        }
        other => panic!("expected probe-in-flight rejection, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(probe.await.unwrap().unwrap(), "recovered");
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn force_open_then_force_reset() {
    let cb = breaker(CircuitSettings::default());

    cb.force_open();
    let rejected: Result<(), ResilienceError<MessageError>> = cb.execute(|| async { Ok(()) }).await;
    assert!(rejected.unwrap_err().is_circuit_open());

    cb.force_reset();
    let ok: Result<(), ResilienceError<MessageError>> = cb.execute(|| async { Ok(()) }).await;
    assert!(ok.is_ok());

    let stats = cb.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(
        (stats.total_requests, stats.successes, stats.failures),
        (1, 1, 0)
    );
}

#[tokio::test(start_paused = true)]
async fn stats_serialize_for_dashboards() {
    let cb = breaker(CircuitSettings::default());
    cb.force_open();

    let json = serde_json::to_value(cb.stats()).unwrap();
    assert_eq!(json["name"], "dependency");
    assert_eq!(json["state"], "OPEN");
    assert!(json["next_attempt"].is_string());
    assert!(json["last_failure"].is_null());
}

// ---------------------------------------------------------------------------
// Composed call
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn composed_call_times_out_each_attempt() {
    let settings = CircuitSettings {
        timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let call = ResilientCall::new(breaker(settings));
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::<MessageError>::new(no_jitter(2, 10, 100));

    let result = call
        .execute(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, MessageError>("fast enough")
            },
            &policy,
        )
        .await;

    assert_eq!(result.unwrap(), "fast enough");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(call.breaker().counts().successes, 1);
}

#[tokio::test(start_paused = true)]
async fn composed_call_respects_retry_on_timeout() {
    let settings = CircuitSettings {
        timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let call = ResilientCall::new(breaker(settings));
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::<MessageError>::new(no_jitter(2, 10, 100)).retry_on_timeout(false);

    let result: Result<(), _> = call
        .execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            &policy,
        )
        .await;

    assert!(result.unwrap_err().is_timeout());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(call.breaker().counts().failures, 1);
}

#[tokio::test(start_paused = true)]
async fn composed_call_records_one_failure_per_logical_call() {
    let call = ResilientCall::new(breaker(CircuitSettings::default()));
    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 10, 100)).retry_if(|_| true);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = call
        .execute(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MessageError::from("down"))
            },
            &policy,
        )
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let counts = call.breaker().counts();
    assert_eq!((counts.failures, counts.total()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn cancelled_composed_call_is_not_recorded() {
    let call = ResilientCall::new(breaker(CircuitSettings::default()));
    let token = CancellationToken::new();
    let policy = RetryPolicy::<MessageError>::new(no_jitter(3, 100, 1000)).retry_if(|_| true);

    let result: Result<(), _> = call
        .execute_with_cancel(
            || async {
                token.cancel();
                Err(MessageError::from("down"))
            },
            &policy,
            &token,
        )
        .await;

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(call.breaker().counts().total(), 0);
}

// ---------------------------------------------------------------------------
// Registry and fetch
// ---------------------------------------------------------------------------

struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
    requests: Mutex<Vec<RequestOptions>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<Result<HttpResponse, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _url: &str, request: &RequestOptions) -> Result<HttpResponse, FetchError> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".into())))
    }
}

fn registry() -> ResilienceRegistry {
    let config = ResilienceConfig {
        retry: no_jitter(3, 10, 100),
        ..Default::default()
    };
    ResilienceRegistry::new(config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn fetch_retries_server_errors() {
    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::new(503, "unavailable")),
        Err(FetchError::Transport("connection reset".into())),
        Ok(HttpResponse::new(200, "ok")),
    ]);
    let fetch = registry().fetch("catalog", transport.clone());

    let response = fetch
        .fetch(
            "http://catalog/items",
            &RequestOptions::get(),
            &RetryOverrides::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.text(), "ok");
    assert_eq!(transport.sent(), 3);
}

#[tokio::test(start_paused = true)]
async fn fetch_does_not_retry_client_errors() {
    let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(404, "no such item"))]);
    let fetch = registry().fetch("catalog", transport.clone());

    let err = fetch
        .fetch(
            "http://catalog/items/9",
            &RequestOptions::get(),
            &RetryOverrides::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.into_operation(),
        Some(FetchError::Status {
            status: 404,
            body: "no such item".into()
        })
    );
    assert_eq!(transport.sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_honours_retry_overrides() {
    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::new(500, "")),
        Ok(HttpResponse::new(500, "")),
        Ok(HttpResponse::new(200, "")),
    ]);
    let fetch = registry().fetch("catalog", transport.clone());
    let overrides = RetryOverrides {
        max_retries: Some(1),
        ..Default::default()
    };

    let err = fetch
        .fetch("http://catalog/", &RequestOptions::get(), &overrides)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResilienceError::Operation(FetchError::Status { status: 500, .. })
    ));
    assert_eq!(transport.sent(), 2);
}

#[tokio::test(start_paused = true)]
async fn fetch_with_custom_condition_and_observer() {
    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::new(404, "not replicated yet")),
        Ok(HttpResponse::new(404, "not replicated yet")),
        Ok(HttpResponse::new(200, "found")),
    ]);
    let fetch = registry().fetch("catalog", transport.clone());

    let retries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&retries);
    let policy = fetch
        .retry_policy(&RetryOverrides::default())
        .unwrap()
        .retry_if(|e: &FetchError| matches!(e, FetchError::Status { status: 404, .. }))
        .on_retry(move |err, retry| {
            if let ResilienceError::Operation(FetchError::Status { status, .. }) = err {
                sink.lock().push((*status, retry));
            }
        });

    let response = fetch
        .fetch_with_policy("http://catalog/A-2", &RequestOptions::get(), &policy)
        .await
        .unwrap();

    assert_eq!(response.text(), "found");
    assert_eq!(transport.sent(), 3);
    assert_eq!(*retries.lock(), vec![(404, 1), (404, 2)]);
}

#[tokio::test(start_paused = true)]
async fn fetch_json_decodes_after_the_call() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Item {
        sku: String,
        stock: u32,
    }

    let transport = ScriptedTransport::new(vec![
        Ok(HttpResponse::new(200, r#"{"sku":"A-1","stock":4}"#)),
        Ok(HttpResponse::new(200, "<html>maintenance</html>")),
    ]);
    let registry = registry();
    let fetch = registry.fetch("catalog", transport.clone());

    let item: Item = fetch
        .fetch_json("http://catalog/A-1", &RequestOptions::get(), &RetryOverrides::default())
        .await
        .unwrap();
    assert_eq!(
        item,
        Item {
            sku: "A-1".into(),
            stock: 4
        }
    );

    let err = fetch
        .fetch_json::<Item>("http://catalog/A-1", &RequestOptions::get(), &RetryOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::Operation(FetchError::Decode(_))));

    // decode failures are neither retried nor held against the dependency
    assert_eq!(transport.sent(), 2);
    let counts = registry.breaker("catalog").counts();
    assert_eq!((counts.successes, counts.failures), (2, 0));

    assert!(transport.requests.lock().iter().all(|r| r
        .headers
        .contains(&("accept".to_string(), "application/json".to_string()))));
}

#[tokio::test(start_paused = true)]
async fn registry_reports_state_changes() {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    let registry = registry().with_observer(move |name, change| {
        sink.lock().push(format!("{name}: {} -> {}", change.from, change.to));
    });

    let breaker = registry.breaker("ledger");
    breaker.force_open();
    tokio::time::advance(Duration::from_secs(30)).await;
    let _: Result<(), ResilienceError<MessageError>> = breaker.execute(|| async { Ok(()) }).await;

    assert_eq!(
        *changes.lock(),
        vec![
            "ledger: CLOSED -> OPEN".to_string(),
            "ledger: OPEN -> HALF_OPEN".to_string(),
            "ledger: HALF_OPEN -> CLOSED".to_string(),
        ]
    );
}
