mod common;

use std::sync::Arc;
use std::time::Duration;

use broadcast_dispatcher::{
    BroadcastConfig, Broadcaster, ConfigError, InMemoryRegistry, RecipientId, RecipientSource,
    SendOutcome, StartError, TransientReason,
};

use common::{fast_config, text_job, CountingSink, FixedSource, RecordingReporter, ScriptedSender};

fn broadcaster(
    config: BroadcastConfig,
    sender: Arc<ScriptedSender>,
    source: Arc<FixedSource>,
    sink: Arc<CountingSink>,
    reporter: Arc<RecordingReporter>,
) -> Broadcaster {
    Broadcaster::new(config, sender, source, sink, reporter)
}

#[tokio::test(start_paused = true)]
async fn all_successes_stay_under_the_rate_ceiling() {
    let sender = Arc::new(ScriptedSender::always(SendOutcome::Delivered));
    let config = BroadcastConfig {
        worker_count: 8,
        messages_per_second: 25,
        ..Default::default()
    };
    let engine = broadcaster(
        config,
        sender.clone(),
        Arc::new(FixedSource::range(100)),
        Arc::new(CountingSink::default()),
        Arc::new(RecordingReporter::default()),
    );

    let handle = engine.start_broadcast(text_job()).await.unwrap();
    let summary = handle.wait().await;

    assert_eq!(summary.sent, 100);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.sent + summary.failed, summary.total);
    // 100 sends at 25/s cannot complete in under four seconds.
    assert!(
        summary.elapsed >= Duration::from_millis(3_900),
        "run finished too fast: {:?}",
        summary.elapsed
    );

    // No trailing one-second window may hold more than the ceiling.
    let mut times = sender.delivered_at.lock().await.clone();
    times.sort();
    for (i, start) in times.iter().enumerate() {
        let in_window = times[i..]
            .iter()
            .take_while(|t| t.duration_since(*start) < Duration::from_secs(1))
            .count();
        assert!(in_window <= 25, "{} sends within one second", in_window);
    }
}

#[tokio::test]
async fn permanent_failures_are_counted_and_marked() {
    let sender = Arc::new(ScriptedSender::always(SendOutcome::Delivered));
    for id in [2, 5, 9] {
        sender.script(id, vec![SendOutcome::Unreachable]).await;
    }
    let sink = Arc::new(CountingSink::default());
    let engine = broadcaster(
        fast_config(),
        sender,
        Arc::new(FixedSource::range(10)),
        sink.clone(),
        Arc::new(RecordingReporter::default()),
    );

    let summary = engine
        .start_broadcast(text_job())
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sent, 7);
    assert_eq!(summary.failed, 3);

    // The mark calls are fired off the hot path; give them a beat to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut marked: Vec<i64> = sink.marked.lock().await.iter().map(|r| r.0).collect();
    marked.sort();
    assert_eq!(marked, vec![2, 5, 9]);
}

#[tokio::test]
async fn unreachable_recipients_end_up_blocked_in_the_registry() {
    let registry = Arc::new(InMemoryRegistry::new());
    for id in 1..=10 {
        registry.upsert(RecipientId(id), None, None).await;
    }

    let sender = Arc::new(ScriptedSender::always(SendOutcome::Delivered));
    for id in [1, 4, 8] {
        sender.script(id, vec![SendOutcome::Unreachable]).await;
    }

    let engine = Broadcaster::new(
        fast_config(),
        sender,
        registry.clone(),
        registry.clone(),
        Arc::new(RecordingReporter::default()),
    );

    let summary = engine
        .start_broadcast(text_job())
        .await
        .unwrap()
        .wait()
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(summary.sent, 7);
    assert_eq!(summary.failed, 3);
    assert_eq!(registry.stats().await.blocked, 3);
    assert_eq!(registry.list_active().await.len(), 7);
}

#[tokio::test(start_paused = true)]
async fn permanently_throttled_recipient_exhausts_its_budget() {
    let sender = Arc::new(ScriptedSender::always(SendOutcome::Throttled {
        retry_after: Duration::from_secs(1),
    }));
    let config = BroadcastConfig {
        max_retries: 3,
        ..fast_config()
    };
    let engine = broadcaster(
        config,
        sender.clone(),
        Arc::new(FixedSource::new(vec![42])),
        Arc::new(CountingSink::default()),
        Arc::new(RecordingReporter::default()),
    );

    let summary = engine
        .start_broadcast(text_job())
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sent, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retries, 3);
    // Initial attempt plus three retries.
    assert_eq!(sender.call_count(), 4);
    assert!(
        summary.elapsed >= Duration::from_millis(2_900)
            && summary.elapsed <= Duration::from_millis(4_500),
        "unexpected duration {:?}",
        summary.elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_after_a_fixed_backoff() {
    let sender = Arc::new(ScriptedSender::always(SendOutcome::Delivered));
    sender
        .script(
            7,
            vec![SendOutcome::Transient {
                reason: TransientReason::Network,
            }],
        )
        .await;
    let engine = broadcaster(
        fast_config(),
        sender.clone(),
        Arc::new(FixedSource::new(vec![7])),
        Arc::new(CountingSink::default()),
        Arc::new(RecordingReporter::default()),
    );

    let summary = engine
        .start_broadcast(text_job())
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.retries, 1);
    assert!(summary.elapsed >= Duration::from_millis(450));
}

#[tokio::test(start_paused = true)]
async fn throttle_delays_are_floored_at_one_second() {
    let sender = Arc::new(ScriptedSender::always(SendOutcome::Delivered));
    sender
        .script(
            3,
            vec![SendOutcome::Throttled {
                retry_after: Duration::ZERO,
            }],
        )
        .await;
    let engine = broadcaster(
        fast_config(),
        sender,
        Arc::new(FixedSource::new(vec![3])),
        Arc::new(CountingSink::default()),
        Arc::new(RecordingReporter::default()),
    );

    let summary = engine
        .start_broadcast(text_job())
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sent, 1);
    assert!(summary.elapsed >= Duration::from_millis(950));
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let sender =
        Arc::new(ScriptedSender::always(SendOutcome::Delivered).with_delay(Duration::from_millis(50)));
    let engine = broadcaster(
        fast_config(),
        sender,
        Arc::new(FixedSource::range(20)),
        Arc::new(CountingSink::default()),
        Arc::new(RecordingReporter::default()),
    );

    let first = engine.start_broadcast(text_job()).await.unwrap();
    assert!(engine.is_running());
    assert!(matches!(
        engine.start_broadcast(text_job()).await,
        Err(StartError::AlreadyRunning)
    ));

    // The rejected start leaves the first run untouched.
    let summary = first.wait().await;
    assert_eq!(summary.sent, 20);
    assert_eq!(summary.failed, 0);

    // Once completed, a fresh run is accepted again.
    let again = engine.start_broadcast(text_job()).await.unwrap();
    assert_eq!(again.wait().await.sent, 20);
}

#[tokio::test]
async fn empty_recipient_set_completes_immediately() {
    let reporter = Arc::new(RecordingReporter::default());
    let engine = broadcaster(
        fast_config(),
        Arc::new(ScriptedSender::always(SendOutcome::Delivered)),
        Arc::new(FixedSource::new(Vec::new())),
        Arc::new(CountingSink::default()),
        reporter.clone(),
    );

    let handle = engine.start_broadcast(text_job()).await.unwrap();
    assert!(handle.is_finished());
    assert!(!engine.is_running());

    let summary = handle.wait().await;
    assert_eq!(summary.total, 0);
    assert_eq!(summary.sent, 0);
    assert_eq!(summary.failed, 0);

    let snapshots = reporter.snapshots.lock().await;
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].is_final);
}

#[tokio::test(start_paused = true)]
async fn cancel_skips_the_backlog_but_keeps_completed_sends() {
    let sender =
        Arc::new(ScriptedSender::always(SendOutcome::Delivered).with_delay(Duration::from_millis(50)));
    let reporter = Arc::new(RecordingReporter::default());
    let config = BroadcastConfig {
        worker_count: 2,
        ..fast_config()
    };
    let engine = broadcaster(
        config,
        sender,
        Arc::new(FixedSource::range(50)),
        Arc::new(CountingSink::default()),
        reporter.clone(),
    );

    let handle = engine.start_broadcast(text_job()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.cancel();
    let summary = handle.wait().await;

    assert!(summary.cancelled);
    assert!(summary.sent > 0);
    assert!(summary.skipped > 0);
    assert_eq!(summary.sent + summary.failed + summary.skipped, 50);

    let snapshots = reporter.snapshots.lock().await;
    let finals = snapshots.iter().filter(|s| s.is_final).count();
    assert_eq!(finals, 1);
    assert!(snapshots.last().unwrap().is_final);
}

#[tokio::test]
async fn invalid_configuration_never_starts_a_run() {
    let make = |config| {
        broadcaster(
            config,
            Arc::new(ScriptedSender::always(SendOutcome::Delivered)),
            Arc::new(FixedSource::range(3)),
            Arc::new(CountingSink::default()),
            Arc::new(RecordingReporter::default()),
        )
    };

    let engine = make(BroadcastConfig {
        worker_count: 0,
        ..Default::default()
    });
    assert!(matches!(
        engine.start_broadcast(text_job()).await,
        Err(StartError::Config(ConfigError::ZeroWorkers))
    ));
    assert!(!engine.is_running());

    let engine = make(BroadcastConfig {
        messages_per_second: 0,
        ..Default::default()
    });
    assert!(matches!(
        engine.start_broadcast(text_job()).await,
        Err(StartError::Config(ConfigError::ZeroRateCeiling))
    ));
}

#[tokio::test]
async fn progress_snapshots_are_monotonic_and_end_final() {
    let reporter = Arc::new(RecordingReporter::default());
    let config = BroadcastConfig {
        progress_every: 10,
        ..fast_config()
    };
    let engine = broadcaster(
        config,
        Arc::new(ScriptedSender::always(SendOutcome::Delivered)),
        Arc::new(FixedSource::range(60)),
        Arc::new(CountingSink::default()),
        reporter.clone(),
    );

    let summary = engine
        .start_broadcast(text_job())
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(summary.sent, 60);

    let snapshots = reporter.snapshots.lock().await;
    assert!(snapshots.len() >= 2, "expected periodic reports");
    for pair in snapshots.windows(2) {
        assert!(pair[1].sent >= pair[0].sent);
        assert!(pair[1].failed >= pair[0].failed);
    }
    let last = snapshots.last().unwrap();
    assert!(last.is_final);
    assert_eq!(last.sent, 60);
    assert_eq!(last.remaining, 0);
    assert_eq!(snapshots.iter().filter(|s| s.is_final).count(), 1);
}
