#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use broadcast_dispatcher::{
    BroadcastConfig, BroadcastJob, MessagePayload, ProgressReporter, ProgressSnapshot,
    RecipientId, RecipientSource, SendOutcome, Sender, UnreachableSink,
};

/// Sender double driven by per-recipient outcome scripts.
///
/// Scripted outcomes are consumed in order; once a recipient's script is
/// exhausted (or was never set) the default outcome applies.
pub struct ScriptedSender {
    default: SendOutcome,
    scripts: Mutex<HashMap<i64, VecDeque<SendOutcome>>>,
    delay: Option<Duration>,
    pub calls: AtomicU64,
    pub delivered_at: Mutex<Vec<Instant>>,
}

impl ScriptedSender {
    pub fn always(default: SendOutcome) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            delay: None,
            calls: AtomicU64::new(0),
            delivered_at: Mutex::new(Vec::new()),
        }
    }

    /// Make every delivery attempt take `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn script(&self, recipient: i64, outcomes: Vec<SendOutcome>) {
        self.scripts
            .lock()
            .await
            .insert(recipient, outcomes.into());
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    async fn deliver(&self, recipient: RecipientId, _job: &BroadcastJob) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = {
            let mut guard = self.scripts.lock().await;
            guard
                .get_mut(&recipient.0)
                .and_then(|queue| queue.pop_front())
        }
        .unwrap_or_else(|| self.default.clone());

        if outcome == SendOutcome::Delivered {
            self.delivered_at.lock().await.push(Instant::now());
        }
        outcome
    }
}

/// Source double yielding a fixed id list.
pub struct FixedSource {
    ids: Vec<i64>,
}

impl FixedSource {
    pub fn new(ids: Vec<i64>) -> Self {
        Self { ids }
    }

    pub fn range(count: i64) -> Self {
        Self {
            ids: (1..=count).collect(),
        }
    }
}

#[async_trait]
impl RecipientSource for FixedSource {
    async fn list_active(&self) -> Vec<RecipientId> {
        self.ids.iter().map(|id| RecipientId(*id)).collect()
    }
}

/// Sink double recording every mark call.
#[derive(Default)]
pub struct CountingSink {
    pub marked: Mutex<Vec<RecipientId>>,
}

#[async_trait]
impl UnreachableSink for CountingSink {
    async fn mark_unreachable(&self, recipient: RecipientId) {
        self.marked.lock().await.push(recipient);
    }
}

/// Reporter double recording every snapshot it receives.
#[derive(Default)]
pub struct RecordingReporter {
    pub snapshots: Mutex<Vec<ProgressSnapshot>>,
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, snapshot: ProgressSnapshot) {
        self.snapshots.lock().await.push(snapshot);
    }
}

pub fn text_job() -> BroadcastJob {
    BroadcastJob::fresh(MessagePayload::Text {
        text: "hello".to_string(),
    })
}

/// Config with a rate ceiling high enough to stay out of the way.
pub fn fast_config() -> BroadcastConfig {
    BroadcastConfig {
        worker_count: 4,
        messages_per_second: 1_000,
        progress_interval: Duration::from_secs(1),
        report_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}
