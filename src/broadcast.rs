use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};

use crate::error::{ConfigError, SendOutcome, StartError};
use crate::gateway::{ProgressReporter, RecipientSource, Sender, UnreachableSink};
use crate::limiter::RateLimiter;
use crate::types::{BroadcastJob, ProgressSnapshot, RunSummary};
use crate::worker::{worker_loop, RunContext, Task, WorkerEvent};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Concurrent workers draining the queue. Clamped to the recipient count.
    pub worker_count: usize,
    /// Outbound ceiling per rolling second, shared by all workers.
    pub messages_per_second: u32,
    /// Retry attempts granted after the initial attempt.
    pub max_retries: u32,
    /// Lower bound on a provider-suggested throttle delay.
    pub retry_floor: Duration,
    /// Fixed delay before retrying a transient failure.
    pub transient_backoff: Duration,
    /// Ceiling on one sender call.
    pub send_timeout: Duration,
    /// Progress is reported at least this often while counts change.
    pub progress_interval: Duration,
    /// Progress is also reported every this many terminal outcomes.
    pub progress_every: u64,
    /// Ceiling on one progress-reporter call.
    pub report_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            messages_per_second: 25,
            max_retries: 4,
            retry_floor: Duration::from_secs(1),
            transient_backoff: Duration::from_millis(500),
            send_timeout: Duration::from_secs(10),
            progress_interval: Duration::from_secs(2),
            progress_every: 100,
            report_timeout: Duration::from_secs(3),
        }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.messages_per_second == 0 {
            return Err(ConfigError::ZeroRateCeiling);
        }
        Ok(())
    }
}

/// Counters of one run. Created at start, destroyed with the run.
///
/// The orchestrator is the sole writer; handles read concurrently.
#[derive(Debug)]
struct RunState {
    total: u64,
    sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    retries: AtomicU64,
    /// Recipients not yet in a terminal state.
    in_flight: AtomicU64,
    completed: AtomicBool,
    cancelled: AtomicBool,
    started_at: Instant,
}

impl RunState {
    fn new(total: u64) -> Self {
        Self {
            total,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            in_flight: AtomicU64::new(total),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            sent: self.sent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            remaining: self.in_flight.load(Ordering::SeqCst),
            is_final: self.completed.load(Ordering::SeqCst),
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total,
            sent: self.sent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            elapsed: self.started_at.elapsed(),
        }
    }

    fn terminal(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
            + self.failed.load(Ordering::SeqCst)
            + self.skipped.load(Ordering::SeqCst)
    }
}

/// Entry point for broadcasts against one recipient scope.
///
/// Holds the collaborator seams and enforces the at-most-one-active-run
/// rule: a second [`start_broadcast`] while a run is active is rejected,
/// never interleaved into the running counters.
///
/// [`start_broadcast`]: Broadcaster::start_broadcast
pub struct Broadcaster {
    config: BroadcastConfig,
    sender: Arc<dyn Sender>,
    source: Arc<dyn RecipientSource>,
    sink: Arc<dyn UnreachableSink>,
    reporter: Arc<dyn ProgressReporter>,
    active: Arc<AtomicBool>,
}

impl Broadcaster {
    pub fn new(
        config: BroadcastConfig,
        sender: Arc<dyn Sender>,
        source: Arc<dyn RecipientSource>,
        sink: Arc<dyn UnreachableSink>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            sender,
            source,
            sink,
            reporter,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start one broadcast of `job` to the source's current snapshot.
    ///
    /// An empty recipient snapshot completes immediately with zero counts
    /// and exactly one final report.
    pub async fn start_broadcast(&self, job: BroadcastJob) -> Result<RunHandle, StartError> {
        self.config.validate()?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StartError::AlreadyRunning);
        }

        let recipients = self.source.list_active().await;
        let state = Arc::new(RunState::new(recipients.len() as u64));

        if recipients.is_empty() {
            state.completed.store(true, Ordering::SeqCst);
            report_with_timeout(&self.reporter, state.snapshot(), self.config.report_timeout)
                .await;
            self.active.store(false, Ordering::SeqCst);
            tracing::info!("broadcast finished: no active recipients");
            return Ok(RunHandle {
                state,
                cancel: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
                orchestrator: None,
            });
        }

        metric_inc("broadcast.run.started");
        tracing::info!(
            total = recipients.len(),
            workers = self.config.worker_count.min(recipients.len()),
            rate = self.config.messages_per_second,
            mode = ?job.mode(),
            "broadcast started"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        for recipient in &recipients {
            let _ = ready_tx.send(Task {
                recipient: *recipient,
                attempt: 0,
            });
        }

        let ctx = Arc::new(RunContext {
            limiter: RateLimiter::new(self.config.messages_per_second),
            sender: self.sender.clone(),
            job: Arc::new(job),
            event_tx,
            send_timeout: self.config.send_timeout,
            cancelled: cancel.clone(),
        });

        let shared_rx = Arc::new(Mutex::new(ready_rx));
        let worker_count = self.config.worker_count.min(recipients.len());
        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|_| tokio::spawn(worker_loop(shared_rx.clone(), ctx.clone())))
            .collect();

        let orchestrator = tokio::spawn(run_orchestrator(Orchestrator {
            config: self.config.clone(),
            state: state.clone(),
            sink: self.sink.clone(),
            reporter: self.reporter.clone(),
            ready_tx,
            event_rx,
            workers,
            cancel: cancel.clone(),
            notify: notify.clone(),
            active: self.active.clone(),
        }));

        Ok(RunHandle {
            state,
            cancel,
            notify,
            orchestrator: Some(orchestrator),
        })
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Live view of one run.
pub struct RunHandle {
    state: Arc<RunState>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    orchestrator: Option<JoinHandle<RunSummary>>,
}

impl RunHandle {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Stop the run early: no further retries are scheduled and queued
    /// recipients are skipped, while in-flight sends finish naturally.
    /// Already-successful sends are not undone.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait for the run to complete and return its final accounting.
    pub async fn wait(mut self) -> RunSummary {
        match self.orchestrator.take() {
            Some(handle) => match handle.await {
                Ok(summary) => summary,
                Err(_) => self.state.summary(),
            },
            None => self.state.summary(),
        }
    }
}

/// A retry waiting for its delay to elapse, outside any worker slot.
#[derive(Debug)]
struct RetryTicket {
    ready_at: Instant,
    task: Task,
}

impl Eq for RetryTicket {}

impl PartialEq for RetryTicket {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at.eq(&other.ready_at)
    }
}

impl Ord for RetryTicket {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other.ready_at.cmp(&self.ready_at)
    }
}

impl PartialOrd for RetryTicket {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Orchestrator {
    config: BroadcastConfig,
    state: Arc<RunState>,
    sink: Arc<dyn UnreachableSink>,
    reporter: Arc<dyn ProgressReporter>,
    ready_tx: mpsc::UnboundedSender<Task>,
    event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    workers: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    active: Arc<AtomicBool>,
}

enum Step {
    Event(Option<WorkerEvent>),
    Tick,
    Wake,
    RetryDue,
}

async fn run_orchestrator(mut orch: Orchestrator) -> RunSummary {
    let mut retry_heap: BinaryHeap<RetryTicket> = BinaryHeap::new();
    let mut last_reported: u64 = 0;
    let mut cancel_seen = false;

    let mut progress = interval_at(
        Instant::now() + orch.config.progress_interval,
        orch.config.progress_interval,
    );
    progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while orch.state.in_flight.load(Ordering::SeqCst) > 0 {
        if orch.cancel.load(Ordering::SeqCst) && !cancel_seen {
            cancel_seen = true;
            orch.state.cancelled.store(true, Ordering::SeqCst);
            let dropped = retry_heap.len() as u64;
            retry_heap.clear();
            if dropped > 0 {
                orch.state.skipped.fetch_add(dropped, Ordering::SeqCst);
                orch.state.in_flight.fetch_sub(dropped, Ordering::SeqCst);
            }
            metric_inc("broadcast.run.cancelled");
            tracing::info!(
                dropped_retries = dropped,
                "broadcast cancelled, letting in-flight sends finish"
            );
            continue;
        }

        let next_retry = retry_heap.peek().map(|ticket| ticket.ready_at);
        let step = tokio::select! {
            event = orch.event_rx.recv() => Step::Event(event),
            _ = progress.tick() => Step::Tick,
            _ = orch.notify.notified() => Step::Wake,
            _ = sleep_until_opt(next_retry) => Step::RetryDue,
        };

        match step {
            Step::Event(Some(event)) => {
                handle_event(&mut orch, event, &mut retry_heap);
                let terminal = orch.state.terminal();
                if terminal - last_reported >= orch.config.progress_every {
                    last_reported = terminal;
                    report_with_timeout(
                        &orch.reporter,
                        orch.state.snapshot(),
                        orch.config.report_timeout,
                    )
                    .await;
                }
            }
            // Workers are gone; whatever is left can no longer change.
            Step::Event(None) => break,
            Step::Tick => {
                let terminal = orch.state.terminal();
                if terminal > last_reported {
                    last_reported = terminal;
                    report_with_timeout(
                        &orch.reporter,
                        orch.state.snapshot(),
                        orch.config.report_timeout,
                    )
                    .await;
                }
            }
            Step::Wake => {}
            Step::RetryDue => {
                let now = Instant::now();
                while retry_heap
                    .peek()
                    .is_some_and(|ticket| ticket.ready_at <= now)
                {
                    if let Some(ticket) = retry_heap.pop() {
                        let _ = orch.ready_tx.send(ticket.task);
                    }
                }
            }
        }
    }

    // Close the queue and let every worker drain out.
    drop(orch.ready_tx);
    for handle in orch.workers {
        let _ = handle.await;
    }

    orch.state.completed.store(true, Ordering::SeqCst);
    report_with_timeout(
        &orch.reporter,
        orch.state.snapshot(),
        orch.config.report_timeout,
    )
    .await;
    orch.active.store(false, Ordering::SeqCst);

    let summary = orch.state.summary();
    metric_inc("broadcast.run.completed");
    tracing::info!(
        total = summary.total,
        sent = summary.sent,
        failed = summary.failed,
        skipped = summary.skipped,
        retries = summary.retries,
        cancelled = summary.cancelled,
        "broadcast completed"
    );
    summary
}

fn handle_event(orch: &mut Orchestrator, event: WorkerEvent, heap: &mut BinaryHeap<RetryTicket>) {
    match event {
        WorkerEvent::Skipped { .. } => {
            orch.state.skipped.fetch_add(1, Ordering::SeqCst);
            orch.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        WorkerEvent::Attempted { task, outcome } => match outcome {
            SendOutcome::Delivered => {
                orch.state.sent.fetch_add(1, Ordering::SeqCst);
                orch.state.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            SendOutcome::Unreachable => {
                // Fire and forget; sink latency must not stall the run.
                let sink = orch.sink.clone();
                let recipient = task.recipient;
                tokio::spawn(async move { sink.mark_unreachable(recipient).await });
                orch.state.failed.fetch_add(1, Ordering::SeqCst);
                orch.state.in_flight.fetch_sub(1, Ordering::SeqCst);
                tracing::info!(recipient = recipient.0, "recipient unreachable, marked");
            }
            SendOutcome::Throttled { retry_after } => {
                let delay = retry_after.max(orch.config.retry_floor);
                schedule_retry(orch, heap, task, delay);
            }
            SendOutcome::Transient { .. } => {
                schedule_retry(orch, heap, task, orch.config.transient_backoff);
            }
        },
    }
}

fn schedule_retry(
    orch: &mut Orchestrator,
    heap: &mut BinaryHeap<RetryTicket>,
    task: Task,
    delay: Duration,
) {
    if orch.cancel.load(Ordering::SeqCst) {
        orch.state.skipped.fetch_add(1, Ordering::SeqCst);
        orch.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    if task.attempt >= orch.config.max_retries {
        orch.state.failed.fetch_add(1, Ordering::SeqCst);
        orch.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        metric_inc("broadcast.send.exhausted");
        tracing::warn!(
            recipient = task.recipient.0,
            attempts = task.attempt + 1,
            "retry budget exhausted, counting as failed"
        );
        return;
    }

    orch.state.retries.fetch_add(1, Ordering::SeqCst);
    metric_inc("broadcast.send.retry_scheduled");
    tracing::debug!(
        recipient = task.recipient.0,
        attempt = task.attempt + 1,
        delay_ms = delay.as_millis() as u64,
        "retry scheduled"
    );
    heap.push(RetryTicket {
        ready_at: Instant::now() + delay,
        task: Task {
            recipient: task.recipient,
            attempt: task.attempt + 1,
        },
    });
}

async fn report_with_timeout(
    reporter: &Arc<dyn ProgressReporter>,
    snapshot: ProgressSnapshot,
    limit: Duration,
) {
    if timeout(limit, reporter.report(snapshot)).await.is_err() {
        tracing::warn!("progress reporter timed out, snapshot dropped");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
