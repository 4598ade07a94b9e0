use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::error::{SendOutcome, TransientReason};
use crate::gateway::Sender;
use crate::limiter::RateLimiter;
use crate::types::{BroadcastJob, RecipientId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// A unit of work consumed by workers.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub recipient: RecipientId,
    /// Delivery attempts completed so far. Zero before the first attempt.
    pub attempt: u32,
}

/// What a worker tells the orchestrator about one dequeued task.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// The sender was invoked once and classified the attempt.
    Attempted { task: Task, outcome: SendOutcome },
    /// The run was cancelled before this task was attempted.
    Skipped { recipient: RecipientId },
}

/// Shared, read-only context for all workers of one run.
pub(crate) struct RunContext {
    /// Gate in front of every send.
    pub limiter: RateLimiter,
    pub sender: Arc<dyn Sender>,
    pub job: Arc<BroadcastJob>,
    /// Events from workers to the orchestrator.
    pub event_tx: mpsc::UnboundedSender<WorkerEvent>,
    /// Ceiling on one sender call.
    pub send_timeout: Duration,
    pub cancelled: Arc<AtomicBool>,
}

/// Main worker loop.
///
/// Each worker:
/// - Pulls tasks from the shared queue until it is closed and drained
/// - Acquires a rate-limiter slot before every send
/// - Reports every task exactly once, whatever the outcome
///
/// A single recipient's failure never escapes past this loop.
pub(crate) async fn worker_loop(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    ctx: Arc<RunContext>,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(task) = task else { break };

        // Cancelled runs drain the backlog without touching the limiter.
        if ctx.cancelled.load(Ordering::SeqCst) {
            metric_inc("broadcast.send.skipped");
            let _ = ctx.event_tx.send(WorkerEvent::Skipped {
                recipient: task.recipient,
            });
            continue;
        }

        let event = process_task(task, &ctx).await;
        let _ = ctx.event_tx.send(event);
    }
}

/// Perform a single delivery attempt.
async fn process_task(task: Task, ctx: &RunContext) -> WorkerEvent {
    ctx.limiter.acquire().await;

    let attempt = ctx.sender.deliver(task.recipient, &ctx.job);
    let outcome = match timeout(ctx.send_timeout, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => SendOutcome::Transient {
            reason: TransientReason::Timeout,
        },
    };

    match &outcome {
        SendOutcome::Delivered => {
            metric_inc("broadcast.send.delivered");
            tracing::debug!(recipient = task.recipient.0, "delivered");
        }
        SendOutcome::Unreachable => {
            metric_inc("broadcast.send.unreachable");
        }
        SendOutcome::Throttled { retry_after } => {
            metric_inc("broadcast.send.throttled");
            tracing::debug!(
                recipient = task.recipient.0,
                retry_after_ms = retry_after.as_millis() as u64,
                "provider throttled the send"
            );
        }
        SendOutcome::Transient { reason } => {
            metric_inc("broadcast.send.transient");
            tracing::debug!(recipient = task.recipient.0, %reason, "transient send failure");
        }
    }

    WorkerEvent::Attempted { task, outcome }
}
