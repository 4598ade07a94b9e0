use async_trait::async_trait;

use crate::error::SendOutcome;
use crate::types::{BroadcastJob, ProgressSnapshot, RecipientId};

/// Delivers one message to one recipient.
///
/// Implementations must be safe to call concurrently from multiple workers
/// with different recipients, and must classify every failure into a
/// [`SendOutcome`] rather than panicking.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn deliver(&self, recipient: RecipientId, job: &BroadcastJob) -> SendOutcome;
}

/// Yields the recipients eligible for a broadcast.
///
/// Called once at run start. Re-querying yields a fresh snapshot,
/// not a continuation. Ids are unique within one snapshot.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn list_active(&self) -> Vec<RecipientId>;
}

/// Marks a recipient permanently unreachable.
///
/// Idempotent. Implementations log their own failures; the run never
/// observes them.
#[async_trait]
pub trait UnreachableSink: Send + Sync {
    async fn mark_unreachable(&self, recipient: RecipientId);
}

/// Receives periodic and final count snapshots of a run.
///
/// Calls are serialized by the orchestrator and bounded by a timeout,
/// so a slow reporter delays at most one snapshot, never a send.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, snapshot: ProgressSnapshot);
}

/// Reporter that writes snapshots to the log.
#[derive(Debug, Default)]
pub struct LogProgress;

#[async_trait]
impl ProgressReporter for LogProgress {
    async fn report(&self, snapshot: ProgressSnapshot) {
        if snapshot.is_final {
            tracing::info!(
                total = snapshot.total,
                sent = snapshot.sent,
                failed = snapshot.failed,
                "broadcast finished"
            );
        } else {
            tracing::info!(
                total = snapshot.total,
                sent = snapshot.sent,
                failed = snapshot.failed,
                remaining = snapshot.remaining,
                "broadcast progress"
            );
        }
    }
}
