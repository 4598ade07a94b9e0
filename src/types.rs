use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of one broadcast recipient.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of recipient ids with chat or message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientId(pub i64);

/// Reference to an already-posted message that can be replicated to
/// recipients without re-uploading its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    /// Chat the source message lives in.
    pub chat_id: i64,
    /// Message id within that chat.
    pub message_id: i64,
}

/// A freshly constructed payload, one of the message kinds the operator
/// surface accepts. Media is referenced by provider file id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    Text { text: String },
    Photo { file_id: String, caption: String },
    Video { file_id: String, caption: String },
    Document { file_id: String, caption: String },
    Audio { file_id: String, caption: String },
    Voice { file_id: String, caption: String },
    Sticker { file_id: String },
    VideoNote { file_id: String },
}

/// How every send of a run is performed. Fixed when the job is built,
/// never reevaluated per recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendMode {
    /// Replicate an existing message (preserves native media, lower overhead).
    Replicate,
    /// Send a freshly constructed payload.
    Fresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum JobContent {
    Replicate {
        source: MessageRef,
        fallback: Option<MessagePayload>,
    },
    Fresh {
        payload: MessagePayload,
    },
}

/// The message one run delivers to every recipient.
///
/// A job is immutable for the duration of a run. Its send mode is decided
/// by which constructor the caller uses: [`BroadcastJob::replicate`] when the
/// operator supplied an existing message to copy, [`BroadcastJob::fresh`]
/// when the content was authored as a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastJob {
    pub(crate) content: JobContent,
}

impl BroadcastJob {
    /// Job that replicates `source` to every recipient.
    pub fn replicate(source: MessageRef) -> Self {
        Self {
            content: JobContent::Replicate {
                source,
                fallback: None,
            },
        }
    }

    /// Job that replicates `source`, falling back to `payload` for
    /// recipients whose copy send is rejected outright.
    pub fn replicate_with_fallback(source: MessageRef, payload: MessagePayload) -> Self {
        Self {
            content: JobContent::Replicate {
                source,
                fallback: Some(payload),
            },
        }
    }

    /// Job that sends a freshly constructed payload to every recipient.
    pub fn fresh(payload: MessagePayload) -> Self {
        Self {
            content: JobContent::Fresh { payload },
        }
    }

    pub fn mode(&self) -> SendMode {
        match self.content {
            JobContent::Replicate { .. } => SendMode::Replicate,
            JobContent::Fresh { .. } => SendMode::Fresh,
        }
    }

    /// The source message for a replicate job.
    pub fn source(&self) -> Option<&MessageRef> {
        match &self.content {
            JobContent::Replicate { source, .. } => Some(source),
            JobContent::Fresh { .. } => None,
        }
    }

    /// The payload: the fresh content, or the replicate fallback if any.
    pub fn payload(&self) -> Option<&MessagePayload> {
        match &self.content {
            JobContent::Replicate { fallback, .. } => fallback.as_ref(),
            JobContent::Fresh { payload } => Some(payload),
        }
    }
}

/// Counters of one run at a point in time.
///
/// Snapshots are monotonic: a later snapshot's `sent` and `failed` are
/// never below an earlier one's, and exactly one snapshot per run carries
/// `is_final == true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Recipients the run started with.
    pub total: u64,
    /// Deliveries confirmed so far.
    pub sent: u64,
    /// Recipients with a terminal failure so far.
    pub failed: u64,
    /// Recipients not yet in a terminal state.
    pub remaining: u64,
    /// Set on the single completion snapshot.
    pub is_final: bool,
}

/// Final accounting of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    /// Recipients never attempted, or whose retry was abandoned, because the
    /// run was cancelled. Zero for uncancelled runs.
    pub skipped: u64,
    /// Retry attempts scheduled over the whole run.
    pub retries: u64,
    pub cancelled: bool,
    pub elapsed: Duration,
}
