//! A single-process broadcast fan-out engine for chat-platform bots.
//!
//! This crate provides a **bounded-concurrency, rate-limited, best-effort**
//! dispatcher that sends one message to a large recipient set.
//!
//! ## Guarantees
//! - Outbound sends capped per rolling one-second window
//! - Per-recipient failure isolation
//! - Exact terminal accounting: every recipient ends sent or failed
//! - Bounded retries, so every run terminates
//! - At most one active broadcast per broadcaster
//!
//! ## Non-Guarantees
//! - Delivery ordering across recipients
//! - Durability across restarts
//! - Exactly-once delivery
//! - Cross-process coordination
//!
//! The engine consumes its collaborators through capability traits:
//! a [`RecipientSource`] for the recipient snapshot, a [`Sender`] for
//! single deliveries, an [`UnreachableSink`] for recipients that are gone
//! for good, and a [`ProgressReporter`] for count snapshots.

mod broadcast;
mod error;
mod gateway;
mod limiter;
mod registry;
mod types;
mod worker;

#[cfg(feature = "http")]
mod telegram;

pub use broadcast::{BroadcastConfig, Broadcaster, RunHandle};
pub use error::{ConfigError, SendOutcome, StartError, TransientReason};
pub use gateway::{LogProgress, ProgressReporter, RecipientSource, Sender, UnreachableSink};
pub use limiter::{RateLimiter, RateLimiterStats};
pub use registry::{InMemoryRegistry, RecipientProfile, RegistryStats};
pub use types::{
    BroadcastJob, MessagePayload, MessageRef, ProgressSnapshot, RecipientId, RunSummary, SendMode,
};

#[cfg(feature = "http")]
pub use telegram::{classify_api_error, payload_request, BotApi, TelegramProgress, TelegramSender};
