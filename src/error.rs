use std::fmt;
use std::time::Duration;

/// Errors returned when a broadcast fails to start, before any send happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    /// Another broadcast is still running on this broadcaster.
    /// Caller must wait for it to complete or cancel it.
    AlreadyRunning,

    /// Configuration rejected before the run loop was entered.
    Config(ConfigError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::AlreadyRunning =>
                write!(f, "a broadcast is already running"),
            StartError::Config(err) =>
                write!(f, "invalid configuration: {}", err),
        }
    }
}

impl std::error::Error for StartError {}

impl From<ConfigError> for StartError {
    fn from(err: ConfigError) -> Self {
        StartError::Config(err)
    }
}

/// Configuration values a run refuses to start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A pool of zero workers can never drain the queue.
    ZeroWorkers,
    /// A rate ceiling of zero messages per second never grants a slot.
    ZeroRateCeiling,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroWorkers =>
                write!(f, "worker count must be at least 1"),
            ConfigError::ZeroRateCeiling =>
                write!(f, "rate ceiling must be at least 1 message per second"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Outcome of a single delivery attempt, as classified by the [`Sender`].
///
/// [`Sender`]: crate::gateway::Sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message reached the recipient.
    Delivered,

    /// The recipient can never be reached again without external
    /// reconfiguration (blocked the bot, deactivated, chat gone).
    Unreachable,

    /// Provider-imposed pacing. Retry no sooner than `retry_after`.
    Throttled { retry_after: Duration },

    /// Short-lived failure. Retried with a fixed backoff.
    Transient { reason: TransientReason },
}

/// What made a delivery attempt fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    Timeout,
    Network,
    Provider,
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientReason::Timeout =>
                write!(f, "delivery attempt timed out"),
            TransientReason::Network =>
                write!(f, "network error"),
            TransientReason::Provider =>
                write!(f, "provider rejected the request"),
        }
    }
}
