use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{SendOutcome, TransientReason};
use crate::gateway::{ProgressReporter, Sender};
use crate::types::{BroadcastJob, MessagePayload, ProgressSnapshot, RecipientId, SendMode};

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Thin Bot API client shared by the sender and the progress reporter.
#[derive(Debug, Clone)]
pub struct BotApi {
    client: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Point the client at a different server, e.g. a local stub in tests.
    pub fn with_base_url(token: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        }
    }

    async fn call(&self, method: &str, body: Value) -> SendOutcome {
        let url = format!("{}/{}", self.base, method);
        let response = self.client.post(&url).json(&body).send().await;

        match response {
            Ok(resp) => match resp.json::<ApiResponse>().await {
                Ok(api) if api.ok => SendOutcome::Delivered,
                Ok(api) => classify_api_error(
                    api.error_code.unwrap_or(0),
                    api.description.as_deref().unwrap_or(""),
                    api.parameters.and_then(|p| p.retry_after),
                ),
                Err(_) => SendOutcome::Transient {
                    reason: TransientReason::Provider,
                },
            },
            Err(err) if err.is_timeout() => SendOutcome::Transient {
                reason: TransientReason::Timeout,
            },
            Err(_) => SendOutcome::Transient {
                reason: TransientReason::Network,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Map a Bot API error response to a delivery outcome.
///
/// The unreachable phrasings are the ones the API actually uses for
/// recipients that are gone for good.
pub fn classify_api_error(code: i64, description: &str, retry_after: Option<u64>) -> SendOutcome {
    if code == 429 {
        return SendOutcome::Throttled {
            retry_after: Duration::from_secs(retry_after.unwrap_or(1)),
        };
    }

    let text = description.to_ascii_lowercase();
    if code == 403
        || text.contains("blocked")
        || text.contains("user is deactivated")
        || text.contains("chat not found")
        || text.contains("user not found")
    {
        return SendOutcome::Unreachable;
    }

    SendOutcome::Transient {
        reason: TransientReason::Provider,
    }
}

/// Production sender delivering through the Bot API.
///
/// Replicate jobs go through `copyMessage`; when the copy is rejected
/// outright and the job carries a fallback payload, that payload is sent
/// instead within the same attempt.
#[derive(Debug, Clone)]
pub struct TelegramSender {
    api: BotApi,
}

impl TelegramSender {
    pub fn new(api: BotApi) -> Self {
        Self { api }
    }

    async fn send_payload(&self, recipient: RecipientId, payload: &MessagePayload) -> SendOutcome {
        let (method, body) = payload_request(recipient, payload);
        self.api.call(method, body).await
    }
}

#[async_trait]
impl Sender for TelegramSender {
    async fn deliver(&self, recipient: RecipientId, job: &BroadcastJob) -> SendOutcome {
        match job.mode() {
            SendMode::Replicate => {
                let Some(source) = job.source() else {
                    return SendOutcome::Transient {
                        reason: TransientReason::Provider,
                    };
                };
                let outcome = self
                    .api
                    .call(
                        "copyMessage",
                        json!({
                            "chat_id": recipient.0,
                            "from_chat_id": source.chat_id,
                            "message_id": source.message_id,
                        }),
                    )
                    .await;

                match (&outcome, job.payload()) {
                    (
                        SendOutcome::Transient {
                            reason: TransientReason::Provider,
                        },
                        Some(payload),
                    ) => {
                        tracing::debug!(
                            recipient = recipient.0,
                            "copy rejected, falling back to payload"
                        );
                        self.send_payload(recipient, payload).await
                    }
                    _ => outcome,
                }
            }
            SendMode::Fresh => match job.payload() {
                Some(payload) => self.send_payload(recipient, payload).await,
                None => SendOutcome::Transient {
                    reason: TransientReason::Provider,
                },
            },
        }
    }
}

/// Bot API method and body for one payload kind.
pub fn payload_request(recipient: RecipientId, payload: &MessagePayload) -> (&'static str, Value) {
    let chat_id = recipient.0;
    match payload {
        MessagePayload::Text { text } => (
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text }),
        ),
        MessagePayload::Photo { file_id, caption } => (
            "sendPhoto",
            json!({ "chat_id": chat_id, "photo": file_id, "caption": caption }),
        ),
        MessagePayload::Video { file_id, caption } => (
            "sendVideo",
            json!({ "chat_id": chat_id, "video": file_id, "caption": caption }),
        ),
        MessagePayload::Document { file_id, caption } => (
            "sendDocument",
            json!({ "chat_id": chat_id, "document": file_id, "caption": caption }),
        ),
        MessagePayload::Audio { file_id, caption } => (
            "sendAudio",
            json!({ "chat_id": chat_id, "audio": file_id, "caption": caption }),
        ),
        MessagePayload::Voice { file_id, caption } => (
            "sendVoice",
            json!({ "chat_id": chat_id, "voice": file_id, "caption": caption }),
        ),
        MessagePayload::Sticker { file_id } => (
            "sendSticker",
            json!({ "chat_id": chat_id, "sticker": file_id }),
        ),
        MessagePayload::VideoNote { file_id } => (
            "sendVideoNote",
            json!({ "chat_id": chat_id, "video_note": file_id }),
        ),
    }
}

/// Reporter posting progress and completion messages to the admin chat.
#[derive(Debug, Clone)]
pub struct TelegramProgress {
    api: BotApi,
    admin_chat_id: i64,
}

impl TelegramProgress {
    pub fn new(api: BotApi, admin_chat_id: i64) -> Self {
        Self { api, admin_chat_id }
    }
}

#[async_trait]
impl ProgressReporter for TelegramProgress {
    async fn report(&self, snapshot: ProgressSnapshot) {
        let text = if snapshot.is_final {
            format!(
                "\u{1F4E2} Broadcast finished.\nTotal: {}\nSuccess: {}\nFailed: {}",
                snapshot.total, snapshot.sent, snapshot.failed,
            )
        } else {
            format!(
                "\u{1F4E2} Broadcast progress: {}/{} (\u{2713} {} \u{2717} {})",
                snapshot.total - snapshot.remaining,
                snapshot.total,
                snapshot.sent,
                snapshot.failed,
            )
        };

        let outcome = self
            .api
            .call(
                "sendMessage",
                json!({ "chat_id": self.admin_chat_id, "text": text }),
            )
            .await;
        if !matches!(outcome, SendOutcome::Delivered) {
            tracing::warn!("could not deliver progress message to admin chat");
        }
    }
}
