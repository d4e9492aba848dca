//! Telegram Bot API client.
//!
//! Covers the four methods the relay needs: `getUpdates` (long polling),
//! `sendMessage`, `editMessageText`, and `sendChatAction`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram transport error: {0}")]
    Transport(String),

    #[error("Telegram API error in {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },

    #[error("Unexpected Telegram response: {0}")]
    Decode(String),
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Serialize)]
struct GetUpdatesBody {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

// ── Client ────────────────────────────────────────────────────────────────

/// The outbound half of the Bot API, as the relay uses it.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Send a new message; returns its `message_id`.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, TelegramError>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError>;

    async fn send_typing(&self, chat_id: i64) -> Result<(), TelegramError>;
}

pub struct BotClient {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotClient")
            .field("base_url", &"[REDACTED]")
            .finish()
    }
}

impl BotClient {
    /// `poll_timeout` is the long-poll window; the HTTP timeout leaves a
    /// margin above it.
    pub fn new(bot_token: &str, poll_timeout: Duration) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, bot_token, poll_timeout)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str, poll_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token),
            client,
        }
    }

    /// Long-poll for updates with `update_id >= offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let body = GetUpdatesBody {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ["message"],
        };
        self.call("getUpdates", &body).await
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .map_err(|e| TelegramError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TelegramError::Decode(e.without_url().to_string()))?;

        if !parsed.ok {
            return Err(TelegramError::Api {
                method,
                description: parsed
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }
        debug!(method, "Telegram call ok");
        parsed
            .result
            .ok_or_else(|| TelegramError::Decode(format!("{method} returned no result")))
    }
}

#[async_trait]
impl BotApi for BotClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, TelegramError> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &serde_json::json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &serde_json::json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "sendChatAction",
                &serde_json::json!({ "chat_id": chat_id, "action": "typing" }),
            )
            .await?;
        Ok(())
    }
}
