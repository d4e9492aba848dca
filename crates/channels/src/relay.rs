//! Telegram relay: polls for messages, starts turns, and streams each answer
//! into a single message that is edited as coalesced events arrive.

use std::sync::Arc;
use std::time::Duration;

use taskrag_agent::{Pacing, SessionManager, StreamBroadcaster, Subscription};
use taskrag_config::TelegramConfig;
use taskrag_core::error::SessionError;
use taskrag_core::event::StreamEvent;
use taskrag_core::session::SessionId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::telegram::{BotApi, BotClient, IncomingMessage, TelegramError, User};

const PLACEHOLDER: &str = "Thinking...";
const GREETING: &str = "Hi! Ask me about your tasks or documents. Send /cancel to stop an answer.";
const BUSY_NOTICE: &str = "Still working on your previous message. Send /cancel to stop it.";
const TRUNCATION_MARK: &str = "\n\n... (truncated)";
const RETRY_DELAY: Duration = Duration::from_secs(5);
const FINAL_EDIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Session id used for a Telegram chat.
pub fn session_for_chat(chat_id: i64) -> SessionId {
    SessionId(format!("telegram:{chat_id}"))
}

/// Empty list denies everyone, `"*"` allows everyone; otherwise the sender's
/// numeric id or username (with or without `@`) must be listed.
pub fn is_allowed(allowed_users: &[String], sender: Option<&User>) -> bool {
    if allowed_users.iter().any(|u| u == "*") {
        return true;
    }
    let Some(sender) = sender else {
        return false;
    };
    let id = sender.id.to_string();
    allowed_users.iter().any(|entry| {
        let entry = entry.trim_start_matches('@');
        entry == id || sender.username.as_deref() == Some(entry)
    })
}

/// Clip `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_for_telegram(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARK.chars().count());
    let mut clipped: String = text.chars().take(keep).collect();
    clipped.push_str(TRUNCATION_MARK);
    clipped
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Start,
    Cancel,
    Message(&'a str),
}

impl<'a> Command<'a> {
    fn parse(text: &'a str) -> Self {
        let head = text.split_whitespace().next().unwrap_or_default();
        // Group chats address commands as `/cancel@botname`.
        let command = head.split('@').next().unwrap_or_default();
        match command {
            "/start" | "/help" => Self::Start,
            "/cancel" | "/stop" => Self::Cancel,
            _ => Self::Message(text),
        }
    }
}

// ── Reply rendering ───────────────────────────────────────────────────────

/// What the in-progress Telegram message should currently say.
#[derive(Debug, Default, Clone)]
pub struct ReplyDraft {
    answer: String,
    activity: Option<String>,
    notice: Option<String>,
    finished: bool,
}

impl ReplyDraft {
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Token { text } => {
                self.answer.push_str(text);
                self.activity = None;
            }
            StreamEvent::ToolInvoked { name, .. } => {
                self.activity = Some(format!("Using {name}..."));
            }
            StreamEvent::ToolResult {
                name,
                ok,
                error_kind,
                ..
            } => {
                self.activity = Some(if *ok {
                    format!("{name} finished")
                } else {
                    format!(
                        "{name} failed ({})",
                        error_kind.as_deref().unwrap_or("unknown error")
                    )
                });
            }
            StreamEvent::TurnComplete => {
                self.activity = None;
                self.finished = true;
            }
            StreamEvent::Error { message, .. } => {
                self.activity = None;
                self.notice = Some(format!("Error: {message}"));
                self.finished = true;
            }
            StreamEvent::Cancelled => {
                self.activity = None;
                self.notice = Some("Cancelled.".into());
                self.finished = true;
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn render(&self, max_chars: usize) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.answer.is_empty() {
            parts.push(&self.answer);
        }
        if let Some(activity) = &self.activity {
            parts.push(activity);
        }
        if let Some(notice) = &self.notice {
            parts.push(notice);
        }

        let text = if parts.is_empty() {
            let empty = if self.finished { "(no answer)" } else { PLACEHOLDER };
            empty.to_string()
        } else {
            parts.join("\n\n")
        };
        truncate_for_telegram(&text, max_chars)
    }
}

/// Post a placeholder and keep editing it until the turn's terminal event.
///
/// Edits are skipped when the rendered text has not changed, which Telegram
/// would otherwise reject as "message is not modified".
pub async fn stream_reply(
    bot: &dyn BotApi,
    chat_id: i64,
    mut subscription: Subscription,
    max_chars: usize,
) -> Result<ReplyDraft, TelegramError> {
    let message_id = bot.send_message(chat_id, PLACEHOLDER).await?;
    let mut shown = PLACEHOLDER.to_string();
    let mut draft = ReplyDraft::default();

    while let Some(event) = subscription.next().await {
        draft.apply(&event);
        let text = draft.render(max_chars);
        if text != shown {
            match bot.edit_message(chat_id, message_id, &text).await {
                Ok(()) => shown = text,
                Err(e) => warn!(chat_id, error = %e, "Failed to update reply"),
            }
        }
        if draft.is_finished() {
            break;
        }
    }

    if !draft.is_finished() {
        warn!(chat_id, "Event stream ended without a terminal event");
    }

    let final_text = draft.render(max_chars);
    if final_text != shown {
        deliver_final(bot, chat_id, message_id, &final_text).await;
    }
    Ok(draft)
}

/// Retry the last edit once; if it fails again, send the text as a new message.
async fn deliver_final(bot: &dyn BotApi, chat_id: i64, message_id: i64, text: &str) {
    tokio::time::sleep(FINAL_EDIT_RETRY_DELAY).await;
    let Err(e) = bot.edit_message(chat_id, message_id, text).await else {
        return;
    };
    warn!(chat_id, error = %e, "Final edit failed again, sending a new message");
    if let Err(e) = bot.send_message(chat_id, text).await {
        warn!(chat_id, error = %e, "Could not deliver final reply");
    }
}

// ── Relay ─────────────────────────────────────────────────────────────────

pub struct TelegramRelay {
    client: Arc<BotClient>,
    sessions: Arc<SessionManager>,
    allowed_users: Vec<String>,
    flush_interval: Duration,
    max_message_chars: usize,
    poll_timeout: Duration,
}

impl TelegramRelay {
    /// Returns `None` when no bot token is configured.
    pub fn from_config(config: &TelegramConfig, sessions: Arc<SessionManager>) -> Option<Self> {
        let token = config.bot_token.as_deref().filter(|t| !t.is_empty())?;
        let poll_timeout = Duration::from_secs(config.poll_timeout_secs);
        if config.allowed_users.is_empty() {
            warn!("telegram.allowed_users is empty, every message will be ignored");
        }
        Some(Self {
            client: Arc::new(BotClient::new(token, poll_timeout)),
            sessions,
            allowed_users: config.allowed_users.clone(),
            flush_interval: config.flush_interval(),
            max_message_chars: config.max_message_chars,
            poll_timeout,
        })
    }

    /// Long-poll until `shutdown` fires. Polling errors are logged and
    /// retried after a short delay.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Telegram relay polling");
        let mut offset = 0i64;

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.client.get_updates(offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle_message(message).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Telegram relay stopped");
    }

    async fn handle_message(&self, message: IncomingMessage) {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
        else {
            return;
        };
        if !is_allowed(&self.allowed_users, message.from.as_ref()) {
            warn!(chat_id, "Ignoring message from unauthorized user");
            return;
        }

        let session_id = session_for_chat(chat_id);
        match Command::parse(text) {
            Command::Start => self.reply(chat_id, GREETING).await,
            Command::Cancel => {
                let cancelled = self.sessions.cancel(&session_id);
                debug!(%session_id, cancelled, "Cancel command");
                let notice = if cancelled { "Cancelling..." } else { "Nothing to cancel." };
                self.reply(chat_id, notice).await;
            }
            Command::Message(text) => self.start_turn(chat_id, session_id, text).await,
        }
    }

    async fn start_turn(&self, chat_id: i64, session_id: SessionId, text: &str) {
        let handle = match self.sessions.start_turn(session_id, text) {
            Ok(handle) => handle,
            Err(SessionError::Busy(_)) => return self.reply(chat_id, BUSY_NOTICE).await,
            Err(e) => return self.reply(chat_id, &format!("Error: {e}")).await,
        };

        if let Err(e) = self.client.send_typing(chat_id).await {
            debug!(chat_id, error = %e, "sendChatAction failed");
        }

        let subscription =
            StreamBroadcaster::attach(handle.events, Pacing::Coalesced(self.flush_interval));
        let client = Arc::clone(&self.client);
        let max_chars = self.max_message_chars;
        tokio::spawn(async move {
            if let Err(e) = stream_reply(client.as_ref(), chat_id, subscription, max_chars).await {
                warn!(chat_id, error = %e, "Could not post reply");
            }
        });
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "sendMessage failed");
        }
    }
}
