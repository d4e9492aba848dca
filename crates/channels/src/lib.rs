//! Chat transport adapters for TaskRAG.
//!
//! A transport turns platform messages into `SessionManager::start_turn`
//! and `cancel` calls, and renders the turn's paced event stream back in
//! the platform's own idiom. No orchestration happens here.
//!
//! Available transports:
//! - **Telegram** — Bot API long polling; answers stream into one message
//!   that is edited as coalesced tokens arrive.

pub mod relay;
pub mod telegram;

pub use relay::{ReplyDraft, TelegramRelay};
pub use telegram::{BotApi, BotClient, TelegramError};
