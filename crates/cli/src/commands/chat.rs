//! `taskrag chat` — Run a single turn and stream it to the terminal.
//!
//! Answer tokens go to stdout as they arrive; tool activity goes to stderr.
//! Ctrl+C cancels the turn.

use std::io::Write;

use taskrag_agent::{Pacing, StreamBroadcaster};
use taskrag_config::AppConfig;
use taskrag_core::event::StreamEvent;
use taskrag_core::session::SessionId;
use taskrag_gateway::AppState;

pub async fn run(
    config: AppConfig,
    message: String,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set TASKRAG_API_KEY or OPENAI_API_KEY, or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let state = AppState::from_config(config)?;
    let session_id = session.map(SessionId::from).unwrap_or_default();

    let handle = state.sessions.start_turn(session_id.clone(), message)?;
    let mut events = StreamBroadcaster::attach(handle.events, Pacing::Immediate);
    eprintln!("  session: {session_id}");

    let mut stdout = std::io::stdout();
    let mut failure: Option<String> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                state.sessions.cancel(&session_id);
                continue;
            }
        };
        let Some(event) = event else { break };

        match event {
            StreamEvent::Token { text } => {
                print!("{text}");
                stdout.flush()?;
            }
            StreamEvent::ToolInvoked { name, args } => {
                eprintln!("  [tool] {name} {args}");
            }
            StreamEvent::ToolResult {
                name,
                ok,
                error_kind,
                ..
            } => {
                if ok {
                    eprintln!("  [tool] {name} ok");
                } else {
                    eprintln!("  [tool] {name} failed: {}", error_kind.unwrap_or_default());
                }
            }
            StreamEvent::TurnComplete => {
                println!();
                break;
            }
            StreamEvent::Error { kind, message } => {
                println!();
                failure = Some(format!("{kind}: {message}"));
                break;
            }
            StreamEvent::Cancelled => {
                println!();
                eprintln!("  [cancelled]");
                break;
            }
        }
    }

    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}
