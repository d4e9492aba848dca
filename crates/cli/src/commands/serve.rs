//! `taskrag serve` — Start the HTTP gateway and, when enabled, the Telegram relay.

use std::sync::Arc;

use taskrag_channels::TelegramRelay;
use taskrag_config::AppConfig;
use taskrag_gateway::AppState;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let telegram_enabled = config.telegram.enabled;
    let state = Arc::new(AppState::from_config(config)?);

    println!("TaskRAG Gateway");
    println!("   Listening: {}:{}", state.config.gateway.host, state.config.gateway.port);
    println!("   Model:     {}", state.config.provider.model);
    println!("   Tools:     {}", state.tools.names().join(", "));

    let shutdown = CancellationToken::new();
    let relay = if telegram_enabled {
        TelegramRelay::from_config(&state.config.telegram, state.sessions.clone())
    } else {
        None
    };
    let relay_task = relay.map(|relay| {
        println!("   Telegram:  enabled");
        tokio::spawn(Arc::new(relay).run(shutdown.clone()))
    });

    let served = taskrag_gateway::start(state).await;

    shutdown.cancel();
    if let Some(task) = relay_task {
        let _ = task.await;
    }
    info!("Shut down");
    served
}
