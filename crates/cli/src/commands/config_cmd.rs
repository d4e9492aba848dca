//! `taskrag config` — Show the effective configuration or write a starter file.

use std::path::Path;

use taskrag_config::AppConfig;

pub fn run(path: &Path, init: bool, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if init {
        return init_file(path, force);
    }
    show(path)
}

fn init_file(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from(path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;

    println!("Config file: {}", path.display());
    println!();
    println!("   Provider:   {} ({})", config.provider.api_url, config.provider.model);
    println!(
        "   API key:    {}",
        if config.has_api_key() { "set" } else { "missing" }
    );
    println!(
        "   Engine:     {} tool cycles, {}s generation timeout",
        config.engine.max_tool_iterations, config.engine.generation_timeout_secs
    );
    println!(
        "   Sessions:   idle after {}s, swept every {}s",
        config.sessions.idle_ttl_secs, config.sessions.sweep_interval_secs
    );
    println!(
        "   Retrieval:  chunks of {} (overlap {}), top {}",
        config.retrieval.chunk_size, config.retrieval.chunk_overlap, config.retrieval.top_k
    );
    println!("   Gateway:    {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Telegram:   {}",
        if config.telegram.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
