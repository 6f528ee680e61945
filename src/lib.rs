pub mod cli;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;
pub mod widgets;

use cli::Args;
use history::{ spawn_sweeper, ConversationStore };
use log::info;
use server::{ AppState, Server };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

fn set_or_unset(value: Option<&str>) -> &'static str {
    match value {
        Some(v) if !v.trim().is_empty() => "set",
        _ => "unset",
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("OpenWebUI URL: {}", args.openwebui_url);
    info!("OpenWebUI Model: {}", args.openwebui_model);
    info!("OpenWebUI API Key: {}", set_or_unset(Some(args.openwebui_api_key.as_str())));
    info!("System Prompt: {}", set_or_unset(Some(args.openwebui_system_prompt.as_str())));
    info!("Keep Alive: {:?}", args.openwebui_keep_alive);
    info!("Chat TTL: {}s (sweep every {}s)", args.chat_ttl_secs, args.chat_sweep_interval_secs);
    info!("Cancel Superseded Replies: {}", args.chat_cancel_superseded);
    info!("Weather: {} ({}, {})", args.weather_api_url, args.weather_lat, args.weather_lon);
    info!(
        "Spotify Credentials: {}",
        set_or_unset(args.spotify_refresh_token.as_deref())
    );
    info!("GitHub Token: {} (default user {})", set_or_unset(args.github_token.as_deref()), args.github_user);
    info!("-------------------------");

    let store = Arc::new(ConversationStore::new(Duration::from_secs(args.chat_ttl_secs)));
    let _sweeper = spawn_sweeper(
        store.clone(),
        Duration::from_secs(args.chat_sweep_interval_secs.max(1))
    );

    let state = AppState::from_args(&args, store);
    let remotes = state.system.remote_names();
    if !remotes.is_empty() {
        info!("Remote Stats Servers: {}", remotes.join(", "));
    }

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
