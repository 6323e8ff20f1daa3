//! VoiceJury server binary
//!
//! Wires the blob store, session store, caches, inference clients and
//! pipelines together, spawns the cleanup reaper and serves the HTTP
//! surface.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod error;
mod routes;
mod sse;
mod state;

use config::ServerConfig;
use voicejury_session::{ReaperConfig, spawn_reaper};

#[derive(Parser, Debug)]
#[command(name = "voicejury-server", about = "Singing performance analysis engine")]
struct Args {
    /// Path to a YAML or TOML configuration file.
    #[arg(long, env = "VOICEJURY_CONFIG")]
    config: Option<String>,

    /// Override the bind address from the config.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::from_env(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    init_tracing(config.server.json_logs);

    let (state, sweepers) = state::build_state(&config).await?;

    // Hourly eviction of session blobs, stale staging dirs and expired
    // cache rows.
    spawn_reaper(
        state.sessions.clone(),
        state.storage.clone(),
        sweepers,
        ReaperConfig {
            temp_dir: config.analysis.temp_dir.clone(),
            ..Default::default()
        },
    );

    let router = app::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "voicejury server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,voicejury=debug"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
