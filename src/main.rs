mod art;
mod http;
mod lyrics;
mod mpris;
mod palette;
mod pipe;
mod position;
mod registry;
mod state;

use crate::lyrics::providers::{self, DEFAULT_ORDER};
use crate::lyrics::{LyricsCache, LyricsPipeline, ProviderSettings};
use crate::mpris::{BusChange, MprisConnector, SourceEvent};
use crate::position::{PositionReconciler, RelayPosition, RelaySettings};
use crate::registry::Aggregator;
use crate::state::NowPlaying;
use clap::Parser;
use futures_util::StreamExt;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Application configuration from CLI
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Blocklist for MPRIS player service names (comma-separated, case-insensitive)
    #[arg(
        long = "block",
        value_name = "SERVICE1,SERVICE2",
        value_delimiter = ','
    )]
    block: Vec<String>,
    /// Path to the lyrics cache file (in-memory only when absent)
    #[arg(long)]
    database: Option<PathBuf>,
    /// Comma-separated list of lyric providers in preferred order (e.g. "lrclib,musixmatch").
    /// If empty, the LYRIC_PROVIDERS env var will be used as a fallback.
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,
    /// Musixmatch desktop usertoken
    #[arg(long, env = "MUSIXMATCH_USERTOKEN", hide_env_values = true)]
    musixmatch_token: Option<String>,
    /// Per-provider lyrics query timeout in milliseconds
    #[arg(long, default_value_t = 8000)]
    provider_timeout_ms: u64,
    /// Delay before refreshing the active player after it reports a seek
    #[arg(long, default_value_t = 250)]
    seek_settle_ms: u64,
    /// Player whose position comes from the relay status command instead of MPRIS
    #[arg(long, requires = "relay_command")]
    relay_player: Option<String>,
    /// Shell command printing `... variant <reference>/<current> ...`
    #[arg(long, requires = "relay_player")]
    relay_command: Option<String>,
    /// Sample rate used to convert relay sample counts to seconds
    #[arg(long, default_value_t = 44100)]
    relay_sample_rate: u32,
    /// Relay status poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    relay_interval_ms: u64,
    /// Enable debug logging to stderr
    #[arg(long)]
    pub debug_log: bool,
}

fn providers_from_env_if_empty(cli: &mut Config) {
    if cli.providers.is_empty()
        && let Ok(s) = std::env::var("LYRIC_PROVIDERS")
    {
        let parts: Vec<String> = s
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if !parts.is_empty() {
            cli.providers = parts;
        }
    }
    if cli.providers.is_empty() {
        cli.providers = DEFAULT_ORDER.iter().map(|p| p.to_string()).collect();
    }
}

impl Config {
    fn relay(&self) -> Option<RelaySettings> {
        Some(RelaySettings {
            player: self.relay_player.clone()?,
            command: self.relay_command.clone()?,
            sample_rate: f64::from(self.relay_sample_rate.max(1)),
            interval: Duration::from_millis(self.relay_interval_ms.max(1)),
        })
    }
}

fn init_tracing(debug_log: bool) {
    let default_level = if debug_log { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nowplaying={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut cfg = Config::parse();
    providers_from_env_if_empty(&mut cfg);
    init_tracing(cfg.debug_log);

    let conn = mpris::session_connection().await?;

    let cache = match cfg.database.clone() {
        Some(path) => LyricsCache::load(path).await,
        None => LyricsCache::in_memory(),
    };
    let settings = ProviderSettings {
        musixmatch_token: cfg.musixmatch_token.clone(),
    };
    let now_playing = NowPlaying::new();
    let pipeline = Arc::new(LyricsPipeline::new(
        cache,
        providers::from_names(&cfg.providers, &settings),
        Duration::from_millis(cfg.provider_timeout_ms),
        now_playing.clone(),
    ));

    let (events_tx, events_rx) = mpsc::channel(64);
    let (update_tx, update_rx) = mpsc::channel(32);
    let (command_tx, command_rx) = mpsc::channel(16);

    let mut buses = Box::pin(mpris::player_buses(&conn).await?);
    let bus_tx = events_tx.clone();
    tokio::spawn(async move {
        while let Some(change) = buses.next().await {
            let event = match change {
                BusChange::Appeared(name) => SourceEvent::Appeared(name),
                BusChange::Disappeared(name) => SourceEvent::Disappeared(name),
            };
            if bus_tx.send(event).await.is_err() {
                break;
            }
        }
        tracing::warn!("Bus name watcher ended");
    });

    let reconciler = PositionReconciler::new(cfg.relay().map(RelayPosition::spawn));
    let aggregator = Aggregator::new(
        Arc::new(MprisConnector::new(conn)),
        cfg.block.clone(),
        Duration::from_millis(cfg.seek_settle_ms),
        reconciler,
        now_playing.clone(),
        events_tx,
        update_tx,
    );
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let arbiter = tokio::spawn(aggregator.run(events_rx, command_rx, shutdown_rx));

    tokio::select! {
        _ = pipe::run(update_rx, now_playing.subscribe(), pipeline, command_tx) => {}
        _ = tokio::signal::ctrl_c() => tracing::debug!("Interrupted"),
    }
    let _ = shutdown_tx.send(()).await;
    if let Err(e) = arbiter.await {
        tracing::warn!(error = %e, "Arbiter task failed");
    }
    Ok(())
}
