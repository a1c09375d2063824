//! The Query Server: cached weather data keyed by area code.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use wipd::config::{ServerConfig, ServerRole};
use wipd::net::UdpServer;
use wipd::servers::{NoopRefresh, QueryServer};
use wipd::stores::weather_doc::{MemoryWeatherStore, WeatherDocument, WeatherStore};

#[derive(Parser)]
#[command(name = "wip-query-server")]
#[command(about = "WIP Query Server - weather data by area code")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed documents: JSON map of 6-digit area code to weather document
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Bind port (overrides config; default 4111)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose per-request logging
    #[arg(short, long)]
    debug: bool,
}

async fn seed_store(store: &MemoryWeatherStore, path: &PathBuf) -> Result<usize, Box<dyn Error>> {
    let raw = std::fs::read_to_string(path)?;
    let documents: HashMap<String, WeatherDocument> = serde_json::from_str(&raw)?;
    let count = documents.len();
    for (area, document) in documents {
        let area_code: u32 = area.parse()?;
        store.set_document(area_code, &document).await?;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(ServerRole::Query, cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }

    let store = Arc::new(MemoryWeatherStore::new());
    if let Some(path) = &cli.seed {
        let count = seed_store(&store, path).await?;
        info!("seeded {count} weather documents from {}", path.display());
    }

    let handler = QueryServer::new(
        store,
        Arc::new(NoopRefresh),
        config.disaster_alert_cache_min,
    );
    let _scheduler = handler.start_scheduler(&config);

    let server = UdpServer::bind(&config, handler).await?;
    let stats = server.stats();

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            let snapshot = stats.snapshot();
            info!(
                "shutting down after {:.0}s: {} requests, {} ok, {} errors",
                snapshot.uptime_secs, snapshot.requests, snapshot.successes, snapshot.errors
            );
        }
    }
    Ok(())
}
