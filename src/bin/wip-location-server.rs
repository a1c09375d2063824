//! The Location Server: coordinate to area-code resolution.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::info;
use serde::Deserialize;

use wipd::config::{ServerConfig, ServerRole};
use wipd::net::UdpServer;
use wipd::servers::LocationServer;
use wipd::stores::geometry::{demo_geometry, GeometryPool, MemoryGeometry};

#[derive(Parser)]
#[command(name = "wip-location-server")]
#[command(about = "WIP Location Server - point-in-polygon area resolution")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// District bounding boxes as JSON (defaults to a built-in demo set)
    #[arg(long)]
    districts: Option<PathBuf>,

    /// Bind port (overrides config; default 4109)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose per-request logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Deserialize)]
struct DistrictRow {
    code: u32,
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

fn load_districts(path: &PathBuf) -> Result<MemoryGeometry, Box<dyn Error>> {
    let raw = std::fs::read_to_string(path)?;
    let rows: Vec<DistrictRow> = serde_json::from_str(&raw)?;
    let mut geometry = MemoryGeometry::new();
    for row in &rows {
        geometry = geometry.with_district(
            row.code,
            (row.min_lon, row.min_lat),
            (row.max_lon, row.max_lat),
        );
    }
    info!("loaded {} districts from {}", rows.len(), path.display());
    Ok(geometry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(ServerRole::Location, cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }

    let geometry = match &cli.districts {
        Some(path) => load_districts(path)?,
        None => demo_geometry(),
    };
    let pool = GeometryPool::with_defaults(move || geometry.clone());
    let handler = LocationServer::new(pool, config.coordinate_cache_ttl);

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
