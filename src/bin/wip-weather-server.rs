//! The Weather Server proxy: the single UDP endpoint clients talk to.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use wipd::config::{ServerConfig, ServerRole};
use wipd::net::UdpServer;
use wipd::servers::weather::{BackendAuth, WeatherProxy};

#[derive(Parser)]
#[command(name = "wip-weather-server")]
#[command(about = "WIP Weather Server - client-facing proxy")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind host (overrides config)
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Bind port (overrides config; default 4110)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose per-request logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(ServerRole::Weather, cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }

    let proxy = WeatherProxy::new(&config, BackendAuth::from_env()).await?;
    let server = UdpServer::bind(&config, proxy).await?;
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
