//! The Report Server: sensor data sink with per-area JSON logs.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use wipd::config::{ServerConfig, ServerRole};
use wipd::net::UdpServer;
use wipd::servers::ReportServer;
use wipd::stores::reports::ReportLog;

#[derive(Parser)]
#[command(name = "wip-report-server")]
#[command(about = "WIP Report Server - sensor report sink")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for sensor_data_<area>.json files
    #[arg(long, default_value = "sensor_reports")]
    data_dir: PathBuf,

    /// Keep at most this many newest reports per area
    #[arg(long)]
    max_reports: Option<usize>,

    /// Bind port (overrides config; default 4112)
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
    let mut config = ServerConfig::load(ServerRole::Report, cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.debug {
        config.debug = true;
    }

    let mut log = ReportLog::new(&cli.data_dir);
    if let Some(max) = cli.max_reports {
        log = log.with_retention(max);
    }
    info!("writing reports under {}", cli.data_dir.display());

    let handler = ReportServer::new(Arc::new(log)).with_auth(config.auth_config());
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
