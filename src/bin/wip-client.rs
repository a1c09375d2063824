//! Command-line client for the WIP pipeline.
//!
//! `get` and `coords` fetch weather through the Weather Server proxy;
//! `report` submits sensor data; `resolve` talks to the Location Server
//! directly for a bare coordinate lookup.

use std::error::Error;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use wipd::auth::AuthConfig;
use wipd::clients::{LocationClient, WeatherClient};
use wipd::packet::types::query::QueryResponse;
use wipd::packet::DataFlags;

#[derive(Parser)]
#[command(name = "wip-client")]
#[command(about = "WIP client - weather queries and sensor reports")]
#[command(version)]
struct Cli {
    /// Weather server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Weather server port
    #[arg(short, long, default_value = "4110")]
    port: u16,

    /// Reply deadline in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch weather for an area code
    Get {
        /// 6-digit area code, e.g. 130000
        area_code: String,

        #[command(flatten)]
        select: Select,
    },
    /// Fetch weather for a coordinate pair (resolved by the pipeline)
    Coords {
        latitude: f64,
        longitude: f64,

        #[command(flatten)]
        select: Select,
    },
    /// Resolve a coordinate pair to its area code via the Location Server
    Resolve {
        latitude: f64,
        longitude: f64,

        /// Location server address
        #[arg(long, default_value = "127.0.0.1:4109")]
        location_server: String,
    },
    /// Submit a sensor report
    Report {
        /// 6-digit area code
        area_code: String,

        /// Observed weather code
        #[arg(short, long)]
        weather_code: Option<u16>,

        /// Observed temperature in celsius
        #[arg(short, long)]
        temperature: Option<i16>,

        /// Observed precipitation probability (0-100)
        #[arg(short = 'p', long)]
        pop: Option<u8>,

        /// Alert strings to attach (repeatable)
        #[arg(short, long)]
        alert: Vec<String>,

        /// Disaster notices to attach (repeatable)
        #[arg(short = 'D', long)]
        disaster: Vec<String>,
    },
}

#[derive(clap::Args)]
struct Select {
    /// Request the weather code
    #[arg(short, long)]
    weather: bool,

    /// Request the temperature
    #[arg(short, long)]
    temperature: bool,

    /// Request the precipitation probability
    #[arg(short = 'p', long)]
    pop: bool,

    /// Request active alerts
    #[arg(short = 'A', long)]
    alerts: bool,

    /// Request disaster notices
    #[arg(short = 'D', long)]
    disaster: bool,

    /// Forecast day offset (0 = today ... 7)
    #[arg(short = 'T', long, default_value = "0")]
    day: u8,
}

impl Select {
    fn flags(&self) -> DataFlags {
        let flags = DataFlags::new(
            self.weather,
            self.temperature,
            self.pop,
            self.alerts,
            self.disaster,
        );
        if flags.any() {
            flags
        } else {
            // nothing selected means the common trio
            DataFlags::new(true, true, true, false, false)
        }
    }
}

fn client_auth() -> AuthConfig {
    let enabled = std::env::var("WEATHER_SERVER_AUTH_ENABLED")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    let passphrase = std::env::var("WEATHER_SERVER_PASSPHRASE")
        .ok()
        .filter(|v| !v.is_empty());
    AuthConfig {
        enabled,
        passphrase,
        ..AuthConfig::default()
    }
}

fn print_response(response: &QueryResponse) {
    println!("area code : {}", response.area_code_str());
    if let Some(code) = response.weather_code() {
        println!("weather   : {code}");
    }
    if let Some(celsius) = response.temperature_c() {
        println!("temp      : {celsius}°C");
    }
    if let Some(pop) = response.pop() {
        println!("pop       : {pop}%");
    }
    let alerts = response.alerts();
    if !alerts.is_empty() {
        println!("alerts    : {}", alerts.join(", "));
    }
    let disasters = response.disasters();
    if !disasters.is_empty() {
        println!("disasters : {}", disasters.join(", "));
    }
    if let Some((lat, lon)) = response.coordinates() {
        println!("position  : ({lat:.6}, {lon:.6})");
    }
}

fn resolve_addr(spec: &str) -> Result<SocketAddr, Box<dyn Error>> {
    spec.to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("cannot resolve {spec}").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    }

    let timeout = Duration::from_millis(cli.timeout_ms);
    let proxy_addr = resolve_addr(&format!("{}:{}", cli.host, cli.port))?;

    match cli.command {
        Commands::Get { area_code, select } => {
            let client = WeatherClient::connect(proxy_addr, 4096, timeout, client_auth()).await?;
            let area: u32 = area_code.parse()?;
            let response = client
                .get_weather_by_area(area, select.flags(), select.day)
                .await?;
            print_response(&response);
        }
        Commands::Coords {
            latitude,
            longitude,
            select,
        } => {
            let client = WeatherClient::connect(proxy_addr, 4096, timeout, client_auth()).await?;
            let response = client
                .get_weather_by_coordinates(latitude, longitude, select.flags(), select.day)
                .await?;
            print_response(&response);
        }
        Commands::Resolve {
            latitude,
            longitude,
            location_server,
        } => {
            let target = resolve_addr(&location_server)?;
            let router = Arc::new(wipd::net::ReplyRouter::bind(4096).await?);
            let client = LocationClient::new(
                router,
                target,
                Duration::from_secs(7 * 24 * 3600),
                timeout,
                AuthConfig::disabled(),
            );
            let flags = DataFlags::new(true, true, true, false, false);
            let area_code = client.resolve(latitude, longitude, flags, 0).await?;
            if area_code == 0 {
                println!("no district contains ({latitude}, {longitude})");
            } else {
                println!("({latitude}, {longitude}) -> {area_code:06}");
            }
        }
        Commands::Report {
            area_code,
            weather_code,
            temperature,
            pop,
            alert,
            disaster,
        } => {
            let client = WeatherClient::connect(proxy_addr, 4096, timeout, client_auth()).await?;
            let area: u32 = area_code.parse()?;
            let ack = client
                .send_report(area, weather_code, temperature, pop, &alert, &disaster)
                .await?;
            println!(
                "acknowledged: packet {} area {:06}",
                ack.packet_id(),
                ack.area_code()
            );
        }
    }
    Ok(())
}
