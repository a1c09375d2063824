//! Per-server configuration.
//!
//! Resolution order: role defaults, then an optional TOML file, then
//! uppercase environment variables, then explicit setter calls by the
//! constructor. Backend address keys deliberately share their env names
//! with the backend's own bind settings (`LOCATION_SERVER_HOST` is both the
//! location server's host and the proxy's forwarding target), so one
//! deployment sets each address exactly once.

use std::env;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{AuthConfig, HashAlgorithm};

/// Which of the four servers a config describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Weather,
    Location,
    Query,
    Report,
}

impl ServerRole {
    pub fn name(self) -> &'static str {
        match self {
            ServerRole::Weather => "weather_server",
            ServerRole::Location => "location_server",
            ServerRole::Query => "query_server",
            ServerRole::Report => "report_server",
        }
    }

    pub fn env_prefix(self) -> &'static str {
        match self {
            ServerRole::Weather => "WEATHER_SERVER",
            ServerRole::Location => "LOCATION_SERVER",
            ServerRole::Query => "QUERY_SERVER",
            ServerRole::Report => "REPORT_SERVER",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServerRole::Weather => 4110,
            ServerRole::Location => 4109,
            ServerRole::Query => 4111,
            ServerRole::Report => 4112,
        }
    }

    /// Auth packet-type subset each role protects by default.
    pub fn default_auth_types(self) -> Vec<u8> {
        vec![4, 5]
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config file error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// A backend address: host plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub role: ServerRole,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub max_workers: usize,
    pub protocol_version: u8,

    pub auth_enabled: bool,
    pub passphrase: Option<String>,
    pub hash_algorithm: HashAlgorithm,
    pub auth_packet_types: Vec<u8>,

    pub coordinate_cache_ttl: Duration,
    pub weather_cache_ttl: Duration,
    pub disaster_alert_cache_min: u64,

    pub location_server: Endpoint,
    pub query_server: Endpoint,
    pub report_server: Endpoint,

    pub udp_buffer_size: usize,
    pub response_timeout: Duration,

    pub weather_update_time: String,
    pub skip_area_check_interval_minutes: u64,
}

impl ServerConfig {
    pub fn defaults(role: ServerRole) -> Self {
        Self {
            role,
            host: "0.0.0.0".to_string(),
            port: role.default_port(),
            debug: false,
            max_workers: 8,
            protocol_version: 1,
            auth_enabled: false,
            passphrase: None,
            hash_algorithm: HashAlgorithm::default(),
            auth_packet_types: role.default_auth_types(),
            coordinate_cache_ttl: Duration::from_secs(7 * 24 * 3600),
            weather_cache_ttl: Duration::from_secs(600),
            disaster_alert_cache_min: 1440,
            location_server: Endpoint::new("127.0.0.1", ServerRole::Location.default_port()),
            query_server: Endpoint::new("127.0.0.1", ServerRole::Query.default_port()),
            report_server: Endpoint::new("127.0.0.1", ServerRole::Report.default_port()),
            udp_buffer_size: 4096,
            response_timeout: Duration::from_millis(10_000),
            weather_update_time: "03:00".to_string(),
            skip_area_check_interval_minutes: 10,
        }
    }

    /// Defaults, file (when given), then environment.
    pub fn load(role: ServerRole, file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(role);
        if let Some(path) = file {
            let raw = std::fs::read_to_string(path)?;
            let overlay: FileConfig = toml::from_str(&raw)?;
            overlay.apply(&mut config)?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            enabled: self.auth_enabled,
            passphrase: self.passphrase.clone(),
            target_packet_types: self.auth_packet_types.iter().copied().collect(),
            algorithm: self.hash_algorithm,
        }
    }

    /// The configured "HH:MM" list for the daily weather refresh.
    pub fn update_times(&self) -> Vec<(u32, u32)> {
        self.weather_update_time
            .split(',')
            .filter_map(|entry| {
                let (h, m) = entry.trim().split_once(':')?;
                let hour: u32 = h.parse().ok()?;
                let minute: u32 = m.parse().ok()?;
                (hour < 24 && minute < 60).then_some((hour, minute))
            })
            .collect()
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        let prefix = self.role.env_prefix();

        if let Some(host) = env_str(&format!("{prefix}_HOST")) {
            self.host = host;
        }
        if let Some(port) = env_parse(&format!("{prefix}_PORT"))? {
            self.port = port;
        }
        if let Some(debug) = env_bool(&format!("{prefix}_DEBUG")) {
            self.debug = debug;
        }
        if let Some(workers) = env_parse(&format!("{prefix}_MAX_WORKERS"))? {
            self.max_workers = workers;
        }
        if let Some(version) = env_parse("PROTOCOL_VERSION")? {
            self.protocol_version = version;
        }

        if let Some(enabled) = env_bool(&format!("{prefix}_AUTH_ENABLED")) {
            self.auth_enabled = enabled;
        }
        if let Some(passphrase) = env_str(&format!("{prefix}_PASSPHRASE")) {
            self.passphrase = Some(passphrase);
        }
        if let Some(name) = env_str("HASH_ALGORITHM") {
            self.hash_algorithm = name
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("{e}")))?;
        }

        if let Some(secs) = env_parse::<u64>("COORDINATE_CACHE_TTL")? {
            self.coordinate_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("WEATHER_CACHE_TTL")? {
            self.weather_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(min) = env_parse("DISASTER_ALERT_CACHE_MIN")? {
            self.disaster_alert_cache_min = min;
        }

        for (endpoint, key) in [
            (&mut self.location_server, "LOCATION_SERVER"),
            (&mut self.query_server, "QUERY_SERVER"),
            (&mut self.report_server, "REPORT_SERVER"),
        ] {
            if let Some(host) = env_str(&format!("{key}_HOST")) {
                endpoint.host = host;
            }
            if let Some(port) = env_parse(&format!("{key}_PORT"))? {
                endpoint.port = port;
            }
        }

        if let Some(size) = env_parse("UDP_BUFFER_SIZE")? {
            self.udp_buffer_size = size;
        }
        if let Some(ms) = env_parse::<u64>("RESPONSE_TIMEOUT_MS")? {
            self.response_timeout = Duration::from_millis(ms);
        }
        if let Some(times) = env_str("WEATHER_UPDATE_TIME") {
            self.weather_update_time = times;
        }
        if let Some(minutes) = env_parse("SKIP_AREA_CHECK_INTERVAL_MINUTES")? {
            self.skip_area_check_interval_minutes = minutes;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.udp_buffer_size < 32 {
            return Err(ConfigError::Invalid(
                "udp_buffer_size below the minimum packet size".into(),
            ));
        }
        self.auth_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.role == ServerRole::Query && self.update_times().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "weather_update_time '{}' holds no valid HH:MM entries",
                self.weather_update_time
            )));
        }
        Ok(())
    }
}

/// TOML overlay: every key optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    debug: Option<bool>,
    max_workers: Option<usize>,
    protocol_version: Option<u8>,
    auth_enabled: Option<bool>,
    passphrase: Option<String>,
    hash_algorithm: Option<String>,
    auth_packet_types: Option<Vec<u8>>,
    coordinate_cache_ttl: Option<u64>,
    weather_cache_ttl: Option<u64>,
    disaster_alert_cache_min: Option<u64>,
    location_server_host: Option<String>,
    location_server_port: Option<u16>,
    query_server_host: Option<String>,
    query_server_port: Option<u16>,
    report_server_host: Option<String>,
    report_server_port: Option<u16>,
    udp_buffer_size: Option<usize>,
    response_timeout_ms: Option<u64>,
    weather_update_time: Option<String>,
    skip_area_check_interval_minutes: Option<u64>,
}

impl FileConfig {
    fn apply(self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(v) = self.host {
            config.host = v;
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        if let Some(v) = self.debug {
            config.debug = v;
        }
        if let Some(v) = self.max_workers {
            config.max_workers = v;
        }
        if let Some(v) = self.protocol_version {
            config.protocol_version = v;
        }
        if let Some(v) = self.auth_enabled {
            config.auth_enabled = v;
        }
        if let Some(v) = self.passphrase {
            config.passphrase = Some(v);
        }
        if let Some(v) = self.hash_algorithm {
            config.hash_algorithm = v
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("{e}")))?;
        }
        if let Some(v) = self.auth_packet_types {
            config.auth_packet_types = v;
        }
        if let Some(v) = self.coordinate_cache_ttl {
            config.coordinate_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.weather_cache_ttl {
            config.weather_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.disaster_alert_cache_min {
            config.disaster_alert_cache_min = v;
        }
        if let Some(v) = self.location_server_host {
            config.location_server.host = v;
        }
        if let Some(v) = self.location_server_port {
            config.location_server.port = v;
        }
        if let Some(v) = self.query_server_host {
            config.query_server.host = v;
        }
        if let Some(v) = self.query_server_port {
            config.query_server.port = v;
        }
        if let Some(v) = self.report_server_host {
            config.report_server.host = v;
        }
        if let Some(v) = self.report_server_port {
            config.report_server.port = v;
        }
        if let Some(v) = self.udp_buffer_size {
            config.udp_buffer_size = v;
        }
        if let Some(v) = self.response_timeout_ms {
            config.response_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.weather_update_time {
            config.weather_update_time = v;
        }
        if let Some(v) = self.skip_area_check_interval_minutes {
            config.skip_area_check_interval_minutes = v;
        }
        Ok(())
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_str(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("cannot parse env {key}={raw}"))),
        None => Ok(None),
    }
}
