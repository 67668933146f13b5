use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::{default_ports, Algorithm, PortEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub rewrite: RewriteConfig,
    pub recording: RecordingConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub api: ApiConfig,
    /// Listen port routing table. One listener is bound per entry.
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listeners bind on (default: 0.0.0.0)
    pub bind: IpAddr,
    /// Idle timeout for either side of a session; zero disables
    pub idle_timeout: Duration,
    /// Maximum buffered length of a single protocol line
    pub max_line_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream endpoint for SHA256 ports (host:port)
    pub sha256: String,
    /// Upstream endpoint for Scrypt ports (host:port)
    pub scrypt: String,
    /// Account every downstream worker is attributed to upstream
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// When true, authorize/submit are rewritten to
    /// `<username>.<client worker label>` instead of the bare account, so
    /// the upstream pool sees per-worker attribution.
    pub compose_worker: bool,
}

/// Which difficulty value a share record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultySource {
    /// The session difficulty last announced by the upstream.
    Upstream,
    /// The listen port's configured nominal difficulty.
    Nominal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub sha256: DifficultySource,
    /// The Scrypt upstream is known to report inflated difficulties, so the
    /// port's nominal value is the default here.
    pub scrypt: DifficultySource,
}

impl RecordingConfig {
    pub fn source_for(&self, algorithm: Algorithm) -> DifficultySource {
        match algorithm {
            Algorithm::Sha256 => self.sha256,
            Algorithm::Scrypt => self.scrypt,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Miningcore database receiving raw share rows
    pub shares_url: Option<String>,
    /// Proxy stats database receiving heartbeats and worker aggregates
    pub stats_url: Option<String>,
}

impl DatabaseConfig {
    pub fn any(&self) -> bool {
        self.shares_url.is_some() || self.stats_url.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pool API serving block heights and network difficulties
    pub pool_api_url: String,
    pub interval: Duration,
    /// Pool id whose network data stands in when a pool has none
    pub fallback_pool: String,
    /// Heartbeat cadence toward the stats database
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            idle_timeout: Duration::from_secs(600),
            max_line_length: crate::protocol::codec::DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            sha256: "bch.viabtc.io:3333".to_string(),
            scrypt: "ltc.poolbinance.com:3333".to_string(),
            username: "imskaa.001".to_string(),
            password: "123".to_string(),
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            compose_worker: false,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sha256: DifficultySource::Upstream,
            scrypt: DifficultySource::Nominal,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pool_api_url: "https://api.ourpool.xyz/api/pools".to_string(),
            interval: Duration::from_secs(30),
            fallback_pool: "btc".to_string(),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3344".parse().unwrap(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            rewrite: RewriteConfig::default(),
            recording: RecordingConfig::default(),
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            api: ApiConfig::default(),
            ports: default_ports(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::error::ConfigError::Io)?;
        let mut config: Config =
            toml::from_str(&content).map_err(crate::error::ConfigError::Parse)?;
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides for deploy-time secrets and endpoints. These
    /// follow the variable names the cluster's process supervisor exports.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("UPSTREAM_HOST") {
            let port = std::env::var("UPSTREAM_PORT").unwrap_or_else(|_| "3333".to_string());
            self.upstream.sha256 = format!("{host}:{port}");
        }
        if let Ok(host) = std::env::var("UPSTREAM_HOST_SCRYPT") {
            let port =
                std::env::var("UPSTREAM_PORT_SCRYPT").unwrap_or_else(|_| "3333".to_string());
            self.upstream.scrypt = format!("{host}:{port}");
        }
        if let Ok(user) = std::env::var("UPSTREAM_USER") {
            self.upstream.username = user;
        }
        if let Ok(pass) = std::env::var("UPSTREAM_PASS") {
            self.upstream.password = pass;
        }
        if let Ok(url) = std::env::var("MININGCORE_DB_URL") {
            self.database.shares_url = Some(url);
        }
        if let Ok(url) = std::env::var("PROXY_DB_URL") {
            self.database.stats_url = Some(url);
        }
        if let Ok(url) = std::env::var("POOL_API_URL") {
            self.sync.pool_api_url = url;
        }
    }

    /// Upstream endpoint for the given algorithm.
    pub fn upstream_endpoint(&self, algorithm: Algorithm) -> &str {
        match algorithm {
            Algorithm::Sha256 => &self.upstream.sha256,
            Algorithm::Scrypt => &self.upstream.scrypt,
        }
    }

    /// The identity written into outgoing authorize/submit params for a
    /// session whose client declared `label`.
    pub fn upstream_identity(&self, label: &str) -> String {
        if self.rewrite.compose_worker && label != crate::protocol::messages::UNKNOWN_WORKER {
            format!("{}.{}", self.upstream.username, label)
        } else {
            self.upstream.username.clone()
        }
    }
}
