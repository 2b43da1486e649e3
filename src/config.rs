use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub ocsp_responder: OcspResponderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcspResponderConfig {
    /// `file:` URL naming a list of base64 DER responses. Takes the place of
    /// the database when set; used for long-lived root and intermediate
    /// responses.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Issuer certificates this responder answers for; requests and rows
    /// naming anyone else are refused.
    #[serde(default)]
    pub issuer_certs: Vec<PathBuf>,
    #[serde(default)]
    pub required_serial_prefixes: Vec<String>,
    pub listen_address: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u32,
    /// Per-request deadline in milliseconds; 0 disables it. Keep this
    /// slightly below the upstream's own timeout for requests to us.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default = "default_shutdown_stop_timeout")]
    pub shutdown_stop_timeout_ms: u64,
    /// Optional listener exposing /metrics.
    #[serde(default)]
    pub debug_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    pub url: String,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_max_age() -> u32 {
    43200
}

fn default_shutdown_stop_timeout() -> u64 {
    10_000
}

fn default_max_open_conns() -> u32 {
    10
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Config> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening config file {}", path.display()))?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

impl OcspResponderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms > 0 {
            Some(Duration::from_millis(self.timeout_ms))
        } else {
            None
        }
    }

    pub fn shutdown_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_stop_timeout_ms)
    }
}
