use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            workers: default_workers(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.bag".to_string()]
}
fn default_workers() -> usize {
    4
}
fn default_heartbeat_secs() -> u64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_geocoding_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_geocoding_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl GeocodingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_geocoding_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "bagcat".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.scan.workers == 0 {
        anyhow::bail!("scan.workers must be > 0");
    }
    if config.scan.heartbeat_secs == 0 {
        anyhow::bail!("scan.heartbeat_secs must be > 0");
    }
    if config.scan.include_globs.is_empty() {
        anyhow::bail!("scan.include_globs must not be empty");
    }

    match config.geocoding.provider.as_str() {
        "disabled" | "nominatim" => {}
        other => anyhow::bail!(
            "Unknown geocoding provider: '{}'. Must be disabled or nominatim.",
            other
        ),
    }
    if config.geocoding.is_enabled() && config.geocoding.timeout_secs == 0 {
        anyhow::bail!("geocoding.timeout_secs must be > 0");
    }

    Ok(())
}
