use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub heartbeat_interval_secs: Option<u64>,
    pub sse_channel_capacity: Option<usize>,
    pub webhook_system_id: Option<String>,
    pub dedupe_webhooks: Option<bool>,

    // Feature configs
    pub delivery: Option<DeliveryConfig>,
    pub fcm: Option<FcmConfig>,
    pub tokens: Option<TokensConfig>,
    pub ledger: Option<LedgerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    pub sse_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FcmConfig {
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    /// Name of the env var holding the access token.
    pub access_token_env: Option<String>,
    pub timeout_sec: Option<u64>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TokensConfig {
    pub retention_days: Option<u64>,
    pub sweep_interval_hours: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub strict_transitions: Option<bool>,
    pub default_days_back: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
