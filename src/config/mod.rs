mod file_config;

pub use file_config::{DeliveryConfig, FcmConfig, FileConfig, LedgerConfig, TokensConfig};

use crate::push::{FcmSettings, DEFAULT_FCM_ENDPOINT};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WEBHOOK_SYSTEM_ID: &str = "webhook";
const DEFAULT_FCM_TIMEOUT_SEC: u64 = 10;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub heartbeat_interval_secs: u64,
    pub sse_channel_capacity: usize,
    pub token_retention_days: u64,
    pub token_sweep_interval_hours: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            port: 8080,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            heartbeat_interval_secs: 15,
            sse_channel_capacity: 32,
            token_retention_days: 90,
            token_sweep_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub heartbeat_interval: Duration,
    pub sse_channel_capacity: usize,
    pub webhook_system_id: String,
    pub dedupe_webhooks: bool,

    // Feature configs (with defaults)
    pub delivery: DeliverySettings,
    pub fcm: Option<FcmSettings>,
    pub tokens: TokenMaintenanceSettings,
    pub ledger: LedgerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub sse_enabled: bool,
    pub push_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMaintenanceSettings {
    /// Tokens unused for longer than this are swept.
    pub retention_days: u64,
    /// 0 disables the sweep.
    pub sweep_interval_hours: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub strict_transitions: bool,
    pub default_days_back: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            strict_transitions: false,
            default_days_back: 30,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = match file.logging_level {
            Some(level) => parse_logging_level(&level)
                .ok_or_else(|| anyhow::anyhow!("Unknown logging_level: {}", level))?,
            None => cli.logging_level.clone(),
        };

        let heartbeat_interval_secs = file
            .heartbeat_interval_secs
            .unwrap_or(cli.heartbeat_interval_secs);
        if heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be at least 1");
        }

        let sse_channel_capacity = file
            .sse_channel_capacity
            .unwrap_or(cli.sse_channel_capacity);
        if sse_channel_capacity == 0 {
            bail!("sse_channel_capacity must be at least 1");
        }

        let fcm = file.fcm.map(resolve_fcm).transpose()?;

        let delivery_file = file.delivery.unwrap_or_default();
        let delivery = DeliverySettings {
            sse_enabled: delivery_file.sse_enabled.unwrap_or(true),
            push_enabled: delivery_file.push_enabled.unwrap_or(fcm.is_some()),
        };
        if delivery.push_enabled && fcm.is_none() {
            bail!("Push delivery is enabled but no [fcm] section is configured");
        }

        let tokens_file = file.tokens.unwrap_or_default();
        let tokens = TokenMaintenanceSettings {
            retention_days: tokens_file
                .retention_days
                .unwrap_or(cli.token_retention_days),
            sweep_interval_hours: tokens_file
                .sweep_interval_hours
                .unwrap_or(cli.token_sweep_interval_hours),
        };

        let ledger_file = file.ledger.unwrap_or_default();
        let ledger_defaults = LedgerSettings::default();
        let ledger = LedgerSettings {
            strict_transitions: ledger_file
                .strict_transitions
                .unwrap_or(ledger_defaults.strict_transitions),
            default_days_back: ledger_file
                .default_days_back
                .unwrap_or(ledger_defaults.default_days_back),
        };

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
            sse_channel_capacity,
            webhook_system_id: file
                .webhook_system_id
                .unwrap_or_else(|| DEFAULT_WEBHOOK_SYSTEM_ID.to_string()),
            dedupe_webhooks: file.dedupe_webhooks.unwrap_or(true),
            delivery,
            fcm,
            tokens,
            ledger,
        })
    }

    pub fn tokens_db_path(&self) -> PathBuf {
        self.db_dir.join("tokens.db")
    }

    pub fn notifications_db_path(&self) -> PathBuf {
        self.db_dir.join("notifications.db")
    }
}

fn resolve_fcm(fcm: FcmConfig) -> Result<FcmSettings> {
    let project_id = fcm
        .project_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("[fcm] project_id is required"))?;

    let access_token = match (fcm.access_token, fcm.access_token_env) {
        (Some(token), _) => token,
        (None, Some(var)) => std::env::var(&var)
            .with_context(|| format!("FCM access token env var {} is not set", var))?,
        (None, None) => bail!("[fcm] needs access_token or access_token_env"),
    };

    Ok(FcmSettings {
        project_id,
        access_token,
        endpoint: fcm
            .endpoint
            .unwrap_or_else(|| DEFAULT_FCM_ENDPOINT.to_string()),
        timeout_sec: fcm.timeout_sec.unwrap_or(DEFAULT_FCM_TIMEOUT_SEC),
    })
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_dir(temp_dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("BODY"),
            Some(RequestsLoggingLevel::Body)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_dir(&temp_dir), None).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.sse_channel_capacity, 32);
        assert_eq!(config.webhook_system_id, "webhook");
        assert!(config.dedupe_webhooks);
        assert_eq!(
            config.delivery,
            DeliverySettings {
                sse_enabled: true,
                push_enabled: false,
            }
        );
        assert!(config.fcm.is_none());
        assert_eq!(config.tokens.retention_days, 90);
        assert_eq!(config.tokens.sweep_interval_hours, 24);
        assert_eq!(config.ledger, LedgerSettings::default());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            port: 3001,
            ..Default::default()
        };
        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            port: Some(4000),
            logging_level: Some("headers".to_string()),
            heartbeat_interval_secs: Some(5),
            ledger: Some(LedgerConfig {
                strict_transitions: Some(true),
                default_days_back: None,
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert!(config.ledger.strict_transitions);
        assert_eq!(config.ledger.default_days_back, 30);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9091);
    }

    #[test]
    fn test_fcm_section_enables_push() {
        let temp_dir = TempDir::new().unwrap();
        let file_config = FileConfig {
            fcm: Some(FcmConfig {
                project_id: Some("proj".to_string()),
                access_token: Some("secret".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_with_dir(&temp_dir), Some(file_config)).unwrap();

        assert!(config.delivery.push_enabled);
        let fcm = config.fcm.unwrap();
        assert_eq!(fcm.project_id, "proj");
        assert_eq!(fcm.access_token, "secret");
        assert_eq!(fcm.endpoint, DEFAULT_FCM_ENDPOINT);
        assert_eq!(fcm.timeout_sec, 10);
    }

    #[test]
    fn test_push_without_fcm_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file_config = FileConfig {
            delivery: Some(DeliveryConfig {
                sse_enabled: None,
                push_enabled: Some(true),
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli_with_dir(&temp_dir), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("no [fcm] section"));
    }

    #[test]
    fn test_fcm_without_token_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file_config = FileConfig {
            fcm: Some(FcmConfig {
                project_id: Some("proj".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli_with_dir(&temp_dir), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("access_token"));
    }

    #[test]
    fn test_zero_heartbeat_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            heartbeat_interval_secs: 0,
            ..cli_with_dir(&temp_dir)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_dir(&temp_dir), None).unwrap();

        assert_eq!(config.tokens_db_path(), temp_dir.path().join("tokens.db"));
        assert_eq!(
            config.notifications_db_path(),
            temp_dir.path().join("notifications.db")
        );
    }
}
