use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use broadcaster_server::config::{AppConfig, CliConfig, FileConfig};
use broadcaster_server::dispatch::{DispatchFacade, FacadeSettings};
use broadcaster_server::notifications::{
    ForwardOnlyTransitions, PermissiveTransitions, SqliteNotificationLedger, TransitionPolicy,
};
use broadcaster_server::push::{FcmTransport, PushDispatcher};
use broadcaster_server::server::sse::ConnectionRegistry;
use broadcaster_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use broadcaster_server::token_store::{spawn_token_sweeper, SqliteTokenStore, TokenStore};
use broadcaster_server::webhook::{IngestSettings, WebhookIngestor};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values take precedence over CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding tokens.db and notifications.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Seconds between keep-alive comments on SSE streams.
    #[clap(long, default_value_t = 15)]
    pub heartbeat_interval_secs: u64,

    /// Frames buffered per SSE connection before writes to it fail.
    #[clap(long, default_value_t = 32)]
    pub sse_channel_capacity: usize,

    /// Days a push token may stay unused before it is swept.
    #[clap(long, default_value_t = 90)]
    pub token_retention_days: u64,

    /// Interval in hours between token sweeps. Set to 0 to disable sweeping.
    #[clap(long, default_value_t = 24)]
    pub token_sweep_interval_hours: u64,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            heartbeat_interval_secs: args.heartbeat_interval_secs,
            sse_channel_capacity: args.sse_channel_capacity,
            token_retention_days: args.token_retention_days,
            token_sweep_interval_hours: args.token_sweep_interval_hours,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!(
        "  delivery: sse={} push={}",
        app_config.delivery.sse_enabled, app_config.delivery.push_enabled
    );

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening token store at {:?}", app_config.tokens_db_path());
    let token_store = Arc::new(SqliteTokenStore::new(app_config.tokens_db_path())?);

    let policy: Box<dyn TransitionPolicy> = if app_config.ledger.strict_transitions {
        info!("Notification status transitions are forward-only");
        Box::new(ForwardOnlyTransitions)
    } else {
        Box::new(PermissiveTransitions)
    };
    info!(
        "Opening notification ledger at {:?}",
        app_config.notifications_db_path()
    );
    let ledger = Arc::new(SqliteNotificationLedger::with_policy(
        app_config.notifications_db_path(),
        policy,
    )?);

    let dispatcher = match (&app_config.fcm, app_config.delivery.push_enabled) {
        (Some(fcm), true) => {
            info!("Push delivery through FCM project {}", fcm.project_id);
            let transport = FcmTransport::new(fcm.clone())?;
            Some(Arc::new(PushDispatcher::new(Arc::new(transport))))
        }
        _ => {
            warn!("Push delivery disabled");
            None
        }
    };

    let registry = Arc::new(ConnectionRegistry::new(app_config.sse_channel_capacity));

    let facade = Arc::new(DispatchFacade::new(
        token_store.clone(),
        ledger.clone(),
        dispatcher.clone(),
        FacadeSettings {
            default_days_back: app_config.ledger.default_days_back,
        },
    ));

    let ingestor = Arc::new(WebhookIngestor::new(
        registry.clone(),
        ledger,
        token_store.clone(),
        dispatcher,
        IngestSettings {
            sse_enabled: app_config.delivery.sse_enabled,
            default_system_id: app_config.webhook_system_id.clone(),
            dedupe: app_config.dedupe_webhooks,
        },
    ));

    let shutdown_token = CancellationToken::new();
    if app_config.tokens.sweep_interval_hours > 0 {
        info!(
            "Token sweep enabled: retaining {} days, sweeping every {} hours",
            app_config.tokens.retention_days, app_config.tokens.sweep_interval_hours
        );
        spawn_token_sweeper(
            token_store as Arc<dyn TokenStore>,
            app_config.tokens.retention_days,
            Duration::from_secs(app_config.tokens.sweep_interval_hours * 60 * 60),
            shutdown_token.clone(),
        );
    }

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
        heartbeat_interval: app_config.heartbeat_interval,
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    tokio::select! {
        result = run_server(server_config, registry, facade, ingestor) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            shutdown_token.cancel();
            Ok(())
        }
    }
}
