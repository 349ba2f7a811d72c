mod handlers;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use atlas_exporter_core::client::{
    AtlasClient, DEFAULT_BASE_URL, DEFAULT_GRANULARITY, DEFAULT_PERIOD, MeasurementWindow,
};
use atlas_exporter_core::metrics::ExporterMetrics;

use state::AppState;

// ============================================================
// CLI
// ============================================================

#[derive(Parser, Debug)]
#[command(
    name = "atlas-exporter",
    about = "Prometheus exporter for the MongoDB Atlas API",
    version = atlas_exporter_core::VERSION
)]
struct Args {
    /// Atlas API public key.
    #[arg(long = "atlas.api-public-key", env = "ATLAS_PUBLIC_KEY", hide_env_values = true)]
    public_key: String,

    /// Atlas API private key.
    #[arg(long = "atlas.api-private-key", env = "ATLAS_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Atlas project (group) id to collect.
    #[arg(long = "atlas.project", env = "ATLAS_PROJECT_ID")]
    project_id: String,

    /// Atlas API base URL.
    #[arg(long = "atlas.base-url", env = "ATLAS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Measurement granularity (ISO 8601 duration).
    #[arg(long = "atlas.granularity", default_value = DEFAULT_GRANULARITY)]
    granularity: String,

    /// Measurement period (ISO 8601 duration).
    #[arg(long = "atlas.period", default_value = DEFAULT_PERIOD)]
    period: String,

    /// Address to listen on.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9139")]
    listen_address: String,

    /// Path that triggers a collection.
    #[arg(long = "web.scrape-path", default_value = "/scrape")]
    scrape_path: String,

    /// Path exposing the exporter's own metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Only log messages with the given severity or above.
    #[arg(long = "log.level", value_enum, default_value_t = LogLevel::Error)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

// ============================================================
// Validation
// ============================================================

#[derive(Debug, PartialEq)]
enum ConfigError {
    ListenAddress { value: String, message: String },
    Path { flag: &'static str, value: String },
    DuplicatePath(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ListenAddress { value, message } => {
                write!(f, "invalid listen address '{}': {}", value, message)
            }
            ConfigError::Path { flag, value } => write!(
                f,
                "invalid {} '{}': must start with '/', must not be '/' and must not contain braces",
                flag, value
            ),
            ConfigError::DuplicatePath(path) => {
                write!(f, "scrape and telemetry paths must differ, both are '{}'", path)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn validate_path(flag: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = value.starts_with('/') && value != "/" && !value.contains(['{', '}']);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Path {
            flag,
            value: value.to_string(),
        })
    }
}

/// Checks the web flags and returns the parsed listen address.
fn validate(args: &Args) -> Result<SocketAddr, ConfigError> {
    validate_path("--web.scrape-path", &args.scrape_path)?;
    validate_path("--web.telemetry-path", &args.telemetry_path)?;
    if args.scrape_path == args.telemetry_path {
        return Err(ConfigError::DuplicatePath(args.scrape_path.clone()));
    }

    args.listen_address
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::ListenAddress {
            value: args.listen_address.clone(),
            message: e.to_string(),
        })
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.log_level);

    let addr = match validate(&args) {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(message) = runtime.block_on(async_main(args, addr)) {
        error!("{}", message);
        process::exit(1);
    }
}

async fn async_main(args: Args, addr: SocketAddr) -> Result<(), String> {
    info!(version = atlas_exporter_core::VERSION, project = %args.project_id, "starting");

    let client = AtlasClient::new(&args.base_url, args.public_key, args.private_key)
        .map_err(|e| format!("failed to create Atlas client: {}", e))?;

    let revision = option_env!("ATLAS_EXPORTER_REVISION").unwrap_or("unknown");
    let metrics = ExporterMetrics::new(revision)
        .map_err(|e| format!("failed to register exporter metrics: {}", e))?;

    let state = AppState {
        client: Arc::new(client),
        project_id: args.project_id,
        window: MeasurementWindow::new(args.granularity, args.period),
        metrics,
        scrape_path: args.scrape_path,
        telemetry_path: args.telemetry_path,
    };
    info!(
        scrape_path = %state.scrape_path,
        telemetry_path = %state.telemetry_path,
        granularity = %state.window.granularity,
        period = %state.window.period,
        "configured"
    );

    let app = handlers::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {}: {}", addr, e))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {}", e))?;

    info!("stopped");
    Ok(())
}

/// Resolves on Ctrl+C, and on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` adds to the directives for
/// this crate and the core library.
fn init_logging(level: LogLevel) {
    let level = Level::from(level);
    let mut filter = EnvFilter::from_default_env();
    for target in ["atlas_exporter", "atlas_exporter_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
