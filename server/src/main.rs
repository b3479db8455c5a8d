//! Taskdog server
//!
//! Serves the HTTP/WebSocket API described in §6: persists tasks in SQLite,
//! enforces the domain invariants in the `shared` crate, runs the
//! schedule-optimization strategies, and fans write events out to connected
//! WebSocket clients.
// This is the main entry point for the server application. It's responsible for:
// - Initializing logging and configuration.
// - Wiring together the repository, broadcaster, and controller.
// - Starting the HTTP server and handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod api;
mod broadcaster;
mod config;
mod controller;
mod optimization;
mod repository;

use broadcaster::Broadcaster;
use config::ConfigManager;
use controller::Controller;
use repository::TaskRepository;
use shared::time::{HolidayChecker, NoHolidays};

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "taskdog-server")]
#[command(about = "Personal task-management server with schedule optimization", long_about = None)]
struct CliArgs {
    /// Path to the configuration file, or a directory containing
    /// `taskdog.toml`. Written with defaults on first run if absent.
    #[arg(value_name = "CONFIG_FILE", default_value = "./taskdog.toml")]
    config_file: PathBuf,

    /// Directory the SQLite database lives in.
    #[arg(long = "data-dir", value_name = "DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Address the HTTP server listens on.
    #[arg(long = "listen-address", value_name = "ADDRESS", default_value = "127.0.0.1:8787")]
    listen_address: String,
}

/// Builds the holiday checker named by `region.country` in the loaded
/// config. Resolving a country code to an actual calendar is out of scope
/// (SPEC_FULL.md §4.16): any configured country still gets `NoHolidays`
/// today, but the seam exists for a future `FixedDateHolidaySet` lookup.
fn build_holiday_checker(country: Option<&str>) -> Arc<dyn HolidayChecker> {
    if let Some(country) = country {
        info!(country, "region configured but holiday calendars are not implemented, using no-holidays");
    }
    Arc::new(NoHolidays)
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "taskdog-server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("server=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!("taskdog server starting up");
    info!(config_file = %cli_args.config_file.display(), "configuration file");

    let config_manager = ConfigManager::new(cli_args.config_file).context("failed to load configuration")?;
    let app_config = config_manager.config().clone();

    let listen_address: SocketAddr = cli_args
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address '{}'", cli_args.listen_address))?;

    let repository = Arc::new(
        TaskRepository::new(&cli_args.data_dir).context("failed to open task repository")?,
    );
    repository.initialize().context("failed to initialize task repository")?;

    let broadcaster = Arc::new(Broadcaster::new());

    let holiday_checker = build_holiday_checker(app_config.region.country.as_deref());
    let default_start_time = chrono::NaiveTime::from_hms_opt(app_config.time.default_start_hour, 0, 0)
        .expect("validated config: default_start_hour is 0-23");
    let default_end_time = chrono::NaiveTime::from_hms_opt(app_config.time.default_end_hour, 0, 0)
        .expect("validated config: default_end_hour is 0-23");

    let controller = Arc::new(Controller::new(
        Arc::clone(&repository),
        Arc::clone(&broadcaster),
        holiday_checker,
        default_start_time,
        default_end_time,
    ));

    let app_state = api::AppState::new(controller, broadcaster);
    let app = api::create_router(app_state);

    info!(%listen_address, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| {
            format!(
                "failed to bind TCP listener to {listen_address}. \
                 Check if the port is already in use (EADDRINUSE) or requires elevated permissions (EACCES)."
            )
        })?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(setup_shutdown_signal())
        .await
    {
        error!("server error: {}", e);
        std::process::exit(1);
    }

    info!("server shutdown complete");
    Ok(())
}

/// Waits for SIGTERM or SIGINT (Ctrl+C on non-Unix), so in-flight requests
/// can finish via axum's graceful shutdown before the process exits.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("failed to register signal handlers: {}", e);
                error!("falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to wait for Ctrl+C: {}", e);
                } else {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to receive Ctrl+C signal: {}", e);
        } else {
            info!("received Ctrl+C");
        }
    }
}
