//! Main entry point for the race room bot
//!
//! Runs the bot with the logging handler in every active room of a category
//! until SIGINT or SIGTERM, then closes all rooms gracefully.

use anyhow::Result;
use clap::Parser;
use racetime_bot::config::{validate_config, AppConfig};
use racetime_bot::handler::LoggingHandlerFactory;
use racetime_bot::service::{BotService, HealthCheck};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Racetime Bot - keeps a bot present in every active race room of a category
#[derive(Parser)]
#[command(
    name = "racetime-bot",
    version,
    about = "Keeps a bot connected to every active race room of a category",
    long_about = "Racetime Bot polls a race server for the active races of a category, keeps one \
                 WebSocket connection per race room with reconnect backoff and keepalive, and \
                 dispatches chat commands to a handler with rate-limited replies."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Category override
    #[arg(long, value_name = "SLUG", help = "Override the race category to watch")]
    category: Option<String>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config, list races and exit)
    #[arg(
        long,
        help = "Validate configuration, list active races and exit without joining rooms"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log service health until the service stops
async fn health_check_task(service: &BotService) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while service.is_running().await {
        interval.tick().await;

        match HealthCheck::check(service).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} rooms ({:?}), {} finished, {} failed",
                    health.status,
                    health.stats.active_rooms,
                    health.stats.rooms_by_status,
                    health.stats.rooms_finished,
                    health.stats.rooms_failed
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🏁 Racetime Bot {}", racetime_bot::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!(
        "   Server: {}://{}",
        if config.server.secure { "https" } else { "http" },
        config.server.host
    );
    info!("   Category: {}", config.server.category);
    info!(
        "   Authenticated: {}",
        config.server.access_token.is_some()
    );
    info!(
        "   Poll interval: {}s (grace {} polls)",
        config.discovery.poll_interval_seconds, config.discovery.grace_polls
    );
    info!(
        "   Max rooms: {}",
        config.service.max_concurrent_rooms
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration from file or environment and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(category) = &args.category {
        config.server.category = category.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

/// List what the bot would join, without connecting to any room
async fn dry_run(service: &BotService) -> Result<()> {
    let category = &service.config().server.category;
    let races = service.discovery().list_active(category).await?;

    info!("{} races listed in {}", races.len(), category);
    for race in races {
        if race.status.is_terminal() {
            info!("   {} ({}) - skipped", race.slug, race.status);
        } else {
            info!("   {} ({})", race.slug, race.status);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // CLI args override environment/config file
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    display_startup_banner(&config);

    let mut service = match BotService::new(config.clone(), Arc::new(LoggingHandlerFactory)) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize service: {}", e);
            std::process::exit(1);
        }
    };

    if args.dry_run {
        info!("Configuration validation successful");
        if let Err(e) = dry_run(&service).await {
            error!("Race discovery failed: {:#}", e);
            std::process::exit(1);
        }
        info!("Dry run completed - exiting without joining rooms");
        return Ok(());
    }

    info!("Starting service...");
    if let Err(e) = service.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("✅ Racetime Bot is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    tokio::select! {
        _ = wait_for_shutdown_signal() => {}
        _ = health_check_task(&service) => {
            warn!("Service stopped running unexpectedly");
        }
    }

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, service.shutdown()).await {
        Ok(Ok(())) => {
            info!("✅ Graceful shutdown completed successfully");
        }
        Ok(Err(e)) => {
            error!("Shutdown failed: {}", e);
        }
        Err(_) => {
            warn!("⚠️  Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("🛑 Racetime Bot stopped");
    Ok(())
}
