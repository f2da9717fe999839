//! Main entry point for the rendezvous pairing service
//!
//! Runs one pairing pool per enabled session category, reading JSON-lines
//! commands from stdin and writing notifications to stdout, with graceful
//! shutdown on Ctrl+C or SIGTERM.

use anyhow::Result;
use clap::Parser;
use rendezvous::config::{parse_pool_list, validate_config, AppConfig};
use rendezvous::service::{AppState, HealthCheck, HealthStatus};
use rendezvous::transport::{spawn_writer, LineRouter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

/// Rendezvous - anonymous one-to-one pairing engine
#[derive(Parser)]
#[command(
    name = "rendezvous",
    version,
    about = "Anonymous one-to-one pairing for text, audio and video sessions",
    long_about = "Rendezvous pairs waiting participants by gender and affiliation preferences, \
                 relaxing the filters the longer they wait. Commands are read as JSON lines from \
                 stdin and notifications are written as JSON lines to stdout."
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

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Cycle interval override
    #[arg(long, value_name = "MS", help = "Override matchmaking cycle interval")]
    cycle_interval_ms: Option<u64>,

    /// Pool list override
    #[arg(
        long,
        value_name = "POOLS",
        help = "Comma separated pools to run (text, audio, video)"
    )]
    pools: Option<String>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
///
/// Logs go to stderr; stdout carries the notification stream.
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config).await?;

    match HealthCheck::check(&app_state).await {
        Ok(health) => {
            eprintln!("Health Check: {}", health.status);
            for check in &health.checks {
                eprintln!("  {}: {}", check.name, check.status);
            }
            eprintln!("  Participants Online: {}", health.stats.participants_online);
            eprintln!("  Participants Waiting: {}", health.stats.participants_waiting);
            eprintln!("  Active Sessions: {}", health.stats.active_sessions);
            eprintln!("  Uptime: {}", health.stats.uptime_info);

            if health.status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
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
            Ok(mut stream) => {
                stream.recv().await;
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

/// Log a health summary periodically
async fn health_check_task(app_state: Arc<RwLock<AppState>>) {
    let period = app_state.read().await.config().health_log_interval();
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        let state = app_state.read().await;
        if !state.is_running().await {
            break;
        }

        match HealthCheck::check(&state).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} online, {} waiting, {} sessions, {} pairings",
                    health.status,
                    health.stats.participants_online,
                    health.stats.participants_waiting,
                    health.stats.active_sessions,
                    health.stats.pairings_total
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
    let policy = config.matchmaking.filter_policy();
    info!("🚀 Rendezvous Pairing Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Pools: {:?}", config.matchmaking.enabled_pools);
    info!(
        "   Filter levels: {:?} / {:?} / {:?}",
        policy.level_1_timeout, policy.level_2_timeout, policy.level_3_timeout
    );
    info!("   Max wait time: {:?}", policy.max_queue_time);
    info!("   Cycle interval: {:?}", config.matchmaking.cycle_interval());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
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

    if let Some(interval) = args.cycle_interval_ms {
        config.matchmaking.cycle_interval_ms = interval;
    }

    if let Some(pools) = &args.pools {
        config.matchmaking.enabled_pools = parse_pool_list(pools)?;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    // Wire stdin/stdout to the pools
    let (sender, receiver) = mpsc::unbounded_channel();
    let writer_task = spawn_writer(receiver, tokio::io::stdout());
    let router = Arc::new(LineRouter::new(app_state.managers().clone(), sender));
    let reader_task = {
        let router = router.clone();
        tokio::spawn(async move { router.run(BufReader::new(tokio::io::stdin())).await })
    };

    let app_state = Arc::new(RwLock::new(app_state));
    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("✅ Rendezvous Pairing Service is running");
    info!("Reading commands from stdin, press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    health_task.abort();
    reader_task.abort();

    let shutdown_timeout = config.shutdown_timeout();
    let shutdown_future = async {
        let mut state = app_state.write().await;
        state.shutdown().await
    };

    match tokio::time::timeout(shutdown_timeout, shutdown_future).await {
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

    drop(router);
    writer_task.abort();

    info!("🛑 Rendezvous Pairing Service stopped");
    Ok(())
}
