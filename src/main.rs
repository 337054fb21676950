use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livecast::config::{ConfigStore, EngineCredentials, TransportKind};
use livecast::directory::SessionDirectory;
use livecast::events::EventBus;
use livecast::state::AppState;
use livecast::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// livecast command line arguments
#[derive(Parser, Debug)]
#[command(name = "livecast")]
#[command(version, about = "Live broadcast session directory and signaling server", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory path (default: /var/lib/livecast)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Transport clients should use (mesh, managed)
    #[arg(long, value_name = "KIND")]
    transport: Option<TransportKind>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting livecast v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let db_path = data_dir.join("livecast.db");
    let config_store = ConfigStore::new(&db_path).await?;

    // Persist CLI overrides so later restarts keep them
    if args.address.is_some() || args.port.is_some() || args.transport.is_some() {
        config_store
            .update(|config| {
                if let Some(address) = &args.address {
                    config.web.bind_address = address.clone();
                }
                if let Some(port) = args.port {
                    config.web.http_port = port;
                }
                if let Some(kind) = args.transport {
                    config.transport.kind = kind;
                }
            })
            .await?;
    }

    let config = config_store.get();
    let transport = config.transport.kind;
    tracing::info!("Transport: {}", transport);

    if transport == TransportKind::Managed {
        // Fail at startup rather than on the first go-live
        EngineCredentials::from_env().validate()?;
    }

    let events = Arc::new(EventBus::new());
    let directory = SessionDirectory::new(config_store.pool().clone())
        .await?
        .with_events(events.clone());
    tracing::info!(
        "Session directory ready ({} live)",
        directory.live_count().await?
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = AppState::new(
        config_store.clone(),
        directory,
        events,
        shutdown_tx.clone(),
        transport,
        data_dir,
    );

    let cleanup_task = state.spawn_directory_cleanup();

    let app = web::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let server = async move { axum::serve(listener, app).await };

    tokio::select! {
        _ = shutdown_signal => {}
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(task) = cleanup_task {
        let _ = task.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "livecast=error,tower_http=error",
        LogLevel::Warn => "livecast=warn,tower_http=warn",
        LogLevel::Info => "livecast=info,tower_http=info",
        LogLevel::Verbose => "livecast=debug,tower_http=info",
        LogLevel::Debug => "livecast=debug,tower_http=debug",
        LogLevel::Trace => "livecast=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("LIVECAST_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/var/lib/livecast")
}
