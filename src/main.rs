use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use beacon_core::config::ServerConfig;
use beacon_core::error::ServerError;

/// Local static-content server with live reload.
#[derive(Debug, Parser)]
#[command(name = "beacon", version, about)]
struct Cli {
    /// Directory to serve.
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Port to listen on.
    #[arg(short, long, env = "BEACON_PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "BEACON_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Maximum concurrent connections per client address.
    #[arg(long, env = "BEACON_MAX_CONNECTIONS_PER_KEY", default_value_t = 50)]
    max_connections_per_key: usize,

    /// Seconds of inactivity before a client's registry entry is reaped.
    #[arg(long, env = "BEACON_CONNECTION_TIMEOUT", default_value_t = 300)]
    connection_timeout: u64,

    /// Seconds between reaper sweeps.
    #[arg(long, env = "BEACON_CLEANUP_INTERVAL", default_value_t = 60)]
    cleanup_interval: u64,

    /// Serve without watching for file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ServerConfig {
        port: cli.port,
        bind: cli.bind,
        root_dir: cli.root,
        max_connections_per_key: cli.max_connections_per_key,
        connection_timeout: Duration::from_secs(cli.connection_timeout),
        cleanup_interval: Duration::from_secs(cli.cleanup_interval),
        watch: !cli.no_watch,
        ..ServerConfig::default()
    };

    let root = config.root_dir.clone();
    let handle = match beacon_server::start(config).await {
        Ok(handle) => handle,
        Err(ServerError::AddrInUse { addr }) => {
            tracing::error!(%addr, "Port already in use; stop the other process or pass --port");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            std::process::exit(1);
        }
    };

    tracing::info!(
        url = %format!("http://{}", handle.local_addr),
        root = %root.display(),
        live_reload = handle.live_reload_enabled(),
        "Serving"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
