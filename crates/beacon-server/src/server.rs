//! Server assembly: router, background tasks, startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use beacon_core::config::ServerConfig;
use beacon_core::error::ServerError;

use crate::dispatch::{events_handler, health_handler, static_handler};
use crate::hub::SubscriberHub;
use crate::reaper::spawn_reaper;
use crate::registry::ConnectionRegistry;
use crate::watcher::{ChangeWatcher, WatcherConfig, WatcherHandle};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<SubscriberHub>,
    pub root_dir: Arc<PathBuf>,
    pub keepalive_interval: Duration,
    pub watch_enabled: bool,
}

/// Build the router with all routes and layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .fallback(get(static_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive and exposes the broadcast trigger.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    if config.max_connections_per_key == 0 {
        return Err(ServerError::InvalidConfig(
            "max_connections_per_key must admit at least one connection".into(),
        ));
    }

    let registry = Arc::new(ConnectionRegistry::new(config.max_connections_per_key));
    let hub = Arc::new(SubscriberHub::new(config.max_send_queue));

    let reaper = spawn_reaper(
        Arc::clone(&registry),
        config.cleanup_interval,
        config.connection_timeout,
    );

    // Live reload is a capability, not a requirement: when the OS watcher
    // cannot start, the server serves without it.
    let watcher = if config.watch {
        let watcher = ChangeWatcher::with_config(
            config.root_dir.clone(),
            WatcherConfig {
                debounce_window: config.debounce_window,
            },
        );
        match watcher.start(Arc::clone(&hub)) {
            Ok(handle) => {
                tracing::info!(root = %config.root_dir.display(), "Watching for file changes");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Live reload disabled");
                None
            }
        }
    } else {
        None
    };

    let state = AppState {
        registry: Arc::clone(&registry),
        hub: Arc::clone(&hub),
        root_dir: Arc::new(config.root_dir.clone()),
        keepalive_interval: config.keepalive_interval,
        watch_enabled: watcher.is_some(),
    };

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            ServerError::AddrInUse {
                addr: addr.to_string(),
            }
        } else {
            ServerError::Io(e)
        }
    })?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        root = %config.root_dir.display(),
        "Server started"
    );

    let router = build_router(state);
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    Ok(ServerHandle {
        local_addr,
        registry,
        hub,
        watcher,
        _server: server,
        _reaper: reaper,
    })
}

/// Handle returned by `start()`; keeps the background tasks alive. The `hub`
/// is the broadcast trigger: any mutation source may push reloads through
/// it, not only the filesystem watcher.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<SubscriberHub>,
    pub watcher: Option<WatcherHandle>,
    _server: tokio::task::JoinHandle<()>,
    _reaper: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn live_reload_enabled(&self) -> bool {
        self.watcher.is_some()
    }
}
