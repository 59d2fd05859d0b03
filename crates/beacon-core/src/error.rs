use std::io;

/// Typed error hierarchy for the server.
///
/// Admission errors are the client's to retry; transport errors are expected
/// connection churn; watcher errors degrade the live-reload capability and
/// nothing else; configuration errors are caught before the server runs.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    // Admission: recoverable by the client, surfaced as a 503
    #[error("too many connections from {key}")]
    TooManyConnections { key: String },

    // Startup
    #[error("address {addr} already in use")]
    AddrInUse { addr: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Transport: expected churn, never propagated as a failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    // Capability
    #[error("file watching unavailable: {0}")]
    WatchUnavailable(String),
}

impl ServerError {
    pub fn is_admission(&self) -> bool {
        matches!(self, Self::TooManyConnections { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TooManyConnections { .. } => "too_many_connections",
            Self::AddrInUse { .. } => "addr_in_use",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Io(_) => "io",
            Self::WatchUnavailable(_) => "watch_unavailable",
        }
    }
}
