use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration. Every field is reachable from the CLI or an
/// environment variable; the defaults are what `beacon` does out of the box.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Address to bind. Defaults to all interfaces.
    pub bind: IpAddr,
    /// Directory whose contents are served (and watched).
    pub root_dir: PathBuf,
    /// Cap on concurrent connections from one source address.
    pub max_connections_per_key: usize,
    /// How long a client may stay inactive before its registry entry is reaped.
    pub connection_timeout: Duration,
    /// How often the idle reaper sweeps.
    pub cleanup_interval: Duration,
    /// Window within which repeat changes to the same path collapse into one event.
    pub debounce_window: Duration,
    /// How often an idle streaming connection gets a keepalive comment frame.
    pub keepalive_interval: Duration,
    /// Per-subscriber outbound frame queue capacity.
    pub max_send_queue: usize,
    /// Whether to watch the root directory for changes.
    pub watch: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            root_dir: PathBuf::from("."),
            max_connections_per_key: 50,
            connection_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            debounce_window: Duration::from_millis(500),
            keepalive_interval: Duration::from_secs(30),
            max_send_queue: 32,
            watch: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections_per_key, 50);
        assert_eq!(config.connection_timeout, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.debounce_window, Duration::from_millis(500));
        assert!(config.watch);
    }
}
