//! Background eviction of stale registry entries.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::ConnectionRegistry;

/// Spawn the idle reaper. Every `interval` it drops registry entries whose
/// last activity is older than `timeout`. Open sockets are never closed
/// here; the sweep only keeps stale bookkeeping from accumulating.
///
/// A panic in the sweep is a programming error and stops this loop alone;
/// the server keeps serving.
pub fn spawn_reaper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick

        loop {
            ticker.tick().await;
            let sweep = std::panic::catch_unwind(AssertUnwindSafe(|| registry.remove_idle(timeout)));
            match sweep {
                Ok(removed) if !removed.is_empty() => {
                    tracing::info!(removed = removed.len(), "Reaped idle connection entries");
                    for key in &removed {
                        tracing::debug!(client_key = %key, "Idle entry removed");
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::error!("Reaper sweep panicked; stopping the reaper");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // The ticker runs on the paused tokio clock; staleness is aged directly
    // on the entry because the registry measures real time.
    #[tokio::test(start_paused = true)]
    async fn reaper_sweeps_on_its_interval() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        registry.admit("fresh").unwrap();
        registry.admit("stale").unwrap();
        registry.backdate("stale", Duration::from_secs(11));

        let handle = spawn_reaper(
            Arc::clone(&registry),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(registry.open_connections("stale"), 0);
        assert_eq!(registry.open_connections("fresh"), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn reaper_task_stays_alive_across_empty_sweeps() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let handle = spawn_reaper(
            Arc::clone(&registry),
            Duration::from_millis(10),
            Duration::from_secs(300),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "empty sweeps must not stop the loop");
        handle.abort();
    }
}
