//! Background eviction of abandoned playback rooms.
//!
//! Playback rooms linger after their last participant leaves so a
//! returning group finds its queue intact. The sweeper reclaims rooms
//! that stayed empty past the inactivity threshold; occupied rooms are
//! never touched regardless of age.

use std::time::{Duration, Instant};

use roomsync_core::{RoomKind, RoomStore};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::metrics::{record_rooms_swept, set_rooms_active};

/// Default seconds between sweeps (1 hour).
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
/// Default seconds of emptiness before eviction (24 hours).
const DEFAULT_INACTIVE_THRESHOLD_SECS: u64 = 86_400;

/// Sweep timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    /// Time between sweep passes.
    pub interval: Duration,
    /// How long a room must stay empty before eviction.
    pub threshold: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            threshold: Duration::from_secs(DEFAULT_INACTIVE_THRESHOLD_SECS),
        }
    }
}

impl SweeperConfig {
    /// Create a configuration from environment variables or defaults.
    ///
    /// Environment variables:
    /// - `ROOMSYNC_SWEEP_INTERVAL_SECS`: Seconds between sweeps (default: 3600)
    /// - `ROOMSYNC_INACTIVE_THRESHOLD_SECS`: Seconds of emptiness before eviction (default: 86400)
    #[must_use]
    pub fn from_env() -> Self {
        let interval = std::env::var("ROOMSYNC_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        let threshold = std::env::var("ROOMSYNC_INACTIVE_THRESHOLD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INACTIVE_THRESHOLD_SECS);
        Self {
            interval: Duration::from_secs(interval),
            threshold: Duration::from_secs(threshold),
        }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Spawn the periodic sweep task.
#[must_use]
pub fn spawn_sweeper(store: RoomStore, config: SweeperConfig) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick fires immediately; skip it so a restart does
        // not sweep before the threshold has any meaning.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.sweep_playback(Instant::now(), config.threshold);
                    if !removed.is_empty() {
                        tracing::info!(count = removed.len(), "Swept inactive playback rooms");
                        record_rooms_swept(removed.len());
                        set_rooms_active(RoomKind::Playback, store.room_count(RoomKind::Playback));
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Sweeper shutting down");
                    break;
                }
            }
        }
    });

    SweeperHandle {
        shutdown: shutdown_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_evicts_empty_rooms_past_threshold() {
        let store = RoomStore::new();
        store.create_playback("stale", Instant::now());

        let config = SweeperConfig {
            interval: Duration::from_millis(10),
            threshold: Duration::ZERO,
        };
        let handle = spawn_sweeper(store.clone(), config);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.playback_exists("stale"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn sweeper_shutdown_stops_the_task() {
        let store = RoomStore::new();
        let handle = spawn_sweeper(store, SweeperConfig::default());
        // Must resolve promptly even with an hour-long interval.
        handle.shutdown().await;
    }

    #[test]
    fn config_defaults_match_documented_values() {
        let config = SweeperConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.threshold, Duration::from_secs(86_400));
    }
}
