//! Periodic room reaper.
//!
//! Runs the registry sweep on a fixed period, removing rooms that are empty
//! or past their TTL. Reaping only detaches the registry record: open
//! connections are never force-closed by the sweep.

use crate::metrics;
use flare_core::RoomRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Spawn the reaper task.
///
/// The task runs until the server shuts down; each cycle is independent, so
/// a room that cannot be reaped in one sweep does not block the others.
pub fn spawn(registry: Arc<RoomRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let removed = registry.sweep(Instant::now());
            if removed > 0 {
                debug!(removed, "Reaped rooms");
                metrics::record_rooms_reaped(removed);
            }

            let stats = registry.stats();
            metrics::set_active_rooms(stats.room_count);
            trace!(rooms = stats.room_count, members = stats.member_count, "Sweep complete");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_reaper_removes_empty_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        registry.resolve_or_create("EMPTY");

        let handle = spawn(Arc::clone(&registry), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(!registry.contains("EMPTY"));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_spares_occupied_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let room = registry.resolve_or_create("BUSY");
        let (tx, _rx) = mpsc::channel(8);
        room.join(1, "caller", tx);

        let handle = spawn(Arc::clone(&registry), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(registry.contains("BUSY"));
        handle.abort();
    }
}
