// src/sweeper.rs

use crate::cache::CacheStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Background task that periodically drains expired entries from a `CacheStore`.
/// Sleeps a fixed interval, then repeatedly drains the heap head until it reports
/// no more expired entries, then sleeps again. Observes `shutdown` between sleeps;
/// missing the last sweep on shutdown is acceptable.
pub fn spawn(cache: Arc<CacheStore>, shutdown: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while !shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(SWEEP_INTERVAL).await;

            let mut drained = 0u32;
            while cache.check_expired_head().await {
                drained += 1;
                debug!("swept one expired cache entry");
            }
            trace!(drained, "sweeper tick complete");
        }
    })
}
