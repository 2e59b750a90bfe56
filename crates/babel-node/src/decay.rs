//! Decay loop - idle regions shrink back toward zero.
//!
//! Every tick scans the shared store and decrements any region whose
//! last accepted contribution is older than the idle threshold. Decay
//! never touches the idle clock itself, so a region keeps decaying one
//! tick at a time until it hits zero, then stays there.

use crate::node::{now_ms, NodeState};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Run the decay loop on its fixed cadence.
pub async fn run(state: Arc<NodeState>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(state.config.decay_interval_ms));
    loop {
        interval.tick().await;
        tick(&state, now_ms()).await;
    }
}

/// One decay pass over every region.
pub async fn tick(state: &NodeState, now: u64) {
    let idle_threshold = state.config.engine.idle_threshold_ms;
    let decay = state.config.engine.effective_decay_mm();

    // Snapshot under the read lock, mutate under the write lock.
    let idle_regions: Vec<String> = {
        let store = state.store.read().await;
        let heights = store.all_heights();
        store
            .all_last_activity()
            .into_iter()
            .filter(|(region, last)| {
                heights.get(region).copied().unwrap_or(0) > 0
                    && now.saturating_sub(*last) > idle_threshold
            })
            .map(|(region, _)| region)
            .collect()
    };

    if idle_regions.is_empty() {
        return;
    }

    let mut store = state.store.write().await;
    for region in idle_regions {
        let remaining = store.decrement(&region, decay);
        debug!("Decayed idle region {} by {} mm, now {}", region, decay, remaining);
    }
}
