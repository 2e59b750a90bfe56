//! Rollup loop - recomputes the global counter from regional heights.
//!
//! Each tick overwrites the published [`GlobalSnapshot`] with the live
//! sum of all regional accumulators and an instantaneous velocity
//! derived from the delta since the previous tick. The only cross-tick
//! state is the previous total, held privately by the loop. Velocity is
//! the plain rollup delta, not a moving average.

use crate::node::NodeState;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The externally visible global counter, overwritten each rollup tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalSnapshot {
    /// Sum of all regional heights in canonical millimeters.
    pub total_mm: u64,
    /// Signed rate of change in mm/second over the last rollup interval.
    pub velocity_mm_per_sec: f64,
}

/// Run the rollup loop on its fixed cadence.
pub async fn run(state: Arc<NodeState>) {
    let interval_ms = state.config.rollup_interval_ms;
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut previous_total: u64 = 0;
    loop {
        interval.tick().await;
        previous_total = tick(&state, previous_total, interval_ms).await;
    }
}

/// One rollup pass. Returns the new total for the next tick's delta.
pub async fn tick(state: &NodeState, previous_total: u64, interval_ms: u64) -> u64 {
    let total = state.store.read().await.total_height();

    let interval_secs = interval_ms as f64 / 1000.0;
    let delta = total as i128 - previous_total as i128;
    let velocity = if interval_secs > 0.0 {
        delta as f64 / interval_secs
    } else {
        0.0
    };

    {
        let mut snapshot = state.snapshot.write().await;
        snapshot.total_mm = total;
        snapshot.velocity_mm_per_sec = velocity;
    }

    debug!("Rollup: total {} mm, velocity {:.1} mm/s", total, velocity);
    total
}
