//! Persistence pipeline - raw flush and compaction loops.
//!
//! Two independent schedules over the same durable store:
//!
//! - The raw flush snapshots every known region's height into the raw
//!   sample log on a short cadence. A failed flush is logged and the
//!   data for that tick is lost; the hot path never depends on it.
//! - Compaction folds raw samples older than the retention window into
//!   daily summaries. A failed run deletes nothing and is retried
//!   wholesale on the next schedule.

use crate::node::{now_ms, NodeState};
use crate::storage::RawSample;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Run the raw flush loop on its fixed cadence.
pub async fn run_raw_flush(state: Arc<NodeState>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(state.config.flush_interval_ms));
    loop {
        interval.tick().await;
        flush_tick(&state, now_ms()).await;
    }
}

/// One raw flush pass: one sample per present region, zero heights
/// included so the time series stays continuous.
pub async fn flush_tick(state: &NodeState, now: u64) {
    let heights = state.store.read().await.all_heights();
    if heights.is_empty() {
        return;
    }

    let samples: Vec<RawSample> = heights
        .into_iter()
        .map(|(region, height_mm)| RawSample {
            region,
            height_mm,
            recorded_at_ms: now,
        })
        .collect();

    match state.storage.append_raw_samples(&samples) {
        Ok(()) => debug!("Flushed {} raw samples", samples.len()),
        // Lossy by contract: this tick's samples are dropped, next tick retries.
        Err(e) => warn!("Raw flush failed, retrying next tick: {}", e),
    }
}

/// Run the compaction loop on its fixed cadence.
pub async fn run_compaction(state: Arc<NodeState>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(state.config.compaction_interval_ms));
    loop {
        interval.tick().await;
        compaction_tick(&state, now_ms()).await;
    }
}

/// One compaction pass over everything older than the retention window.
pub async fn compaction_tick(state: &NodeState, now: u64) {
    let cutoff = now.saturating_sub(state.config.raw_retention_ms);
    match state.storage.compact_raw_before(cutoff) {
        Ok(0) => {}
        Ok(n) => info!("Compacted {} raw samples into daily summaries", n),
        // Nothing was deleted; the whole window is retried next run.
        Err(e) => error!("Compaction failed, will retry: {}", e),
    }
}
