//! Regional state store - the authoritative in-memory accumulators.
//!
//! One [`RegionEntry`] per region code, created lazily on first
//! contribution and never removed (idle regions decay toward zero and
//! stay present). The store itself is a plain struct; the node shares it
//! as `Arc<RwLock<RegionStore>>` so the ingestion path and the decay,
//! rollup and persistence loops all see the same accumulators.
//!
//! All mutation goes through `increment`/`decrement`, which are atomic
//! per region under the node's lock: no increment is ever lost, and no
//! decrement can drive a height below zero.

use std::collections::BTreeMap;

/// Accumulated state for one region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionEntry {
    /// Accumulated height in canonical millimeters. Never negative.
    pub height_mm: u64,
    /// Epoch milliseconds of the last accepted contribution.
    pub last_activity_ms: u64,
}

/// Map from region code to its accumulator.
#[derive(Debug, Default)]
pub struct RegionStore {
    regions: BTreeMap<String, RegionEntry>,
}

impl RegionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    /// Add `amount` to a region's height, creating the entry if absent,
    /// and stamp its last activity with `now_ms`.
    /// Returns the post-increment height.
    pub fn increment(&mut self, region: &str, amount: u64, now_ms: u64) -> u64 {
        let entry = self.regions.entry(region.to_string()).or_default();
        entry.height_mm = entry.height_mm.saturating_add(amount);
        entry.last_activity_ms = now_ms;
        entry.height_mm
    }

    /// Subtract up to `amount` from a region's height, clamping at zero.
    /// Returns the post-decrement height; 0 if the region does not exist.
    /// Does not touch last activity - only contributions do that.
    pub fn decrement(&mut self, region: &str, amount: u64) -> u64 {
        match self.regions.get_mut(region) {
            Some(entry) => {
                entry.height_mm = entry.height_mm.saturating_sub(amount);
                entry.height_mm
            }
            None => 0,
        }
    }

    /// Current height of one region, if present.
    pub fn height(&self, region: &str) -> Option<u64> {
        self.regions.get(region).map(|e| e.height_mm)
    }

    /// Snapshot of every region's height.
    pub fn all_heights(&self) -> BTreeMap<String, u64> {
        self.regions
            .iter()
            .map(|(r, e)| (r.clone(), e.height_mm))
            .collect()
    }

    /// Last activity timestamp of one region, if present.
    pub fn last_activity(&self, region: &str) -> Option<u64> {
        self.regions.get(region).map(|e| e.last_activity_ms)
    }

    /// Snapshot of every region's last activity timestamp.
    pub fn all_last_activity(&self) -> BTreeMap<String, u64> {
        self.regions
            .iter()
            .map(|(r, e)| (r.clone(), e.last_activity_ms))
            .collect()
    }

    /// Sum of all regional heights.
    pub fn total_height(&self) -> u64 {
        self.regions.values().map(|e| e.height_mm).sum()
    }

    /// Number of regions observed so far.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if no region has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
