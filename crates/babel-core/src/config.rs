//! Engine tuning knobs shared by the validator and the decay loop.

/// Gameplay/anti-cheat tuning for the aggregation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A region with no accepted contribution for this long is idle.
    pub idle_threshold_ms: u64,
    /// Millimeters removed from an idle region on each decay tick.
    pub decay_mm_per_tick: u64,
    /// Difficulty multiplier applied to `decay_mm_per_tick`.
    pub decay_multiplier: u64,
    /// Maximum accepted scroll velocity in mm/second.
    pub max_velocity_mm_per_sec: i64,
    /// Minimum spacing between accepted batches from one contributor.
    pub min_batch_spacing_ms: u64,
}

impl EngineConfig {
    /// Decay applied per tick after the difficulty multiplier.
    pub fn effective_decay_mm(&self) -> u64 {
        self.decay_mm_per_tick.saturating_mul(self.decay_multiplier)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 60_000,
            decay_mm_per_tick: 26,
            decay_multiplier: 1,
            max_velocity_mm_per_sec: 2000,
            min_batch_spacing_ms: 250,
        }
    }
}
