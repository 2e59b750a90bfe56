//! Contribution validation - size and velocity gates.
//!
//! Stateless: every call judges exactly the event it is given. The node's
//! ingestion path applies per-contributor rate limiting (minimum spacing
//! between batches) before an event ever reaches this module.

use crate::units::max_batch_mm;
use serde::Serialize;

/// Why a contribution was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Delta exceeds the per-batch ceiling.
    TooLarge,
    /// Implied scroll velocity exceeds the configured maximum.
    TooFast,
}

impl RejectReason {
    /// Wire code for API responses and abuse logs.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::TooLarge => "too-large",
            RejectReason::TooFast => "too-fast",
        }
    }
}

/// Outcome of validating a single contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Validate a contribution of `delta_mm` canonical millimeters scrolled
/// over `elapsed_ms` milliseconds since the contributor's previous
/// accepted batch.
///
/// The caller guarantees `elapsed_ms > 0`. The velocity check is done in
/// integer cross-multiplication so the exact boundary is accepted:
/// 2000 mm over 1000 ms passes a 2000 mm/s ceiling, 2001 mm does not.
pub fn validate(delta_mm: i64, elapsed_ms: i64, max_velocity_mm_per_sec: i64) -> Verdict {
    if delta_mm > max_batch_mm() {
        return Verdict::Rejected(RejectReason::TooLarge);
    }

    // delta / elapsed * 1000 > max  <=>  delta * 1000 > max * elapsed
    if delta_mm.saturating_mul(1000) > max_velocity_mm_per_sec.saturating_mul(elapsed_ms) {
        return Verdict::Rejected(RejectReason::TooFast);
    }

    Verdict::Accepted
}
