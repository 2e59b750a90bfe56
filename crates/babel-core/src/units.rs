//! Device pixel to canonical millimeter conversion.

/// One CSS reference pixel in millimeters (25.4 mm/inch at 96 px/inch).
pub const PX_TO_MM: f64 = 25.4 / 96.0;

/// Largest pixel delta a single contribution batch may carry.
pub const MAX_PIXELS_PER_BATCH: f64 = 10_000.0;

/// Convert a device pixel distance to whole canonical millimeters.
///
/// Pure and deterministic: rounds to the nearest millimeter, preserving
/// sign for negative inputs (production call sites only pass non-negative
/// values, but the symmetry keeps the function total).
pub fn px_to_mm(device_pixels: f64) -> i64 {
    (device_pixels * PX_TO_MM).round() as i64
}

/// Per-batch ceiling in canonical millimeters.
pub fn max_batch_mm() -> i64 {
    px_to_mm(MAX_PIXELS_PER_BATCH)
}
