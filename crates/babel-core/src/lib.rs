//! Babel Core - Scroll Aggregation Logic
//!
//! The pure heart of the Babel tower: converting device pixels into
//! canonical millimeters, judging contributions for size and velocity,
//! and holding the authoritative per-region accumulators.
//!
//! Everything here is synchronous and runtime-agnostic. The node crate
//! wraps [`RegionStore`] in an `Arc<RwLock<...>>` and drives it from
//! its ingestion path and background loops.

pub mod config;
pub mod store;
pub mod units;
pub mod validator;

pub use config::EngineConfig;
pub use store::{RegionEntry, RegionStore};
pub use units::{max_batch_mm, px_to_mm, MAX_PIXELS_PER_BATCH, PX_TO_MM};
pub use validator::{validate, RejectReason, Verdict};
