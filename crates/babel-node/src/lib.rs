//! Babel Node - Real-time Scroll Aggregation Daemon
//!
//! Aggregates a high rate of small scroll contributions from many
//! concurrent participants into a single global counter, broken down
//! per region, with idle decay and tiered historical persistence.
//!
//! # Architecture
//!
//! - **Core** (`babel-core`): unit conversion, validation, the shared
//!   regional accumulators
//! - **Storage**: RocksDB-backed raw samples and daily summaries
//! - **Loops**: decay, rollup and persistence tasks on fixed cadences,
//!   coordinating only through the shared state
//! - **API**: HTTP ingestion and query endpoints plus a WebSocket
//!   snapshot broadcast
//!
//! # Example
//!
//! ```no_run
//! use babel_node::{BabelNode, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::default();
//!     let node = BabelNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod decay;
pub mod error;
pub mod node;
pub mod persistence;
pub mod rollup;
pub mod storage;
pub mod ws;

pub use error::{Error, Result};
pub use node::{BabelNode, NodeConfig, NodeState};
pub use rollup::GlobalSnapshot;
pub use storage::{Contributor, DailySummary, RawSample, Storage};
