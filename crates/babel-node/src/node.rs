//! Babel Node - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with shared RocksDB storage
//! - In-memory regional accumulators shared by ingestion and the
//!   decay / rollup / persistence background loops
//! - HTTP API + WebSocket for clients

use crate::api;
use crate::error::Result;
use crate::rollup::GlobalSnapshot;
use crate::storage::Storage;
use crate::{decay, persistence, rollup};
use babel_core::{EngineConfig, RegionStore};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Configuration for a Babel node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for storage
    pub data_dir: PathBuf,

    /// HTTP API listen address
    pub api_addr: SocketAddr,

    /// Anti-cheat and decay tuning
    pub engine: EngineConfig,

    /// Decay loop cadence
    pub decay_interval_ms: u64,

    /// Rollup loop cadence
    pub rollup_interval_ms: u64,

    /// Raw flush cadence
    pub flush_interval_ms: u64,

    /// Compaction cadence
    pub compaction_interval_ms: u64,

    /// Raw samples older than this are compacted into daily summaries
    pub raw_retention_ms: u64,

    /// WebSocket snapshot broadcast cadence
    pub broadcast_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(
            std::env::var("BABEL_DATA_DIR").unwrap_or_else(|_| "./babel-data".to_string()),
        );

        let api_addr = std::env::var("BABEL_API_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .expect("Invalid BABEL_API_ADDR");

        let engine = EngineConfig {
            idle_threshold_ms: env_u64("BABEL_IDLE_THRESHOLD_MS", 60_000),
            decay_mm_per_tick: env_u64("BABEL_DECAY_MM_PER_TICK", 26),
            decay_multiplier: env_u64("BABEL_DECAY_MULTIPLIER", 1),
            max_velocity_mm_per_sec: env_i64("BABEL_MAX_VELOCITY_MM_PER_SEC", 2000),
            min_batch_spacing_ms: env_u64("BABEL_MIN_BATCH_SPACING_MS", 250),
        };

        Self {
            data_dir,
            api_addr,
            engine,
            decay_interval_ms: env_u64("BABEL_DECAY_INTERVAL_MS", 5_000),
            rollup_interval_ms: env_u64("BABEL_ROLLUP_INTERVAL_MS", 1_000),
            flush_interval_ms: env_u64("BABEL_FLUSH_INTERVAL_MS", 30_000),
            compaction_interval_ms: env_u64("BABEL_COMPACTION_INTERVAL_MS", 3_600_000),
            raw_retention_ms: env_u64("BABEL_RAW_RETENTION_MS", 86_400_000),
            broadcast_interval_ms: env_u64("BABEL_BROADCAST_INTERVAL_MS", 2_000),
        }
    }
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared state for the Babel node - one store and storage instance
/// shared by ingestion, the background loops and the API.
pub struct NodeState {
    /// Authoritative regional accumulators.
    pub store: RwLock<RegionStore>,
    /// Latest rollup result, overwritten each rollup tick.
    pub snapshot: RwLock<GlobalSnapshot>,
    /// Durable tier (contributors, raw samples, daily summaries).
    pub storage: Arc<Storage>,
    /// Last accepted batch timestamp per contributor (spacing policy).
    pub contributors: RwLock<HashMap<String, u64>>,
    pub config: NodeConfig,
}

impl NodeState {
    /// Build state with freshly opened storage.
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = Arc::new(Storage::open(&config.data_dir)?);
        Ok(Self::with_storage(config, storage))
    }

    /// Build state around an existing storage handle (used by tests).
    pub fn with_storage(config: NodeConfig, storage: Arc<Storage>) -> Self {
        Self {
            store: RwLock::new(RegionStore::new()),
            snapshot: RwLock::new(GlobalSnapshot::default()),
            storage,
            contributors: RwLock::new(HashMap::new()),
            config,
        }
    }
}

/// A Babel node instance.
pub struct BabelNode {
    state: Arc<NodeState>,
    config: NodeConfig,
}

impl BabelNode {
    /// Create a new Babel node.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let state = Arc::new(NodeState::new(config.clone())?);
        Ok(Self { state, config })
    }

    /// Get the shared state (for API handlers and tests).
    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Run the node (starts background loops and the HTTP server).
    pub async fn run(self) -> Result<()> {
        tracing::info!("Babel node starting");
        tracing::info!("  API: http://{}", self.config.api_addr);
        tracing::info!("  Data: {:?}", self.config.data_dir);
        tracing::info!(
            "  Decay: {} mm every {} ms after {} ms idle",
            self.config.engine.effective_decay_mm(),
            self.config.decay_interval_ms,
            self.config.engine.idle_threshold_ms
        );

        // Background loops coordinate only through the shared state;
        // each holds its own Arc and stops when the runtime shuts down.
        tokio::spawn(decay::run(Arc::clone(&self.state)));
        tokio::spawn(rollup::run(Arc::clone(&self.state)));
        tokio::spawn(persistence::run_raw_flush(Arc::clone(&self.state)));
        tokio::spawn(persistence::run_compaction(Arc::clone(&self.state)));

        // Build HTTP API
        let app = api::build_router(self.state.clone());

        // Start HTTP server
        let listener = tokio::net::TcpListener::bind(self.config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", self.config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
