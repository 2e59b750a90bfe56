//! Babel Node binary
//!
//! A daemon that aggregates scroll contributions into a global tower
//! counter with per-region breakdown, decay and tiered persistence.

use babel_node::{BabelNode, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "babel_node=info,babel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Babel Node");

    let config = NodeConfig::from_env();

    let node = BabelNode::new(config)?;
    node.run().await?;

    Ok(())
}
