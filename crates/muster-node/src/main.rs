//! Muster Node binary
//!
//! Starts one instance of the guild roster service.

use muster_node::{MusterNode, NodeConfig, NodeExit};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "muster_node=info,muster_election=info,muster_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Muster Node");

    let config = NodeConfig::from_env()?;

    let node = MusterNode::new(config)?;
    match node.run().await? {
        NodeExit::LeaseLost => {
            tracing::error!("Exiting after losing the leader lease");
            std::process::exit(1);
        }
        NodeExit::Shutdown | NodeExit::NeverActive => {}
    }

    Ok(())
}
