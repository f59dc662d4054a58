//! # fabdemo
//!
//! Two replicas, `east` and `west`, in one process. Both host the routed
//! cache; only `east` hosts the frontend. Calls cross between them over
//! an in-memory loopback transport.

mod cache;
mod frontend;

use std::sync::Arc;

use anyhow::Context;
use fabrun::Registry;
use fabrun::ReplicaId;
use fabrun::Runtime;
use fabrun::StaticHost;
use fabrun::config::AppConfig;
use fabrun::mock_transport::LoopbackTransport;
use fabrun::routing::RendezvousAssignment;
use tracing_subscriber::EnvFilter;

use crate::frontend::Frontend;

const CONFIG: &str = r#"
["fabdemo/Cache"]
Size = 64

[listeners]
web = { local_address = "127.0.0.1:0" }
"#;

const KEYS: &[(&str, &str)] = &[
    ("apple", "red"),
    ("banana", "yellow"),
    ("cherry", "dark red"),
    ("grape", "purple"),
    ("kiwi", "green"),
    ("plum", "violet"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Arc::new(Registry::new());
    registry.register(cache::registration()?)?;
    registry.register(frontend::registration()?)?;

    let config = AppConfig::from_toml_str(CONFIG).context("parsing demo config")?;
    let east = ReplicaId::new("east");
    let west = ReplicaId::new("west");
    let assignment = Arc::new(RendezvousAssignment::new([east.clone(), west.clone()]));

    let to_east = Arc::new(LoopbackTransport::unbound());
    let to_west = Arc::new(LoopbackTransport::unbound());

    let east_host = StaticHost::new(east.clone())
        .local(cache::NAME)
        .local(frontend::NAME)
        .peer(cache::NAME, west.clone(), to_west.clone())
        .with_assignment(cache::NAME, assignment.clone());
    let west_host = StaticHost::new(west.clone())
        .local(cache::NAME)
        .peer(cache::NAME, east.clone(), to_east.clone())
        .with_assignment(cache::NAME, assignment);

    let east_runtime = Runtime::builder()
        .registry(registry.clone())
        .host(Arc::new(east_host))
        .config(config.clone())
        .build()?;
    let west_runtime = Runtime::builder()
        .registry(registry)
        .host(Arc::new(west_host))
        .config(config)
        .build()?;
    to_east.bind(&east_runtime);
    to_west.bind(&west_runtime);

    let site = east_runtime.get::<dyn Frontend>().await?;
    tracing::info!(address = %site.address().await?, "frontend listening");

    for (key, value) in KEYS {
        let owner = site.remember(key.to_string(), value.to_string()).await?;
        tracing::info!(key, owner = %owner, "remembered");
    }
    for (key, _) in KEYS {
        let value = site.recall(key.to_string()).await?;
        tracing::info!(key, value = ?value, "recalled");
    }

    if let Some(load) = west_runtime.component(cache::NAME)?.load() {
        for (key, calls) in load.report() {
            tracing::info!(replica = %west, key = %key, calls, "served");
        }
    }

    println!("{}", east_runtime.metrics().export_prometheus());
    Ok(())
}
