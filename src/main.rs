use anyhow::Result;
use quorum_kv::cluster::Cluster;
use quorum_kv::config::ClusterConfig;
use quorum_kv::membership::types::NodeId;
use quorum_kv::storage::ring::Ring;
use quorum_kv::sync::synchronizer::Synchronizer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut node_count = 10usize;
    let mut write_count = 5usize;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--nodes" if i + 1 < args.len() => {
                node_count = args[i + 1].parse()?;
                i += 2;
            }
            "--writes" if i + 1 < args.len() => {
                write_count = args[i + 1].parse()?;
                i += 2;
            }
            "--help" => {
                eprintln!("Usage: {} [--nodes N] [--writes K]", args[0]);
                return Ok(());
            }
            _ => {
                i += 1;
            }
        }
    }

    let config = ClusterConfig::from_env();
    tracing::info!(
        "starting local cluster: {} nodes, R={}, W={}, {} tokens/node",
        node_count,
        config.replication_factor,
        config.write_quorum,
        config.tokens_per_node
    );

    let nodes: Vec<NodeId> = (1..=node_count)
        .map(|i| NodeId::new(format!("node{}", i)))
        .collect();
    let ring = Ring::build(&nodes, config.tokens_per_node);
    let cluster = Cluster::initialize(nodes, config.clone());

    let synchronizer = Synchronizer::new(cluster.client.clone(), ring.clone(), config);
    let _sync_task = synchronizer.clone().start();

    for i in 0..write_count {
        let key = format!("demo_key_{}", i);
        let value = format!("demo_value_{}", i);
        match cluster.coordinator.put(&ring, &key, value.as_bytes(), None).await {
            Ok(()) => tracing::info!("put {} acknowledged under quorum", key),
            Err(error) => tracing::warn!("put {} failed: {}", key, error),
        }
    }

    for i in 0..write_count {
        let key = format!("demo_key_{}", i);
        match cluster.coordinator.get(&ring, &key).await {
            Ok(value) => {
                tracing::info!("get {} -> {}", key, String::from_utf8_lossy(&value));
            }
            Err(error) => tracing::warn!("get {} failed: {}", key, error),
        }
    }

    synchronizer.sync().await;
    tracing::info!(
        "anti-entropy pass complete, {} hint(s) outstanding",
        cluster.hints.len()
    );

    Ok(())
}
