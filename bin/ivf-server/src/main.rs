//! Entry point: load configuration, build the index, optionally seed it
//! with random demo vectors and reindex, then serve the HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use ivf_api::ApiServer;
use ivf_config::ServiceConfig;
use ivf_core::{Index, MetricRegistry, Record};
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::HashMap;
use uuid::Uuid;

/// Partitioned in-memory ANN index server.
#[derive(Debug, Parser)]
#[command(name = "ivf-server")]
struct Args {
    /// Path to an optional TOML config file.
    #[arg(long, default_value = "ivf-server.toml")]
    config: String,

    #[arg(long)]
    host: Option<std::net::IpAddr>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long = "vector-dim")]
    dimension: Option<usize>,

    #[arg(long = "num-cells")]
    num_cells: Option<usize>,

    /// Generate and insert random demo vectors at startup, then reindex.
    #[arg(long = "run-demo")]
    demo_load: bool,

    /// Number of demo vectors to insert when `--run-demo` is set.
    #[arg(long = "size-demo")]
    demo_size: Option<usize>,
}

impl Args {
    fn apply_to(self, config: &mut ServiceConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dimension) = self.dimension {
            config.dimension = dimension;
        }
        if let Some(num_cells) = self.num_cells {
            config.num_cells = num_cells;
        }
        if self.demo_load {
            config.demo_load = true;
        }
        if let Some(demo_size) = self.demo_size {
            config.demo_size = demo_size;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config_path = args.config.clone();
    let mut config = ServiceConfig::load(&config_path)?;
    args.apply_to(&mut config);

    ivf_metrics::init()?;

    let index = Arc::new(Index::new(
        config.dimension,
        config.num_cells,
        MetricRegistry::with_defaults(),
    )?);

    if config.demo_load {
        seed_demo_data(index.clone(), config.dimension, config.demo_size).await?;
    }

    let addr = SocketAddr::new(config.host, config.port);
    let server = ApiServer::with_defaults(index, config.default_metric, config.default_probes);
    server.run(addr).await
}

/// Insert `count` standard-normal random vectors, split across worker
/// threads, then reindex once all inserts land — mirroring the
/// write-then-reindex bring-up sequence this index is always demoed with.
async fn seed_demo_data(index: Arc<Index>, dimension: usize, count: usize) -> anyhow::Result<()> {
    if count == 0 {
        return Ok(());
    }

    const WORKERS: usize = 16;
    let per_worker = (count / WORKERS).max(1);
    let mut handles = Vec::new();

    let mut remaining = count;
    for _ in 0..WORKERS {
        if remaining == 0 {
            break;
        }
        let batch = per_worker.min(remaining);
        remaining -= batch;
        let index = index.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..batch {
                let data: Vec<f64> = (0..dimension).map(|_| rng.sample(StandardNormal)).collect();
                let record = Record::new(Uuid::new_v4().to_string(), data, HashMap::new());
                if let Err(err) = index.insert(record) {
                    tracing::warn!(error = %err, "demo insert failed");
                }
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }
    tracing::info!(count, "finished demo data write");

    let index_for_reindex = index.clone();
    tokio::task::spawn_blocking(move || index_for_reindex.reindex("l2", None)).await??;
    tracing::info!("reindex finished");
    Ok(())
}
