//! `mapperctl` - standalone demo/control binary for the traceroute mapper.
//!
//! Wires the library against a [`StubMessageRouter`] so the orchestrator
//! can be exercised without a real mesh radio attached, following the
//! teacher's pattern of a thin `main.rs` that loads configuration, builds
//! the runtime, and logs readiness before driving it.

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use traceroute_mapper::clock::production_clock;
use traceroute_mapper::router::StubMessageRouter;
use traceroute_mapper::{MapperConfig, TracerouteMapper};

/// Run the traceroute mapper against a stub message router.
#[derive(Parser, Debug)]
#[command(name = "mapperctl", about = "Traceroute mapper demo/control CLI")]
struct Args {
    /// Seconds to run before shutting down.
    #[arg(long, default_value_t = 30)]
    run_seconds: u64,

    /// Enable initial discovery of already-known indirect nodes at startup.
    #[arg(long)]
    initial_discovery: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("traceroute_mapper=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("starting mapperctl demo");

    let mut config = MapperConfig::default();
    config.enabled = true;
    config.initial_discovery_enabled = args.initial_discovery;

    let router = Arc::new(StubMessageRouter::new());
    let mapper = Arc::new(TracerouteMapper::new(config, router, production_clock())?);

    mapper.start().await;
    info!(run_seconds = args.run_seconds, "mapper running");

    tokio::time::sleep(std::time::Duration::from_secs(args.run_seconds)).await;

    let stats = mapper.statistics();
    let health = mapper.health_report();
    info!(?stats, ?health, "final state before shutdown");

    mapper.stop().await;
    info!("mapperctl demo finished");
    Ok(())
}
