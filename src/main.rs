//! chunked-slab-cache: simulate slab caching over a chunked matrix.
//!
//! Runs one cache strategy over a synthetic access pattern and prints the
//! decode work it caused as JSON.

use clap::Parser;
use tracing::info;

use chunked_slab_cache::config::{Cli, Config};
use chunked_slab_cache::simulate;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "chunked_slab_cache=debug"
    } else {
        "chunked_slab_cache=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("chunked-slab-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    info!(
        strategy = %config.simulation.strategy,
        pattern = ?config.simulation.pattern,
        cache_bytes = config.cache.maximum_cache_size,
        target_extent = config.matrix.target_extent,
        chunk_length = config.matrix.chunk_length,
        "Configuration loaded"
    );

    let report = simulate::run(&config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
