//! Runtime configuration for the slab cache simulator.
//!
//! Configuration is loaded from a JSON file and can be partially overridden
//! from the command line. Missing fields fall back to their defaults.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::cache::stats::SlabCacheStats;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "chunked-slab-cache", about = "Slab cache simulator for chunked matrices")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "slab-cache.json")]
    pub config: PathBuf,

    /// Cache strategy, overriding the configuration file.
    #[arg(short, long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Number of predictions to simulate, overriding the configuration file.
    #[arg(short, long)]
    pub predictions: Option<usize>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Which slab cache to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Reactive LRU cache, no foreknowledge.
    Lru,
    /// Oracular cache with a fixed slab count.
    Oracular,
    /// Oracular cache extracting only the rows each slab needs.
    Subsetted,
    /// Oracular cache bounded by the non-zero count of its slabs.
    Variable,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Lru => "lru",
            Strategy::Oracular => "oracular",
            Strategy::Subsetted => "subsetted",
            Strategy::Variable => "variable",
        };
        f.write_str(name)
    }
}

/// Order in which target-dimension elements are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// 0, 1, 2, ... wrapping at the target extent.
    Consecutive,
    /// Uniformly random elements.
    Random,
    /// 0, stride, 2 * stride, ... modulo the target extent.
    Strided,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache budget.
    pub cache: CacheConfig,

    /// Shape of the simulated chunked matrix.
    pub matrix: MatrixConfig,

    /// Access pattern and strategy.
    pub simulation: SimulationConfig,
}

/// Cache budget options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total cache budget in bytes.
    pub maximum_cache_size: usize,

    /// Keep at least one slab even when the budget is too small for it.
    pub require_minimum_cache: bool,

    /// Size of one matrix element in bytes.
    pub element_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum_cache_size: 100_000_000,
            require_minimum_cache: true,
            element_size: 8,
        }
    }
}

impl CacheConfig {
    /// Slab size and count for slabs of `target_length` by `non_target_length`.
    pub fn stats(
        &self,
        target_length: usize,
        non_target_length: usize,
        target_num_slabs: usize,
    ) -> SlabCacheStats {
        SlabCacheStats::from_bytes(
            target_length,
            non_target_length,
            target_num_slabs,
            self.maximum_cache_size,
            self.element_size,
            self.require_minimum_cache,
        )
    }

    /// Budget in elements, for size-bounded caches.
    pub fn size_in_elements(&self) -> usize {
        if self.element_size == 0 {
            usize::MAX
        } else {
            self.maximum_cache_size / self.element_size
        }
    }
}

/// Synthetic chunked matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Number of rows/columns along the iteration dimension.
    pub target_extent: usize,

    /// Number of elements in each row/column.
    pub non_target_extent: usize,

    /// Chunk length along the iteration dimension.
    pub chunk_length: usize,

    /// Average percentage of non-zero elements (1-100).
    pub sparse_density_percent: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            target_extent: 100_000,
            non_target_extent: 2_000,
            chunk_length: 50,
            sparse_density_percent: 10,
        }
    }
}

impl MatrixConfig {
    /// Number of chunks covering the target dimension.
    pub fn num_chunks(&self) -> usize {
        if self.chunk_length == 0 {
            return 0;
        }
        self.target_extent.div_ceil(self.chunk_length)
    }

    /// Rows in chunk `chunk`; the last chunk may be short.
    pub fn chunk_rows(&self, chunk: usize) -> usize {
        let start = chunk * self.chunk_length;
        self.chunk_length.min(self.target_extent.saturating_sub(start))
    }
}

/// Simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub strategy: Strategy,
    pub pattern: Pattern,

    /// Step between requests for the strided pattern.
    pub stride: usize,

    /// Number of target elements to request.
    pub predictions: usize,

    /// Seed for the random pattern.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Oracular,
            pattern: Pattern::Consecutive,
            stride: 7,
            predictions: 100_000,
            seed: 42,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(strategy) = cli.strategy {
            self.simulation.strategy = strategy;
        }
        if let Some(predictions) = cli.predictions {
            self.simulation.predictions = predictions;
        }
    }

    /// Reject matrix shapes the simulator cannot chunk.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.matrix.chunk_length > 0, "chunk_length must be positive");
        anyhow::ensure!(self.matrix.target_extent > 0, "target_extent must be positive");
        anyhow::ensure!(
            (1..=100).contains(&self.matrix.sparse_density_percent),
            "sparse_density_percent must be within 1-100, got {}",
            self.matrix.sparse_density_percent
        );
        Ok(())
    }
}
