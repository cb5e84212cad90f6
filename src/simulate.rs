//! Cache simulator over a synthetic chunked matrix.
//!
//! The matrix is never materialised. Each chunk covers `chunk_length`
//! rows/columns of the target dimension, and "decoding" a slab only records
//! how many elements a real extractor would have read. Every slab a cache
//! returns is checked against a direct `identify` of the prediction, so a run
//! doubles as an end-to-end consistency check.

use std::convert::Infallible;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::loader::{SlabFactory, SlabIdentify, SlabMeasure, SlabPopulate, SubsetPopulate};
use crate::cache::oracle::{FixedOracle, Oracle};
use crate::cache::subset::SlabSubset;
use crate::cache::typical::{SlabCache, TypicalSlabCacheWorkspace};
use crate::cache::variable::OracularVariableSlabCache;
use crate::config::{Config, MatrixConfig, Pattern, Strategy};

/// Stand-in for a decoded chunk.
#[derive(Debug, Clone, Default)]
pub struct SimSlab {
    /// Chunk this slab currently holds.
    pub chunk: usize,

    /// Rows/columns in the chunk.
    pub rows: usize,

    /// Rows/columns actually extracted.
    pub loaded_rows: usize,

    /// Non-zero elements in the chunk.
    pub nonzeros: usize,

    /// Region extracted, for subsetted caches.
    pub subset: Option<SlabSubset>,
}

/// Decode work performed on behalf of a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounters {
    /// Slabs created over the cache's lifetime.
    pub allocations: usize,

    /// Batched populate calls.
    pub populate_calls: usize,

    /// Slabs filled across all populate calls.
    pub populated_slabs: usize,

    /// Slabs kept from one cycle to the next, as reported to populate.
    pub reused_slabs: usize,

    /// Matrix elements decoded.
    pub elements_loaded: usize,
}

/// Loader for the synthetic matrix.
#[derive(Debug)]
pub struct SimLoader<'a> {
    matrix: &'a MatrixConfig,
    sparse: bool,
    counters: LoadCounters,
}

impl<'a> SimLoader<'a> {
    /// With `sparse`, decoding a chunk costs its non-zeros rather than every element.
    pub fn new(matrix: &'a MatrixConfig, sparse: bool) -> Self {
        Self {
            matrix,
            sparse,
            counters: LoadCounters::default(),
        }
    }

    pub fn counters(&self) -> &LoadCounters {
        &self.counters
    }

    /// Non-zeros in `chunk`. Density cycles between one and three times the
    /// configured percentage, so slab sizes differ between neighbours.
    pub fn nonzeros(&self, chunk: usize) -> usize {
        let dense = self.matrix.chunk_rows(chunk) * self.matrix.non_target_extent;
        let percent = (self.matrix.sparse_density_percent * (1 + chunk % 3)).min(100);
        dense * percent / 100
    }

    /// Decode a single row/column without caching.
    pub fn load_uncached(&mut self, index: usize) {
        let (chunk, _) = self.identify(index);
        let rows = self.matrix.chunk_rows(chunk).max(1);
        self.counters.elements_loaded += if self.sparse {
            self.nonzeros(chunk) / rows
        } else {
            self.matrix.non_target_extent
        };
    }

    fn fill(&mut self, chunk: usize, slab: &mut SimSlab, loaded_rows: usize) {
        slab.chunk = chunk;
        slab.rows = self.matrix.chunk_rows(chunk);
        slab.loaded_rows = loaded_rows;
        slab.nonzeros = self.nonzeros(chunk);

        let loaded = if self.sparse {
            slab.nonzeros * loaded_rows / slab.rows.max(1)
        } else {
            loaded_rows * self.matrix.non_target_extent
        };
        self.counters.elements_loaded += loaded;
        self.counters.populated_slabs += 1;
    }
}

impl SlabFactory for SimLoader<'_> {
    type Id = usize;
    type Slab = SimSlab;
    type Error = Infallible;

    fn create(&mut self) -> Result<SimSlab, Infallible> {
        self.counters.allocations += 1;
        Ok(SimSlab::default())
    }
}

impl SlabIdentify for SimLoader<'_> {
    fn identify(&self, index: usize) -> (usize, usize) {
        (index / self.matrix.chunk_length, index % self.matrix.chunk_length)
    }
}

impl SlabPopulate for SimLoader<'_> {
    fn populate(
        &mut self,
        needed: &mut [(usize, &mut SimSlab)],
        reused: &mut [(usize, &mut SimSlab)],
    ) -> Result<(), Infallible> {
        self.counters.populate_calls += 1;
        self.counters.reused_slabs += reused.len();
        for (chunk, slab) in needed.iter_mut() {
            let rows = self.matrix.chunk_rows(*chunk);
            self.fill(*chunk, slab, rows);
            slab.subset = None;
        }
        Ok(())
    }
}

impl SubsetPopulate for SimLoader<'_> {
    fn populate_subsets(
        &mut self,
        needed: &mut [(usize, &mut SimSlab, &SlabSubset)],
    ) -> Result<(), Infallible> {
        self.counters.populate_calls += 1;
        for (chunk, slab, subset) in needed.iter_mut() {
            let rows = subset.extracted_len(self.matrix.chunk_rows(*chunk));
            self.fill(*chunk, slab, rows);
            slab.subset = Some((*subset).clone());
        }
        Ok(())
    }
}

impl SlabMeasure for SimLoader<'_> {
    fn estimated_size(&self, id: usize) -> usize {
        self.matrix.chunk_rows(id) * self.matrix.non_target_extent
    }

    fn actual_size(&self, _id: usize, slab: &SimSlab) -> usize {
        slab.nonzeros
    }
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub strategy: Strategy,
    pub pattern: Pattern,
    pub predictions: usize,
    pub num_chunks: usize,
    pub slab_size_in_elements: usize,

    /// `max_slabs`, or the size budget for the variable cache.
    pub capacity: usize,

    /// Slabs resident when the run ended.
    pub resident_slabs: usize,

    /// Requests served without a cache because the budget was zero.
    pub uncached_requests: usize,

    #[serde(flatten)]
    pub loads: LoadCounters,
}

/// Target-dimension elements requested by the configured pattern.
pub fn generate_predictions(config: &Config) -> Vec<usize> {
    let extent = config.matrix.target_extent;
    let count = config.simulation.predictions;
    if extent == 0 {
        return Vec::new();
    }

    match config.simulation.pattern {
        Pattern::Consecutive => (0..count).map(|i| i % extent).collect(),
        Pattern::Strided => {
            let stride = config.simulation.stride % extent;
            let mut position = 0;
            (0..count)
                .map(|_| {
                    let current = position;
                    position = (position + stride) % extent;
                    current
                })
                .collect()
        }
        Pattern::Random => {
            let mut rng = StdRng::seed_from_u64(config.simulation.seed);
            (0..count).map(|_| rng.gen_range(0..extent)).collect()
        }
    }
}

/// Run the configured strategy over the configured pattern.
pub fn run(config: &Config) -> anyhow::Result<SimulationReport> {
    config.validate()?;

    let strategy = config.simulation.strategy;
    let matrix = &config.matrix;
    let predictions = generate_predictions(config);
    let num_chunks = matrix.num_chunks();
    let stats = config
        .cache
        .stats(matrix.chunk_length, matrix.non_target_extent, num_chunks);

    info!(
        strategy = %strategy,
        predictions = predictions.len(),
        num_chunks,
        slab_size = stats.slab_size_in_elements,
        max_slabs = stats.num_slabs_in_cache,
        "Starting simulation"
    );

    let oracle: Arc<dyn Oracle> = Arc::new(FixedOracle::new(predictions.clone()));
    let mut loader = SimLoader::new(matrix, strategy == Strategy::Variable);
    let mut uncached_requests = 0;

    let (capacity, resident_slabs) = if strategy == Strategy::Variable {
        let max_size = config.cache.size_in_elements();
        let mut cache = OracularVariableSlabCache::new(oracle, max_size);
        for &index in &predictions {
            if max_size == 0 {
                let predicted = cache.predict()?;
                loader.load_uncached(predicted);
                uncached_requests += 1;
                continue;
            }
            let (slab, offset) = cache.next(&mut loader)?;
            verify(&loader, index, slab, offset)?;
        }
        debug!(used_size = cache.used_size(), "Variable cache finished");
        (cache.max_size(), cache.num_slabs())
    } else {
        let oracle = (strategy != Strategy::Lru).then_some(oracle);
        let mut workspace =
            TypicalSlabCacheWorkspace::new(stats, oracle, strategy == Strategy::Subsetted);

        for &index in &predictions {
            if !stats.is_caching() {
                let predicted = match &mut workspace.cache {
                    SlabCache::Lru(_) => index,
                    SlabCache::Oracular(cache) => cache.predict()?,
                    SlabCache::Subsetted(cache) => cache.predict()?,
                };
                loader.load_uncached(predicted);
                uncached_requests += 1;
                continue;
            }

            let (slab, offset) = match &mut workspace.cache {
                SlabCache::Lru(cache) => {
                    let (id, offset) = loader.identify(index);
                    (cache.find(id, &mut loader)?, offset)
                }
                SlabCache::Oracular(cache) => cache.next(&mut loader)?,
                SlabCache::Subsetted(cache) => cache.next(&mut loader)?,
            };
            verify(&loader, index, slab, offset)?;
        }
        (workspace.cache.max_slabs(), workspace.cache.num_slabs())
    };

    let report = SimulationReport {
        strategy,
        pattern: config.simulation.pattern,
        predictions: predictions.len(),
        num_chunks,
        slab_size_in_elements: stats.slab_size_in_elements,
        capacity,
        resident_slabs,
        uncached_requests,
        loads: loader.counters().clone(),
    };

    info!(
        allocations = report.loads.allocations,
        populate_calls = report.loads.populate_calls,
        populated_slabs = report.loads.populated_slabs,
        elements_loaded = report.loads.elements_loaded,
        "Simulation complete"
    );
    Ok(report)
}

fn verify(loader: &SimLoader<'_>, index: usize, slab: &SimSlab, offset: usize) -> anyhow::Result<()> {
    let (chunk, expected_offset) = loader.identify(index);
    anyhow::ensure!(
        slab.chunk == chunk && offset == expected_offset,
        "Element {index} served from chunk {} offset {offset}, expected chunk {chunk} offset {expected_offset}",
        slab.chunk
    );
    if let Some(subset) = &slab.subset {
        anyhow::ensure!(
            subset.contains(offset),
            "Element {index} not extracted from chunk {chunk}"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(strategy: Strategy, pattern: Pattern) -> Config {
        let mut config = Config::default();
        config.matrix = MatrixConfig {
            target_extent: 100,
            non_target_extent: 10,
            chunk_length: 10,
            sparse_density_percent: 20,
        };
        // Room for three dense slabs of 10 x 10 elements.
        config.cache.maximum_cache_size = 300 * config.cache.element_size;
        config.simulation.strategy = strategy;
        config.simulation.pattern = pattern;
        config.simulation.predictions = 250;
        config
    }

    #[test]
    fn test_generate_patterns() {
        let mut config = small_config(Strategy::Lru, Pattern::Consecutive);
        config.simulation.predictions = 5;
        assert_eq!(generate_predictions(&config), vec![0, 1, 2, 3, 4]);

        config.simulation.pattern = Pattern::Strided;
        config.simulation.stride = 30;
        assert_eq!(generate_predictions(&config), vec![0, 30, 60, 90, 20]);

        config.simulation.pattern = Pattern::Random;
        let first = generate_predictions(&config);
        assert_eq!(first, generate_predictions(&config));
        assert!(first.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_loader_sizes() {
        let config = small_config(Strategy::Variable, Pattern::Consecutive);
        let loader = SimLoader::new(&config.matrix, true);
        assert_eq!(loader.estimated_size(0), 100);
        assert_eq!(loader.nonzeros(0), 20);
        assert_eq!(loader.nonzeros(1), 40);
        assert_eq!(loader.nonzeros(2), 60);
        assert!((0..10).all(|c| loader.nonzeros(c) <= loader.estimated_size(c)));
    }

    #[test]
    fn test_consecutive_oracular_loads_each_chunk_once() {
        let config = small_config(Strategy::Oracular, Pattern::Consecutive);
        let report = run(&config).unwrap();
        assert_eq!(report.capacity, 3);
        assert_eq!(report.loads.allocations, 3);
        // 250 consecutive elements touch chunks 0-9, then 0-9 again, then 0-4.
        assert_eq!(report.loads.populated_slabs, 25);
        assert_eq!(report.loads.elements_loaded, 25 * 100);
    }

    #[test]
    fn test_zero_budget_is_uncached() {
        let mut config = small_config(Strategy::Oracular, Pattern::Random);
        config.cache.maximum_cache_size = 0;
        config.cache.require_minimum_cache = false;
        let report = run(&config).unwrap();
        assert_eq!(report.capacity, 0);
        assert_eq!(report.uncached_requests, 250);
        assert_eq!(report.loads.allocations, 0);
        assert_eq!(report.loads.elements_loaded, 250 * 10);
    }
}
