//! Parallel, reproducible null ensembles.
//!
//! Surrogate `i` draws all of its randomness from its own `StdRng`, seeded by
//! mixing the run's base seed with `i`. Nothing random is shared between
//! surrogates, so the ensemble is identical for any thread count or
//! scheduling order, and a checkpointed run resumed halfway produces the same
//! values as an uninterrupted one.
//!
//! The investigation pipelines run their ensembles in memory. Checkpointing
//! is a library entry point for long custom runs: wrap the statistic closure
//! of any pipeline (a [`MapNullGenerator`](crate::nulls::MapNullGenerator)
//! surrogate followed by a statistic, say) in [`run_ensemble_checkpointed`].

use std::ops::Range;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NullTestError, Result, Stage};

/// Seed of surrogate `index` in a run with base seed `base` (SplitMix64).
pub fn surrogate_seed(base: u64, index: usize) -> u64 {
    let mut z = base.wrapping_add((index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Fresh generator for surrogate `index`.
pub fn surrogate_rng(base: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(surrogate_seed(base, index))
}

/// Statistic values of the usable surrogates, in surrogate-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct NullEnsemble {
    requested: usize,
    values: Vec<f64>,
    excluded: Vec<usize>,
}

impl NullEnsemble {
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of surrogates that produced a value; the p-value denominator.
    pub fn effective_size(&self) -> usize {
        self.values.len()
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Indices of surrogates dropped after a recoverable failure.
    pub fn excluded_indices(&self) -> &[usize] {
        &self.excluded
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// One ensemble per statistic column, all sharing the exclusions.
    fn finish<const K: usize>(requested: usize, rows: Vec<[f64; K]>, excluded: Vec<usize>) -> Result<[Self; K]> {
        if rows.is_empty() {
            return Err(NullTestError::EmptyEnsemble {
                stage: Stage::NullGeneration,
                test: None,
                requested,
                excluded: excluded.len(),
            });
        }
        if !excluded.is_empty() {
            warn!(
                "{} of {} surrogates excluded; effective ensemble size {}",
                excluded.len(),
                requested,
                rows.len()
            );
        }
        Ok(std::array::from_fn(|k| Self {
            requested,
            values: rows.iter().map(|row| row[k]).collect(),
            excluded: excluded.clone(),
        }))
    }
}

fn evaluate_range<F, const K: usize>(range: Range<usize>, seed: u64, f: &F) -> Vec<Result<[f64; K]>>
where
    F: Fn(usize, &mut StdRng) -> Result<[f64; K]> + Sync,
{
    range
        .into_par_iter()
        .map(|i| {
            let mut rng = surrogate_rng(seed, i);
            let row = f(i, &mut rng)?;
            match row.iter().find(|v| !v.is_finite()) {
                None => Ok(row),
                Some(v) => Err(NullTestError::input_shape(
                    Stage::NullGeneration,
                    format!("surrogate {i} produced non-finite statistic {v}"),
                )),
            }
        })
        .collect()
}

/// Fold one batch of results (starting at surrogate `start`) into the
/// running ensemble. The first fatal error, by index, aborts.
fn absorb<const K: usize>(
    start: usize,
    results: Vec<Result<[f64; K]>>,
    rows: &mut Vec<[f64; K]>,
    excluded: &mut Vec<usize>,
) -> Result<()> {
    for (offset, result) in results.into_iter().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) if e.is_recoverable() => {
                debug!("Surrogate {} excluded: {}", start + offset, e);
                excluded.push(start + offset);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Evaluate `f` on `size` surrogates in parallel.
///
/// `f(i, rng)` builds surrogate `i` from `rng` and returns its statistic.
/// Surrogates failing with a recoverable error (degenerate statistic, mask
/// exhaustion) are excluded and counted; any other error aborts the run.
pub fn run_ensemble<F>(size: usize, seed: u64, f: F) -> Result<NullEnsemble>
where
    F: Fn(usize, &mut StdRng) -> Result<f64> + Sync,
{
    let [ensemble] = run_ensemble_columns(size, seed, |i, rng| f(i, rng).map(|v| [v]))?;
    Ok(ensemble)
}

/// [`run_ensemble`] for `K` statistics measured on the same surrogates.
///
/// Each surrogate is built once and yields one value per column. A
/// surrogate excluded for one column is excluded for all of them, so the
/// `K` ensembles have equal effective sizes.
pub fn run_ensemble_columns<F, const K: usize>(size: usize, seed: u64, f: F) -> Result<[NullEnsemble; K]>
where
    F: Fn(usize, &mut StdRng) -> Result<[f64; K]> + Sync,
{
    info!(
        "Running null ensemble: {} surrogates, {} statistic(s), seed {}",
        size, K, seed
    );
    let results = evaluate_range(0..size, seed, &f);
    let mut rows = Vec::with_capacity(size);
    let mut excluded = Vec::new();
    absorb(0, results, &mut rows, &mut excluded)?;
    NullEnsemble::finish(size, rows, excluded)
}

// ── Checkpointing ───────────────────────────────────────────────────────────

/// Progress of a checkpointed ensemble, serialized with rkyv.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct EnsembleCheckpoint {
    pub seed: u64,
    pub size: u64,
    /// Surrogates `0..next_index` have been evaluated.
    pub next_index: u64,
    /// Values of the usable surrogates below `next_index`, in index order.
    pub values: Vec<f64>,
    /// Excluded surrogate indices below `next_index`.
    pub excluded: Vec<u64>,
}

impl EnsembleCheckpoint {
    fn fresh(seed: u64, size: usize) -> Self {
        Self {
            seed,
            size: size as u64,
            next_index: 0,
            values: Vec::new(),
            excluded: Vec::new(),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)?.to_vec();
        std::fs::write(path.as_ref(), &bytes)?;
        debug!(
            "Saved ensemble checkpoint to {} ({} of {} done)",
            path.as_ref().display(),
            self.next_index,
            self.size
        );
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        // Archived f64/u64 fields need aligned storage.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);
        let checkpoint = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        info!(
            "Loaded ensemble checkpoint: {} of {} surrogates done",
            checkpoint.next_index, checkpoint.size
        );
        Ok(checkpoint)
    }
}

/// [`run_ensemble`] in chunks of `chunk_size`, saving progress to
/// `checkpoint_path` after every chunk and resuming from it when present.
///
/// Not used by the built-in pipelines; callers with long runs invoke it
/// directly with their own statistic closure.
///
/// A checkpoint written for a different seed or size is rejected with
/// `InvalidConfig`.
pub fn run_ensemble_checkpointed<F, P>(
    size: usize,
    seed: u64,
    chunk_size: usize,
    checkpoint_path: P,
    f: F,
) -> anyhow::Result<NullEnsemble>
where
    F: Fn(usize, &mut StdRng) -> Result<f64> + Sync,
    P: AsRef<Path>,
{
    let path = checkpoint_path.as_ref();
    if chunk_size == 0 {
        return Err(NullTestError::invalid_config("checkpoint chunk size must be > 0").into());
    }
    let mut checkpoint = if path.exists() {
        let cp = EnsembleCheckpoint::load_from_file(path)?;
        if cp.seed != seed || cp.size != size as u64 {
            return Err(NullTestError::invalid_config(format!(
                "checkpoint {} is for seed {} / size {}, run has seed {} / size {}",
                path.display(),
                cp.seed,
                cp.size,
                seed,
                size
            ))
            .into());
        }
        cp
    } else {
        EnsembleCheckpoint::fresh(seed, size)
    };

    let mut rows: Vec<[f64; 1]> = checkpoint.values.iter().map(|&v| [v]).collect();
    let mut excluded: Vec<usize> = checkpoint.excluded.iter().map(|&i| i as usize).collect();
    let mut next = checkpoint.next_index as usize;
    let single = |i: usize, rng: &mut StdRng| f(i, rng).map(|v| [v]);
    while next < size {
        let end = (next + chunk_size).min(size);
        let results = evaluate_range(next..end, seed, &single);
        absorb(next, results, &mut rows, &mut excluded)?;
        next = end;

        checkpoint.next_index = next as u64;
        checkpoint.values = rows.iter().map(|row| row[0]).collect();
        checkpoint.excluded = excluded.iter().map(|&i| i as u64).collect();
        checkpoint.save_to_file(path)?;
        info!("Null ensemble progress: {}/{}", next, size);
    }
    let [ensemble] = NullEnsemble::finish(size, rows, excluded)?;
    Ok(ensemble)
}
