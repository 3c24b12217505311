//! Null generators: randomized surrogates that keep the invariants of the
//! observed data while destroying its orientation.

pub mod catalog;
pub mod ensemble;
pub mod map;

pub use catalog::CatalogShuffle;
pub use ensemble::{
    run_ensemble, run_ensemble_checkpointed, run_ensemble_columns, surrogate_rng, surrogate_seed, EnsembleCheckpoint,
    NullEnsemble,
};
pub use map::{gaussian_realization, isotropic_phases, randomize_phases, MapNull, MapNullGenerator};
