//! # isonull
//!
//! Monte Carlo **null tests for cosmological anisotropy alignments** written
//! in Rust.
//!
//! Given a pixelized CMB-like sky map or an object catalog, `isonull`
//! measures how strongly a feature of the data lines up with a Solar-System
//! reference axis (Solar spin axis, ecliptic poles, equinox nodes, CMB
//! dipole) and asks how often randomized skies or catalogs line up at least
//! as well.
//!
//! ## Features
//!
//! - **Point-parity scan**: the `P(n)` profile over candidate axes, and the
//!   even/odd band-power balance with per-band tomography
//! - **Principal axes**: per-multipole preferred axes with explicit sign and
//!   degeneracy conventions, plus quadrupole/octopole coherence
//! - **Spectrum-preserving nulls**: harmonic phase randomization followed by
//!   a random rotation (exact `C_l`, no preferred axis) or Gaussian
//!   realizations, with kinematic isolation of l = 0, 1
//! - **Ecliptic variance**: fluctuation level inside the ecliptic belt, with
//!   a Galactic jackknife, and a mask ladder for the quadrupole/octopole
//!   alignment
//! - **Catalog shuffles**: rigid rotation, footprint resampling, azimuthal
//!   spin and scrambling, each preserving a stated property
//! - **Reproducible ensembles**: per-surrogate seeded RNGs, identical output
//!   for any thread count, resumable rkyv checkpoints for long custom runs
//!
//! ## Example
//!
//! ```no_run
//! use isonull::{
//!     parity_solar_alignment, CoordinateFrame, ReferenceAxis, ReferenceFrame, RunConfig,
//!     SkyGrid, SkyMap,
//! };
//!
//! let grid = SkyGrid::new(16).unwrap();
//! let values = vec![0.0; grid.npix()]; // from an external loader
//! let map = SkyMap::unmasked(grid, CoordinateFrame::Icrs, values).unwrap();
//!
//! let config = RunConfig {
//!     ensemble_size: 1000,
//!     galactic_cut_deg: 20.0,
//!     ..Default::default()
//! };
//! let frame = ReferenceFrame::j2000();
//! let result = parity_solar_alignment(&map, &frame, ReferenceAxis::SolarSpin, &config).unwrap();
//! println!("{}: p {}", result.test, result.p_value);
//! ```
//!
//! ## Method
//!
//! 1. **Preparation**: apply the Galactic cut, fit `a_lm` up to `l_max` by
//!    least squares over the valid pixels
//! 2. **Observed statistic**: computed on the band-filtered observed map (or
//!    the catalog as given)
//! 3. **Null ensemble**: N surrogates, each from its own seeded RNG, put
//!    through exactly the same statistic
//! 4. **Significance**: the fraction of surrogates at least as extreme,
//!    reported as a bound when none or all are
//!

pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod harmonics;
pub mod nulls;
pub mod pipeline;
pub mod significance;
pub mod sky;
pub mod statistics;

pub use config::RunConfig;
pub use error::{NullTestError, Result, Stage};
pub use frame::{CoordinateFrame, ReferenceAxis, ReferenceFrame};
pub use geometry::{angular_separation, axis_separation, canonical_axis, Direction};
pub use harmonics::{HarmonicBasis, HarmonicCoefficients, HarmonicRotator, Multipole};
pub use nulls::{CatalogShuffle, MapNull, MapNullGenerator, NullEnsemble};
pub use pipeline::{
    cold_spot_alignment, ecliptic_variance, galactic_jackknife, harmonic_axis_coherence,
    mask_ladder, parity_balance_test, parity_solar_alignment, parity_tomography, quasar_alignment,
    MaskLadderStep, Statistic, TestResult,
};
pub use significance::{evaluate, evaluate_ensemble, Extremity, NullSummary, PValue, SignificanceResult};
pub use sky::{SkyGrid, SkyMap};
pub use statistics::{Catalog, CatalogObject, Footprint};

// Commonly used types
// Everything is f64: eigen-decompositions of nearly degenerate tensors need
// the precision.
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Rotation = nalgebra::Rotation3<f64>;
