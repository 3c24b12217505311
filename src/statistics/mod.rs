//! Alignment statistics computed identically on observed data and on every
//! null surrogate.
//!
//! - [`parity`]: even/odd band-power balance and the `P(n)` axis scan.
//! - [`axis`]: principal axes of single multipoles and their separations.
//! - [`alignment`]: catalogs, footprints and direction/pair measures.
//! - [`variance`]: pixel variance inside the ecliptic belt.

pub mod alignment;
pub mod axis;
pub mod parity;
pub mod variance;

pub use alignment::{
    coldest_direction, geodesic_alignment, nodal_distances, pair_axis_alignment, separation_vectors,
    Catalog, CatalogObject, ColdSpotConfig, ColdSpotScan, Footprint, NodalDistance, Smoothing,
};
pub use axis::{
    axis_pair_scan, axis_pair_separation, principal_axis, AxisConfig, AxisPair, DegeneracyPolicy,
    PrincipalAxis,
};
pub use parity::{
    band_power, parity_alignment, parity_at, parity_balance, parity_profile, LocalStatistic,
    ParityAlignment, ParityMeasure, ParityProfile, ParityScan, ParityScanConfig,
};
pub use variance::{belt_mask, region_variance, VarianceBeltConfig, JACKKNIFE_GALACTIC_LAT_DEG};
