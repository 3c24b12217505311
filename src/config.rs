//! Run configuration shared by every investigation pipeline.

use tracing::warn;

use crate::error::{NullTestError, Result};
use crate::nulls::{CatalogShuffle, MapNull};
use crate::statistics::{AxisConfig, ColdSpotConfig, ParityScanConfig, VarianceBeltConfig};

/// Smallest ensemble a run accepts.
pub const MIN_ENSEMBLE_SIZE: usize = 100;

/// Below this ensemble size a warning is logged: p-values resolve only to
/// `1/N`.
pub const RECOMMENDED_ENSEMBLE_SIZE: usize = 1000;

/// Configuration of one null-test run.
///
/// Identical configuration, inputs and `seed` reproduce a run exactly,
/// regardless of thread count.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunConfig {
    /// Number of surrogates requested. Default 1000, minimum 100.
    pub ensemble_size: usize,
    /// Base seed; surrogate `i` draws from `surrogate_rng(seed, i)`. Default 2025.
    pub seed: u64,
    /// Lowest multipole kept in map surrogates and the filtered observed map.
    /// Default 0.
    pub l_min: u32,
    /// Highest multipole fitted and synthesized. Must stay below
    /// `2 · nside` of the map grid. Default 10.
    pub l_max: u32,
    /// Exclude the monopole and kinematic dipole (raises `l_min` to 2).
    /// Default true.
    pub kinematic_isolation: bool,
    /// Galactic latitude below which pixels are masked, degrees. 0 keeps
    /// the whole sky. Default 0.
    pub galactic_cut_deg: f64,
    /// Fewest valid pixels a map must keep for harmonic analysis. Default 100.
    pub min_valid_pixels: usize,
    /// Surrogate strategy for maps. Default `IsotropicPhaseRandomization`.
    pub map_null: MapNull,
    /// Theory `C_l`, `l = 0..`, drawn from by `GaussianRealization` in place
    /// of the observed spectrum. Must cover `l_max`. Default `None`.
    #[serde(default)]
    pub model_spectrum: Option<Vec<f64>>,
    /// Surrogate strategy for catalogs. Default `RigidRotation`.
    pub shuffle: CatalogShuffle,
    pub parity: ParityScanConfig,
    pub axis: AxisConfig,
    pub cold_spot: ColdSpotConfig,
    pub belt: VarianceBeltConfig,
    /// Quadrupole/octopole separation below which a mask-ladder surrogate
    /// counts as aligned, degrees. Default 10.
    pub alignment_threshold_deg: f64,
    /// Catalog size limit for the O(n²) pair statistic. Default 2000.
    pub max_pair_objects: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ensemble_size: RECOMMENDED_ENSEMBLE_SIZE,
            seed: 2025,
            l_min: 0,
            l_max: 10,
            kinematic_isolation: true,
            galactic_cut_deg: 0.0,
            min_valid_pixels: 100,
            map_null: MapNull::default(),
            model_spectrum: None,
            shuffle: CatalogShuffle::default(),
            parity: ParityScanConfig::default(),
            axis: AxisConfig::default(),
            cold_spot: ColdSpotConfig::default(),
            belt: VarianceBeltConfig::default(),
            alignment_threshold_deg: 10.0,
            max_pair_objects: 2000,
        }
    }
}

impl RunConfig {
    /// `l_min`, raised to 2 under kinematic isolation.
    pub fn effective_l_min(&self) -> u32 {
        if self.kinematic_isolation {
            self.l_min.max(2)
        } else {
            self.l_min
        }
    }

    /// Check the run settings before any surrogate is drawn.
    pub fn validate(&self) -> Result<()> {
        if self.ensemble_size < MIN_ENSEMBLE_SIZE {
            return Err(NullTestError::invalid_config(format!(
                "ensemble size {} below the minimum of {}",
                self.ensemble_size, MIN_ENSEMBLE_SIZE
            )));
        }
        if self.ensemble_size < RECOMMENDED_ENSEMBLE_SIZE {
            warn!(
                "Ensemble size {} below {}: p-values resolve only to {:.4}",
                self.ensemble_size,
                RECOMMENDED_ENSEMBLE_SIZE,
                1.0 / self.ensemble_size as f64
            );
        }
        if self.effective_l_min() > self.l_max {
            return Err(NullTestError::invalid_config(format!(
                "multipole band [{}, {}] is empty",
                self.effective_l_min(),
                self.l_max
            )));
        }
        if !(0.0..90.0).contains(&self.galactic_cut_deg) {
            return Err(NullTestError::invalid_config(format!(
                "galactic cut {} deg outside [0, 90)",
                self.galactic_cut_deg
            )));
        }
        if self.model_spectrum.is_some() && self.map_null != MapNull::GaussianRealization {
            warn!("Model spectrum set but map null is {:?}; it will not be used", self.map_null);
        }
        if let Some(model) = &self.model_spectrum {
            if model.len() <= self.l_max as usize {
                return Err(NullTestError::invalid_config(format!(
                    "model spectrum has {} entries, l_max = {} needs {}",
                    model.len(),
                    self.l_max,
                    self.l_max + 1
                )));
            }
            if let Some(c) = model.iter().find(|c| !(c.is_finite() && **c >= 0.0)) {
                return Err(NullTestError::invalid_config(format!(
                    "model spectrum entry {c} is not a finite non-negative power"
                )));
            }
        }
        if !(self.alignment_threshold_deg > 0.0 && self.alignment_threshold_deg <= 90.0) {
            return Err(NullTestError::invalid_config(format!(
                "alignment threshold {} deg outside (0, 90]",
                self.alignment_threshold_deg
            )));
        }
        self.belt.validate()?;
        let tol = self.axis.degeneracy_tolerance;
        if tol.is_nan() || tol < 0.0 {
            return Err(NullTestError::invalid_config(format!(
                "degeneracy tolerance {tol} must be non-negative"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_l_min(), 2);
    }

    #[test]
    fn small_ensemble_rejected() {
        let config = RunConfig {
            ensemble_size: 99,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, NullTestError::InvalidConfig { .. }));
        assert!(RunConfig {
            ensemble_size: 100,
            ..Default::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn isolation_raises_l_min() {
        let mut config = RunConfig {
            l_min: 0,
            l_max: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.kinematic_isolation = false;
        assert_eq!(config.effective_l_min(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn galactic_cut_range() {
        let config = RunConfig {
            galactic_cut_deg: 90.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrips_through_json() {
        let config = RunConfig {
            shuffle: CatalogShuffle::DensityResample { max_attempts: 50 },
            model_spectrum: Some(vec![0.0; 11]),
            cold_spot: ColdSpotConfig {
                smoothing: crate::statistics::Smoothing::Gaussian { fwhm_deg: 5.0 },
                max_galactic_lat_deg: Some(-20.0),
            },
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn model_spectrum_is_checked() {
        let mut config = RunConfig {
            l_max: 3,
            model_spectrum: Some(vec![0.0, 0.0, 1.0]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.model_spectrum = Some(vec![0.0, 0.0, 1.0, f64::NAN]);
        assert!(config.validate().is_err());
        config.model_spectrum = Some(vec![0.0, 0.0, 1.0, 0.5]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn threshold_and_belt_are_checked() {
        let config = RunConfig {
            alignment_threshold_deg: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = RunConfig {
            belt: VarianceBeltConfig {
                half_width_deg: 95.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_map_null_is_isotropic() {
        assert_eq!(RunConfig::default().map_null, MapNull::IsotropicPhaseRandomization);
    }
}
