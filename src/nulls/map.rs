//! Spectrum-preserving surrogate maps.
//!
//! The observed map is analyzed once into `a_lm`. Each surrogate is a new
//! coefficient set with the same power spectrum, synthesized back onto the
//! observed grid with the observed mask.
//!
//! Redrawing phases alone keeps every `|a_lm|` tied to the observed frame:
//! the zonal power `|a_l0|²` stays with the coordinate pole, so the
//! surrogates are not statistically isotropic. The default null therefore
//! follows the phase redraw with a uniformly random rotation of the whole
//! coefficient set, which spreads the power over all orientations while
//! keeping every `C_l`.
//!
//! With kinematic isolation the synthesis band starts at l = 2, so neither
//! the monopole nor the dipole reaches a surrogate. The observed map passes
//! through the same band filter, so observed and surrogate statistics are
//! computed on identically prepared maps.

use std::f64::consts::TAU;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::RngExt;
use rand_distr::{Distribution, Normal};
use tracing::info;

use crate::config::RunConfig;
use crate::error::{NullTestError, Result, Stage};
use crate::geometry::random_rotation;
use crate::harmonics::{HarmonicBasis, HarmonicCoefficients, HarmonicRotator, Multipole};
use crate::sky::SkyMap;

/// How surrogate coefficients are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapNull {
    /// Redraw the phases, then rotate the coefficient set by a uniformly
    /// random rotation. Preserves `C_l` exactly and has no preferred axis.
    #[default]
    IsotropicPhaseRandomization,
    /// Keep every `|a_lm|`, redraw the phases. Preserves `C_l` exactly but
    /// leaves the zonal power `|a_l0|²` aligned with the frame pole.
    PhaseRandomization,
    /// Fresh isotropic Gaussian coefficients with variance `C_l` per mode.
    /// Preserves `C_l` only in expectation (cosmic variance included).
    GaussianRealization,
}

impl MapNull {
    /// Every surrogate has exactly the observed `C_l`.
    pub fn preserves_spectrum_exactly(self) -> bool {
        !matches!(self, MapNull::GaussianRealization)
    }
}

/// Uniform phases at fixed magnitudes.
///
/// For `m > 0` the phase is uniform on `[0, 2π)` and `a_{l,-m}` follows by
/// conjugation. `a_l0` must stay real, so it keeps its magnitude and gets a
/// random sign.
pub fn randomize_phases(coeffs: &HarmonicCoefficients, rng: &mut StdRng) -> HarmonicCoefficients {
    coeffs.map_multipoles(|mp| {
        let l = mp.l();
        let mut half = Vec::with_capacity(l as usize + 1);
        let a0 = mp.get(0).re.abs();
        half.push(Complex64::new(if rng.random::<bool>() { a0 } else { -a0 }, 0.0));
        for m in 1..=l as i32 {
            let phase = rng.random::<f64>() * TAU;
            half.push(Complex64::from_polar(mp.get(m).norm(), phase));
        }
        Multipole::from_nonnegative_unchecked(l, &half)
    })
}

/// Phase redraw followed by a uniformly random rotation.
///
/// The rotation is drawn after the phases, from the same generator.
pub fn isotropic_phases(
    coeffs: &HarmonicCoefficients,
    rotator: &HarmonicRotator,
    rng: &mut StdRng,
) -> Result<HarmonicCoefficients> {
    let shuffled = randomize_phases(coeffs, rng);
    let rotation = random_rotation(rng);
    rotator.rotate(&shuffled, &rotation)
}

/// Isotropic Gaussian coefficients for the spectrum `C_l`, `l = 0..spectrum.len()`.
///
/// `a_l0 ~ N(0, C_l)`; for `m > 0` the real and imaginary parts are each
/// `N(0, C_l / 2)`, so `E|a_lm|² = C_l` for every m.
pub fn gaussian_realization(spectrum: &[f64], rng: &mut StdRng) -> Result<HarmonicCoefficients> {
    if let Some((l, c)) = spectrum.iter().enumerate().find(|(_, c)| !(c.is_finite() && **c >= 0.0)) {
        return Err(NullTestError::input_shape(
            Stage::NullGeneration,
            format!("spectrum C_{l} = {c} is not a finite non-negative power"),
        ));
    }
    let multipoles = spectrum
        .iter()
        .enumerate()
        .map(|(l, &cl)| {
            let l = l as u32;
            let normal = |var: f64| {
                Normal::new(0.0, var.sqrt())
                    .map_err(|e| NullTestError::input_shape(Stage::NullGeneration, e.to_string()))
            };
            let axial = normal(cl)?;
            let sectoral = normal(cl / 2.0)?;
            let mut half = Vec::with_capacity(l as usize + 1);
            half.push(Complex64::new(axial.sample(rng), 0.0));
            for _ in 1..=l {
                half.push(Complex64::new(sectoral.sample(rng), sectoral.sample(rng)));
            }
            Ok(Multipole::from_nonnegative_unchecked(l, &half))
        })
        .collect::<Result<Vec<_>>>()?;
    HarmonicCoefficients::new(multipoles)
}

/// Generates surrogate maps for one observed map.
///
/// Holds only immutable state after construction, so a shared reference can
/// be used from every worker thread.
#[derive(Debug, Clone)]
pub struct MapNullGenerator {
    basis: HarmonicBasis,
    observed: HarmonicCoefficients,
    spectrum: Vec<f64>,
    template: SkyMap,
    l_lo: u32,
    l_hi: u32,
    strategy: MapNull,
    rotator: Option<HarmonicRotator>,
}

impl MapNullGenerator {
    /// Analyze `map` over `l = 0..=l_max` and fix the synthesis band.
    pub fn new(map: &SkyMap, config: &RunConfig) -> Result<Self> {
        map.require_valid(config.min_valid_pixels)?;
        let l_lo = config.effective_l_min();
        let l_hi = config.l_max;
        if l_lo > l_hi {
            return Err(NullTestError::invalid_config(format!(
                "synthesis band [{l_lo}, {l_hi}] is empty"
            )));
        }
        let basis = HarmonicBasis::new(map.grid(), l_hi)?;
        let observed = basis.analyze(map)?;
        let spectrum = match &config.model_spectrum {
            Some(model) if config.map_null == MapNull::GaussianRealization => {
                if model.len() <= l_hi as usize {
                    return Err(NullTestError::invalid_config(format!(
                        "model spectrum has {} entries, l_max = {l_hi} needs {}",
                        model.len(),
                        l_hi + 1
                    )));
                }
                model[..=l_hi as usize].to_vec()
            }
            _ => observed.spectrum(),
        };
        let rotator = match config.map_null {
            MapNull::IsotropicPhaseRandomization => Some(HarmonicRotator::new(&basis)?),
            _ => None,
        };
        info!(
            "Map null generator: l in [{}, {}], {} of {} pixels valid, {:?}",
            l_lo,
            l_hi,
            map.valid_count(),
            map.grid().npix(),
            config.map_null
        );
        Ok(Self {
            basis,
            observed,
            spectrum,
            template: map.clone(),
            l_lo,
            l_hi,
            strategy: config.map_null,
            rotator,
        })
    }

    /// Fitted coefficients of the observed map, `l = 0..=l_max`.
    pub fn observed_coefficients(&self) -> &HarmonicCoefficients {
        &self.observed
    }

    /// Spectrum the surrogates preserve: the observed `C_l`, or the model
    /// spectrum for Gaussian realizations when one is configured.
    pub fn spectrum(&self) -> &[f64] {
        &self.spectrum
    }

    pub fn strategy(&self) -> MapNull {
        self.strategy
    }

    /// Inclusive multipole band used for synthesis.
    pub fn band(&self) -> (u32, u32) {
        (self.l_lo, self.l_hi)
    }

    pub fn basis(&self) -> &HarmonicBasis {
        &self.basis
    }

    /// The observed map after the same band filter the surrogates receive.
    pub fn observed_map(&self) -> Result<SkyMap> {
        self.basis
            .synthesize_like(&self.observed, self.l_lo, self.l_hi, &self.template)
    }

    /// Surrogate coefficients over `l = 0..=l_max` (band applied at synthesis).
    pub fn surrogate_coefficients(&self, rng: &mut StdRng) -> Result<HarmonicCoefficients> {
        match self.strategy {
            MapNull::IsotropicPhaseRandomization => {
                let rotator = self.rotator.as_ref().ok_or_else(|| {
                    NullTestError::invalid_config("isotropic phase randomization built without a rotator")
                })?;
                isotropic_phases(&self.observed, rotator, rng)
            }
            MapNull::PhaseRandomization => Ok(randomize_phases(&self.observed, rng)),
            MapNull::GaussianRealization => gaussian_realization(&self.spectrum, rng),
        }
    }

    /// One surrogate map on the observed grid, frame and mask.
    pub fn surrogate(&self, rng: &mut StdRng) -> Result<SkyMap> {
        let coeffs = self.surrogate_coefficients(rng)?;
        self.basis
            .synthesize_like(&coeffs, self.l_lo, self.l_hi, &self.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CoordinateFrame;
    use crate::sky::SkyGrid;
    use rand::SeedableRng;

    fn random_coeffs(l_max: u32, rng: &mut StdRng) -> HarmonicCoefficients {
        let spectrum: Vec<f64> = (0..=l_max).map(|l| 1.0 / (1.0 + l as f64)).collect();
        gaussian_realization(&spectrum, rng).unwrap()
    }

    #[test]
    fn phase_randomization_keeps_every_magnitude() {
        let mut rng = StdRng::seed_from_u64(1);
        let coeffs = random_coeffs(6, &mut rng);
        let surrogate = randomize_phases(&coeffs, &mut rng);
        for (a, b) in coeffs.multipoles().iter().zip(surrogate.multipoles()) {
            for m in -(a.l() as i32)..=a.l() as i32 {
                assert!((a.get(m).norm() - b.get(m).norm()).abs() < 1e-12);
            }
            // The surrogate passes full validation, reality included.
            assert!(Multipole::new(b.l(), b.coefficients().to_vec()).is_ok());
        }
        assert_ne!(coeffs, surrogate);
    }

    #[test]
    fn gaussian_realization_matches_spectrum_on_average() {
        let mut rng = StdRng::seed_from_u64(2);
        let spectrum = vec![0.0, 0.0, 4.0, 2.0];
        let n = 2000;
        let mut mean = vec![0.0; spectrum.len()];
        for _ in 0..n {
            let c = gaussian_realization(&spectrum, &mut rng).unwrap();
            for (acc, cl) in mean.iter_mut().zip(c.spectrum()) {
                *acc += cl / n as f64;
            }
        }
        for (l, (&got, &want)) in mean.iter().zip(&spectrum).enumerate().skip(2) {
            // Relative scatter of a C_l estimate is sqrt(2/(2l+1)) per draw.
            assert!((got - want).abs() / want < 0.05, "l={l}: {got} vs {want}");
        }
        assert_eq!(mean[0], 0.0);
    }

    #[test]
    fn negative_spectrum_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = gaussian_realization(&[1.0, -0.5], &mut rng).unwrap_err();
        assert_eq!(err.stage(), Stage::NullGeneration);
    }

    #[test]
    fn isolation_removes_monopole_and_dipole() {
        let mut rng = StdRng::seed_from_u64(4);
        let grid = SkyGrid::new(8).unwrap();
        let basis = HarmonicBasis::new(&grid, 5).unwrap();
        let coeffs = random_coeffs(5, &mut rng);
        let values: Vec<f64> = basis
            .synthesize(&coeffs, 0, 5)
            .unwrap()
            .iter()
            .zip(grid.centers())
            .map(|(t, d)| t + 100.0 + 50.0 * d.as_vector().x)
            .collect();
        let map = SkyMap::unmasked(grid, CoordinateFrame::Galactic, values).unwrap();

        let config = RunConfig {
            l_max: 5,
            kinematic_isolation: true,
            ..Default::default()
        };
        let generator = MapNullGenerator::new(&map, &config).unwrap();
        assert_eq!(generator.band(), (2, 5));
        let check = |m: &SkyMap| {
            let fitted = generator.basis().analyze(m).unwrap();
            assert!(fitted.spectrum()[0] < 1e-18);
            assert!(fitted.spectrum()[1] < 1e-18);
        };
        check(&generator.observed_map().unwrap());
        check(&generator.surrogate(&mut rng).unwrap());
    }

    fn axial_fraction(c: &HarmonicCoefficients) -> f64 {
        let mp = c.multipole(1).unwrap();
        let zonal = mp.get(0).norm_sqr();
        zonal / (zonal + 2.0 * mp.get(1).norm_sqr())
    }

    #[test]
    fn isotropic_null_spreads_an_axial_dipole_over_the_sky() {
        let mut rng = StdRng::seed_from_u64(5);
        let grid = SkyGrid::new(4).unwrap();
        let basis = HarmonicBasis::new(&grid, 2).unwrap();
        let rotator = HarmonicRotator::new(&basis).unwrap();
        let dipole = HarmonicCoefficients::zeros(2)
            .with_multipole(Multipole::from_nonnegative(1, &[Complex64::new(2.0, 0.0), Complex64::new(0.0, 0.0)]).unwrap())
            .unwrap();

        // Phases alone never move power out of m = 0.
        for _ in 0..20 {
            assert!((axial_fraction(&randomize_phases(&dipole, &mut rng)) - 1.0).abs() < 1e-12);
        }

        // A random axis u gives fraction u_z², mean 1/3.
        let n = 2000;
        let mut mean = 0.0;
        for _ in 0..n {
            let s = isotropic_phases(&dipole, &rotator, &mut rng).unwrap();
            assert!((s.spectrum()[1] - dipole.spectrum()[1]).abs() < 1e-10);
            mean += axial_fraction(&s) / n as f64;
        }
        assert!((mean - 1.0 / 3.0).abs() < 0.03, "mean axial fraction {mean}");
    }

    #[test]
    fn default_null_keeps_the_band_spectrum() {
        let mut rng = StdRng::seed_from_u64(6);
        let grid = SkyGrid::new(8).unwrap();
        let basis = HarmonicBasis::new(&grid, 6).unwrap();
        let values = basis.synthesize(&random_coeffs(6, &mut rng), 0, 6).unwrap();
        let map = SkyMap::unmasked(grid, CoordinateFrame::Galactic, values).unwrap();
        let config = RunConfig {
            l_max: 6,
            ..Default::default()
        };
        assert_eq!(config.map_null, MapNull::IsotropicPhaseRandomization);
        let generator = MapNullGenerator::new(&map, &config).unwrap();
        let observed = basis.analyze(&generator.observed_map().unwrap()).unwrap().spectrum();
        let surrogate = basis.analyze(&generator.surrogate(&mut rng).unwrap()).unwrap().spectrum();
        for l in 2..=6 {
            assert!(
                (observed[l] - surrogate[l]).abs() < 1e-9 * observed[l].max(1e-6),
                "l={l}: {} vs {}",
                observed[l],
                surrogate[l]
            );
        }
    }

    #[test]
    fn model_spectrum_must_cover_l_max() {
        let mut rng = StdRng::seed_from_u64(7);
        let grid = SkyGrid::new(8).unwrap();
        let basis = HarmonicBasis::new(&grid, 4).unwrap();
        let values = basis.synthesize(&random_coeffs(4, &mut rng), 0, 4).unwrap();
        let map = SkyMap::unmasked(grid, CoordinateFrame::Galactic, values).unwrap();
        let mut config = RunConfig {
            l_max: 4,
            map_null: MapNull::GaussianRealization,
            model_spectrum: Some(vec![0.0, 0.0, 1.0, 1.0]),
            ..Default::default()
        };
        let err = MapNullGenerator::new(&map, &config).unwrap_err();
        assert!(matches!(err, NullTestError::InvalidConfig { .. }));

        config.model_spectrum = Some(vec![0.0, 0.0, 1.0, 0.5, 0.25, 9.0]);
        let generator = MapNullGenerator::new(&map, &config).unwrap();
        assert_eq!(generator.spectrum(), &[0.0, 0.0, 1.0, 0.5, 0.25]);
    }
}
