//! Investigation pipelines.
//!
//! Each pipeline validates its inputs, computes the observed statistic,
//! builds a null ensemble with the configured strategy, and reports a
//! [`TestResult`]. Observed and surrogate statistics always go through the
//! same preparation (Galactic cut, multipole band, scan plan).

use tracing::info;

use crate::config::RunConfig;
use crate::error::{NullTestError, Result, Stage};
use crate::frame::{CoordinateFrame, ReferenceAxis, ReferenceFrame};
use crate::geometry::{axis_separation, Direction};
use crate::harmonics::HarmonicCoefficients;
use crate::nulls::{
    gaussian_realization, run_ensemble, run_ensemble_columns, surrogate_seed, MapNullGenerator,
    NullEnsemble,
};
use crate::significance::{evaluate_ensemble, Extremity, NullSummary, PValue};
use crate::sky::{galactic_cut_mask, sky_fraction, SkyMap};
use crate::statistics::{
    axis_pair_separation, belt_mask, coldest_direction, geodesic_alignment, pair_axis_alignment,
    parity_alignment, parity_balance, principal_axis, region_variance, AxisConfig, Catalog,
    ColdSpotScan, ParityAlignment, ParityMeasure, ParityScan, PrincipalAxis, VarianceBeltConfig,
};

/// Value of an observed statistic.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Statistic {
    Scalar(f64),
    Direction(Direction),
}

/// Outcome of one null test.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TestResult {
    pub test: String,
    /// What was measured on the data: a scalar, or a direction whose
    /// separation from the reference is then tested.
    pub observed: Statistic,
    /// Scalar the p-value was computed on.
    pub tested_value: f64,
    pub reference_axis: Option<ReferenceAxis>,
    pub extremity: Extremity,
    pub p_value: PValue,
    pub requested_size: usize,
    pub effective_size: usize,
    pub excluded: usize,
    pub null_summary: NullSummary,
    pub seed: u64,
}

impl TestResult {
    fn from_ensemble(
        test: &str,
        observed: Statistic,
        tested_value: f64,
        reference_axis: Option<ReferenceAxis>,
        extremity: Extremity,
        ensemble: &NullEnsemble,
        seed: u64,
    ) -> Result<Self> {
        let sig = evaluate_ensemble(tested_value, ensemble, extremity)?;
        info!(
            "{}: observed {:.6}, p {} ({} of {} surrogates usable)",
            test, tested_value, sig.p_value, sig.effective_size, sig.requested_size
        );
        Ok(Self {
            test: test.to_string(),
            observed,
            tested_value,
            reference_axis,
            extremity,
            p_value: sig.p_value,
            requested_size: sig.requested_size,
            effective_size: sig.effective_size,
            excluded: sig.excluded,
            null_summary: sig.summary,
            seed,
        })
    }
}

// ── Shared preparation ──────────────────────────────────────────────────────

fn check_frame(expected: CoordinateFrame, actual: CoordinateFrame, what: &str) -> Result<()> {
    if expected != actual {
        return Err(NullTestError::FrameMismatch {
            stage: Stage::Configuration,
            test: None,
            expected: format!("reference frame in {expected}"),
            actual: format!("{what} in {actual}"),
        });
    }
    Ok(())
}

/// Validate the run and apply the Galactic cut of `config` to `map`.
fn prepare_map(map: &SkyMap, frame: &ReferenceFrame, config: &RunConfig) -> Result<SkyMap> {
    config.validate()?;
    check_frame(frame.frame(), map.frame(), "map")?;
    let cut = galactic_cut_mask(
        map.grid(),
        &frame.axis(ReferenceAxis::GalacticNorthPole),
        config.galactic_cut_deg,
    );
    map.clone().with_mask(&cut)
}

// ── Parity / Solar alignment ────────────────────────────────────────────────

/// Point-parity profile of a map tested against one reference axis.
///
/// With `ParityMeasure::Contrast` large values mean the reference axis is
/// unusually parity-dominant (upper tail); with `PeakSeparation` small
/// values mean the profile peak sits close to it (lower tail). `Balance`
/// has no axis and is rejected here; see [`parity_balance_test`].
pub fn parity_solar_alignment(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
) -> Result<TestResult> {
    let name = format!("parity_{}", axis.name());
    run_parity(map, frame, axis, config, &name).map_err(|e| e.with_test(&name))
}

fn axis_measure(alignment: &ParityAlignment, measure: ParityMeasure) -> Result<f64> {
    alignment.measure(measure).ok_or_else(|| {
        NullTestError::invalid_config(format!(
            "{measure:?} is not measured against an axis; use parity_balance_test"
        ))
    })
}

fn run_parity(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
    name: &str,
) -> Result<TestResult> {
    let measure = config.parity.measure;
    if !measure.uses_axis() {
        return Err(NullTestError::invalid_config(format!(
            "{measure:?} is not measured against an axis; use parity_balance_test"
        )));
    }
    let prepared = prepare_map(map, frame, config)?;
    let generator = MapNullGenerator::new(&prepared, config)?;
    let scan = ParityScan::new(prepared.grid(), &config.parity)?;
    let reference = frame.axis(axis);

    let observed = parity_alignment(&generator.observed_map()?, &reference, &scan)?;
    let tested = axis_measure(&observed, measure)?;
    info!(
        "{}: peak {:.1} deg from {}, contrast {:.3}",
        name,
        observed.peak_separation_rad.to_degrees(),
        axis,
        observed.contrast
    );

    let ensemble = run_ensemble(config.ensemble_size, config.seed, |_, rng| {
        let surrogate = generator.surrogate(rng)?;
        axis_measure(&parity_alignment(&surrogate, &reference, &scan)?, measure)
    })?;
    let extremity = match measure {
        ParityMeasure::PeakSeparation => Extremity::Lower,
        _ => Extremity::Upper,
    };
    TestResult::from_ensemble(
        name,
        Statistic::Scalar(tested),
        tested,
        Some(axis),
        extremity,
        &ensemble,
        config.seed,
    )
}

/// Even/odd band-power balance of the map over the configured band,
/// against Gaussian realizations. Either tail is extreme.
///
/// The balance is a function of the `C_l` alone, so the null must redraw
/// the spectrum: only `MapNull::GaussianRealization` is accepted, ideally
/// with a model spectrum.
pub fn parity_balance_test(map: &SkyMap, frame: &ReferenceFrame, config: &RunConfig) -> Result<TestResult> {
    let name = format!(
        "parity_balance_l{}_{}",
        config.effective_l_min().max(2),
        config.l_max
    );
    run_parity_balance(map, frame, config, &name).map_err(|e| e.with_test(&name))
}

fn run_parity_balance(
    map: &SkyMap,
    frame: &ReferenceFrame,
    config: &RunConfig,
    name: &str,
) -> Result<TestResult> {
    if config.map_null.preserves_spectrum_exactly() {
        return Err(NullTestError::invalid_config(format!(
            "{:?} keeps every C_l, so the parity balance cannot vary; use GaussianRealization",
            config.map_null
        )));
    }
    let prepared = prepare_map(map, frame, config)?;
    let generator = MapNullGenerator::new(&prepared, config)?;
    let (l_lo, l_hi) = generator.band();
    let observed = parity_balance(generator.observed_coefficients(), l_lo, l_hi)?;
    info!(
        "{}: even/odd balance {:.4} over l in [{}, {}]",
        name,
        observed,
        l_lo.max(2),
        l_hi
    );

    let ensemble = run_ensemble(config.ensemble_size, config.seed, |_, rng| {
        parity_balance(&generator.surrogate_coefficients(rng)?, l_lo, l_hi)
    })?;
    TestResult::from_ensemble(
        name,
        Statistic::Scalar(observed),
        observed,
        None,
        Extremity::TwoSided,
        &ensemble,
        config.seed,
    )
}

/// The configured parity test repeated on each multipole band `(l_lo, l_hi)`.
///
/// Every band is analyzed and nulled on its own, with `l_min`/`l_max`
/// replaced by the band limits. Axis measures are tested against `axis`;
/// `Balance` ignores it.
pub fn parity_tomography(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    bands: &[(u32, u32)],
    config: &RunConfig,
) -> Result<Vec<TestResult>> {
    if bands.is_empty() {
        return Err(NullTestError::invalid_config("parity tomography needs at least one band")
            .with_test("parity_tomography"));
    }
    bands
        .iter()
        .map(|&(lo, hi)| {
            let band = RunConfig {
                l_min: lo,
                l_max: hi,
                ..config.clone()
            };
            if config.parity.measure.uses_axis() {
                let name = format!("parity_{}_l{lo}_{hi}", axis.name());
                run_parity(map, frame, axis, &band, &name).map_err(|e| e.with_test(&name))
            } else {
                let name = format!("parity_balance_l{lo}_{hi}");
                run_parity_balance(map, frame, &band, &name).map_err(|e| e.with_test(&name))
            }
        })
        .collect()
}

// ── Cold spot geometry ──────────────────────────────────────────────────────

/// Distance from the coldest smoothed spot of a map to one reference axis.
/// Small distances are the extreme tail.
pub fn cold_spot_alignment(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
) -> Result<TestResult> {
    let name = format!("cold_spot_{}", axis.name());
    run_cold_spot(map, frame, axis, config, &name).map_err(|e| e.with_test(&name))
}

fn run_cold_spot(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
    name: &str,
) -> Result<TestResult> {
    let prepared = prepare_map(map, frame, config)?;
    let generator = MapNullGenerator::new(&prepared, config)?;
    let scan = ColdSpotScan::new(
        prepared.grid(),
        &config.cold_spot,
        &frame.axis(ReferenceAxis::GalacticNorthPole),
    )?;
    let reference = frame.axis(axis);

    let (spot, _) = coldest_direction(&generator.observed_map()?, &scan)?;
    let distance = geodesic_alignment(&spot, &reference);
    let (lon, lat) = spot.lonlat_deg();
    info!(
        "{}: cold spot at ({:.2}, {:.2}) deg, {:.2} deg from {}",
        name,
        lon,
        lat,
        distance.to_degrees(),
        axis
    );

    let ensemble = run_ensemble(config.ensemble_size, config.seed, |_, rng| {
        let surrogate = generator.surrogate(rng)?;
        let (spot, _) = coldest_direction(&surrogate, &scan)?;
        Ok(geodesic_alignment(&spot, &reference))
    })?;
    TestResult::from_ensemble(
        name,
        Statistic::Direction(spot),
        distance,
        Some(axis),
        Extremity::Lower,
        &ensemble,
        config.seed,
    )
}

// ── Catalog pair alignment ──────────────────────────────────────────────────

/// Mean `|cos|` between catalog pair separations and one reference axis,
/// against shuffled catalogs. Large values are the extreme tail.
pub fn quasar_alignment(
    catalog: &Catalog,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
) -> Result<TestResult> {
    let name = format!("quasar_pairs_{}", axis.name());
    run_quasar(catalog, frame, axis, config, &name).map_err(|e| e.with_test(&name))
}

fn run_quasar(
    catalog: &Catalog,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
    name: &str,
) -> Result<TestResult> {
    config.validate()?;
    check_frame(frame.frame(), catalog.frame(), "catalog")?;
    let reference = frame.axis(axis);
    let observed = pair_axis_alignment(catalog, &reference, config.max_pair_objects)?;
    info!(
        "{}: {} objects, alignment score {:.5} (0.5 random, 1.0 parallel), shuffle {:?}",
        name,
        catalog.len(),
        observed,
        config.shuffle
    );

    let ensemble = run_ensemble(config.ensemble_size, config.seed, |_, rng| {
        let surrogate = config.shuffle.apply(catalog, rng)?;
        pair_axis_alignment(&surrogate, &reference, config.max_pair_objects)
    })?;
    TestResult::from_ensemble(
        name,
        Statistic::Scalar(observed),
        observed,
        Some(axis),
        Extremity::Upper,
        &ensemble,
        config.seed,
    )
}

// ── Harmonic axis coherence ─────────────────────────────────────────────────

fn require_low_band(config: &RunConfig) -> Result<()> {
    let (l_lo, l_hi) = (config.effective_l_min(), config.l_max);
    if l_lo > 2 || l_hi < 3 {
        return Err(NullTestError::invalid_config(format!(
            "multipole band [{l_lo}, {l_hi}] must contain l = 2 and 3"
        )));
    }
    Ok(())
}

fn low_axes(coeffs: &HarmonicCoefficients, config: &AxisConfig) -> Result<(PrincipalAxis, PrincipalAxis)> {
    let multipole = |l: u32| {
        coeffs
            .multipole(l)
            .ok_or_else(|| NullTestError::input_shape(Stage::Statistic, format!("missing l={l}")))
    };
    Ok((
        principal_axis(multipole(2)?, config)?,
        principal_axis(multipole(3)?, config)?,
    ))
}

/// Quadrupole/octopole coherence: the separation of their principal axes,
/// and the separation of each from one reference axis. Returns three
/// results, in that order; small separations are the extreme tail.
///
/// Surrogates whose quadrupole or octopole is degenerate under the
/// configured policy are excluded and counted.
pub fn harmonic_axis_coherence(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
) -> Result<Vec<TestResult>> {
    let name = format!("harmonic_axes_{}", axis.name());
    run_harmonic_axes(map, frame, axis, config).map_err(|e| e.with_test(&name))
}

fn run_harmonic_axes(
    map: &SkyMap,
    frame: &ReferenceFrame,
    axis: ReferenceAxis,
    config: &RunConfig,
) -> Result<Vec<TestResult>> {
    let prepared = prepare_map(map, frame, config)?;
    require_low_band(config)?;
    let generator = MapNullGenerator::new(&prepared, config)?;
    let reference = frame.axis(axis);
    let axis_config = &config.axis;

    let (quad, oct) = low_axes(generator.observed_coefficients(), axis_config)?;
    let pair = axis_pair_separation(&quad, &oct);
    info!(
        "Quadrupole/octopole axes {:.2} deg apart; {:.2} and {:.2} deg from {}",
        pair.to_degrees(),
        axis_separation(&quad.axis, &reference).to_degrees(),
        axis_separation(&oct.axis, &reference).to_degrees(),
        axis
    );

    let [pair_ensemble, quad_ensemble, oct_ensemble] =
        run_ensemble_columns(config.ensemble_size, config.seed, |_, rng| {
            let coeffs = generator.surrogate_coefficients(rng)?;
            let (q, o) = low_axes(&coeffs, axis_config)?;
            Ok([
                axis_pair_separation(&q, &o),
                axis_separation(&q.axis, &reference),
                axis_separation(&o.axis, &reference),
            ])
        })?;

    Ok(vec![
        TestResult::from_ensemble(
            "axis_pair_l2_l3",
            Statistic::Scalar(pair),
            pair,
            None,
            Extremity::Lower,
            &pair_ensemble,
            config.seed,
        )?,
        TestResult::from_ensemble(
            &format!("quadrupole_axis_{}", axis.name()),
            Statistic::Direction(quad.axis),
            axis_separation(&quad.axis, &reference),
            Some(axis),
            Extremity::Lower,
            &quad_ensemble,
            config.seed,
        )?,
        TestResult::from_ensemble(
            &format!("octopole_axis_{}", axis.name()),
            Statistic::Direction(oct.axis),
            axis_separation(&oct.axis, &reference),
            Some(axis),
            Extremity::Lower,
            &oct_ensemble,
            config.seed,
        )?,
    ])
}

// ── Ecliptic variance ───────────────────────────────────────────────────────

/// Pixel variance inside the ecliptic belt of `config.belt`, against map
/// surrogates. Either tail is extreme: a screen near the ecliptic could
/// suppress or add fluctuations.
pub fn ecliptic_variance(map: &SkyMap, frame: &ReferenceFrame, config: &RunConfig) -> Result<TestResult> {
    let name = "ecliptic_variance";
    run_variance(map, frame, &config.belt, config, name).map_err(|e| e.with_test(name))
}

/// [`ecliptic_variance`] with belt pixels closer than `min_abs_lat_deg` to
/// the Galactic plane dropped (conventionally
/// [`JACKKNIFE_GALACTIC_LAT_DEG`](crate::statistics::JACKKNIFE_GALACTIC_LAT_DEG)).
/// A deviation that survives the cut does not come from the Galactic plane.
pub fn galactic_jackknife(
    map: &SkyMap,
    frame: &ReferenceFrame,
    min_abs_lat_deg: f64,
    config: &RunConfig,
) -> Result<TestResult> {
    let name = format!("ecliptic_variance_b{}", min_abs_lat_deg.round());
    let belt = VarianceBeltConfig {
        min_galactic_lat_deg: min_abs_lat_deg,
        ..config.belt.clone()
    };
    run_variance(map, frame, &belt, config, &name).map_err(|e| e.with_test(&name))
}

fn run_variance(
    map: &SkyMap,
    frame: &ReferenceFrame,
    belt: &VarianceBeltConfig,
    config: &RunConfig,
    name: &str,
) -> Result<TestResult> {
    let prepared = prepare_map(map, frame, config)?;
    let region = belt_mask(
        prepared.grid(),
        &frame.axis(ReferenceAxis::NorthEclipticPole),
        &frame.axis(ReferenceAxis::GalacticNorthPole),
        belt,
    )?;
    let generator = MapNullGenerator::new(&prepared, config)?;
    let observed = region_variance(&generator.observed_map()?, &region, belt.min_pixels)?;
    info!(
        "{}: belt |beta| < {} deg, |b| >= {} deg, variance {:.6e}",
        name, belt.half_width_deg, belt.min_galactic_lat_deg, observed
    );

    let ensemble = run_ensemble(config.ensemble_size, config.seed, |_, rng| {
        region_variance(&generator.surrogate(rng)?, &region, belt.min_pixels)
    })?;
    TestResult::from_ensemble(
        name,
        Statistic::Scalar(observed),
        observed,
        Some(ReferenceAxis::NorthEclipticPole),
        Extremity::TwoSided,
        &ensemble,
        config.seed,
    )
}

// ── Mask ladder ─────────────────────────────────────────────────────────────

/// One Galactic cut of the mask ladder.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MaskLadderStep {
    pub cut_deg: f64,
    pub f_sky: f64,
    pub threshold_deg: f64,
    /// Share of surrogates with quadrupole/octopole axes closer than
    /// `threshold_deg`.
    pub fraction_aligned: f64,
    /// Observed axis separation against the surrogates (lower tail).
    pub result: TestResult,
}

/// Quadrupole/octopole alignment under increasing Galactic cuts.
///
/// At every cut the observed map and each surrogate are fitted over the
/// same cut sky. Surrogates are Gaussian realizations of the band spectrum
/// (the model spectrum when one is configured), so a rung shows how often
/// the mask alone yields axes as close as observed. Rung `i` draws from base
/// seed `surrogate_seed(config.seed, i)`.
pub fn mask_ladder(
    map: &SkyMap,
    frame: &ReferenceFrame,
    cuts_deg: &[f64],
    config: &RunConfig,
) -> Result<Vec<MaskLadderStep>> {
    run_mask_ladder(map, frame, cuts_deg, config).map_err(|e| e.with_test("mask_ladder"))
}

fn run_mask_ladder(
    map: &SkyMap,
    frame: &ReferenceFrame,
    cuts_deg: &[f64],
    config: &RunConfig,
) -> Result<Vec<MaskLadderStep>> {
    if cuts_deg.is_empty() {
        return Err(NullTestError::invalid_config("mask ladder needs at least one cut"));
    }
    if let Some(cut) = cuts_deg.iter().find(|c| !(0.0..90.0).contains(*c)) {
        return Err(NullTestError::invalid_config(format!(
            "mask ladder cut {cut} deg outside [0, 90)"
        )));
    }
    let prepared = prepare_map(map, frame, config)?;
    require_low_band(config)?;
    let generator = MapNullGenerator::new(&prepared, config)?;
    let (l_lo, l_hi) = generator.band();
    let spectrum = generator.spectrum();
    let basis = generator.basis();
    let pole = frame.axis(ReferenceAxis::GalacticNorthPole);
    let threshold = config.alignment_threshold_deg.to_radians();

    cuts_deg
        .iter()
        .enumerate()
        .map(|(step, &cut_deg)| {
            let name = format!("mask_ladder_b{}", cut_deg.round());
            let mask: Vec<bool> = galactic_cut_mask(prepared.grid(), &pole, cut_deg)
                .into_iter()
                .zip(prepared.mask())
                .map(|(a, &b)| a && b)
                .collect();
            let f_sky = sky_fraction(&mask);
            let analysis = basis.analysis_for(&mask).map_err(|e| e.with_test(&name))?;

            let (q, o) = low_axes(&analysis.analyze_values(prepared.values())?, &config.axis)
                .map_err(|e| e.with_test(&name))?;
            let observed = axis_pair_separation(&q, &o);

            let seed = surrogate_seed(config.seed, step);
            let ensemble = run_ensemble(config.ensemble_size, seed, |_, rng| {
                let coeffs = gaussian_realization(spectrum, rng)?;
                let values = basis.synthesize(&coeffs, l_lo, l_hi)?;
                let (q, o) = low_axes(&analysis.analyze_values(&values)?, &config.axis)?;
                Ok(axis_pair_separation(&q, &o))
            })
            .map_err(|e| e.with_test(&name))?;
            let result = TestResult::from_ensemble(
                &name,
                Statistic::Scalar(observed),
                observed,
                None,
                Extremity::Lower,
                &ensemble,
                seed,
            )
            .map_err(|e| e.with_test(&name))?;
            let fraction_aligned = result.null_summary.fraction_below(threshold);
            info!(
                "{}: f_sky {:.3}, axes {:.2} deg apart, {:.1}% of surrogates within {} deg",
                name,
                f_sky,
                observed.to_degrees(),
                100.0 * fraction_aligned,
                config.alignment_threshold_deg
            );
            Ok(MaskLadderStep {
                cut_deg,
                f_sky,
                threshold_deg: config.alignment_threshold_deg,
                fraction_aligned,
                result,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CoordinateFrame;
    use crate::harmonics::HarmonicBasis;
    use crate::nulls::gaussian_realization;
    use crate::sky::SkyGrid;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gaussian_map(nside: u32, l_max: u32, seed: u64, frame: CoordinateFrame) -> SkyMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let grid = SkyGrid::new(nside).unwrap();
        let spectrum: Vec<f64> = (0..=l_max).map(|l| 1.0 / (1.0 + (l * l) as f64)).collect();
        let coeffs = gaussian_realization(&spectrum, &mut rng).unwrap();
        let values = HarmonicBasis::new(&grid, l_max)
            .unwrap()
            .synthesize(&coeffs, 0, l_max)
            .unwrap();
        SkyMap::unmasked(grid, frame, values).unwrap()
    }

    fn small_config() -> RunConfig {
        RunConfig {
            ensemble_size: 100,
            l_max: 5,
            ..Default::default()
        }
    }

    #[test]
    fn frame_mismatch_is_named() {
        let map = gaussian_map(4, 5, 1, CoordinateFrame::Galactic);
        let frame = ReferenceFrame::j2000();
        let err = parity_solar_alignment(&map, &frame, ReferenceAxis::SolarSpin, &small_config())
            .unwrap_err();
        assert!(matches!(err, NullTestError::FrameMismatch { .. }));
        assert_eq!(err.test_name(), Some("parity_solar_spin"));
    }

    #[test]
    fn invalid_config_rejected_before_work() {
        let map = gaussian_map(4, 5, 2, CoordinateFrame::Icrs);
        let config = RunConfig {
            ensemble_size: 10,
            ..small_config()
        };
        let err = cold_spot_alignment(&map, &ReferenceFrame::j2000(), ReferenceAxis::CmbDipole, &config)
            .unwrap_err();
        assert!(matches!(err, NullTestError::InvalidConfig { .. }));
        assert_eq!(err.test_name(), Some("cold_spot_cmb_dipole"));
    }

    #[test]
    fn harmonic_coherence_needs_quadrupole_and_octopole() {
        let map = gaussian_map(4, 5, 3, CoordinateFrame::Icrs);
        let config = RunConfig {
            l_min: 3,
            ..small_config()
        };
        let err = harmonic_axis_coherence(&map, &ReferenceFrame::j2000(), ReferenceAxis::SolarSpin, &config)
            .unwrap_err();
        assert!(matches!(err, NullTestError::InvalidConfig { .. }));
    }

    #[test]
    fn cold_spot_result_reports_direction() {
        let map = gaussian_map(4, 5, 4, CoordinateFrame::Icrs);
        let result = cold_spot_alignment(
            &map,
            &ReferenceFrame::j2000(),
            ReferenceAxis::NorthEclipticPole,
            &small_config(),
        )
        .unwrap();
        assert!(matches!(result.observed, Statistic::Direction(_)));
        assert_eq!(result.extremity, Extremity::Lower);
        assert_eq!(result.requested_size, 100);
        assert_eq!(result.effective_size + result.excluded, 100);
        assert!((0.0..=std::f64::consts::PI).contains(&result.tested_value));
    }
}
