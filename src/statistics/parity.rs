//! Point-parity statistics.
//!
//! The axis scan works on antipodal pixel pairs `(p, -p)`. A pair is used
//! only when both members are valid under the map's mask, so masked pixels
//! never contribute and never tilt the balance between hemispheres.
//!
//! The global balance works on fitted `a_lm`: the share of band power in
//! even against odd multipoles. It carries no direction.

use std::f64::consts::TAU;

use crate::error::{NullTestError, Result, Stage};
use crate::geometry::{axis_separation, canonical_axis, Direction};
use crate::harmonics::HarmonicCoefficients;
use crate::sky::{SkyGrid, SkyMap};

// ── Configuration ───────────────────────────────────────────────────────────

/// Per-pixel quantity averaged inside a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatistic {
    /// Pixel value: `P(n) = mean(T(p) + T(-p))`, the even part of the map.
    Mean,
    /// Squared pixel value: `P(n) = mean(T(p)² + T(-p)²)`.
    Power,
}

/// Scalar reported by a parity scan against a reference axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParityMeasure {
    /// Standardized profile value at the reference axis. Large when the
    /// reference axis is special.
    Contrast,
    /// Separation (radians) between the profile maximum and the reference
    /// axis. Small when they align.
    PeakSeparation,
    /// Even/odd band-power balance, [`parity_balance`]. Rotation invariant,
    /// so no reference axis is involved.
    Balance,
}

impl ParityMeasure {
    /// Whether the measure is taken against a reference axis.
    pub fn uses_axis(self) -> bool {
        !matches!(self, ParityMeasure::Balance)
    }
}

/// Parameters of a parity scan.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParityScanConfig {
    /// Resolution of the grid of candidate axes. Default 4 (96 axes).
    pub scan_nside: u32,
    /// Radius of the cap around each candidate axis, degrees. Default 30.
    pub cap_radius_deg: f64,
    /// Quantity averaged over the cap. Default `Power`.
    pub local: LocalStatistic,
    /// Fewest valid antipodal pairs the whole map must keep. Default 50.
    pub min_pairs: usize,
    /// Scalar reported against the reference axis. Default `Contrast`.
    pub measure: ParityMeasure,
}

impl Default for ParityScanConfig {
    fn default() -> Self {
        Self {
            scan_nside: 4,
            cap_radius_deg: 30.0,
            local: LocalStatistic::Power,
            min_pairs: 50,
            measure: ParityMeasure::Contrast,
        }
    }
}

// ── Antipodal pairs ─────────────────────────────────────────────────────────

/// Antipodal pairs `(p, -p)` with `p < -p` and both members valid.
fn valid_pairs(map: &SkyMap) -> Vec<(usize, usize)> {
    let grid = map.grid();
    (0..grid.npix())
        .filter_map(|p| {
            let q = grid.antipode(p);
            (p < q && map.is_valid(p) && map.is_valid(q)).then_some((p, q))
        })
        .collect()
}

// ── Global balance ──────────────────────────────────────────────────────────

/// Band power `D_l = l(l+1) C_l / 2π`.
pub fn band_power(coeffs: &HarmonicCoefficients, l: u32) -> Option<f64> {
    let lf = l as f64;
    coeffs.multipole(l).map(|mp| lf * (lf + 1.0) * mp.power() / TAU)
}

/// Even/odd band-power balance over `[max(l_lo, 2), l_hi]`, in [-1, 1].
///
/// With `P±` the summed `D_l` of the even and odd degrees in the band,
/// returns `(P+ − P−)/(P+ + P−)`: +1 for a purely even-l field, −1 for a
/// purely odd-l one. A band with no power returns 0.
pub fn parity_balance(coeffs: &HarmonicCoefficients, l_lo: u32, l_hi: u32) -> Result<f64> {
    let lo = l_lo.max(2);
    let hi = l_hi.min(coeffs.l_max());
    if lo > hi {
        return Err(NullTestError::input_shape(
            Stage::Statistic,
            format!(
                "parity band [{lo}, {l_hi}] is empty for coefficients up to l={}",
                coeffs.l_max()
            ),
        ));
    }
    let (even, odd) = (lo..=hi).fold((0.0, 0.0), |(e, o), l| {
        let d = band_power(coeffs, l).unwrap_or(0.0);
        if l % 2 == 0 {
            (e + d, o)
        } else {
            (e, o + d)
        }
    });
    if even + odd == 0.0 {
        return Ok(0.0);
    }
    Ok((even - odd) / (even + odd))
}

// ── Axis scan ───────────────────────────────────────────────────────────────

/// Precomputed plan for scanning `P(n)` over candidate axes.
///
/// Holds, for every candidate axis, the antipodal pixel pairs of the map
/// grid that fall inside its cap. Build once per grid and share across all
/// surrogates.
#[derive(Debug, Clone)]
pub struct ParityScan {
    map_nside: u32,
    local: LocalStatistic,
    min_pairs: usize,
    cap_radius_rad: f64,
    axes: Vec<Direction>,
    caps: Vec<Vec<(usize, usize)>>,
}

fn cap_pairs(grid: &SkyGrid, center: &Direction, radius_rad: f64) -> Vec<(usize, usize)> {
    grid.cap(center, radius_rad)
        .into_iter()
        .map(|p| (p, grid.antipode(p)))
        .collect()
}

impl ParityScan {
    /// One candidate per antipodal pair of the scan grid.
    pub fn new(map_grid: &SkyGrid, config: &ParityScanConfig) -> Result<Self> {
        if !(config.cap_radius_deg > 0.0 && config.cap_radius_deg <= 90.0) {
            return Err(NullTestError::invalid_config(format!(
                "parity cap radius {} deg outside (0, 90]",
                config.cap_radius_deg
            )));
        }
        let scan_grid = SkyGrid::new(config.scan_nside)?;
        let cap_radius_rad = config.cap_radius_deg.to_radians();
        let axes: Vec<Direction> = (0..scan_grid.npix())
            .filter(|&p| p > scan_grid.antipode(p))
            .map(|p| canonical_axis(&scan_grid.center(p)))
            .collect();
        let caps = axes
            .iter()
            .map(|axis| cap_pairs(map_grid, axis, cap_radius_rad))
            .collect();
        Ok(Self {
            map_nside: map_grid.nside(),
            local: config.local,
            min_pairs: config.min_pairs,
            cap_radius_rad,
            axes,
            caps,
        })
    }

    pub fn axes(&self) -> &[Direction] {
        &self.axes
    }

    fn check_map(&self, map: &SkyMap) -> Result<()> {
        if map.grid().nside() != self.map_nside {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!(
                    "map nside={} does not match parity scan nside={}",
                    map.grid().nside(),
                    self.map_nside
                ),
            ));
        }
        let pairs = valid_pairs(map).len();
        if pairs < self.min_pairs {
            return Err(NullTestError::mask_exhaustion(
                Stage::Statistic,
                "antipodal pairs",
                pairs,
                self.min_pairs,
            ));
        }
        Ok(())
    }

    fn local(&self, t: f64) -> f64 {
        match self.local {
            LocalStatistic::Mean => t,
            LocalStatistic::Power => t * t,
        }
    }

    /// `C(n) + C(-n)` over the valid pairs in one cap, `None` if none are valid.
    fn evaluate(&self, map: &SkyMap, pairs: &[(usize, usize)]) -> Option<f64> {
        let t = map.values();
        let (sum, n) = pairs
            .iter()
            .filter(|&&(p, q)| map.is_valid(p) && map.is_valid(q))
            .fold((0.0, 0usize), |(s, n), &(p, q)| {
                (s + self.local(t[p]) + self.local(t[q]), n + 1)
            });
        (n > 0).then(|| sum / n as f64)
    }
}

/// `P(n)` over every candidate axis of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ParityProfile {
    axes: Vec<Direction>,
    values: Vec<Option<f64>>,
}

impl ParityProfile {
    pub fn axes(&self) -> &[Direction] {
        &self.axes
    }

    /// Profile values; `None` where the cap held no valid pair.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    fn defined(&self) -> impl Iterator<Item = (&Direction, f64)> {
        self.axes
            .iter()
            .zip(&self.values)
            .filter_map(|(a, v)| v.map(|v| (a, v)))
    }

    /// Axis with the largest `P`.
    pub fn maximum(&self) -> Option<(Direction, f64)> {
        self.defined()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(a, v)| (*a, v))
    }

    /// Axis with the smallest `P`.
    pub fn minimum(&self) -> Option<(Direction, f64)> {
        self.defined()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(a, v)| (*a, v))
    }

    pub fn mean(&self) -> Option<f64> {
        let (sum, n) = self.defined().fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    /// Population standard deviation of the defined values.
    pub fn std(&self) -> Option<f64> {
        let mean = self.mean()?;
        let (ss, n) = self
            .defined()
            .fold((0.0, 0usize), |(s, n), (_, v)| (s + (v - mean).powi(2), n + 1));
        Some((ss / n as f64).sqrt())
    }
}

/// Scan `P(n)` over all candidate axes.
pub fn parity_profile(map: &SkyMap, scan: &ParityScan) -> Result<ParityProfile> {
    scan.check_map(map)?;
    let values: Vec<Option<f64>> = scan.caps.iter().map(|pairs| scan.evaluate(map, pairs)).collect();
    if values.iter().all(Option::is_none) {
        return Err(NullTestError::mask_exhaustion(
            Stage::Statistic,
            "scan axes with valid pairs",
            0,
            1,
        ));
    }
    Ok(ParityProfile {
        axes: scan.axes.clone(),
        values,
    })
}

/// `P` on an arbitrary axis, with the scan's cap radius and local statistic.
pub fn parity_at(map: &SkyMap, axis: &Direction, scan: &ParityScan) -> Result<f64> {
    scan.check_map(map)?;
    let pairs = cap_pairs(map.grid(), axis, scan.cap_radius_rad);
    scan.evaluate(map, &pairs).ok_or_else(|| {
        NullTestError::mask_exhaustion(Stage::Statistic, "antipodal pairs in reference cap", 0, 1)
    })
}

// ── Alignment with a reference axis ─────────────────────────────────────────

/// Parity profile of a map summarized against one reference axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParityAlignment {
    /// `P` at the reference axis.
    pub reference_value: f64,
    /// `(P(ref) − mean P) / std P` over the scan. Zero for a flat profile.
    pub contrast: f64,
    /// Candidate axis maximizing `P`.
    pub peak_axis: Direction,
    /// Headless separation between the peak and the reference, radians.
    pub peak_separation_rad: f64,
}

impl ParityAlignment {
    /// The scalar for an axis measure; `None` for `Balance`.
    pub fn measure(&self, measure: ParityMeasure) -> Option<f64> {
        match measure {
            ParityMeasure::Contrast => Some(self.contrast),
            ParityMeasure::PeakSeparation => Some(self.peak_separation_rad),
            ParityMeasure::Balance => None,
        }
    }
}

pub fn parity_alignment(map: &SkyMap, reference: &Direction, scan: &ParityScan) -> Result<ParityAlignment> {
    let profile = parity_profile(map, scan)?;
    let reference_value = parity_at(map, reference, scan)?;
    let empty = || NullTestError::mask_exhaustion(Stage::Statistic, "scan axes with valid pairs", 0, 1);
    let (peak_axis, _) = profile.maximum().ok_or_else(empty)?;
    let mean = profile.mean().ok_or_else(empty)?;
    let std = profile.std().ok_or_else(empty)?;
    let contrast = if std > 0.0 {
        (reference_value - mean) / std
    } else {
        0.0
    };
    Ok(ParityAlignment {
        reference_value,
        contrast,
        peak_axis,
        peak_separation_rad: axis_separation(&peak_axis, reference),
    })
}
