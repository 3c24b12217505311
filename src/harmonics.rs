//! Spherical-harmonic analysis and synthesis on a [`SkyGrid`].
//!
//! Basis convention: `Y_lm(θ, φ) = P̄_lm(cos θ) e^{imφ}` for `m ≥ 0` with
//! orthonormal associated Legendre functions `P̄_lm` (Condon-Shortley phase
//! included), and `Y_{l,-m} = conj(Y_lm)`. A real map therefore satisfies
//! `a_{l,-m} = conj(a_lm)` with `a_l0` real, and
//!
//! ```text
//! T(n) = Σ_l [ a_l0 P̄_l0 + Σ_{m>0} 2 P̄_lm (Re a_lm cos mφ − Im a_lm sin mφ) ]
//! ```
//!
//! Analysis is a least-squares fit over the valid pixels of a map (SVD, as
//! in the radial distortion fit), which is exact for band-limited maps and
//! stays well-posed under a Galactic cut as long as enough pixels survive.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use tracing::debug;

use crate::error::{NullTestError, Result, Stage};
use crate::geometry::Direction;
use crate::sky::{SkyGrid, SkyMap};
use crate::Rotation;

/// Relative tolerance for the reality constraint check.
const REALITY_TOL: f64 = 1e-9;
/// Singular values below this (relative to the largest) are dropped by the
/// least-squares solve.
const SVD_EPS: f64 = 1e-12;

// ── Associated Legendre functions ───────────────────────────────────────────

#[inline]
fn lm_index(l: u32, m: u32) -> usize {
    (l * (l + 1) / 2 + m) as usize
}

/// Orthonormal associated Legendre functions `P̄_lm(x)` for
/// `0 ≤ m ≤ l ≤ l_max`, packed at index `l(l+1)/2 + m`.
///
/// Normalized so that `∫ |P̄_lm(cos θ) e^{imφ}|² dΩ = 1`.
pub fn legendre_table(l_max: u32, x: f64) -> Vec<f64> {
    let mut p = vec![0.0; lm_index(l_max, l_max) + 1];
    let x = x.clamp(-1.0, 1.0);
    let s = (1.0 - x * x).max(0.0).sqrt();

    p[0] = (1.0 / (4.0 * PI)).sqrt();
    for m in 1..=l_max {
        let mf = m as f64;
        p[lm_index(m, m)] = -((2.0 * mf + 1.0) / (2.0 * mf)).sqrt() * s * p[lm_index(m - 1, m - 1)];
    }
    for m in 0..l_max {
        p[lm_index(m + 1, m)] = x * (2.0 * m as f64 + 3.0).sqrt() * p[lm_index(m, m)];
    }
    for m in 0..=l_max {
        let mf = m as f64;
        for l in (m + 2)..=l_max {
            let lf = l as f64;
            let lp = lf - 1.0;
            let a = ((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf)).sqrt();
            let b = ((lp * lp - mf * mf) / (4.0 * lp * lp - 1.0)).sqrt();
            p[lm_index(l, m)] = a * (x * p[lm_index(l - 1, m)] - b * p[lm_index(l - 2, m)]);
        }
    }
    p
}

// ── Multipole coefficient sets ──────────────────────────────────────────────

/// Complex coefficients `a_lm`, `m = -l..=l`, of one harmonic degree.
#[derive(Debug, Clone, PartialEq)]
pub struct Multipole {
    l: u32,
    /// `coeffs[m + l]`
    coeffs: Vec<Complex64>,
}

impl Multipole {
    /// Validate a full coefficient set ordered `m = -l..=l`.
    ///
    /// Fails with `InputShape` if any m entry is missing or the set violates
    /// the reality constraint.
    pub fn new(l: u32, coeffs: Vec<Complex64>) -> Result<Self> {
        let expected = 2 * l as usize + 1;
        if coeffs.len() != expected {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("multipole l={l} has {} coefficients, expected {expected}", coeffs.len()),
            ));
        }
        if let Some(c) = coeffs.iter().find(|c| !c.re.is_finite() || !c.im.is_finite()) {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("multipole l={l} has non-finite coefficient {c}"),
            ));
        }
        let mp = Self { l, coeffs };
        mp.check_reality()?;
        Ok(mp)
    }

    /// Build from the `m = 0..=l` half; negative m follow by conjugation.
    pub fn from_nonnegative(l: u32, half: &[Complex64]) -> Result<Self> {
        if half.len() != l as usize + 1 {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("multipole l={l} has {} m>=0 coefficients, expected {}", half.len(), l + 1),
            ));
        }
        let mut coeffs = Vec::with_capacity(2 * half.len() - 1);
        coeffs.extend(half[1..].iter().rev().map(|c| c.conj()));
        coeffs.extend_from_slice(half);
        Self::new(l, coeffs)
    }

    pub fn zeros(l: u32) -> Self {
        Self {
            l,
            coeffs: vec![Complex64::new(0.0, 0.0); 2 * l as usize + 1],
        }
    }

    pub(crate) fn from_nonnegative_unchecked(l: u32, half: &[Complex64]) -> Self {
        let mut coeffs = Vec::with_capacity(2 * half.len() - 1);
        coeffs.extend(half[1..].iter().rev().map(|c| c.conj()));
        coeffs.extend_from_slice(half);
        Self { l, coeffs }
    }

    fn check_reality(&self) -> Result<()> {
        let l = self.l as i32;
        let scale = self.coeffs.iter().map(|c| c.norm()).fold(0.0, f64::max);
        let tol = REALITY_TOL * scale;
        let a0 = self.get(0);
        if a0.im.abs() > tol {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("reality constraint violated: a_({l},0) = {a0} is not real"),
            ));
        }
        for m in 1..=l {
            let diff = (self.get(-m) - self.get(m).conj()).norm();
            if diff > tol {
                return Err(NullTestError::input_shape(
                    Stage::Statistic,
                    format!(
                        "reality constraint violated at l={l}, m={m}: |a_(l,-m) - conj(a_lm)| = {diff:.3e}"
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn l(&self) -> u32 {
        self.l
    }

    /// Coefficient `a_lm`.
    ///
    /// # Panics
    ///
    /// Panics if `|m| > l`; use [`Multipole::coefficient`] for a checked
    /// lookup.
    pub fn get(&self, m: i32) -> Complex64 {
        assert!(
            m.unsigned_abs() <= self.l,
            "order m={m} outside -{0}..={0} for multipole l={0}",
            self.l
        );
        self.coeffs[(m + self.l as i32) as usize]
    }

    /// Coefficient `a_lm`, `None` when `|m| > l`.
    pub fn coefficient(&self, m: i32) -> Option<Complex64> {
        (m.unsigned_abs() <= self.l).then(|| self.coeffs[(m + self.l as i32) as usize])
    }

    /// Coefficients ordered `m = -l..=l`.
    pub fn coefficients(&self) -> &[Complex64] {
        &self.coeffs
    }

    /// `C_l = Σ_m |a_lm|² / (2l + 1)`.
    pub fn power(&self) -> f64 {
        self.coeffs.iter().map(|c| c.norm_sqr()).sum::<f64>() / self.coeffs.len() as f64
    }

    pub fn negated(&self) -> Self {
        Self {
            l: self.l,
            coeffs: self.coeffs.iter().map(|c| -c).collect(),
        }
    }

    /// Values of this multipole alone at every pixel centre of `grid`.
    pub fn evaluate(&self, grid: &SkyGrid) -> Vec<f64> {
        let l = self.l;
        let mut out = Vec::with_capacity(grid.npix());
        for ring in 0..grid.n_rings() {
            let p = legendre_table(l, grid.ring_z_of(ring));
            for cell in 0..grid.n_lon() {
                let phi = grid.cell_phi(cell);
                let mut t = self.get(0).re * p[lm_index(l, 0)];
                for m in 1..=l {
                    let a = self.get(m as i32);
                    let (s, c) = (m as f64 * phi).sin_cos();
                    t += 2.0 * p[lm_index(l, m)] * (a.re * c - a.im * s);
                }
                out.push(t);
            }
        }
        out
    }
}

/// Band-limited coefficient set, one [`Multipole`] per degree `0..=l_max`.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicCoefficients {
    multipoles: Vec<Multipole>,
}

impl HarmonicCoefficients {
    pub fn new(multipoles: Vec<Multipole>) -> Result<Self> {
        if multipoles.is_empty() {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                "coefficient set has no multipoles",
            ));
        }
        if let Some((i, mp)) = multipoles
            .iter()
            .enumerate()
            .find(|(i, mp)| mp.l() as usize != *i)
        {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("multipole at position {i} has degree l={}", mp.l()),
            ));
        }
        Ok(Self { multipoles })
    }

    pub fn zeros(l_max: u32) -> Self {
        Self {
            multipoles: (0..=l_max).map(Multipole::zeros).collect(),
        }
    }

    /// Replace the multipole of the same degree. Degrees above `l_max` are
    /// rejected.
    pub fn with_multipole(mut self, mp: Multipole) -> Result<Self> {
        let l = mp.l() as usize;
        match self.multipoles.get_mut(l) {
            Some(slot) => *slot = mp,
            None => {
                return Err(NullTestError::input_shape(
                    Stage::Statistic,
                    format!("multipole l={l} exceeds l_max={}", self.l_max()),
                ))
            }
        }
        Ok(self)
    }

    pub fn l_max(&self) -> u32 {
        self.multipoles.len() as u32 - 1
    }

    pub fn multipole(&self, l: u32) -> Option<&Multipole> {
        self.multipoles.get(l as usize)
    }

    pub fn multipoles(&self) -> &[Multipole] {
        &self.multipoles
    }

    /// Angular power spectrum `C_l`, `l = 0..=l_max`.
    pub fn spectrum(&self) -> Vec<f64> {
        self.multipoles.iter().map(Multipole::power).collect()
    }

    /// Copy with every degree outside `[l_lo, l_hi]` zeroed.
    pub fn band(&self, l_lo: u32, l_hi: u32) -> Self {
        Self {
            multipoles: self
                .multipoles
                .iter()
                .map(|mp| {
                    if (l_lo..=l_hi).contains(&mp.l()) {
                        mp.clone()
                    } else {
                        Multipole::zeros(mp.l())
                    }
                })
                .collect(),
        }
    }

    /// Copy with every multipole replaced by `f(multipole)`, degrees kept.
    pub(crate) fn map_multipoles<F>(&self, f: F) -> Self
    where
        F: FnMut(&Multipole) -> Multipole,
    {
        Self {
            multipoles: self.multipoles.iter().map(f).collect(),
        }
    }

    /// Value of the band-limited field at an arbitrary direction.
    pub fn value_at(&self, d: &Direction) -> f64 {
        let v = d.as_vector();
        let phi = v.y.atan2(v.x);
        let p = legendre_table(self.l_max(), v.z);
        let mut t = 0.0;
        for mp in &self.multipoles {
            let l = mp.l();
            t += mp.get(0).re * p[lm_index(l, 0)];
            for m in 1..=l {
                let a = mp.get(m as i32);
                let (s, c) = (m as f64 * phi).sin_cos();
                t += 2.0 * p[lm_index(l, m)] * (a.re * c - a.im * s);
            }
        }
        t
    }

    /// Coefficients in real-basis order: per l, `Re a_l0`, then
    /// `Re a_lm, Im a_lm` for `m = 1..=l`.
    fn to_real(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(column_count(self.l_max()));
        for mp in &self.multipoles {
            v.push(mp.get(0).re);
            for m in 1..=mp.l() as i32 {
                let a = mp.get(m);
                v.push(a.re);
                v.push(a.im);
            }
        }
        v
    }

    fn from_real(l_max: u32, v: &[f64]) -> Self {
        let multipoles = (0..=l_max)
            .map(|l| {
                let base = (l * l) as usize;
                let mut half = Vec::with_capacity(l as usize + 1);
                half.push(Complex64::new(v[base], 0.0));
                for m in 1..=l as usize {
                    half.push(Complex64::new(v[base + 2 * m - 1], v[base + 2 * m]));
                }
                Multipole::from_nonnegative_unchecked(l, &half)
            })
            .collect();
        Self { multipoles }
    }
}

fn column_count(l_max: u32) -> usize {
    ((l_max + 1) * (l_max + 1)) as usize
}

// ── Analysis / synthesis ────────────────────────────────────────────────────

/// Real harmonic basis evaluated at every pixel of a grid, up to `l_max`.
///
/// Built once per (grid, l_max) and shared read-only by every surrogate.
#[derive(Debug, Clone)]
pub struct HarmonicBasis {
    grid: SkyGrid,
    l_max: u32,
    /// npix × (l_max+1)²
    matrix: DMatrix<f64>,
}

impl HarmonicBasis {
    /// The grid resolves azimuthal orders up to `2·nside − 1`, so `l_max`
    /// must stay below `2·nside`.
    pub fn new(grid: &SkyGrid, l_max: u32) -> Result<Self> {
        if l_max >= 2 * grid.nside() {
            return Err(NullTestError::invalid_config(format!(
                "l_max={l_max} not resolvable on a grid with nside={} (max {})",
                grid.nside(),
                2 * grid.nside() - 1
            )));
        }
        let ncols = column_count(l_max);
        let mut matrix = DMatrix::<f64>::zeros(grid.npix(), ncols);
        let n_lon = grid.n_lon() as usize;
        for ring in 0..grid.n_rings() {
            let p = legendre_table(l_max, grid.ring_z_of(ring));
            for cell in 0..grid.n_lon() {
                let row = ring as usize * n_lon + cell as usize;
                let phi = grid.cell_phi(cell);
                for l in 0..=l_max {
                    let base = (l * l) as usize;
                    matrix[(row, base)] = p[lm_index(l, 0)];
                    for m in 1..=l {
                        let (s, c) = (m as f64 * phi).sin_cos();
                        let pl = 2.0 * p[lm_index(l, m)];
                        matrix[(row, base + 2 * m as usize - 1)] = pl * c;
                        matrix[(row, base + 2 * m as usize)] = -pl * s;
                    }
                }
            }
        }
        Ok(Self {
            grid: grid.clone(),
            l_max,
            matrix,
        })
    }

    pub fn grid(&self) -> &SkyGrid {
        &self.grid
    }

    pub fn l_max(&self) -> u32 {
        self.l_max
    }

    fn check_grid(&self, grid: &SkyGrid) -> Result<()> {
        if grid.nside() != self.grid.nside() {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!(
                    "map grid nside={} does not match harmonic basis nside={}",
                    grid.nside(),
                    self.grid.nside()
                ),
            ));
        }
        Ok(())
    }

    /// Least-squares fit of `a_lm`, `l = 0..=l_max`, to the valid pixels.
    pub fn analyze(&self, map: &SkyMap) -> Result<HarmonicCoefficients> {
        self.check_grid(map.grid())?;
        self.analysis_for(map.mask())?.analyze_values(map.values())
    }

    /// Precomputed least-squares solver for the pixels flagged in `mask`.
    ///
    /// Build once per mask when many maps share it; every fit is then a
    /// single matrix-vector product.
    pub fn analysis_for(&self, mask: &[bool]) -> Result<MaskedAnalysis> {
        let npix = self.grid.npix();
        if mask.len() != npix {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("mask has {} entries, grid has {npix} pixels", mask.len()),
            ));
        }
        let ncols = column_count(self.l_max);
        let pixels: Vec<usize> = (0..npix).filter(|&p| mask[p]).collect();
        if pixels.len() < ncols {
            return Err(NullTestError::mask_exhaustion(
                Stage::Statistic,
                "pixels for harmonic analysis",
                pixels.len(),
                ncols,
            ));
        }

        let a = DMatrix::from_fn(pixels.len(), ncols, |r, c| self.matrix[(pixels[r], c)]);
        let svd = a.svd(true, true);
        let sv_max = svd.singular_values.max();
        let cond = sv_max / svd.singular_values.min().max(f64::MIN_POSITIVE);
        let pinv = svd
            .pseudo_inverse(SVD_EPS * sv_max)
            .map_err(|e| NullTestError::input_shape(Stage::Statistic, e))?;

        debug!(
            l_max = self.l_max,
            valid = pixels.len(),
            condition = cond,
            "harmonic analysis"
        );
        Ok(MaskedAnalysis {
            l_max: self.l_max,
            npix,
            pixels,
            pinv,
        })
    }

    /// Pixel values of the degrees `l_lo..=l_hi` of `coeffs`.
    pub fn synthesize(&self, coeffs: &HarmonicCoefficients, l_lo: u32, l_hi: u32) -> Result<Vec<f64>> {
        if coeffs.l_max() > self.l_max {
            return Err(NullTestError::input_shape(
                Stage::NullGeneration,
                format!(
                    "coefficients reach l={} but basis stops at l_max={}",
                    coeffs.l_max(),
                    self.l_max
                ),
            ));
        }
        let l_hi = l_hi.min(coeffs.l_max());
        if l_lo > l_hi {
            return Ok(vec![0.0; self.grid.npix()]);
        }
        let real = coeffs.to_real();
        let start = (l_lo * l_lo) as usize;
        let end = column_count(l_hi);
        let x = DVector::from_column_slice(&real[start..end]);
        let values = self.matrix.columns(start, end - start) * x;
        Ok(values.as_slice().to_vec())
    }

    /// Synthesize into a map sharing the grid, frame and mask of `template`.
    pub fn synthesize_like(
        &self,
        coeffs: &HarmonicCoefficients,
        l_lo: u32,
        l_hi: u32,
        template: &SkyMap,
    ) -> Result<SkyMap> {
        self.check_grid(template.grid())?;
        let values = self.synthesize(coeffs, l_lo, l_hi)?;
        Ok(template.with_values(values))
    }
}

/// Least-squares harmonic fit over one fixed set of valid pixels.
#[derive(Debug, Clone)]
pub struct MaskedAnalysis {
    l_max: u32,
    npix: usize,
    pixels: Vec<usize>,
    /// (l_max+1)² × valid pixels
    pinv: DMatrix<f64>,
}

impl MaskedAnalysis {
    pub fn valid_count(&self) -> usize {
        self.pixels.len()
    }

    /// Fit `a_lm` to `values` (one per grid pixel; masked entries ignored).
    pub fn analyze_values(&self, values: &[f64]) -> Result<HarmonicCoefficients> {
        if values.len() != self.npix {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("{} values for a grid of {} pixels", values.len(), self.npix),
            ));
        }
        let b = DVector::from_iterator(self.pixels.len(), self.pixels.iter().map(|&p| values[p]));
        let x = &self.pinv * b;
        Ok(HarmonicCoefficients::from_real(self.l_max, x.as_slice()))
    }
}

// ── Rotation ────────────────────────────────────────────────────────────────

/// Exact rotation of band-limited coefficient sets.
///
/// The rotated field `T'(n) = T(R⁻¹ n)` is evaluated at every pixel centre
/// and fitted back over the full sky. A degree-l field stays in degree l
/// under rotation and the full-sky fit is exact for band-limited fields, so
/// every `C_l` is preserved to rounding.
#[derive(Debug, Clone)]
pub struct HarmonicRotator {
    grid: SkyGrid,
    full_sky: MaskedAnalysis,
}

impl HarmonicRotator {
    pub fn new(basis: &HarmonicBasis) -> Result<Self> {
        let full_sky = basis.analysis_for(&vec![true; basis.grid().npix()])?;
        Ok(Self {
            grid: basis.grid().clone(),
            full_sky,
        })
    }

    pub fn rotate(&self, coeffs: &HarmonicCoefficients, rotation: &Rotation) -> Result<HarmonicCoefficients> {
        if coeffs.l_max() > self.full_sky.l_max {
            return Err(NullTestError::input_shape(
                Stage::NullGeneration,
                format!(
                    "coefficients reach l={} but the rotator stops at l_max={}",
                    coeffs.l_max(),
                    self.full_sky.l_max
                ),
            ));
        }
        let inverse = rotation.inverse();
        let values: Vec<f64> = self
            .grid
            .centers()
            .iter()
            .map(|c| coeffs.value_at(&c.rotated(&inverse)))
            .collect();
        let rotated = self.full_sky.analyze_values(&values)?;
        // Keep the input's degree range.
        Ok(HarmonicCoefficients {
            multipoles: rotated.multipoles.into_iter().take(coeffs.multipoles.len()).collect(),
        })
    }
}
