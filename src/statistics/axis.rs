//! Principal axes of single multipoles.
//!
//! A multipole is synthesized on a quadrature grid and its power-weighted
//! second-moment tensor `M = Σ T² r rᵀ / Σ T²` is diagonalized. `M` is
//! symmetric with unit trace. A planar ("pancake") multipole puts its power in
//! a great circle, so the eigenvector of the **smallest** eigenvalue is the
//! normal of that plane and is taken as the multipole's axis.
//!
//! Eigenvalues are sorted explicitly and the axis sign follows
//! [`canonical_axis`], so results never depend on the ordering or sign the
//! eigensolver happens to return.

use nalgebra::{Matrix3, SymmetricEigen};
use tracing::{debug, warn};

use crate::error::{NullTestError, Result, Stage};
use crate::geometry::{axis_separation, canonical_axis, Direction};
use crate::harmonics::{HarmonicCoefficients, Multipole};
use crate::sky::SkyGrid;
use crate::Vector3;

/// Projections onto a degenerate eigenspace shorter than this are ignored by
/// the tie-break.
const TIE_BREAK_MIN_PROJECTION: f64 = 1e-8;

/// What to do when the two smallest eigenvalues are closer than the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneracyPolicy {
    /// Fail with `DegenerateStatistic`; an ensemble excludes the surrogate.
    Reject,
    /// Resolve the axis by projecting z, then x, then y onto the degenerate
    /// eigenspace and taking the first non-negligible projection.
    TieBreak,
}

/// Parameters of principal-axis extraction.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AxisConfig {
    /// Resolution of the quadrature grid the multipole is synthesized on.
    /// Default 16.
    pub quadrature_nside: u32,
    /// Smallest acceptable gap `λ1 − λ0` between the two smallest
    /// eigenvalues of the unit-trace tensor. Default 1e-5.
    pub degeneracy_tolerance: f64,
    /// Default `Reject`.
    pub policy: DegeneracyPolicy,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            quadrature_nside: 16,
            degeneracy_tolerance: 1e-5,
            policy: DegeneracyPolicy::Reject,
        }
    }
}

/// Principal axis of one multipole.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrincipalAxis {
    pub l: u32,
    /// Eigenvector of the smallest eigenvalue, sign-normalized.
    pub axis: Direction,
    /// Eigenvalues of the unit-trace tensor, ascending.
    pub eigenvalues: [f64; 3],
    /// `λ1 − λ0`.
    pub degeneracy_gap: f64,
    /// Whether the axis came from the tie-break rule.
    pub tie_broken: bool,
}

impl PrincipalAxis {
    /// `1 − λ0/λ1`: 0 when the axis is undefined, 1 for power confined to a
    /// plane.
    pub fn oblateness(&self) -> f64 {
        let [l0, l1, _] = self.eigenvalues;
        if l1 > 0.0 {
            1.0 - l0 / l1
        } else {
            0.0
        }
    }

    /// `1 − λ1/λ2`: large when the power concentrates along one direction.
    pub fn prolateness(&self) -> f64 {
        let [_, l1, l2] = self.eigenvalues;
        if l2 > 0.0 {
            1.0 - l1 / l2
        } else {
            0.0
        }
    }
}

/// Power-weighted second-moment tensor of a multipole on `grid`, normalized
/// to unit trace. `None` if the multipole has no power on the grid.
fn moment_tensor(mp: &Multipole, grid: &SkyGrid) -> Option<Matrix3<f64>> {
    let values = mp.evaluate(grid);
    let mut m = Matrix3::<f64>::zeros();
    let mut total = 0.0;
    for (t, r) in values.iter().zip(grid.centers()) {
        let w = t * t;
        let v = *r.as_vector();
        m += v * v.transpose() * w;
        total += w;
    }
    (total > 0.0).then(|| m / total)
}

/// Extract the principal axis of one multipole.
pub fn principal_axis(mp: &Multipole, config: &AxisConfig) -> Result<PrincipalAxis> {
    let l = mp.l();
    let degenerate = |gap: f64| NullTestError::DegenerateStatistic {
        stage: Stage::Statistic,
        test: None,
        l,
        gap,
        tolerance: config.degeneracy_tolerance,
    };

    let grid = SkyGrid::new(config.quadrature_nside)?;
    let m = moment_tensor(mp, &grid).ok_or_else(|| degenerate(0.0))?;

    let eig = SymmetricEigen::new(m);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let eigenvalues = order.map(|i| eig.eigenvalues[i]);
    let vectors: [Vector3; 3] = order.map(|i| eig.eigenvectors.column(i).into_owned());
    let gap = eigenvalues[1] - eigenvalues[0];

    let (axis_vec, tie_broken) = if gap < config.degeneracy_tolerance {
        warn!(l, gap, tolerance = config.degeneracy_tolerance, "near-degenerate multipole tensor");
        match config.policy {
            DegeneracyPolicy::Reject => return Err(degenerate(gap)),
            DegeneracyPolicy::TieBreak => {
                let span: Vec<&Vector3> = eigenvalues
                    .iter()
                    .zip(&vectors)
                    .filter(|&(&lam, _)| lam - eigenvalues[0] < config.degeneracy_tolerance)
                    .map(|(_, v)| v)
                    .collect();
                let projected = [Vector3::z(), Vector3::x(), Vector3::y()]
                    .into_iter()
                    .map(|e| span.iter().map(|v| e.dot(v) * **v).sum::<Vector3>())
                    .find(|p| p.norm() > TIE_BREAK_MIN_PROJECTION)
                    .ok_or_else(|| degenerate(gap))?;
                (projected, true)
            }
        }
    } else {
        (vectors[0], false)
    };

    let axis = canonical_axis(&Direction::new(axis_vec)?);
    debug!(l, ?eigenvalues, gap, tie_broken, "principal axis");
    Ok(PrincipalAxis {
        l,
        axis,
        eigenvalues,
        degeneracy_gap: gap,
        tie_broken,
    })
}

/// Headless separation of two principal axes, radians in [0, π/2].
pub fn axis_pair_separation(a: &PrincipalAxis, b: &PrincipalAxis) -> f64 {
    axis_separation(&a.axis, &b.axis)
}

/// Separation of the axes of multipoles `l` and `l + 1`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AxisPair {
    pub l: u32,
    pub separation_rad: f64,
}

/// Axis separations of every consecutive pair `(l, l+1)` in `[l_lo, l_hi]`.
pub fn axis_pair_scan(
    coeffs: &HarmonicCoefficients,
    l_lo: u32,
    l_hi: u32,
    config: &AxisConfig,
) -> Result<Vec<AxisPair>> {
    if l_lo < 1 || l_hi <= l_lo || l_hi > coeffs.l_max() {
        return Err(NullTestError::invalid_config(format!(
            "axis pair scan range [{l_lo}, {l_hi}] invalid for l_max={}",
            coeffs.l_max()
        )));
    }
    let axes = (l_lo..=l_hi)
        .map(|l| {
            let mp = coeffs
                .multipole(l)
                .ok_or_else(|| NullTestError::input_shape(Stage::Statistic, format!("missing l={l}")))?;
            principal_axis(mp, config)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(axes
        .windows(2)
        .map(|w| AxisPair {
            l: w[0].l,
            separation_rad: axis_pair_separation(&w[0], &w[1]),
        })
        .collect())
}
