//! Spherical geometry kernel.
//!
//! Directions are unit vectors in the shared Cartesian frame:
//! x = cos(lat)cos(lon), y = cos(lat)sin(lon), z = sin(lat).
//! All angles returned by this module are in radians.

use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{Quaternion, Unit, UnitQuaternion};
use rand::rngs::StdRng;
use rand::RngExt;

use crate::error::{NullTestError, Result, Stage};
use crate::{Rotation, Vector3};

/// Components below this magnitude are treated as zero by [`canonical_axis`].
const AXIS_SIGN_EPS: f64 = 1e-12;

/// A unit vector on the celestial sphere.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(into = "[f64; 3]", try_from = "[f64; 3]")]
pub struct Direction(Vector3);

impl Direction {
    /// Normalize `v` into a direction. Zero or non-finite vectors are rejected.
    pub fn new(v: Vector3) -> Result<Self> {
        let n = v.norm();
        if !n.is_finite() || n == 0.0 {
            return Err(NullTestError::input_shape(
                Stage::Geometry,
                format!("cannot normalize vector [{}, {}, {}]", v.x, v.y, v.z),
            ));
        }
        Ok(Self(v / n))
    }

    /// Wrap a vector already known to be unit length (renormalized anyway).
    pub(crate) fn from_unit(v: Vector3) -> Self {
        let n = v.norm();
        if n > 0.0 {
            Self(v / n)
        } else {
            Self(Vector3::z())
        }
    }

    pub fn from_lonlat_rad(lon_rad: f64, lat_rad: f64) -> Self {
        let (sin_lon, cos_lon) = lon_rad.sin_cos();
        let (sin_lat, cos_lat) = lat_rad.sin_cos();
        Self(Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat))
    }

    /// Build from longitude/latitude in degrees (RA/Dec or l/b).
    pub fn from_lonlat_deg(lon_deg: f64, lat_deg: f64) -> Self {
        Self::from_lonlat_rad(lon_deg.to_radians(), lat_deg.to_radians())
    }

    /// Longitude in [0, 360) and latitude in [-90, 90], degrees.
    pub fn lonlat_deg(&self) -> (f64, f64) {
        let v = self.0;
        let lon = v.y.atan2(v.x).to_degrees().rem_euclid(360.0);
        let lat = v.z.clamp(-1.0, 1.0).asin().to_degrees();
        (lon, lat)
    }

    pub fn x() -> Self {
        Self(Vector3::x())
    }

    pub fn y() -> Self {
        Self(Vector3::y())
    }

    pub fn z() -> Self {
        Self(Vector3::z())
    }

    pub fn as_vector(&self) -> &Vector3 {
        &self.0
    }

    pub fn dot(&self, other: &Direction) -> f64 {
        self.0.dot(&other.0)
    }

    /// The antipodal direction.
    pub fn antipode(&self) -> Self {
        Self(-self.0)
    }

    pub fn rotated(&self, rot: &Rotation) -> Self {
        Self::from_unit(rot * self.0)
    }
}

impl From<Direction> for [f64; 3] {
    fn from(d: Direction) -> Self {
        [d.0.x, d.0.y, d.0.z]
    }
}

impl TryFrom<[f64; 3]> for Direction {
    type Error = NullTestError;

    fn try_from(v: [f64; 3]) -> Result<Self> {
        let v = Vector3::new(v[0], v[1], v[2]);
        // Already-unit input is kept bit-for-bit so records round-trip exactly.
        let n = v.norm();
        if n.is_finite() && (n - 1.0).abs() <= 4.0 * f64::EPSILON {
            return Ok(Self(v));
        }
        Direction::new(v)
    }
}

// ── Separations ─────────────────────────────────────────────────────────────

/// Geodesic distance between two directions, in [0, π].
///
/// Uses `atan2(|a×b|, a·b)`, which keeps full precision near 0 and π where
/// `acos` of the dot product loses it.
pub fn angular_separation(a: &Direction, b: &Direction) -> f64 {
    let cross = a.0.cross(&b.0).norm();
    cross.atan2(a.0.dot(&b.0))
}

/// Separation between two headless axes, folded into [0, π/2].
pub fn axis_separation(a: &Direction, b: &Direction) -> f64 {
    let cross = a.0.cross(&b.0).norm();
    cross.atan2(a.0.dot(&b.0).abs()).min(FRAC_PI_2)
}

/// Representative of the axis through `d`: the one of `d`, `-d` with positive
/// z; when z vanishes, positive x; when x also vanishes, positive y.
pub fn canonical_axis(d: &Direction) -> Direction {
    let v = d.0;
    let sign = if v.z.abs() > AXIS_SIGN_EPS {
        v.z.signum()
    } else if v.x.abs() > AXIS_SIGN_EPS {
        v.x.signum()
    } else {
        v.y.signum()
    };
    if sign < 0.0 {
        d.antipode()
    } else {
        *d
    }
}

// ── Random sampling ─────────────────────────────────────────────────────────

/// Uniform direction on the sphere: uniform in z = cos(polar angle) and in
/// azimuth. Sampling the angles themselves would crowd the poles.
pub fn random_direction(rng: &mut StdRng) -> Direction {
    let z: f64 = rng.random::<f64>() * 2.0 - 1.0;
    let phi: f64 = rng.random::<f64>() * TAU;
    let r = (1.0 - z * z).max(0.0).sqrt();
    Direction(Vector3::new(r * phi.cos(), r * phi.sin(), z))
}

/// Haar-uniform rotation from a uniformly drawn unit quaternion (Shoemake).
pub fn random_rotation(rng: &mut StdRng) -> Rotation {
    let u1: f64 = rng.random();
    let u2: f64 = rng.random();
    let u3: f64 = rng.random();
    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    let (s2, c2) = (TAU * u2).sin_cos();
    let (s3, c3) = (TAU * u3).sin_cos();
    let q = UnitQuaternion::from_quaternion(Quaternion::new(b * c3, a * s2, a * c2, b * s3));
    q.to_rotation_matrix()
}

/// Apply one uniformly random rotation rigidly to every point.
pub fn rotate_random(points: &[Direction], rng: &mut StdRng) -> Vec<Direction> {
    let rot = random_rotation(rng);
    points.iter().map(|p| p.rotated(&rot)).collect()
}

/// Rigid rotation by `angle_rad` about `axis`.
pub fn rotate_about(points: &[Direction], axis: &Direction, angle_rad: f64) -> Vec<Direction> {
    let rot = Rotation::from_axis_angle(&Unit::new_unchecked(axis.0), angle_rad);
    points.iter().map(|p| p.rotated(&rot)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use std::f64::consts::PI;

    fn dir_strategy() -> impl Strategy<Value = Direction> {
        (0.0f64..360.0, -90.0f64..90.0).prop_map(|(lon, lat)| Direction::from_lonlat_deg(lon, lat))
    }

    proptest! {
        #[test]
        fn separation_is_symmetric_and_bounded(a in dir_strategy(), b in dir_strategy()) {
            let ab = angular_separation(&a, &b);
            let ba = angular_separation(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-15);
            prop_assert!((0.0..=PI).contains(&ab));
        }

        #[test]
        fn separation_with_self_is_zero(a in dir_strategy()) {
            prop_assert!(angular_separation(&a, &a) < 1e-12);
            prop_assert!((angular_separation(&a, &a.antipode()) - PI).abs() < 1e-12);
        }

        #[test]
        fn axis_separation_is_folded(a in dir_strategy(), b in dir_strategy()) {
            let s = axis_separation(&a, &b);
            prop_assert!((0.0..=FRAC_PI_2).contains(&s));
            prop_assert!((s - axis_separation(&b, &a)).abs() < 1e-15);
            prop_assert!((s - axis_separation(&a, &b.antipode())).abs() < 1e-12);
        }

        #[test]
        fn canonical_axis_is_sign_invariant(a in dir_strategy()) {
            let c1 = canonical_axis(&a);
            let c2 = canonical_axis(&a.antipode());
            prop_assert_eq!(c1, c2);
        }
    }

    #[test]
    fn separation_precise_near_zero() {
        let a = Direction::from_lonlat_deg(10.0, 20.0);
        let b = Direction::from_lonlat_deg(10.0, 20.0 + 1e-7);
        let sep = angular_separation(&a, &b);
        let expected = 1e-7_f64.to_radians();
        assert!((sep - expected).abs() / expected < 1e-6, "sep={sep:e}");
    }

    #[test]
    fn separation_known_values() {
        let x = Direction::x();
        let y = Direction::y();
        assert!((angular_separation(&x, &y) - FRAC_PI_2).abs() < 1e-15);
        assert!((axis_separation(&x, &x.antipode())).abs() < 1e-15);
    }

    #[test]
    fn lonlat_roundtrip() {
        let d = Direction::from_lonlat_deg(286.13, 63.87);
        let (lon, lat) = d.lonlat_deg();
        assert!((lon - 286.13).abs() < 1e-10);
        assert!((lat - 63.87).abs() < 1e-10);
    }

    #[test]
    fn zero_vector_rejected() {
        let err = Direction::new(Vector3::zeros()).unwrap_err();
        assert_eq!(err.stage(), Stage::Geometry);
    }

    #[test]
    fn random_direction_uniform_in_cosine() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 100_000;
        let mut sum_z = 0.0;
        let mut sum_z2 = 0.0;
        let mut polar_cap = 0usize;
        for _ in 0..n {
            let d = random_direction(&mut rng);
            let z = d.as_vector().z;
            sum_z += z;
            sum_z2 += z * z;
            if z > 0.5 {
                polar_cap += 1;
            }
        }
        let mean = sum_z / n as f64;
        // std of the mean of U(-1,1) is sqrt(1/3)/sqrt(n) ≈ 0.0018
        assert!(mean.abs() < 0.01, "mean cos(theta) = {mean}");
        assert!((sum_z2 / n as f64 - 1.0 / 3.0).abs() < 0.01);
        // A cap with z > 0.5 holds a quarter of the sphere's area.
        let frac = polar_cap as f64 / n as f64;
        assert!((frac - 0.25).abs() < 0.01, "cap fraction {frac}");
    }

    #[test]
    fn random_rotation_is_proper() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let r = random_rotation(&mut rng);
            let det = r.matrix().determinant();
            assert!((det - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn rotate_random_preserves_pairwise_geometry() {
        let mut rng = StdRng::seed_from_u64(3);
        let points: Vec<Direction> = (0..50).map(|_| random_direction(&mut rng)).collect();
        let rotated = rotate_random(&points, &mut rng);
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                let before = angular_separation(&points[i], &points[j]);
                let after = angular_separation(&rotated[i], &rotated[j]);
                assert!((before - after).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn rotate_about_keeps_latitude_about_pole() {
        let pts = vec![
            Direction::from_lonlat_deg(10.0, 30.0),
            Direction::from_lonlat_deg(200.0, -45.0),
        ];
        let spun = rotate_about(&pts, &Direction::z(), 1.3);
        for (a, b) in pts.iter().zip(&spun) {
            assert!((a.lonlat_deg().1 - b.lonlat_deg().1).abs() < 1e-10);
        }
    }

    #[test]
    fn direction_serde_roundtrip() {
        let d = Direction::from_lonlat_deg(45.0, 10.0);
        let s = serde_json::to_string(&d).unwrap();
        let back: Direction = serde_json::from_str(&s).unwrap();
        assert!(angular_separation(&d, &back) < 1e-12);
        assert!(serde_json::from_str::<Direction>("[0.0, 0.0, 0.0]").is_err());
    }
}
