//! Catalogs and geometric alignment measures.
//!
//! Covers the direction-to-direction measures (geodesic alignment, distances
//! to every named reference axis), the catalog model with its survey
//! footprint, the pair-separation alignment of a catalog with an axis, and the
//! cold-spot locator on maps.

use std::f64::consts::FRAC_PI_2;

use tracing::debug;

use crate::error::{NullTestError, Result, Stage};
use crate::frame::{CoordinateFrame, ReferenceAxis, ReferenceFrame};
use crate::geometry::{angular_separation, Direction};
use crate::sky::{SkyGrid, SkyMap};
use crate::{Rotation, Vector3};

// ── Direction measures ──────────────────────────────────────────────────────

/// Geodesic distance between two fixed directions, radians.
pub fn geodesic_alignment(a: &Direction, b: &Direction) -> f64 {
    angular_separation(a, b)
}

/// Distance from a direction to one named reference axis.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodalDistance {
    pub axis: ReferenceAxis,
    pub separation_rad: f64,
}

/// Geodesic distance from `direction` to every axis of `frame`.
pub fn nodal_distances(direction: &Direction, frame: &ReferenceFrame) -> Vec<NodalDistance> {
    ReferenceAxis::ALL
        .iter()
        .map(|&axis| NodalDistance {
            axis,
            separation_rad: angular_separation(direction, &frame.axis(axis)),
        })
        .collect()
}

// ── Footprint ───────────────────────────────────────────────────────────────

/// Region of the sky a survey observes.
#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    FullSky,
    /// Everything at least `min_abs_lat_deg` away from the plane whose pole
    /// is `pole` (a Galactic cut when `pole` is the Galactic pole).
    LatitudeCut { pole: Direction, min_abs_lat_deg: f64 },
    /// Pixels of `grid` flagged `true` in `mask`.
    Pixels { grid: SkyGrid, mask: Vec<bool> },
    /// `base` carried along by `rotation`.
    Rotated { base: Box<Footprint>, rotation: Rotation },
}

impl Footprint {
    pub fn contains(&self, d: &Direction) -> bool {
        match self {
            Footprint::FullSky => true,
            Footprint::LatitudeCut { pole, min_abs_lat_deg } => {
                let lat = FRAC_PI_2 - angular_separation(d, pole);
                lat.abs() >= min_abs_lat_deg.to_radians()
            }
            Footprint::Pixels { grid, mask } => mask.get(grid.pixel_of(d)).copied().unwrap_or(false),
            Footprint::Rotated { base, rotation } => base.contains(&d.rotated(&rotation.inverse())),
        }
    }

    /// The footprint after rotating the sky by `rotation`.
    pub fn rotated(&self, rotation: &Rotation) -> Footprint {
        match self {
            Footprint::FullSky => Footprint::FullSky,
            Footprint::LatitudeCut { pole, min_abs_lat_deg } => Footprint::LatitudeCut {
                pole: pole.rotated(rotation),
                min_abs_lat_deg: *min_abs_lat_deg,
            },
            Footprint::Rotated { base, rotation: inner } => Footprint::Rotated {
                base: base.clone(),
                rotation: rotation * inner,
            },
            Footprint::Pixels { .. } => Footprint::Rotated {
                base: Box::new(self.clone()),
                rotation: *rotation,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Footprint::Pixels { grid, mask } if mask.len() != grid.npix() => {
                Err(NullTestError::input_shape(
                    Stage::Statistic,
                    format!(
                        "footprint mask has {} entries, grid has {} pixels",
                        mask.len(),
                        grid.npix()
                    ),
                ))
            }
            Footprint::Rotated { base, .. } => base.validate(),
            _ => Ok(()),
        }
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CatalogObject {
    pub position: Direction,
    pub redshift: Option<f64>,
    /// Polarization position angle, radians.
    pub polarization_angle: Option<f64>,
}

impl CatalogObject {
    pub fn at(position: Direction) -> Self {
        Self {
            position,
            redshift: None,
            polarization_angle: None,
        }
    }

    pub fn with_redshift(mut self, z: f64) -> Self {
        self.redshift = Some(z);
        self
    }

    pub fn with_polarization_angle(mut self, angle_rad: f64) -> Self {
        self.polarization_angle = Some(angle_rad);
        self
    }
}

/// Fixed-size ordered set of objects, every one inside the footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    frame: CoordinateFrame,
    objects: Vec<CatalogObject>,
    footprint: Footprint,
}

impl Catalog {
    pub fn new(frame: CoordinateFrame, objects: Vec<CatalogObject>, footprint: Footprint) -> Result<Self> {
        footprint.validate()?;
        if let Some(i) = objects.iter().position(|o| !footprint.contains(&o.position)) {
            let (lon, lat) = objects[i].position.lonlat_deg();
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("object {i} at ({lon:.3}, {lat:.3}) deg lies outside the footprint"),
            ));
        }
        Ok(Self {
            frame,
            objects,
            footprint,
        })
    }

    pub fn frame(&self) -> CoordinateFrame {
        self.frame
    }

    pub fn objects(&self) -> &[CatalogObject] {
        &self.objects
    }

    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn positions(&self) -> Vec<Direction> {
        self.objects.iter().map(|o| o.position).collect()
    }

    /// Same objects (attributes in place) at new positions and footprint.
    pub(crate) fn relocated(&self, positions: Vec<Direction>, footprint: Footprint) -> Self {
        debug_assert_eq!(positions.len(), self.objects.len());
        let objects = self
            .objects
            .iter()
            .zip(positions)
            .map(|(o, position)| CatalogObject { position, ..*o })
            .collect();
        Self {
            frame: self.frame,
            objects,
            footprint,
        }
    }

    /// Normalized mean of the object positions.
    pub fn centroid_direction(&self) -> Result<Direction> {
        if self.objects.is_empty() {
            return Err(NullTestError::mask_exhaustion(Stage::Statistic, "catalog objects", 0, 1));
        }
        let sum: Vector3 = self.objects.iter().map(|o| *o.position.as_vector()).sum();
        Direction::new(sum).map_err(|_| {
            NullTestError::input_shape(Stage::Statistic, "catalog positions cancel: centroid undefined")
        })
    }
}

// ── Pair-separation alignment ───────────────────────────────────────────────

/// 3D separation vectors `r_j − r_i` of every pair `i < j`, with each object
/// placed at radius equal to its redshift.
///
/// The pair count grows quadratically, so catalogs above `max_objects` are
/// rejected rather than truncated.
pub fn separation_vectors(catalog: &Catalog, max_objects: usize) -> Result<Vec<Vector3>> {
    let n = catalog.len();
    if n > max_objects {
        return Err(NullTestError::input_shape(
            Stage::Statistic,
            format!("catalog has {n} objects, pair statistics allow at most {max_objects}"),
        ));
    }
    if n < 2 {
        return Err(NullTestError::mask_exhaustion(Stage::Statistic, "catalog objects", n, 2));
    }
    let points = catalog
        .objects()
        .iter()
        .enumerate()
        .map(|(i, o)| {
            o.redshift
                .map(|z| *o.position.as_vector() * z)
                .ok_or_else(|| NullTestError::input_shape(Stage::Statistic, format!("object {i} has no redshift")))
        })
        .collect::<Result<Vec<Vector3>>>()?;

    let mut out = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            out.push(points[j] - points[i]);
        }
    }
    Ok(out)
}

/// Mean `|cos|` between the pair separation vectors and `axis`.
///
/// 0.5 for isotropic separations, 1 when every pair lies along the axis.
/// Zero-length separations (coincident objects) are skipped.
pub fn pair_axis_alignment(catalog: &Catalog, axis: &Direction, max_objects: usize) -> Result<f64> {
    let seps = separation_vectors(catalog, max_objects)?;
    let a = axis.as_vector();
    let (sum, count) = seps.iter().fold((0.0, 0usize), |(s, c), v| {
        let norm = v.norm();
        if norm > 0.0 {
            (s + (v.dot(a) / norm).abs(), c + 1)
        } else {
            (s, c)
        }
    });
    if count == 0 {
        return Err(NullTestError::mask_exhaustion(Stage::Statistic, "non-degenerate pairs", 0, 1));
    }
    Ok(sum / count as f64)
}

// ── Cold spot ───────────────────────────────────────────────────────────────

/// Kernel used to smooth a map before its minimum is located.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Smoothing {
    /// Unweighted mean over a cap of this radius.
    TopHat { radius_deg: f64 },
    /// Gaussian beam of this full width at half maximum, truncated at 3σ.
    Gaussian { fwhm_deg: f64 },
}

/// Parameters of the cold-spot locator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColdSpotConfig {
    /// Default top-hat, 10 degrees.
    pub smoothing: Smoothing,
    /// When set, only pixels with Galactic latitude strictly below this
    /// many degrees can host the spot (-20 searches the southern sky away
    /// from the plane). Default `None`.
    pub max_galactic_lat_deg: Option<f64>,
}

impl Default for ColdSpotConfig {
    fn default() -> Self {
        Self {
            smoothing: Smoothing::TopHat { radius_deg: 10.0 },
            max_galactic_lat_deg: None,
        }
    }
}

/// `FWHM = 2 sqrt(2 ln 2) σ`.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Precomputed weighted caps for locating the minimum of a smoothed map.
#[derive(Debug, Clone)]
pub struct ColdSpotScan {
    nside: u32,
    caps: Vec<Vec<(usize, f64)>>,
    candidates: Vec<bool>,
}

impl ColdSpotScan {
    /// Kernels for every pixel of `grid`; `galactic_pole` fixes the latitude
    /// used by the candidate restriction.
    pub fn new(grid: &SkyGrid, config: &ColdSpotConfig, galactic_pole: &Direction) -> Result<Self> {
        let caps: Vec<Vec<(usize, f64)>> = match config.smoothing {
            Smoothing::TopHat { radius_deg } => {
                if !(radius_deg > 0.0 && radius_deg <= 90.0) {
                    return Err(NullTestError::invalid_config(format!(
                        "cold spot smoothing radius {radius_deg} deg outside (0, 90]"
                    )));
                }
                let radius = radius_deg.to_radians();
                grid.centers()
                    .iter()
                    .map(|c| grid.cap(c, radius).into_iter().map(|q| (q, 1.0)).collect())
                    .collect()
            }
            Smoothing::Gaussian { fwhm_deg } => {
                if !(fwhm_deg > 0.0 && fwhm_deg <= 90.0) {
                    return Err(NullTestError::invalid_config(format!(
                        "cold spot smoothing FWHM {fwhm_deg} deg outside (0, 90]"
                    )));
                }
                let sigma = fwhm_deg.to_radians() / FWHM_PER_SIGMA;
                grid.centers()
                    .iter()
                    .map(|c| {
                        grid.cap(c, 3.0 * sigma)
                            .into_iter()
                            .map(|q| {
                                let theta = angular_separation(c, &grid.center(q));
                                (q, (-0.5 * (theta / sigma).powi(2)).exp())
                            })
                            .collect()
                    })
                    .collect()
            }
        };
        let candidates = match config.max_galactic_lat_deg {
            None => vec![true; grid.npix()],
            Some(max_lat) => {
                if !(max_lat > -90.0 && max_lat <= 90.0) {
                    return Err(NullTestError::invalid_config(format!(
                        "cold spot latitude limit {max_lat} deg outside (-90, 90]"
                    )));
                }
                let sin_max = max_lat.to_radians().sin();
                grid.centers().iter().map(|c| c.dot(galactic_pole) < sin_max).collect()
            }
        };
        Ok(Self {
            nside: grid.nside(),
            caps,
            candidates,
        })
    }

    /// Number of pixels allowed to host the spot.
    pub fn candidate_count(&self) -> usize {
        self.candidates.iter().filter(|&&c| c).count()
    }
}

/// Coldest spot of a map: the valid candidate pixel whose smoothed value
/// (kernel-weighted over valid pixels) is lowest. Returns the pixel centre
/// and the smoothed value.
pub fn coldest_direction(map: &SkyMap, scan: &ColdSpotScan) -> Result<(Direction, f64)> {
    if map.grid().nside() != scan.nside {
        return Err(NullTestError::input_shape(
            Stage::Statistic,
            format!(
                "map nside={} does not match cold spot scan nside={}",
                map.grid().nside(),
                scan.nside
            ),
        ));
    }
    let t = map.values();
    let best = scan
        .caps
        .iter()
        .enumerate()
        .filter(|(p, _)| scan.candidates[*p] && map.is_valid(*p))
        .filter_map(|(p, cap)| {
            let (sum, weight) = cap
                .iter()
                .filter(|(q, _)| map.is_valid(*q))
                .fold((0.0, 0.0), |(s, w), &(q, wq)| (s + wq * t[q], w + wq));
            (weight > 0.0).then(|| (p, sum / weight))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1));
    let (pix, value) = best.ok_or_else(|| {
        NullTestError::mask_exhaustion(Stage::Statistic, "candidate pixels", map.valid_count(), 1)
    })?;
    debug!(pix, value, "coldest spot");
    Ok((map.grid().center(pix), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::random_direction;
    use crate::sky::galactic_cut_mask;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn nodal_distances_cover_all_axes() {
        let frame = ReferenceFrame::j2000();
        let pole = frame.axis(ReferenceAxis::NorthEclipticPole);
        let d = nodal_distances(&pole, &frame);
        assert_eq!(d.len(), ReferenceAxis::ALL.len());
        let south = d.iter().find(|n| n.axis == ReferenceAxis::SouthEclipticPole).unwrap();
        assert!((south.separation_rad - std::f64::consts::PI).abs() < 1e-12);
        assert!(geodesic_alignment(&pole, &pole) < 1e-12);
    }

    #[test]
    fn catalog_rejects_objects_outside_footprint() {
        let footprint = Footprint::LatitudeCut {
            pole: Direction::z(),
            min_abs_lat_deg: 20.0,
        };
        let objects = vec![
            CatalogObject::at(Direction::from_lonlat_deg(10.0, 45.0)),
            CatalogObject::at(Direction::from_lonlat_deg(10.0, 5.0)),
        ];
        let err = Catalog::new(CoordinateFrame::Icrs, objects, footprint).unwrap_err();
        assert!(matches!(err, NullTestError::InputShape { .. }));
    }

    #[test]
    fn rotated_footprint_follows_rotation() {
        let grid = SkyGrid::new(4).unwrap();
        let mask = galactic_cut_mask(&grid, &Direction::z(), 30.0);
        let footprint = Footprint::Pixels { grid, mask };
        let rot = Rotation::from_axis_angle(&nalgebra::Vector3::x_axis(), std::f64::consts::FRAC_PI_2);
        let rotated = footprint.rotated(&rot);
        let inside = Direction::from_lonlat_deg(40.0, 70.0);
        assert!(footprint.contains(&inside));
        assert!(rotated.contains(&inside.rotated(&rot)));
        assert!(!rotated.contains(&inside));
    }

    #[test]
    fn centroid_of_clustered_catalog() {
        let objects = [(0.0, 10.0), (10.0, 0.0), (-10.0, 0.0), (0.0, -10.0)]
            .iter()
            .map(|&(lon, lat)| CatalogObject::at(Direction::from_lonlat_deg(lon, lat)))
            .collect();
        let cat = Catalog::new(CoordinateFrame::Icrs, objects, Footprint::FullSky).unwrap();
        let c = cat.centroid_direction().unwrap();
        assert!(angular_separation(&c, &Direction::x()) < 1e-12);
    }

    #[test]
    fn pair_alignment_limits() {
        // Objects strung along z: every separation is parallel to the axis.
        let line = (1..6)
            .map(|i| CatalogObject::at(Direction::z()).with_redshift(i as f64 * 0.1))
            .collect();
        let cat = Catalog::new(CoordinateFrame::Icrs, line, Footprint::FullSky).unwrap();
        assert!((pair_axis_alignment(&cat, &Direction::z(), 100).unwrap() - 1.0).abs() < 1e-12);

        let mut rng = StdRng::seed_from_u64(17);
        let cloud = (0..400)
            .map(|_| CatalogObject::at(random_direction(&mut rng)).with_redshift(1.0))
            .collect();
        let cat = Catalog::new(CoordinateFrame::Icrs, cloud, Footprint::FullSky).unwrap();
        let mean = pair_axis_alignment(&cat, &Direction::x(), 1000).unwrap();
        assert!((mean - 0.5).abs() < 0.05, "mean |cos| {mean}");
    }

    #[test]
    fn pair_alignment_guards() {
        let objects: Vec<_> = (0..10)
            .map(|i| CatalogObject::at(Direction::from_lonlat_deg(i as f64 * 30.0, 0.0)))
            .collect();
        let cat = Catalog::new(CoordinateFrame::Icrs, objects, Footprint::FullSky).unwrap();
        // No redshifts.
        assert!(matches!(
            separation_vectors(&cat, 100),
            Err(NullTestError::InputShape { .. })
        ));
        // Over the object limit.
        assert!(matches!(
            separation_vectors(&cat, 5),
            Err(NullTestError::InputShape { .. })
        ));
    }

    #[test]
    fn coldest_direction_finds_planted_spot() {
        let spot = Direction::from_lonlat_deg(209.0, -57.0);
        let grid = SkyGrid::new(8).unwrap();
        let map = SkyMap::from_fn(grid.clone(), CoordinateFrame::Galactic, |d| {
            -(-angular_separation(d, &spot).powi(2) / 0.05).exp()
        });
        let scan = ColdSpotScan::new(&grid, &ColdSpotConfig::default(), &Direction::z()).unwrap();
        let (found, value) = coldest_direction(&map, &scan).unwrap();
        assert!(value < 0.0);
        assert!(angular_separation(&found, &spot).to_degrees() < 10.0);
    }

    fn two_spots(grid: &SkyGrid) -> (Direction, Direction, SkyMap) {
        let south = Direction::from_lonlat_deg(209.0, -57.0);
        let north = Direction::from_lonlat_deg(30.0, 50.0);
        let map = SkyMap::from_fn(grid.clone(), CoordinateFrame::Galactic, |d| {
            -(-angular_separation(d, &south).powi(2) / 0.02).exp()
                - 2.0 * (-angular_separation(d, &north).powi(2) / 0.02).exp()
        });
        (south, north, map)
    }

    #[test]
    fn gaussian_smoothing_finds_deepest_spot() {
        let grid = SkyGrid::new(8).unwrap();
        let (_, north, map) = two_spots(&grid);
        let config = ColdSpotConfig {
            smoothing: Smoothing::Gaussian { fwhm_deg: 5.0 },
            max_galactic_lat_deg: None,
        };
        let scan = ColdSpotScan::new(&grid, &config, &Direction::z()).unwrap();
        assert_eq!(scan.candidate_count(), grid.npix());
        let (found, value) = coldest_direction(&map, &scan).unwrap();
        assert!(value < -1.0);
        assert!(angular_separation(&found, &north).to_degrees() < 10.0);
    }

    #[test]
    fn southern_restriction_skips_northern_spot() {
        let grid = SkyGrid::new(8).unwrap();
        let (south, _, map) = two_spots(&grid);
        let config = ColdSpotConfig {
            smoothing: Smoothing::Gaussian { fwhm_deg: 5.0 },
            max_galactic_lat_deg: Some(-20.0),
        };
        let scan = ColdSpotScan::new(&grid, &config, &Direction::z()).unwrap();
        // b < -20 deg covers (1 - sin 20°)/2 ≈ 0.33 of the sky.
        let share = scan.candidate_count() as f64 / grid.npix() as f64;
        assert!((share - 0.33).abs() < 0.04, "candidate share {share}");
        let (found, _) = coldest_direction(&map, &scan).unwrap();
        assert!(angular_separation(&found, &south).to_degrees() < 10.0);
        assert!(found.lonlat_deg().1 < -20.0);
    }

    #[test]
    fn cold_spot_config_is_checked() {
        let grid = SkyGrid::new(4).unwrap();
        let bad = [
            ColdSpotConfig {
                smoothing: Smoothing::Gaussian { fwhm_deg: 0.0 },
                max_galactic_lat_deg: None,
            },
            ColdSpotConfig {
                smoothing: Smoothing::TopHat { radius_deg: 120.0 },
                max_galactic_lat_deg: None,
            },
            ColdSpotConfig {
                max_galactic_lat_deg: Some(-90.0),
                ..Default::default()
            },
        ];
        for config in &bad {
            assert!(matches!(
                ColdSpotScan::new(&grid, config, &Direction::z()),
                Err(NullTestError::InvalidConfig { .. })
            ));
        }
    }
}
