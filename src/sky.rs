//! Equal-area sky pixelization, pixelized maps and masks.
//!
//! `SkyGrid` partitions the sphere like the cone-search index it grew out of:
//! latitude into `3 * nside` rings uniform in `z = sin(lat)`, longitude into
//! `4 * nside` cells per ring, for `12 * nside^2` equal-area pixels. Pixel
//! `ring * n_lon + cell` has its centre at the middle of the ring in z and
//! of the cell in longitude.
//!
//! Because ring centres are symmetric in z and `n_lon` is even, the antipode
//! of every pixel centre is exactly another pixel centre. The point-parity
//! statistic depends on that.

use std::f64::consts::{PI, TAU};

use crate::error::{NullTestError, Result, Stage};
use crate::frame::CoordinateFrame;
use crate::geometry::{angular_separation, Direction};
use crate::Vector3;

#[derive(Debug, Clone, PartialEq)]
pub struct SkyGrid {
    nside: u32,
    n_lat: u32,
    n_lon: u32,
    centers: Vec<Direction>,
}

impl SkyGrid {
    /// Build a grid with `12 * nside^2` pixels. `nside` must be at least 1.
    pub fn new(nside: u32) -> Result<Self> {
        if nside == 0 {
            return Err(NullTestError::invalid_config("grid nside must be > 0"));
        }
        let n_lat = 3 * nside;
        let n_lon = 4 * nside;
        let mut centers = Vec::with_capacity((n_lat * n_lon) as usize);
        for ring in 0..n_lat {
            let z = Self::ring_z(n_lat, ring);
            let r = (1.0 - z * z).max(0.0).sqrt();
            for cell in 0..n_lon {
                let phi = (cell as f64 + 0.5) * TAU / n_lon as f64;
                centers.push(Direction::from_unit(Vector3::new(
                    r * phi.cos(),
                    r * phi.sin(),
                    z,
                )));
            }
        }
        Ok(Self {
            nside,
            n_lat,
            n_lon,
            centers,
        })
    }

    pub fn nside(&self) -> u32 {
        self.nside
    }

    pub fn npix(&self) -> usize {
        self.centers.len()
    }

    pub fn n_rings(&self) -> u32 {
        self.n_lat
    }

    pub fn n_lon(&self) -> u32 {
        self.n_lon
    }

    /// Solid angle of one pixel in steradians.
    pub fn pixel_area(&self) -> f64 {
        4.0 * PI / self.npix() as f64
    }

    /// Pixel centres in pixel-index order.
    pub fn centers(&self) -> &[Direction] {
        &self.centers
    }

    pub fn center(&self, pix: usize) -> Direction {
        self.centers[pix]
    }

    /// z coordinate shared by every pixel of a ring.
    pub fn ring_z_of(&self, ring: u32) -> f64 {
        Self::ring_z(self.n_lat, ring)
    }

    /// Longitude (radians) of a cell centre within any ring.
    pub fn cell_phi(&self, cell: u32) -> f64 {
        (cell as f64 + 0.5) * TAU / self.n_lon as f64
    }

    /// Index of the pixel diametrically opposite `pix`.
    pub fn antipode(&self, pix: usize) -> usize {
        let n_lon = self.n_lon as usize;
        let ring = pix / n_lon;
        let cell = pix % n_lon;
        let opp_ring = self.n_lat as usize - 1 - ring;
        let opp_cell = (cell + n_lon / 2) % n_lon;
        opp_ring * n_lon + opp_cell
    }

    /// Pixel containing a direction.
    pub fn pixel_of(&self, dir: &Direction) -> usize {
        let v = dir.as_vector();
        let mut phi = v.y.atan2(v.x);
        if phi < 0.0 {
            phi += TAU;
        }
        let ring = Self::z_to_ring(self.n_lat, v.z);
        let cell = Self::phi_to_cell(self.n_lon, phi);
        (ring * self.n_lon + cell) as usize
    }

    /// Indices of pixels whose centres lie within `radius_rad` of `center`.
    pub fn cap(&self, center: &Direction, radius_rad: f64) -> Vec<usize> {
        let cos_radius = radius_rad.clamp(0.0, PI).cos();
        self.centers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.dot(center) >= cos_radius)
            .map(|(i, _)| i)
            .collect()
    }

    fn ring_z(n_lat: u32, ring: u32) -> f64 {
        -1.0 + (ring as f64 + 0.5) * 2.0 / n_lat as f64
    }

    fn z_to_ring(n_lat: u32, z: f64) -> u32 {
        let u = ((z.clamp(-1.0, 1.0) + 1.0) * 0.5).clamp(0.0, 1.0);
        let idx = (u * n_lat as f64).floor() as u32;
        idx.min(n_lat - 1)
    }

    fn phi_to_cell(n_lon: u32, phi: f64) -> u32 {
        let u = (phi / TAU).clamp(0.0, 1.0 - f64::EPSILON);
        let idx = (u * n_lon as f64).floor() as u32;
        idx.min(n_lon - 1)
    }
}

// ── Masks ───────────────────────────────────────────────────────────────────

/// Validity mask excluding pixels within `cut_deg` of the Galactic plane.
///
/// The plane is defined by `galactic_pole`, so the cut works in whichever
/// frame the grid is expressed in. A cut of 0 keeps every pixel.
pub fn galactic_cut_mask(grid: &SkyGrid, galactic_pole: &Direction, cut_deg: f64) -> Vec<bool> {
    if cut_deg <= 0.0 {
        return vec![true; grid.npix()];
    }
    let cut = cut_deg.to_radians();
    grid.centers()
        .iter()
        .map(|c| {
            let lat = std::f64::consts::FRAC_PI_2 - angular_separation(c, galactic_pole);
            lat.abs() >= cut
        })
        .collect()
}

/// Fraction of the sky kept by a mask.
pub fn sky_fraction(mask: &[bool]) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&m| m).count() as f64 / mask.len() as f64
}

// ── Maps ────────────────────────────────────────────────────────────────────

/// A scalar field sampled at the pixel centres of a [`SkyGrid`], with a
/// validity mask (`true` = pixel used).
#[derive(Debug, Clone, PartialEq)]
pub struct SkyMap {
    grid: SkyGrid,
    frame: CoordinateFrame,
    values: Vec<f64>,
    mask: Vec<bool>,
}

impl SkyMap {
    pub fn new(
        grid: SkyGrid,
        frame: CoordinateFrame,
        values: Vec<f64>,
        mask: Vec<bool>,
    ) -> Result<Self> {
        let npix = grid.npix();
        if values.len() != npix || mask.len() != npix {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!(
                    "map has {} values and {} mask entries, grid nside={} has {} pixels",
                    values.len(),
                    mask.len(),
                    grid.nside(),
                    npix
                ),
            ));
        }
        if let Some(pix) = values.iter().zip(&mask).position(|(v, &m)| m && !v.is_finite()) {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!("non-finite value {} at valid pixel {pix}", values[pix]),
            ));
        }
        Ok(Self {
            grid,
            frame,
            values,
            mask,
        })
    }

    /// Map with every pixel valid.
    pub fn unmasked(grid: SkyGrid, frame: CoordinateFrame, values: Vec<f64>) -> Result<Self> {
        let mask = vec![true; values.len()];
        Self::new(grid, frame, values, mask)
    }

    /// Evaluate `f` at every pixel centre.
    pub fn from_fn<F>(grid: SkyGrid, frame: CoordinateFrame, f: F) -> Self
    where
        F: Fn(&Direction) -> f64,
    {
        let values: Vec<f64> = grid.centers().iter().map(f).collect();
        let mask = vec![true; values.len()];
        Self {
            grid,
            frame,
            values,
            mask,
        }
    }

    pub fn grid(&self) -> &SkyGrid {
        &self.grid
    }

    pub fn frame(&self) -> CoordinateFrame {
        self.frame
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// `false` for masked pixels and for indices past the end of the grid.
    pub fn is_valid(&self, pix: usize) -> bool {
        self.mask.get(pix).copied().unwrap_or(false)
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Combine the current mask with `other` (a pixel stays valid only if
    /// both masks keep it).
    pub fn with_mask(mut self, other: &[bool]) -> Result<Self> {
        if other.len() != self.mask.len() {
            return Err(NullTestError::input_shape(
                Stage::Statistic,
                format!(
                    "mask has {} entries, map has {} pixels",
                    other.len(),
                    self.mask.len()
                ),
            ));
        }
        for (m, &o) in self.mask.iter_mut().zip(other) {
            *m = *m && o;
        }
        Ok(self)
    }

    /// Same grid, frame and mask with new values.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            grid: self.grid.clone(),
            frame: self.frame,
            values,
            mask: self.mask.clone(),
        }
    }

    /// Fail with `MaskExhaustion` when fewer than `required` pixels are valid.
    pub fn require_valid(&self, required: usize) -> Result<()> {
        let valid = self.valid_count();
        if valid < required {
            return Err(NullTestError::mask_exhaustion(
                Stage::Statistic,
                "pixels",
                valid,
                required,
            ));
        }
        Ok(())
    }
}
