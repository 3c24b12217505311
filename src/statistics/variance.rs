//! Pixel variance inside a band around the ecliptic.
//!
//! A foreground or local screen near the ecliptic would change the
//! fluctuation level there. The belt is `|β| < half_width` in ecliptic
//! latitude, optionally with the Galactic plane removed.

use std::f64::consts::FRAC_PI_2;

use tracing::debug;

use crate::error::{NullTestError, Result, Stage};
use crate::geometry::{angular_separation, Direction};
use crate::sky::{SkyGrid, SkyMap};

/// Galactic latitude cut of the jackknife variant, degrees.
pub const JACKKNIFE_GALACTIC_LAT_DEG: f64 = 40.0;

/// Shape of the ecliptic belt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VarianceBeltConfig {
    /// Half width in ecliptic latitude, degrees. Default 20.
    pub half_width_deg: f64,
    /// Pixels closer than this to the Galactic plane are left out, degrees.
    /// Default 0.
    pub min_galactic_lat_deg: f64,
    /// Fewest valid belt pixels the variance needs. Default 50.
    pub min_pixels: usize,
}

impl Default for VarianceBeltConfig {
    fn default() -> Self {
        Self {
            half_width_deg: 20.0,
            min_galactic_lat_deg: 0.0,
            min_pixels: 50,
        }
    }
}

impl VarianceBeltConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.half_width_deg > 0.0 && self.half_width_deg <= 90.0) {
            return Err(NullTestError::invalid_config(format!(
                "belt half width {} deg outside (0, 90]",
                self.half_width_deg
            )));
        }
        if !(0.0..90.0).contains(&self.min_galactic_lat_deg) {
            return Err(NullTestError::invalid_config(format!(
                "belt Galactic latitude cut {} deg outside [0, 90)",
                self.min_galactic_lat_deg
            )));
        }
        if self.min_pixels < 2 {
            return Err(NullTestError::invalid_config("belt variance needs at least 2 pixels"));
        }
        Ok(())
    }
}

fn latitude(d: &Direction, pole: &Direction) -> f64 {
    FRAC_PI_2 - angular_separation(d, pole)
}

/// Pixels inside the belt.
pub fn belt_mask(
    grid: &SkyGrid,
    ecliptic_pole: &Direction,
    galactic_pole: &Direction,
    config: &VarianceBeltConfig,
) -> Result<Vec<bool>> {
    config.validate()?;
    let half_width = config.half_width_deg.to_radians();
    let gal_cut = config.min_galactic_lat_deg.to_radians();
    Ok(grid
        .centers()
        .iter()
        .map(|c| {
            latitude(c, ecliptic_pole).abs() < half_width && latitude(c, galactic_pole).abs() >= gal_cut
        })
        .collect())
}

/// Population variance of the map over pixels valid in both the map and
/// `region`.
pub fn region_variance(map: &SkyMap, region: &[bool], min_pixels: usize) -> Result<f64> {
    if region.len() != map.grid().npix() {
        return Err(NullTestError::input_shape(
            Stage::Statistic,
            format!("region has {} entries, map has {} pixels", region.len(), map.grid().npix()),
        ));
    }
    let t = map.values();
    let picked: Vec<f64> = (0..t.len())
        .filter(|&p| region[p] && map.is_valid(p))
        .map(|p| t[p])
        .collect();
    let required = min_pixels.max(2);
    if picked.len() < required {
        return Err(NullTestError::mask_exhaustion(
            Stage::Statistic,
            "valid pixels in region",
            picked.len(),
            required,
        ));
    }
    let n = picked.len() as f64;
    let mean = picked.iter().sum::<f64>() / n;
    let var = picked.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    debug!(pixels = picked.len(), variance = var, "region variance");
    Ok(var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CoordinateFrame;

    #[test]
    fn belt_covers_expected_fraction() {
        let grid = SkyGrid::new(8).unwrap();
        let mask = belt_mask(&grid, &Direction::z(), &Direction::x(), &VarianceBeltConfig::default()).unwrap();
        // |β| < 20° covers sin 20° ≈ 0.342 of the sphere.
        let f = mask.iter().filter(|&&m| m).count() as f64 / grid.npix() as f64;
        assert!((f - 0.342).abs() < 0.03, "belt fraction {f}");
    }

    #[test]
    fn galactic_cut_thins_the_belt() {
        let grid = SkyGrid::new(8).unwrap();
        let ecl = Direction::z();
        let gal = Direction::from_lonlat_deg(0.0, 30.0);
        let wide = belt_mask(&grid, &ecl, &gal, &VarianceBeltConfig::default()).unwrap();
        let config = VarianceBeltConfig {
            min_galactic_lat_deg: JACKKNIFE_GALACTIC_LAT_DEG,
            ..Default::default()
        };
        let cut = belt_mask(&grid, &ecl, &gal, &config).unwrap();
        assert!(cut.iter().zip(&wide).all(|(&c, &w)| !c || w));
        let (nw, nc) = (
            wide.iter().filter(|&&m| m).count(),
            cut.iter().filter(|&&m| m).count(),
        );
        assert!(nc > 0 && nc < nw, "{nc} of {nw}");
        for (p, &keep) in cut.iter().enumerate() {
            if keep {
                assert!(latitude(&grid.center(p), &gal).abs().to_degrees() >= 40.0);
            }
        }
    }

    #[test]
    fn variance_of_known_values() {
        let grid = SkyGrid::new(2).unwrap();
        let npix = grid.npix();
        let values: Vec<f64> = (0..npix).map(|p| if p % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let map = SkyMap::unmasked(grid, CoordinateFrame::Galactic, values).unwrap();
        let all = vec![true; npix];
        assert!((region_variance(&map, &all, 2).unwrap() - 1.0).abs() < 1e-12);
        let evens: Vec<bool> = (0..npix).map(|p| p % 2 == 0).collect();
        assert_eq!(region_variance(&map, &evens, 2).unwrap(), 0.0);
    }

    #[test]
    fn masked_pixels_leave_the_region() {
        let grid = SkyGrid::new(2).unwrap();
        let npix = grid.npix();
        let mut values = vec![3.0; npix];
        values[0] = 1.0e6;
        let mut mask = vec![true; npix];
        mask[0] = false;
        let map = SkyMap::new(grid, CoordinateFrame::Galactic, values, mask).unwrap();
        assert_eq!(region_variance(&map, &vec![true; npix], 2).unwrap(), 0.0);
        assert!(matches!(
            region_variance(&map, &vec![true; npix], npix),
            Err(NullTestError::MaskExhaustion { .. })
        ));
        assert!(matches!(
            region_variance(&map, &[true; 3], 2),
            Err(NullTestError::InputShape { .. })
        ));
    }

    #[test]
    fn belt_config_is_checked() {
        let grid = SkyGrid::new(2).unwrap();
        let bad = VarianceBeltConfig {
            half_width_deg: 0.0,
            ..Default::default()
        };
        assert!(belt_mask(&grid, &Direction::z(), &Direction::x(), &bad).is_err());
        let bad = VarianceBeltConfig {
            min_galactic_lat_deg: 90.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
