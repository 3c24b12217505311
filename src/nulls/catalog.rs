//! Catalog surrogates.
//!
//! Each strategy states what it preserves. They are never mixed within one
//! ensemble.

use std::f64::consts::TAU;

use nalgebra::Unit;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::RngExt;

use crate::error::{NullTestError, Result, Stage};
use crate::geometry::{random_direction, random_rotation, Direction};
use crate::statistics::alignment::Catalog;
use crate::Rotation;

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogShuffle {
    #[default]
    /// One Haar-random rotation of the whole catalog (and its footprint).
    /// Preserves every pairwise separation; only the global orientation
    /// relative to the reference frame is randomized.
    RigidRotation,
    /// Every position redrawn uniformly and rejected until it lands inside
    /// the footprint. Preserves the footprint density, not pair geometry.
    DensityResample { max_attempts: usize },
    /// Rigid spin by a uniform angle about `axis`. Preserves pair geometry
    /// and the latitude distribution about `axis`.
    AzimuthalSpin { axis: Direction },
    /// Positions permuted among objects; attributes stay with their index.
    Scramble,
}

impl CatalogShuffle {
    /// Draw one surrogate catalog.
    pub fn apply(&self, catalog: &Catalog, rng: &mut StdRng) -> Result<Catalog> {
        match *self {
            CatalogShuffle::RigidRotation => {
                let rot = random_rotation(rng);
                Ok(rotate_catalog(catalog, &rot))
            }
            CatalogShuffle::AzimuthalSpin { axis } => {
                let angle = rng.random::<f64>() * TAU;
                let rot = Rotation::from_axis_angle(&Unit::new_unchecked(*axis.as_vector()), angle);
                Ok(rotate_catalog(catalog, &rot))
            }
            CatalogShuffle::DensityResample { max_attempts } => {
                density_resample(catalog, max_attempts, rng)
            }
            CatalogShuffle::Scramble => {
                let mut positions = catalog.positions();
                positions.shuffle(rng);
                Ok(catalog.relocated(positions, catalog.footprint().clone()))
            }
        }
    }
}

fn rotate_catalog(catalog: &Catalog, rot: &Rotation) -> Catalog {
    let positions = catalog.objects().iter().map(|o| o.position.rotated(rot)).collect();
    catalog.relocated(positions, catalog.footprint().rotated(rot))
}

fn density_resample(catalog: &Catalog, max_attempts: usize, rng: &mut StdRng) -> Result<Catalog> {
    if max_attempts == 0 {
        return Err(NullTestError::invalid_config("density resample needs max_attempts > 0"));
    }
    let footprint = catalog.footprint();
    let mut positions = Vec::with_capacity(catalog.len());
    for _ in 0..catalog.len() {
        let accepted = (0..max_attempts)
            .map(|_| random_direction(rng))
            .find(|d| footprint.contains(d));
        match accepted {
            Some(d) => positions.push(d),
            None => {
                return Err(NullTestError::mask_exhaustion(
                    Stage::NullGeneration,
                    format!("positions accepted by the footprint within {max_attempts} attempts"),
                    positions.len(),
                    catalog.len(),
                ))
            }
        }
    }
    Ok(catalog.relocated(positions, footprint.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CoordinateFrame;
    use crate::geometry::angular_separation;
    use crate::sky::SkyGrid;
    use crate::statistics::alignment::{CatalogObject, Footprint};
    use rand::SeedableRng;

    fn catalog(footprint: Footprint, n: usize, rng: &mut StdRng) -> Catalog {
        let mut objects = Vec::new();
        let mut z = 0.1;
        while objects.len() < n {
            let d = random_direction(rng);
            if footprint.contains(&d) {
                objects.push(CatalogObject::at(d).with_redshift(z));
                z += 0.1;
            }
        }
        Catalog::new(CoordinateFrame::Icrs, objects, footprint).unwrap()
    }

    fn cut() -> Footprint {
        Footprint::LatitudeCut {
            pole: Direction::z(),
            min_abs_lat_deg: 20.0,
        }
    }

    #[test]
    fn rigid_rotation_preserves_pairs_and_attributes() {
        let mut rng = StdRng::seed_from_u64(10);
        let cat = catalog(cut(), 30, &mut rng);
        let surrogate = CatalogShuffle::RigidRotation.apply(&cat, &mut rng).unwrap();
        for i in 0..cat.len() {
            assert_eq!(cat.objects()[i].redshift, surrogate.objects()[i].redshift);
            assert!(surrogate.footprint().contains(&surrogate.objects()[i].position));
            for j in (i + 1)..cat.len() {
                let a = angular_separation(&cat.objects()[i].position, &cat.objects()[j].position);
                let b = angular_separation(
                    &surrogate.objects()[i].position,
                    &surrogate.objects()[j].position,
                );
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn density_resample_stays_in_footprint() {
        let mut rng = StdRng::seed_from_u64(11);
        let cat = catalog(cut(), 200, &mut rng);
        let shuffle = CatalogShuffle::DensityResample { max_attempts: 100 };
        let surrogate = shuffle.apply(&cat, &mut rng).unwrap();
        assert_eq!(surrogate.len(), cat.len());
        assert!(surrogate.objects().iter().all(|o| cut().contains(&o.position)));
        assert_ne!(surrogate.positions(), cat.positions());
    }

    #[test]
    fn density_resample_exhausts_tiny_footprint() {
        let mut rng = StdRng::seed_from_u64(12);
        let grid = SkyGrid::new(8).unwrap();
        let mut mask = vec![false; grid.npix()];
        mask[100] = true;
        let center = grid.center(100);
        let footprint = Footprint::Pixels { grid, mask };
        let cat = Catalog::new(
            CoordinateFrame::Icrs,
            vec![CatalogObject::at(center)],
            footprint,
        )
        .unwrap();
        let err = CatalogShuffle::DensityResample { max_attempts: 3 }
            .apply(&cat, &mut rng)
            .unwrap_err();
        assert!(matches!(err, NullTestError::MaskExhaustion { valid: 0, required: 1, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn azimuthal_spin_keeps_latitude() {
        let mut rng = StdRng::seed_from_u64(13);
        let cat = catalog(cut(), 50, &mut rng);
        let spin = CatalogShuffle::AzimuthalSpin { axis: Direction::z() };
        let surrogate = spin.apply(&cat, &mut rng).unwrap();
        for (a, b) in cat.objects().iter().zip(surrogate.objects()) {
            assert!((a.position.as_vector().z - b.position.as_vector().z).abs() < 1e-12);
            assert!(cut().contains(&b.position));
        }
    }

    #[test]
    fn scramble_permutes_positions_only() {
        let mut rng = StdRng::seed_from_u64(14);
        let cat = catalog(cut(), 40, &mut rng);
        let surrogate = CatalogShuffle::Scramble.apply(&cat, &mut rng).unwrap();
        let key = |d: &Direction| {
            let (lon, lat) = d.lonlat_deg();
            ((lon * 1e9) as i64, (lat * 1e9) as i64)
        };
        let mut before: Vec<_> = cat.positions().iter().map(key).collect();
        let mut after: Vec<_> = surrogate.positions().iter().map(key).collect();
        assert_ne!(before, after);
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
        for (a, b) in cat.objects().iter().zip(surrogate.objects()) {
            assert_eq!(a.redshift, b.redshift);
        }
    }
}
