//! Named Solar-System reference axes.
//!
//! A [`ReferenceFrame`] is an immutable value built once by the caller and
//! passed by reference into every test. Different frames (epochs,
//! conventions, coordinate systems) can be used side by side.

use std::fmt;

use nalgebra::Matrix3;

use crate::geometry::Direction;
use crate::{Rotation, Vector3};

/// Coordinate system in which directions are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateFrame {
    Icrs,
    Galactic,
}

impl fmt::Display for CoordinateFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateFrame::Icrs => f.write_str("ICRS"),
            CoordinateFrame::Galactic => f.write_str("Galactic"),
        }
    }
}

/// The fixed set of reference axes a test can be run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAxis {
    /// Solar rotation (spin angular momentum) axis.
    SolarSpin,
    NorthEclipticPole,
    SouthEclipticPole,
    /// Direction of the CMB kinematic dipole.
    CmbDipole,
    VernalEquinox,
    AutumnalEquinox,
    GalacticNorthPole,
}

impl ReferenceAxis {
    pub const ALL: [ReferenceAxis; 7] = [
        ReferenceAxis::SolarSpin,
        ReferenceAxis::NorthEclipticPole,
        ReferenceAxis::SouthEclipticPole,
        ReferenceAxis::CmbDipole,
        ReferenceAxis::VernalEquinox,
        ReferenceAxis::AutumnalEquinox,
        ReferenceAxis::GalacticNorthPole,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReferenceAxis::SolarSpin => "solar_spin",
            ReferenceAxis::NorthEclipticPole => "north_ecliptic_pole",
            ReferenceAxis::SouthEclipticPole => "south_ecliptic_pole",
            ReferenceAxis::CmbDipole => "cmb_dipole",
            ReferenceAxis::VernalEquinox => "vernal_equinox",
            ReferenceAxis::AutumnalEquinox => "autumnal_equinox",
            ReferenceAxis::GalacticNorthPole => "galactic_north_pole",
        }
    }
}

impl fmt::Display for ReferenceAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── J2000 constants (ICRS, degrees) ─────────────────────────────────────────

/// Solar north pole, IAU WGCCRE (Archinal et al. 2011).
const SOLAR_POLE_RA_DEG: f64 = 286.13;
const SOLAR_POLE_DEC_DEG: f64 = 63.87;
/// North ecliptic pole: RA 18h, Dec +66°33'38.55".
const ECLIPTIC_POLE_RA_DEG: f64 = 270.0;
const ECLIPTIC_POLE_DEC_DEG: f64 = 66.560_708;
/// CMB dipole apex (Planck 2018: l = 264.021°, b = 48.253°).
const CMB_DIPOLE_RA_DEG: f64 = 167.942;
const CMB_DIPOLE_DEC_DEG: f64 = -6.944;

/// ICRS → Galactic rotation (Hipparcos definition). Rows are the Galactic
/// x, y, z axes expressed in ICRS.
const ICRS_TO_GALACTIC: [[f64; 3]; 3] = [
    [-0.054_875_560_416_215_4, -0.873_437_090_234_885, -0.483_835_015_548_713_2],
    [0.494_109_427_875_583_7, -0.444_829_629_960_011_2, 0.746_982_244_497_218_9],
    [-0.867_666_149_019_004_7, -0.198_076_373_431_201_5, 0.455_983_776_175_066_9],
];

/// Rotation taking ICRS vectors to Galactic vectors.
pub fn icrs_to_galactic() -> Rotation {
    let m = ICRS_TO_GALACTIC;
    Rotation::from_matrix_unchecked(Matrix3::new(
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
    ))
}

/// Immutable set of named reference directions in one coordinate frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReferenceFrame {
    frame: CoordinateFrame,
    epoch: String,
    solar_spin: Direction,
    ecliptic_pole: Direction,
    cmb_dipole: Direction,
    vernal_equinox: Direction,
    galactic_pole: Direction,
}

impl ReferenceFrame {
    /// J2000 reference axes in ICRS.
    pub fn j2000() -> Self {
        Self {
            frame: CoordinateFrame::Icrs,
            epoch: "J2000".to_string(),
            solar_spin: Direction::from_lonlat_deg(SOLAR_POLE_RA_DEG, SOLAR_POLE_DEC_DEG),
            ecliptic_pole: Direction::from_lonlat_deg(ECLIPTIC_POLE_RA_DEG, ECLIPTIC_POLE_DEC_DEG),
            cmb_dipole: Direction::from_lonlat_deg(CMB_DIPOLE_RA_DEG, CMB_DIPOLE_DEC_DEG),
            vernal_equinox: Direction::from_lonlat_deg(0.0, 0.0),
            galactic_pole: icrs_galactic_pole(),
        }
    }

    /// The same axes expressed in Galactic coordinates.
    ///
    /// A frame already in Galactic coordinates is returned unchanged.
    pub fn to_galactic(&self) -> Self {
        if self.frame == CoordinateFrame::Galactic {
            return self.clone();
        }
        let rot = icrs_to_galactic();
        Self {
            frame: CoordinateFrame::Galactic,
            epoch: self.epoch.clone(),
            solar_spin: self.solar_spin.rotated(&rot),
            ecliptic_pole: self.ecliptic_pole.rotated(&rot),
            cmb_dipole: self.cmb_dipole.rotated(&rot),
            vernal_equinox: self.vernal_equinox.rotated(&rot),
            galactic_pole: self.galactic_pole.rotated(&rot),
        }
    }

    /// Replace one axis, e.g. to test a different epoch's Solar pole.
    ///
    /// Derived axes (south ecliptic pole, autumnal equinox) follow their
    /// northern/vernal counterparts.
    pub fn with_axis(mut self, axis: ReferenceAxis, dir: Direction) -> Self {
        match axis {
            ReferenceAxis::SolarSpin => self.solar_spin = dir,
            ReferenceAxis::NorthEclipticPole => self.ecliptic_pole = dir,
            ReferenceAxis::SouthEclipticPole => self.ecliptic_pole = dir.antipode(),
            ReferenceAxis::CmbDipole => self.cmb_dipole = dir,
            ReferenceAxis::VernalEquinox => self.vernal_equinox = dir,
            ReferenceAxis::AutumnalEquinox => self.vernal_equinox = dir.antipode(),
            ReferenceAxis::GalacticNorthPole => self.galactic_pole = dir,
        }
        self
    }

    pub fn frame(&self) -> CoordinateFrame {
        self.frame
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    pub fn axis(&self, axis: ReferenceAxis) -> Direction {
        match axis {
            ReferenceAxis::SolarSpin => self.solar_spin,
            ReferenceAxis::NorthEclipticPole => self.ecliptic_pole,
            ReferenceAxis::SouthEclipticPole => self.ecliptic_pole.antipode(),
            ReferenceAxis::CmbDipole => self.cmb_dipole,
            ReferenceAxis::VernalEquinox => self.vernal_equinox,
            ReferenceAxis::AutumnalEquinox => self.vernal_equinox.antipode(),
            ReferenceAxis::GalacticNorthPole => self.galactic_pole,
        }
    }
}

impl Default for ReferenceFrame {
    fn default() -> Self {
        Self::j2000()
    }
}

fn icrs_galactic_pole() -> Direction {
    let m = ICRS_TO_GALACTIC;
    Direction::from_unit(Vector3::new(m[2][0], m[2][1], m[2][2]))
}
