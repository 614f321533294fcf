//! Relativistic Kinematics for Calorimeter Photons
//!
//! Four-momentum vector in natural units (c = 1), p^μ = (E, p_x, p_y, p_z),
//! and the pair-level quantities derived from it. A calorimeter cluster is
//! treated as a massless photon: its momentum is the unit vector from the
//! collision vertex to the cluster position, scaled by the core energy.
//!
//! Angle conventions follow the historical analysis:
//! - pseudo-polar angle is `atan(p_z / |p|)`, with a sentinel value when
//!   the momentum vanishes,
//! - azimuth folds `atan(p_y / p_x)` into the forward hemisphere when
//!   `p_x <= 0`, which matches atan2 up to the branch choice.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Sentinel returned for angles of a vanishing momentum vector
pub const ANGLE_SENTINEL: f64 = 9999.0;

// ═══════════════════════════════════════════════════════════════════════════════
// FOUR-MOMENTUM
// ═══════════════════════════════════════════════════════════════════════════════

/// Four-momentum vector: (E, p_x, p_y, p_z)
///
/// Satisfies the mass-shell condition E² - |p|² = m² for on-shell
/// particles; a photon reconstructed from a cluster is massless by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourMomentum {
    /// Energy component
    pub e: f64,
    /// Momentum x-component
    pub px: f64,
    /// Momentum y-component
    pub py: f64,
    /// Momentum z-component (beam axis)
    pub pz: f64,
}

impl FourMomentum {
    pub fn new(e: f64, px: f64, py: f64, pz: f64) -> Self {
        Self { e, px, py, pz }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Massless-photon momentum from a detector position and core energy.
    ///
    /// The direction is the unit vector of (x, y, z); the vertex is taken
    /// as the origin of that position vector.
    pub fn photon(x: f64, y: f64, z: f64, ecore: f64) -> Self {
        let r = (x * x + y * y + z * z).sqrt();
        if r > 0.0 {
            Self::new(ecore, ecore * x / r, ecore * y / r, ecore * z / r)
        } else {
            Self::new(ecore, 0.0, 0.0, 0.0)
        }
    }

    /// Invariant mass squared: m² = E² - |p|²
    pub fn mass_squared(&self) -> f64 {
        self.e.powi(2) - self.px.powi(2) - self.py.powi(2) - self.pz.powi(2)
    }

    /// Invariant mass: √(E² - |p|²), 0 for spacelike vectors
    pub fn mass(&self) -> f64 {
        let m2 = self.mass_squared();
        if m2 >= 0.0 {
            m2.sqrt()
        } else {
            0.0
        }
    }

    /// Three-momentum magnitude |p|
    pub fn momentum(&self) -> f64 {
        (self.px.powi(2) + self.py.powi(2) + self.pz.powi(2)).sqrt()
    }

    /// Transverse momentum p_T = √(p_x² + p_y²)
    pub fn pt(&self) -> f64 {
        (self.px.powi(2) + self.py.powi(2)).sqrt()
    }

    /// Pseudo-polar angle atan(p_z / |p|), [`ANGLE_SENTINEL`] when |p| = 0
    pub fn polar(&self) -> f64 {
        let p = self.momentum();
        if p > 0.0 {
            (self.pz / p).atan()
        } else {
            ANGLE_SENTINEL
        }
    }

    /// Azimuthal angle with the historical quadrant fold: atan(p_y / p_x)
    /// for p_x > 0, shifted by π otherwise.
    pub fn azimuth(&self) -> f64 {
        if self.px > 0.0 {
            (self.py / self.px).atan()
        } else {
            PI + (self.py / self.px).atan()
        }
    }

    /// Add two four-momenta
    pub fn add(&self, other: &Self) -> Self {
        Self {
            e: self.e + other.e,
            px: self.px + other.px,
            py: self.py + other.py,
            pz: self.pz + other.pz,
        }
    }
}

impl std::ops::Add for FourMomentum {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        FourMomentum::add(&self, &other)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAIR QUANTITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Invariant mass of a two-photon combination
pub fn invariant_mass(a: &FourMomentum, b: &FourMomentum) -> f64 {
    (*a + *b).mass()
}

/// Energy asymmetry |E1 - E2| / (E1 + E2); 0 for a vanishing energy sum
pub fn energy_asymmetry(e1: f64, e2: f64) -> f64 {
    let sum = e1 + e2;
    if sum != 0.0 {
        (e1 - e2).abs() / sum
    } else {
        0.0
    }
}

/// Euclidean angular distance in (θ, φ) space
pub fn angular_distance(theta0: f64, phi0: f64, theta1: f64, phi1: f64) -> f64 {
    let dtheta = theta0 - theta1;
    let dphi = phi0 - phi1;
    (dtheta * dtheta + dphi * dphi).sqrt()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
