//! Isolation-Cone Scoring
//!
//! A direct-photon candidate should be alone: the energy of every other
//! cluster within an angular cone around it, summed, must stay below a
//! fraction of the candidate's own energy. Distances are Euclidean in
//! (θ, φ) space, not great-circle. Self-exclusion goes by cluster
//! identity, so two coincident but distinct clusters still see each
//! other.

use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, ClusterCollection, TrackCollection};
use crate::kinematics::angular_distance;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Cone parameters for the isolation requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IsolationCuts {
    /// Cone half-opening in (θ, φ) space (radians)
    pub cone_angle: f64,
    /// Accepted cone energy as a fraction of the candidate energy
    pub energy_fraction: f64,
}

impl Default for IsolationCuts {
    fn default() -> Self {
        Self {
            cone_angle: 0.4,
            energy_fraction: 0.1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCORER
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless cone-sum scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolationScorer {
    cuts: IsolationCuts,
}

impl IsolationScorer {
    pub fn new(cuts: IsolationCuts) -> Self {
        Self { cuts }
    }

    pub fn cuts(&self) -> &IsolationCuts {
        &self.cuts
    }

    /// Sum of `ecore` over every other cluster within the cone.
    /// Excludes the candidate by id and anything at exactly zero
    /// distance from it.
    pub fn cone_energy(&self, candidate: &Cluster, clusters: &ClusterCollection) -> f64 {
        clusters
            .iter()
            .filter(|c| c.id != candidate.id)
            .filter(|c| {
                let d = angular_distance(candidate.theta, candidate.phi, c.theta, c.phi);
                d < self.cuts.cone_angle && d != 0.0
            })
            .map(|c| c.ecore)
            .sum()
    }

    /// Analogous cone sum over charged-track momenta. Tracks with
    /// degenerate direction (zero transverse momentum) are skipped.
    pub fn cone_track_momentum(&self, candidate: &Cluster, tracks: &TrackCollection) -> f64 {
        tracks
            .iter()
            .filter_map(|t| t.direction().map(|(theta, phi)| (t, theta, phi)))
            .filter(|(_, theta, phi)| {
                let d = angular_distance(candidate.theta, candidate.phi, *theta, *phi);
                d < self.cuts.cone_angle && d != 0.0
            })
            .map(|(t, _, _)| t.momentum())
            .sum()
    }

    /// True iff the cluster cone energy stays below the configured
    /// fraction of the candidate's energy.
    pub fn is_isolated(&self, candidate: &Cluster, clusters: &ClusterCollection) -> bool {
        self.cone_energy(candidate, clusters) < self.cuts.energy_fraction * candidate.ecore
    }

    /// Isolation including charged-track momenta in the cone sum.
    pub fn is_isolated_with_tracks(
        &self,
        candidate: &Cluster,
        clusters: &ClusterCollection,
        tracks: &TrackCollection,
    ) -> bool {
        let cone = self.cone_energy(candidate, clusters) + self.cone_track_momentum(candidate, tracks);
        cone < self.cuts.energy_fraction * candidate.ecore
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
