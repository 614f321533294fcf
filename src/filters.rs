//! Cluster Selection Cuts
//!
//! Every cut is a pure predicate over (cluster, event context, status
//! map); no predicate consults another cluster's state. Collection-level
//! selection copies then filters, so chained stages yield the same final
//! membership in any order; the conventional chaining is
//! good-tower → shape → energy → tof, each stage evaluated on the
//! already-reduced output of the previous one.

use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, ClusterCollection, TrackCollection};
use crate::kinematics::angular_distance;
use crate::towermap::{SectorKind, TowerStatusMap};

// ═══════════════════════════════════════════════════════════════════════════════
// CUT CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Threshold set for the cluster selection cuts.
///
/// The defaults are the proton-proton photon-analysis values; they are
/// run-period calibration constants and belong in configuration, not in
/// code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutConfig {
    /// Vertex position cut |z| (cm)
    pub vertex_z_cut: f64,
    /// Minimum core energy for a photon candidate (GeV)
    pub energy_min: f64,
    /// Stricter minimum core energy for a direct-photon candidate (GeV)
    pub direct_energy_min: f64,
    /// Minimum shower-shape photon probability
    pub shape_prob_min: f64,
    /// Accepted time-of-flight window relative to the event start (ns)
    pub tof_min: f64,
    pub tof_max: f64,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            vertex_z_cut: 10.0,
            energy_min: 0.3,
            direct_energy_min: 1.0,
            shape_prob_min: 0.02,
            tof_min: -10.0,
            tof_max: 10.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PER-CLUSTER PREDICATES
// ═══════════════════════════════════════════════════════════════════════════════

/// Cluster sits on a fully trusted tower. An address that does not
/// resolve fails the predicate; the cluster is excluded, the event
/// continues.
pub fn good_tower(towers: &TowerStatusMap, cluster: &Cluster) -> bool {
    towers.lookup(cluster.address()).is_good()
}

/// Shower shape is photon-like
pub fn shape_ok(cuts: &CutConfig, cluster: &Cluster) -> bool {
    cluster.prob_photon > cuts.shape_prob_min
}

/// Core energy above the photon-candidate threshold
pub fn energy_ok(cuts: &CutConfig, cluster: &Cluster) -> bool {
    cluster.ecore > cuts.energy_min
}

/// Core energy above the stricter direct-photon threshold
pub fn direct_energy_ok(cuts: &CutConfig, cluster: &Cluster) -> bool {
    cluster.ecore > cuts.direct_energy_min
}

/// Corrected time of flight within the accepted window around the event
/// start time (exclusive bounds)
pub fn tof_ok(cuts: &CutConfig, cluster: &Cluster, start_time: f64) -> bool {
    let tof = cluster.tofcorr - start_time;
    tof > cuts.tof_min && tof < cuts.tof_max
}

/// Charged-track veto: reject a cluster whose angular separation from
/// the nearest matched track falls inside the sector-dependent exclusion
/// band. A cluster with no matched track passes.
pub fn track_veto_ok(cluster: &Cluster, tracks: &TrackCollection) -> bool {
    let theta_cv = match nearest_track_separation(cluster, tracks) {
        Some(sep) => sep,
        None => return true,
    };
    let kind = match cluster.sector().and_then(SectorKind::of_sector) {
        Some(k) => k,
        None => return true,
    };
    let (lower, upper) = charge_veto_band(kind, cluster.ecore);
    !(theta_cv > lower && theta_cv < upper)
}

/// Full photon-candidate selection: energy, time of flight, shower
/// shape and track veto.
pub fn photon_ok(
    cuts: &CutConfig,
    cluster: &Cluster,
    start_time: f64,
    tracks: &TrackCollection,
) -> bool {
    energy_ok(cuts, cluster)
        && tof_ok(cuts, cluster, start_time)
        && shape_ok(cuts, cluster)
        && track_veto_ok(cluster, tracks)
}

/// Angular separation to the nearest matched charged track in (θ, φ)
/// space. Tracks with degenerate direction are skipped.
pub fn nearest_track_separation(cluster: &Cluster, tracks: &TrackCollection) -> Option<f64> {
    tracks
        .iter()
        .filter_map(|t| t.direction())
        .map(|(theta, phi)| angular_distance(cluster.theta, cluster.phi, theta, phi))
        .min_by(|a, b| a.total_cmp(b))
}

/// Exclusion-band envelopes for the charged-track veto, evaluated at the
/// cluster energy. Polynomial coefficients differ between the two
/// calorimeter subtypes.
pub fn charge_veto_band(kind: SectorKind, e: f64) -> (f64, f64) {
    match kind {
        SectorKind::Fine => (
            4.22e-4 - 1.16e-2 * e - 4.53e-3 * e * e,
            1.01e-1 - 2.02e-1 * e + 1.51e-1 * e * e - 3.66e-2 * e * e * e,
        ),
        SectorKind::Coarse => (
            1.27e-2 - 2.41e-2 * e + 2.26e-2 * e * e,
            1.64e-2 - 7.38e-3 * e + 1.45e-1 * (-4.0 * e).exp(),
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTION-LEVEL SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn select_good_tower(towers: &TowerStatusMap, coll: &ClusterCollection) -> ClusterCollection {
    coll.filtered(|c| good_tower(towers, c))
}

pub fn select_shape(cuts: &CutConfig, coll: &ClusterCollection) -> ClusterCollection {
    coll.filtered(|c| shape_ok(cuts, c))
}

pub fn select_energy(cuts: &CutConfig, coll: &ClusterCollection) -> ClusterCollection {
    coll.filtered(|c| energy_ok(cuts, c))
}

pub fn select_tof(cuts: &CutConfig, coll: &ClusterCollection, start_time: f64) -> ClusterCollection {
    coll.filtered(|c| tof_ok(cuts, c, start_time))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
