//! Per-Event Cluster and Track Collections
//!
//! A [`Cluster`] is one reconstructed calorimeter energy deposit; a
//! [`ClusterCollection`] is the ordered set of clusters for one event.
//! Collections are only ever narrowed: each filter stage produces a new,
//! independently owned collection (copy-then-filter), so stacked
//! raw / corrected / good-tower / shape / energy / tof variants coexist
//! within one event without aliasing.

use serde::{Deserialize, Serialize};

use crate::kinematics::FourMomentum;
use crate::towermap::{offline_sector, TowerAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// TRIGGER TILES
// ═══════════════════════════════════════════════════════════════════════════════

/// Which high-tower trigger subsets the tile under this cluster fired.
///
/// Matched upstream by the reconstruction; the pipeline only reads them
/// to label pairs and photons by trigger category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTiles {
    pub a: bool,
    pub b: bool,
    pub c: bool,
}

impl TriggerTiles {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            a: true,
            b: true,
            c: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLUSTER
// ═══════════════════════════════════════════════════════════════════════════════

/// One reconstructed calorimeter cluster.
///
/// Owned by its per-event collection; never shared or mutated across
/// events. Identity (for isolation self-exclusion) is the `id` field,
/// not the position: two coincident distinct clusters stay distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Reconstruction id, unique within the event
    pub id: u32,
    /// Detector arm: 0 west, 1 east
    pub arm: u8,
    /// Raw sector index within the arm
    pub raw_sector: u8,
    /// Tower row of the cluster centroid
    pub row: usize,
    /// Tower column of the cluster centroid
    pub col: usize,
    /// Cartesian position of the deposit
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Core energy after shower-shape correction
    pub ecore: f64,
    /// Time of flight relative to the event start signal
    pub tofcorr: f64,
    /// Shower-shape photon probability
    pub prob_photon: f64,
    /// Polar angle of the deposit
    pub theta: f64,
    /// Azimuthal angle of the deposit
    pub phi: f64,
    /// Trigger tiles fired under this cluster
    #[serde(default)]
    pub trigger_tiles: TriggerTiles,
}

impl Cluster {
    /// Build a cluster at a Cartesian position; θ and φ are derived from
    /// the position vector.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        arm: u8,
        raw_sector: u8,
        row: usize,
        col: usize,
        x: f64,
        y: f64,
        z: f64,
        ecore: f64,
        tofcorr: f64,
        prob_photon: f64,
    ) -> Self {
        let r = (x * x + y * y + z * z).sqrt();
        let theta = if r > 0.0 { (z / r).acos() } else { 0.0 };
        let phi = y.atan2(x);
        Self {
            id,
            arm,
            raw_sector,
            row,
            col,
            x,
            y,
            z,
            ecore,
            tofcorr,
            prob_photon,
            theta,
            phi,
            trigger_tiles: TriggerTiles::none(),
        }
    }

    pub fn with_trigger_tiles(mut self, tiles: TriggerTiles) -> Self {
        self.trigger_tiles = tiles;
        self
    }

    /// Offline sector index (arm fold applied), `None` if unphysical
    pub fn sector(&self) -> Option<usize> {
        offline_sector(self.arm, self.raw_sector)
    }

    /// Tower address of the cluster centroid. The sector defaults to an
    /// out-of-range value for an unphysical (arm, raw-sector) pair, so
    /// the status lookup resolves to `Invalid` downstream.
    pub fn address(&self) -> TowerAddress {
        TowerAddress::new(
            self.sector().unwrap_or(crate::towermap::N_SECTORS),
            self.row,
            self.col,
        )
    }

    /// Massless-photon four-momentum of this cluster
    pub fn momentum(&self) -> FourMomentum {
        FourMomentum::photon(self.x, self.y, self.z, self.ecore)
    }

    /// Transverse momentum
    pub fn pt(&self) -> f64 {
        self.momentum().pt()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLUSTER COLLECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered per-event cluster sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterCollection {
    clusters: Vec<Cluster>,
}

impl ClusterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Cluster> {
        self.clusters.get(index)
    }

    pub fn push(&mut self, cluster: Cluster) {
        self.clusters.push(cluster);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> {
        self.clusters.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Cluster> {
        self.clusters.iter_mut()
    }

    /// New collection holding only the clusters the predicate accepts,
    /// relative order preserved. An empty input yields an empty output.
    pub fn filtered<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Cluster) -> bool,
    {
        Self {
            clusters: self
                .clusters
                .iter()
                .filter(|c| predicate(c))
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ClusterCollection {
    type Item = &'a Cluster;
    type IntoIter = std::slice::Iter<'a, Cluster>;
    fn into_iter(self) -> Self::IntoIter {
        self.clusters.iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACKS
// ═══════════════════════════════════════════════════════════════════════════════

/// One charged track, reduced to its momentum vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

impl Track {
    pub fn new(px: f64, py: f64, pz: f64) -> Self {
        Self { px, py, pz }
    }

    pub fn momentum(&self) -> f64 {
        (self.px * self.px + self.py * self.py + self.pz * self.pz).sqrt()
    }

    pub fn pt(&self) -> f64 {
        (self.px * self.px + self.py * self.py).sqrt()
    }

    /// Direction angles (θ, φ) of the track momentum. `None` for a track
    /// with vanishing transverse momentum, whose azimuth is degenerate.
    pub fn direction(&self) -> Option<(f64, f64)> {
        if self.pt() == 0.0 {
            return None;
        }
        let p = self.momentum();
        Some(((self.pz / p).acos(), self.py.atan2(self.px)))
    }
}

/// Per-event charged-track sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackCollection {
    tracks: Vec<Track>,
}

impl TrackCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: u32, ecore: f64) -> Cluster {
        Cluster::new(id, 0, 0, 10, 10, 1.0, 0.0, 0.0, ecore, 0.0, 0.5)
    }

    #[test]
    fn test_cluster_angles_from_position() {
        let c = Cluster::new(0, 0, 0, 10, 10, 0.0, 1.0, 0.0, 1.0, 0.0, 0.5);
        assert!((c.theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((c.phi - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_cluster_momentum_energy() {
        let c = cluster(0, 2.5);
        let p = c.momentum();
        assert!((p.e - 2.5).abs() < 1e-12);
        assert!(p.mass().abs() < 1e-10);
    }

    #[test]
    fn test_east_arm_address() {
        let c = Cluster::new(0, 1, 0, 5, 5, -1.0, 0.0, 0.0, 1.0, 0.0, 0.5);
        assert_eq!(c.sector(), Some(7));
        assert_eq!(c.address(), TowerAddress::new(7, 5, 5));
    }

    #[test]
    fn test_unphysical_arm_gives_invalid_address() {
        let c = Cluster::new(0, 3, 0, 5, 5, 1.0, 0.0, 0.0, 1.0, 0.0, 0.5);
        assert_eq!(c.sector(), None);
        assert_eq!(c.address().sector, crate::towermap::N_SECTORS);
    }

    #[test]
    fn test_filtered_preserves_order_and_input() {
        let coll = ClusterCollection::from_vec(vec![
            cluster(0, 0.2),
            cluster(1, 1.0),
            cluster(2, 0.1),
            cluster(3, 2.0),
        ]);
        let cut = coll.filtered(|c| c.ecore > 0.5);
        assert_eq!(cut.len(), 2);
        assert_eq!(cut.get(0).unwrap().id, 1);
        assert_eq!(cut.get(1).unwrap().id, 3);
        // the source collection is untouched
        assert_eq!(coll.len(), 4);
    }

    #[test]
    fn test_filtered_empty() {
        let empty = ClusterCollection::new();
        assert!(empty.filtered(|_| true).is_empty());
    }

    #[test]
    fn test_track_direction_degenerate() {
        assert!(Track::new(0.0, 0.0, 3.0).direction().is_none());
        let (theta, phi) = Track::new(1.0, 0.0, 0.0).direction().unwrap();
        assert!((theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(phi.abs() < 1e-12);
    }
}
