//! Two-Cluster Pair Combinatorics
//!
//! Enumerates unordered cluster pairs without double counting and
//! computes their combined kinematics for the invariant-mass analysis:
//!
//! ```text
//!   for i in 0..N:
//!       if primary(cluster[i]):
//!           used.push(i)
//!           for j in 0..N, j != i, j not in used:
//!               asymmetry veto  → |E1-E2|/(E1+E2) < threshold
//!               region veto     → both clusters in one sector group
//!               emit pair(i, j)
//! ```
//!
//! The used-primaries list removes the symmetric (i, j)/(j, i)
//! duplicate while still letting a cluster appear as the secondary of
//! several earlier primaries. The pair label (sector, trigger tiles) is
//! taken from whichever cluster carries more energy; that tie-break is
//! asymmetric by intent.

use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, ClusterCollection, TriggerTiles};
use crate::kinematics::{energy_asymmetry, FourMomentum};

// ═══════════════════════════════════════════════════════════════════════════════
// PAIR CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Pair-selection constants.
///
/// Both the asymmetry threshold and the sector groupings are calibration
/// constants tied to a run period; they are configuration, never
/// hard-coded at the call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    /// Pairs with energy asymmetry at or above this value are rejected
    pub max_energy_asymmetry: f64,
    /// Sector groups considered mutually compatible; a pair must fall
    /// entirely inside one group
    pub sector_groups: Vec<Vec<usize>>,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            max_energy_asymmetry: 0.8,
            // west wall, east fine sectors, east coarse sectors
            sector_groups: vec![vec![0, 1, 2, 3], vec![4, 5], vec![6, 7]],
        }
    }
}

impl PairConfig {
    /// True if the two sectors share a compatibility group. Symmetric in
    /// its arguments; ambiguous pairs spanning groups are discarded.
    pub fn same_group(&self, sector1: usize, sector2: usize) -> bool {
        self.sector_groups
            .iter()
            .any(|g| g.contains(&sector1) && g.contains(&sector2))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLUSTER PAIR
// ═══════════════════════════════════════════════════════════════════════════════

/// One accepted two-cluster combination. Ephemeral: exists only long
/// enough to be turned into histogram fills.
#[derive(Debug, Clone)]
pub struct ClusterPair {
    /// Collection indices of the two members (primary first)
    pub index1: usize,
    pub index2: usize,
    /// Combined four-momentum
    pub momentum: FourMomentum,
    /// Invariant mass of the combination
    pub invariant_mass: f64,
    /// Offline sector of the higher-energy member
    pub sector: usize,
    /// Trigger tiles of the higher-energy member
    pub trigger_tiles: TriggerTiles,
    /// Both members share one sector (calibration subset)
    pub same_sector: bool,
}

impl ClusterPair {
    pub fn pt(&self) -> f64 {
        self.momentum.pt()
    }

    pub fn polar(&self) -> f64 {
        self.momentum.polar()
    }

    pub fn azimuth(&self) -> f64 {
        self.momentum.azimuth()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAIR ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless pair enumerator over one cluster collection.
#[derive(Debug, Clone, Default)]
pub struct PairEngine {
    config: PairConfig,
}

impl PairEngine {
    pub fn new(config: PairConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PairConfig {
        &self.config
    }

    /// Enumerate accepted pairs. `primary` gates which clusters may open
    /// a combination; secondaries are every other cluster not already
    /// used as a primary at an earlier index.
    pub fn pairs<F>(&self, clusters: &ClusterCollection, primary: F) -> Vec<ClusterPair>
    where
        F: Fn(&Cluster) -> bool,
    {
        let mut used: Vec<usize> = Vec::new();
        let mut out = Vec::new();

        for (i, first) in clusters.iter().enumerate() {
            if !primary(first) {
                continue;
            }
            used.push(i);

            for (j, second) in clusters.iter().enumerate() {
                if j == i || used.contains(&j) {
                    continue;
                }
                if let Some(pair) = self.combine(i, first, j, second) {
                    out.push(pair);
                }
            }
        }

        out
    }

    /// Apply the pair vetoes and compute kinematics for one candidate
    /// combination. Returns `None` for rejected pairs.
    fn combine(
        &self,
        index1: usize,
        first: &Cluster,
        index2: usize,
        second: &Cluster,
    ) -> Option<ClusterPair> {
        if energy_asymmetry(first.ecore, second.ecore) >= self.config.max_energy_asymmetry {
            return None;
        }

        let sector1 = first.sector()?;
        let sector2 = second.sector()?;
        if !self.config.same_group(sector1, sector2) {
            return None;
        }

        let p1 = first.momentum();
        let p2 = second.momentum();
        let total = p1 + p2;

        // label the pair by the more energetic member
        let (sector, trigger_tiles) = if p2.e > p1.e {
            (sector2, second.trigger_tiles)
        } else {
            (sector1, first.trigger_tiles)
        };

        Some(ClusterPair {
            index1,
            index2,
            momentum: total,
            invariant_mass: total.mass(),
            sector,
            trigger_tiles,
            same_sector: sector1 == sector2,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_at(id: u32, raw_sector: u8, phi: f64, ecore: f64) -> Cluster {
        // place on a ring at polar angle π/2
        Cluster::new(
            id,
            0,
            raw_sector,
            10,
            10 + id as usize,
            5.0 * phi.cos(),
            5.0 * phi.sin(),
            0.0,
            ecore,
            0.0,
            0.5,
        )
    }

    #[test]
    fn test_no_duplicate_or_self_pairs() {
        let coll = ClusterCollection::from_vec(vec![
            cluster_at(0, 0, 0.0, 1.0),
            cluster_at(1, 0, 0.1, 1.0),
            cluster_at(2, 0, 0.2, 1.0),
        ]);
        let engine = PairEngine::default();
        let pairs = engine.pairs(&coll, |_| true);

        // 3 clusters, all primaries: (0,1), (0,2), (1,2)
        assert_eq!(pairs.len(), 3);
        for p in &pairs {
            assert_ne!(p.index1, p.index2);
        }
        let mut seen = std::collections::HashSet::new();
        for p in &pairs {
            let key = (p.index1.min(p.index2), p.index1.max(p.index2));
            assert!(seen.insert(key), "duplicate pair {:?}", key);
        }
    }

    #[test]
    fn test_secondary_reuse_across_primaries() {
        let coll = ClusterCollection::from_vec(vec![
            cluster_at(0, 0, 0.0, 1.0),
            cluster_at(1, 0, 0.1, 1.0),
            cluster_at(2, 0, 0.2, 1.0),
        ]);
        let engine = PairEngine::default();
        // only the first two clusters qualify as primaries
        let pairs = engine.pairs(&coll, |c| c.id < 2);
        // (0,1), (0,2), (1,2): cluster 2 is secondary twice
        assert_eq!(pairs.len(), 3);
        let n_with_2 = pairs.iter().filter(|p| p.index2 == 2).count();
        assert_eq!(n_with_2, 2);
    }

    #[test]
    fn test_asymmetry_veto() {
        let coll = ClusterCollection::from_vec(vec![
            cluster_at(0, 0, 0.0, 9.0),
            cluster_at(1, 0, 0.1, 1.0),
        ]);
        let engine = PairEngine::default();
        // asymmetry exactly 0.8 is rejected (inclusive bound)
        assert!(engine.pairs(&coll, |_| true).is_empty());
    }

    #[test]
    fn test_region_compatibility() {
        let engine = PairEngine::default();
        let config = engine.config();
        assert!(config.same_group(0, 3));
        assert!(config.same_group(4, 5));
        assert!(config.same_group(6, 7));
        assert!(!config.same_group(3, 4));
        assert!(!config.same_group(5, 6));

        // west cluster + east cluster never pair
        let west = cluster_at(0, 0, 0.0, 1.0);
        let mut east = cluster_at(1, 0, 0.1, 1.0);
        east.arm = 1; // offline sector 7
        let coll = ClusterCollection::from_vec(vec![west, east]);
        assert!(engine.pairs(&coll, |_| true).is_empty());
    }

    #[test]
    fn test_label_follows_higher_energy() {
        let lead = cluster_at(0, 2, 0.0, 1.0);
        let soft = cluster_at(1, 3, 0.1, 0.6);
        let coll = ClusterCollection::from_vec(vec![soft.clone(), lead.clone()]);
        let engine = PairEngine::default();
        let pairs = engine.pairs(&coll, |_| true);
        assert_eq!(pairs.len(), 1);
        // sector label comes from the 1.0 GeV cluster, sector 2
        assert_eq!(pairs[0].sector, 2);
        assert!(!pairs[0].same_sector);
    }

    #[test]
    fn test_pi0_mass_reconstruction() {
        // two 1 GeV photons with opening angle ψ such that
        // m = 2 E sin(ψ/2) = 0.135 GeV
        let m = 0.135_f64;
        let psi = 2.0 * (m / 2.0).asin();
        let coll = ClusterCollection::from_vec(vec![
            cluster_at(0, 0, -psi / 2.0, 1.0),
            cluster_at(1, 0, psi / 2.0, 1.0),
        ]);
        let engine = PairEngine::default();
        let pairs = engine.pairs(&coll, |_| true);
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].invariant_mass - 0.135).abs() < 1e-3);
    }
}
