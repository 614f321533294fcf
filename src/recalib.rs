//! Local Cluster Recalibration
//!
//! Applied to a cloned collection before the selection stacks, never to
//! the raw input. Exactly one strategy must be configured per job; the
//! engine builder refuses zero or more than one at initialization, well
//! before the first event.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterCollection;
use crate::towermap::{tower_id, N_SECTORS};

/// A per-job cluster correction strategy.
pub trait ClusterCorrection: std::fmt::Debug + Send + Sync {
    /// Correct every cluster in place.
    fn apply(&self, clusters: &mut ClusterCollection);
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUN-LEVEL RECALIBRATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-sector energy scales keyed by run plus a per-fill time-of-flight
/// offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecalibration {
    /// Multiplicative energy scale per offline sector
    pub energy_scale: [f64; N_SECTORS],
    /// Additive time-of-flight offset (ns)
    pub tof_offset: f64,
}

impl RunRecalibration {
    pub fn new(energy_scale: [f64; N_SECTORS], tof_offset: f64) -> Self {
        Self {
            energy_scale,
            tof_offset,
        }
    }

    /// Correction that leaves clusters untouched
    pub fn identity() -> Self {
        Self::new([1.0; N_SECTORS], 0.0)
    }
}

impl ClusterCorrection for RunRecalibration {
    fn apply(&self, clusters: &mut ClusterCollection) {
        for cluster in clusters.iter_mut() {
            if let Some(sector) = cluster.sector() {
                cluster.ecore *= self.energy_scale[sector];
            }
            cluster.tofcorr -= self.tof_offset;
        }
        debug!("run recalibration applied to {} clusters", clusters.len());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL-LEVEL RECALIBRATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-tower energy scales in linear channel indexing. Towers absent
/// from the table keep their energy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRecalibration {
    scale: HashMap<usize, f64>,
}

impl ChannelRecalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scale(&mut self, channel: usize, scale: f64) {
        self.scale.insert(channel, scale);
    }

    pub fn len(&self) -> usize {
        self.scale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_empty()
    }
}

impl ClusterCorrection for ChannelRecalibration {
    fn apply(&self, clusters: &mut ClusterCollection) {
        for cluster in clusters.iter_mut() {
            let Some(channel) = tower_id(cluster.address()) else {
                continue;
            };
            if let Some(scale) = self.scale.get(&channel) {
                cluster.ecore *= scale;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;

    fn collection() -> ClusterCollection {
        ClusterCollection::from_vec(vec![
            Cluster::new(0, 0, 0, 10, 10, 5.0, 0.0, 0.0, 1.0, 2.0, 0.5),
            Cluster::new(1, 1, 0, 5, 5, -5.0, 0.0, 0.0, 2.0, -1.0, 0.5),
        ])
    }

    #[test]
    fn test_run_recalibration_scales_by_sector() {
        let mut scales = [1.0; N_SECTORS];
        scales[0] = 1.1;
        scales[7] = 0.9;
        let recal = RunRecalibration::new(scales, 0.5);
        let mut coll = collection();
        recal.apply(&mut coll);
        assert!((coll.get(0).unwrap().ecore - 1.1).abs() < 1e-12);
        assert!((coll.get(1).unwrap().ecore - 1.8).abs() < 1e-12);
        assert!((coll.get(0).unwrap().tofcorr - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_identity_changes_nothing() {
        let recal = RunRecalibration::identity();
        let mut coll = collection();
        let before = coll.clone();
        recal.apply(&mut coll);
        assert_eq!(coll, before);
    }

    #[test]
    fn test_channel_recalibration_targets_single_tower() {
        let mut recal = ChannelRecalibration::new();
        // sector 0, row 10, col 10
        let channel = tower_id(crate::towermap::TowerAddress::new(0, 10, 10)).unwrap();
        recal.set_scale(channel, 3.0);
        let mut coll = collection();
        recal.apply(&mut coll);
        assert!((coll.get(0).unwrap().ecore - 3.0).abs() < 1e-12);
        // the other cluster's tower is not in the table
        assert!((coll.get(1).unwrap().ecore - 2.0).abs() < 1e-12);
    }
}
