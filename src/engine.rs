//! Per-Event Analysis Engine
//!
//! The engine wires the components together and mirrors the offline
//! fill sequence, one event at a time:
//!
//! ```text
//!   EventRecord ──► noise veto ──► trigger statistics
//!        │
//!        ├─ recalibrated clone ─┐
//!        ▼                      ▼
//!   good-tower ──► shape ──► energy ──► tof      (stacked collections)
//!        │
//!        ├─ cluster pT / TOF cross-check spectra
//!        ▼
//!   event class ──► pair combinatorics ──► π⁰ mass fills
//!               └─► direct-photon candidates ──► isolation + photon fills
//! ```
//!
//! Everything is passed in as plain data and returned as plain data:
//! the engine holds only read-only configuration and the status map, so
//! whole events can be processed concurrently while sharing it. Per-event
//! failures discard that event and nothing else; there is no cross-event
//! mutable state to roll back.

use log::{debug, log_enabled, warn, Level};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterCollection, TrackCollection};
use crate::error::{AnalysisError, AnalysisResult};
use crate::filters::{
    direct_energy_ok, good_tower, photon_ok, select_energy, select_good_tower, select_shape,
    select_tof, CutConfig,
};
use crate::histograms::{names, FillRequest};
use crate::isolation::{IsolationCuts, IsolationScorer};
use crate::kinematics::invariant_mass;
use crate::pairs::{PairConfig, PairEngine};
use crate::recalib::ClusterCorrection;
use crate::towermap::TowerStatusMap;
use crate::trigger::{EventClass, EventClassifier, TriggerMasks, TriggerWords};

// trigger-category bins of the pair and photon spectra
const TRIG_BIN_ALL: f64 = 0.0;
const TRIG_BIN_A: f64 = 1.0;
const TRIG_BIN_B: f64 = 2.0;
const TRIG_BIN_C: f64 = 3.0;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Full pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub cuts: CutConfig,
    pub pair: PairConfig,
    pub isolation: IsolationCuts,
    pub masks: TriggerMasks,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT INPUT AND OUTPUT
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-event scalar state, created at the start of an event and read by
/// every downstream stage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EventContext {
    /// Event sequence counter
    pub event_number: u64,
    /// Collision vertex position along the beam (cm)
    pub vertex_z: f64,
    /// Event start-time signal (ns)
    pub start_time: f64,
    /// Level-1 trigger words
    pub triggers: TriggerWords,
}

/// One event as delivered by the host: context plus data collections.
/// The collections are optional because upstream reconstruction can
/// fail to deliver them; a missing one discards the event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub context: EventContext,
    pub clusters: Option<ClusterCollection>,
    #[serde(default)]
    pub tracks: Option<TrackCollection>,
}

/// Outcome of one processed event
#[derive(Debug, Clone)]
pub struct EventReport {
    pub class: EventClass,
    /// Direct-photon candidates found in the event
    pub n_photons: usize,
    /// Categorized histogram fills, in emission order
    pub fills: Vec<FillRequest>,
}

impl EventReport {
    fn discarded(class: EventClass) -> Self {
        Self {
            class,
            n_photons: 0,
            fills: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder enforcing the job-initialization invariants.
///
/// Exactly one recalibration strategy and one status map are required;
/// violations fail the build, so a misconfigured job aborts before the
/// first event.
#[derive(Debug, Default)]
pub struct AnalysisEngineBuilder {
    config: AnalysisConfig,
    towers: Option<TowerStatusMap>,
    corrections: Vec<Box<dyn ClusterCorrection>>,
}

impl AnalysisEngineBuilder {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            towers: None,
            corrections: Vec::new(),
        }
    }

    pub fn tower_map(mut self, towers: TowerStatusMap) -> Self {
        self.towers = Some(towers);
        self
    }

    pub fn correction(mut self, correction: Box<dyn ClusterCorrection>) -> Self {
        self.corrections.push(correction);
        self
    }

    pub fn build(self) -> AnalysisResult<AnalysisEngine> {
        let towers = self.towers.ok_or_else(|| {
            AnalysisError::Configuration("no tower status map configured".into())
        })?;
        let mut corrections = self.corrections;
        if corrections.len() > 1 {
            return Err(AnalysisError::Configuration(format!(
                "{} recalibration strategies configured, there can be only one",
                corrections.len()
            )));
        }
        let correction = corrections.pop().ok_or_else(|| {
            AnalysisError::Configuration("no recalibration strategy configured".into())
        })?;

        let classifier = EventClassifier::new(self.config.masks, self.config.cuts.vertex_z_cut);
        let pair_engine = PairEngine::new(self.config.pair.clone());
        let isolation = IsolationScorer::new(self.config.isolation);

        Ok(AnalysisEngine {
            config: self.config,
            towers,
            correction,
            classifier,
            pair_engine,
            isolation,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// The assembled pipeline. Read-only after construction.
#[derive(Debug)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    towers: TowerStatusMap,
    correction: Box<dyn ClusterCorrection>,
    classifier: EventClassifier,
    pair_engine: PairEngine,
    isolation: IsolationScorer,
}

impl AnalysisEngine {
    pub fn builder(config: AnalysisConfig) -> AnalysisEngineBuilder {
        AnalysisEngineBuilder::new(config)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn towers(&self) -> &TowerStatusMap {
        &self.towers
    }

    /// Process one event into its categorized fills.
    ///
    /// Errors only on missing input collections; every other anomaly is
    /// local to a cluster or pair and handled by exclusion.
    pub fn process_event(&self, record: &EventRecord) -> AnalysisResult<EventReport> {
        let ctx = &record.context;
        let clusters = record
            .clusters
            .as_ref()
            .ok_or(AnalysisError::MissingInput("cluster collection"))?;
        let tracks = record
            .tracks
            .as_ref()
            .ok_or(AnalysisError::MissingInput("track collection"))?;

        if self.classifier.is_noise(&ctx.triggers) {
            debug!("event {}: noise pattern, discarded", ctx.event_number);
            return Ok(EventReport::discarded(EventClass::Noise));
        }

        let mut fills = Vec::new();
        for label in self.classifier.stat_labels(&ctx.triggers, ctx.vertex_z) {
            fills.push(FillRequest::Count {
                name: names::EVENTS,
                label,
            });
        }

        // recalibrated clone; the raw input stays untouched
        let mut corrected = clusters.clone();
        self.correction.apply(&mut corrected);

        // stacked selection variants
        let cuts = &self.config.cuts;
        let cwarn = select_good_tower(&self.towers, clusters);
        let cwarn_cse = select_energy(cuts, &select_shape(cuts, &cwarn));
        let corr_cwarn = select_good_tower(&self.towers, &corrected);
        let corr_cwarn_cse = select_energy(cuts, &select_shape(cuts, &corr_cwarn));
        let corr_cwarn_cse_ctof = select_tof(cuts, &corr_cwarn_cse, ctx.start_time);

        if log_enabled!(Level::Debug) {
            self.debug_dump("raw", clusters, ctx);
            self.debug_dump("good-tower", &cwarn, ctx);
            self.debug_dump("selected", &corr_cwarn_cse_ctof, ctx);
        }

        // status-map cross-check spectra
        self.fill_cluster_pt(&mut fills, names::CLUSTER_PT, &cwarn);
        self.fill_cluster_pt(&mut fills, names::CLUSTER_PT_NOSTATUS, clusters);

        // calibration cross-check TOF spectra
        self.fill_cluster_tof(&mut fills, names::CLUSTER_TOF, &corr_cwarn_cse, ctx);
        self.fill_cluster_tof(&mut fills, names::CLUSTER_TOF_RAW, &cwarn_cse, ctx);

        let class = self.classifier.classify(&ctx.triggers, ctx.vertex_z);
        let mut n_photons = 0;

        if class.selects_physics() {
            let words = &ctx.triggers;
            self.fill_pair_spectrum(
                &mut fills,
                names::PI0_MASS,
                Some(names::PI0_CALIB),
                &corr_cwarn_cse_ctof,
                words,
            );
            self.fill_pair_spectrum(&mut fills, names::PI0_MASS_NOTOF, None, &corr_cwarn_cse, words);
            self.fill_pair_spectrum(
                &mut fills,
                names::PI0_MASS_RAW,
                Some(names::PI0_CALIB_RAW),
                &cwarn_cse,
                words,
            );

            n_photons = self.fill_photon_spectra(
                &mut fills,
                &corr_cwarn_cse_ctof,
                &corr_cwarn,
                tracks,
                ctx,
            );
            fills.push(FillRequest::Spectrum {
                name: names::NPHOTONS,
                values: vec![n_photons as f64],
            });
        } else {
            debug!(
                "event {}: class {:?}, physics fills skipped",
                ctx.event_number, class
            );
        }

        Ok(EventReport {
            class,
            n_photons,
            fills,
        })
    }

    /// Process a batch of events, sharing the read-only engine across
    /// threads. Events with missing inputs are logged and dropped.
    pub fn process_events(&self, records: &[EventRecord]) -> Vec<EventReport> {
        records
            .par_iter()
            .filter_map(|record| match self.process_event(record) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(
                        "event {} discarded: {}",
                        record.context.event_number, err
                    );
                    None
                }
            })
            .collect()
    }

    // ── fill helpers ──────────────────────────────────────────────────────────

    fn fill_cluster_pt(
        &self,
        fills: &mut Vec<FillRequest>,
        name: &'static str,
        clusters: &ClusterCollection,
    ) {
        for cluster in clusters {
            let Some(sector) = cluster.sector() else {
                continue;
            };
            fills.push(FillRequest::Spectrum {
                name,
                values: vec![cluster.pt(), sector as f64],
            });
        }
    }

    fn fill_cluster_tof(
        &self,
        fills: &mut Vec<FillRequest>,
        name: &'static str,
        clusters: &ClusterCollection,
        ctx: &EventContext,
    ) {
        for cluster in clusters {
            let Some(sector) = cluster.sector() else {
                continue;
            };
            fills.push(FillRequest::Spectrum {
                name,
                values: vec![
                    sector as f64,
                    cluster.pt(),
                    cluster.tofcorr - ctx.start_time,
                ],
            });
        }
    }

    /// Pair-combination fills over one collection variant. Pairs whose
    /// labeled cluster fired a high-tower subset also fill that subset's
    /// trigger bin; same-sector pairs feed the calibration spectrum when
    /// the high-tower OR is live.
    fn fill_pair_spectrum(
        &self,
        fills: &mut Vec<FillRequest>,
        name: &'static str,
        calib_name: Option<&'static str>,
        clusters: &ClusterCollection,
        words: &TriggerWords,
    ) {
        let masks = self.classifier.masks();
        let pairs = self
            .pair_engine
            .pairs(clusters, |c| good_tower(&self.towers, c));

        for pair in pairs {
            let base = vec![
                pair.sector as f64,
                pair.pt(),
                pair.invariant_mass,
                pair.polar(),
                pair.azimuth(),
                TRIG_BIN_ALL,
            ];
            fills.push(FillRequest::Spectrum {
                name,
                values: base.clone(),
            });

            let tiles = pair.trigger_tiles;
            let subsets = [
                (masks.tower_a, tiles.a, TRIG_BIN_A),
                (masks.tower_b, tiles.b, TRIG_BIN_B),
                (masks.tower_c, tiles.c, TRIG_BIN_C),
            ];
            for (mask, fired, bin) in subsets {
                if words.scaled & mask != 0 && fired {
                    let mut values = base.clone();
                    values[5] = bin;
                    fills.push(FillRequest::Spectrum { name, values });
                }
            }

            if let Some(calib) = calib_name {
                if pair.same_sector && words.live & masks.tower_any() != 0 {
                    fills.push(FillRequest::Spectrum {
                        name: calib,
                        values: vec![pair.sector as f64, pair.pt(), pair.invariant_mass],
                    });
                }
            }
        }
    }

    /// Single- and two-photon fills for direct-photon candidates: on a
    /// trusted tower, above the direct-energy threshold and passing the
    /// full photon ladder including the charged-track veto. Returns the
    /// number of candidates found.
    fn fill_photon_spectra(
        &self,
        fills: &mut Vec<FillRequest>,
        photons: &ClusterCollection,
        neighborhood: &ClusterCollection,
        tracks: &TrackCollection,
        ctx: &EventContext,
    ) -> usize {
        let cuts = &self.config.cuts;
        let masks = self.classifier.masks();
        let words = &ctx.triggers;
        let mut n_photons = 0;

        for (i, photon) in photons.iter().enumerate() {
            if !good_tower(&self.towers, photon)
                || !direct_energy_ok(cuts, photon)
                || !photon_ok(cuts, photon, ctx.start_time, tracks)
            {
                continue;
            }
            let Some(sector) = photon.sector() else {
                continue;
            };
            n_photons += 1;

            let p = photon.momentum();
            let isolated = if self
                .isolation
                .is_isolated_with_tracks(photon, neighborhood, tracks)
            {
                1.0
            } else {
                0.0
            };

            let tiles = photon.trigger_tiles;
            let subsets = [
                (masks.tower_a, tiles.a, TRIG_BIN_A),
                (masks.tower_b, tiles.b, TRIG_BIN_B),
                (masks.tower_c, tiles.c, TRIG_BIN_C),
            ];

            let single = vec![
                sector as f64,
                p.pt(),
                p.e,
                p.polar(),
                p.azimuth(),
                TRIG_BIN_ALL,
                isolated,
            ];
            fills.push(FillRequest::Spectrum {
                name: names::PHOTON,
                values: single.clone(),
            });
            for (mask, fired, bin) in subsets {
                if words.scaled & mask != 0 && fired {
                    let mut values = single.clone();
                    values[5] = bin;
                    fills.push(FillRequest::Spectrum {
                        name: names::PHOTON,
                        values,
                    });
                }
            }

            // pair the candidate with every partner in the same variant
            for (j, partner) in photons.iter().enumerate() {
                if i == j {
                    continue;
                }
                let mass = invariant_mass(&p, &partner.momentum());
                let pair = vec![
                    sector as f64,
                    p.pt(),
                    mass,
                    p.polar(),
                    p.azimuth(),
                    TRIG_BIN_ALL,
                    isolated,
                ];
                fills.push(FillRequest::Spectrum {
                    name: names::PHOTON_PAIR,
                    values: pair.clone(),
                });
                for (mask, fired, bin) in subsets {
                    if words.scaled & mask != 0 && fired {
                        let mut values = pair.clone();
                        values[5] = bin;
                        fills.push(FillRequest::Spectrum {
                            name: names::PHOTON_PAIR,
                            values,
                        });
                    }
                }
            }
        }

        n_photons
    }

    fn debug_dump(&self, label: &str, clusters: &ClusterCollection, ctx: &EventContext) {
        debug!(
            "event {}: {} collection, {} clusters",
            ctx.event_number,
            label,
            clusters.len()
        );
        for (i, c) in clusters.iter().enumerate() {
            debug!(
                "  {:3} ecore {:7.3} prob {:6.3} tof {:7.2} addr {:?} status {:?}",
                i,
                c.ecore,
                c.prob_photon,
                c.tofcorr - ctx.start_time,
                c.address(),
                self.towers.lookup(c.address()),
            );
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
    use crate::histograms::{dispatch, MemorySink};
    use crate::recalib::RunRecalibration;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::builder(AnalysisConfig::default())
            .tower_map(TowerStatusMap::all_good())
            .correction(Box::new(RunRecalibration::identity()))
            .build()
            .unwrap()
    }

    fn cluster_at(id: u32, phi: f64, ecore: f64) -> Cluster {
        Cluster::new(
            id,
            0,
            0,
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

    fn minbias_context() -> EventContext {
        EventContext {
            event_number: 1,
            vertex_z: 0.0,
            start_time: 0.0,
            triggers: TriggerWords::new(0, 0x0000_0010),
        }
    }

    fn record(clusters: Vec<Cluster>) -> EventRecord {
        EventRecord {
            context: minbias_context(),
            clusters: Some(ClusterCollection::from_vec(clusters)),
            tracks: Some(TrackCollection::new()),
        }
    }

    #[test]
    fn test_build_requires_exactly_one_correction() {
        let none = AnalysisEngine::builder(AnalysisConfig::default())
            .tower_map(TowerStatusMap::all_good())
            .build();
        assert!(matches!(none, Err(AnalysisError::Configuration(_))));

        let two = AnalysisEngine::builder(AnalysisConfig::default())
            .tower_map(TowerStatusMap::all_good())
            .correction(Box::new(RunRecalibration::identity()))
            .correction(Box::new(RunRecalibration::identity()))
            .build();
        assert!(matches!(two, Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn test_build_requires_tower_map() {
        let result = AnalysisEngine::builder(AnalysisConfig::default())
            .correction(Box::new(RunRecalibration::identity()))
            .build();
        assert!(matches!(result, Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn test_missing_collections_discard_event() {
        let engine = engine();
        let mut rec = record(vec![]);
        rec.clusters = None;
        assert!(matches!(
            engine.process_event(&rec),
            Err(AnalysisError::MissingInput(_))
        ));
    }

    #[test]
    fn test_noise_event_produces_no_fills() {
        let engine = engine();
        let mut rec = record(vec![cluster_at(0, 0.0, 2.0)]);
        rec.context.triggers = TriggerWords::new(0x7000_0000, 0x0000_0010);
        let report = engine.process_event(&rec).unwrap();
        assert_eq!(report.class, EventClass::Noise);
        assert!(report.fills.is_empty());
    }

    #[test]
    fn test_pi0_event_fills_mass_spectrum() {
        let engine = engine();
        // two 1 GeV photons with opening angle for m = 0.135 GeV
        let psi = 2.0 * (0.135_f64 / 2.0).asin();
        let rec = record(vec![
            cluster_at(0, -psi / 2.0, 1.0),
            cluster_at(1, psi / 2.0, 1.0),
        ]);
        let report = engine.process_event(&rec).unwrap();
        assert_eq!(report.class, EventClass::MinBias);

        let mass_fill = report
            .fills
            .iter()
            .find_map(|f| match f {
                FillRequest::Spectrum { name, values } if *name == names::PI0_MASS => {
                    Some(values.clone())
                }
                _ => None,
            })
            .expect("pi0 mass fill present");
        assert!((mass_fill[2] - 0.135).abs() < 1e-3);

        let mut sink = MemorySink::with_default_booking();
        dispatch(&mut sink, &report.fills);
        assert_eq!(sink.counter(names::EVENTS).unwrap().get("all"), 1);
        assert!(sink.spectrum(names::PI0_MASS).unwrap().entries >= 1);
        // no-tof and raw variants see the same pair
        assert!(sink.spectrum(names::PI0_MASS_NOTOF).unwrap().entries >= 1);
        assert!(sink.spectrum(names::PI0_MASS_RAW).unwrap().entries >= 1);
    }

    #[test]
    fn test_soft_cluster_is_excluded_from_energy_gated_fills() {
        let engine = engine();
        let rec = record(vec![cluster_at(0, 0.0, 0.25), cluster_at(1, 0.3, 1.0)]);
        let report = engine.process_event(&rec).unwrap();

        let mut sink = MemorySink::with_default_booking();
        dispatch(&mut sink, &report.fills);
        // both clusters appear in the ungated pT cross-check
        assert_eq!(sink.spectrum(names::CLUSTER_PT).unwrap().entries, 2);
        // the 0.25 GeV cluster survives no energy-gated stage: no pair,
        // no TOF spectrum entry beyond the 1.0 GeV cluster
        assert_eq!(sink.spectrum(names::PI0_MASS).unwrap().entries, 0);
        assert_eq!(sink.spectrum(names::CLUSTER_TOF).unwrap().entries, 1);
    }

    #[test]
    fn test_out_of_vertex_event_keeps_statistics_only() {
        let engine = engine();
        let psi = 2.0 * (0.135_f64 / 2.0).asin();
        let mut rec = record(vec![
            cluster_at(0, -psi / 2.0, 1.0),
            cluster_at(1, psi / 2.0, 1.0),
        ]);
        rec.context.vertex_z = 50.0;
        let report = engine.process_event(&rec).unwrap();
        assert_eq!(report.class, EventClass::Counted);
        // statistics and cross-check spectra fill, physics does not
        assert!(report
            .fills
            .iter()
            .any(|f| matches!(f, FillRequest::Count { .. })));
        assert!(!report
            .fills
            .iter()
            .any(|f| f.name() == names::PI0_MASS));
    }

    #[test]
    fn test_direct_photon_candidate_counted_and_isolated() {
        let engine = engine();
        // lone 2 GeV photon: passes the direct threshold, trivially isolated
        let report = engine
            .process_event(&record(vec![cluster_at(0, 0.0, 2.0)]))
            .unwrap();
        assert_eq!(report.n_photons, 1);

        let photon_fill = report
            .fills
            .iter()
            .find_map(|f| match f {
                FillRequest::Spectrum { name, values } if *name == names::PHOTON => {
                    Some(values.clone())
                }
                _ => None,
            })
            .expect("photon fill present");
        assert_eq!(photon_fill[6], 1.0);
    }

    #[test]
    fn test_batch_processing_matches_single() {
        let engine = engine();
        let psi = 2.0 * (0.135_f64 / 2.0).asin();
        let records: Vec<EventRecord> = (0..16)
            .map(|i| {
                let mut rec = record(vec![
                    cluster_at(0, -psi / 2.0, 1.0),
                    cluster_at(1, psi / 2.0, 1.0),
                ]);
                rec.context.event_number = i;
                rec
            })
            .collect();
        let reports = engine.process_events(&records);
        assert_eq!(reports.len(), 16);
        let single = engine.process_event(&records[0]).unwrap();
        for report in &reports {
            assert_eq!(report.fills.len(), single.fills.len());
        }
    }
}
