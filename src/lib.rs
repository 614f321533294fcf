//! # Calorimeter Photon-Analysis Pipeline
//!
//! Offline analysis core for per-collision-event calorimeter data:
//! cluster selection, two-cluster pair combinatorics (invariant mass),
//! isolation scoring and trigger-based event classification, producing
//! categorized histogram fills for later statistical analysis.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────────────────────────────────┐
//!                 │              ANALYSIS ENGINE               │
//!    EventRecord  │                                            │
//!   ─────────────►│  EventClassifier ── noise veto, category   │
//!                 │        │                                   │
//!                 │        ▼                                   │
//!                 │  Recalibration ── corrected clone          │
//!                 │        │                                   │
//!                 │        ▼                                   │
//!                 │  Filter stacks ── good-tower → shape →     │
//!                 │        │          energy → tof             │
//!                 │        ▼                                   │
//!                 │  PairEngine ──── invariant-mass pairs      │
//!                 │  IsolationScorer ─ cone sums               │
//!                 │        │                                   │
//!                 └────────┼───────────────────────────────────┘
//!                          ▼
//!                  Vec<FillRequest> ────► HistogramSink
//! ```
//!
//! The host framework (data-node graph, file I/O, run databases, plugin
//! lifecycle) stays outside: the engine takes plain data in and returns
//! plain fills out. The [`towermap::TowerStatusMap`] is loaded once per
//! job and is read-only afterwards, so whole events may be processed
//! concurrently against it ([`engine::AnalysisEngine::process_events`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use photon_pipeline::{
//!     AnalysisConfig, AnalysisEngine, MemorySink, RunRecalibration, TowerStatusMap,
//! };
//!
//! let engine = AnalysisEngine::builder(AnalysisConfig::default())
//!     .tower_map(TowerStatusMap::from_grid_file("status_map.txt")?)
//!     .correction(Box::new(RunRecalibration::identity()))
//!     .build()?;
//!
//! let mut sink = MemorySink::with_default_booking();
//! for record in events {
//!     let report = engine.process_event(&record)?;
//!     photon_pipeline::histograms::dispatch(&mut sink, &report.fills);
//! }
//! println!("{}", sink.summary());
//! ```

// Core modules
pub mod cluster;
pub mod engine;
pub mod error;
pub mod filters;
pub mod histograms;
pub mod isolation;
pub mod kinematics;
pub mod pairs;
pub mod recalib;
pub mod towermap;
pub mod trigger;

// Re-exports
pub use cluster::{Cluster, ClusterCollection, Track, TrackCollection, TriggerTiles};
pub use engine::{
    AnalysisConfig, AnalysisEngine, AnalysisEngineBuilder, EventContext, EventRecord, EventReport,
};
pub use error::{AnalysisError, AnalysisResult};
pub use filters::CutConfig;
pub use histograms::{FillRequest, Histogram, HistogramSink, MemorySink};
pub use isolation::{IsolationCuts, IsolationScorer};
pub use kinematics::FourMomentum;
pub use pairs::{ClusterPair, PairConfig, PairEngine};
pub use recalib::{ChannelRecalibration, ClusterCorrection, RunRecalibration};
pub use towermap::{TowerAddress, TowerLookup, TowerStatusMap};
pub use trigger::{EventClass, EventClassifier, TriggerMasks, TriggerWords};
