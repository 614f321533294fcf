//! Run the photon-analysis pipeline over recorded or synthetic events.
//!
//! Stands in for the host framework: loads the tower status map, feeds
//! event records through the engine and prints (or writes) the
//! accumulated histograms.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use photon_pipeline::histograms::dispatch;
use photon_pipeline::{
    AnalysisConfig, AnalysisEngine, AnalysisResult, Cluster, ClusterCollection, EventContext,
    EventRecord, MemorySink, RunRecalibration, Track, TrackCollection, TowerStatusMap,
    TriggerTiles, TriggerWords,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MapFormat {
    /// Rows of `sector row col status`
    Grid,
    /// Rows of `channel status` in the historical channel ordering
    Channel,
}

#[derive(Debug, Parser)]
#[command(name = "photon-scan", about = "Calorimeter photon-analysis pipeline")]
struct Args {
    /// Tower status map file; all towers good if omitted
    #[arg(long)]
    status_map: Option<PathBuf>,

    /// Status map file format
    #[arg(long, value_enum, default_value = "grid")]
    map_format: MapFormat,

    /// JSON file holding an array of event records
    #[arg(long, conflicts_with = "synthetic")]
    events: Option<PathBuf>,

    /// Generate this many synthetic events instead of reading a file
    #[arg(long)]
    synthetic: Option<usize>,

    /// Seed for synthetic event generation
    #[arg(long, default_value_t = 20130516)]
    seed: u64,

    /// Write the accumulated histograms as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> AnalysisResult<()> {
    env_logger::init();
    let args = Args::parse();

    let towers = match &args.status_map {
        Some(path) => match args.map_format {
            MapFormat::Grid => TowerStatusMap::from_grid_file(path)?,
            MapFormat::Channel => TowerStatusMap::from_channel_file(path)?,
        },
        None => {
            info!("no status map given, treating every tower as good");
            TowerStatusMap::all_good()
        }
    };

    let engine = AnalysisEngine::builder(AnalysisConfig::default())
        .tower_map(towers)
        .correction(Box::new(RunRecalibration::identity()))
        .build()?;

    let records = match (&args.events, args.synthetic) {
        (Some(path), _) => {
            let reader = BufReader::new(File::open(path)?);
            let records: Vec<EventRecord> = serde_json::from_reader(reader)?;
            info!("read {} events from {}", records.len(), path.display());
            records
        }
        (None, Some(n)) => synthetic_events(n, args.seed),
        (None, None) => synthetic_events(1000, args.seed),
    };

    let reports = engine.process_events(&records);

    let mut sink = MemorySink::with_default_booking();
    let mut by_class: BTreeMap<String, usize> = BTreeMap::new();
    for report in &reports {
        *by_class.entry(format!("{:?}", report.class)).or_insert(0) += 1;
        dispatch(&mut sink, &report.fills);
    }

    println!("processed {} events", reports.len());
    for (class, count) in &by_class {
        println!("  {:12} {}", class, count);
    }
    println!("{}", sink.summary());

    if let Some(path) = &args.output {
        let json = sink.to_json();
        std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
        info!("histograms written to {}", path.display());
    }

    Ok(())
}

/// Generate a stream of plausible events: a handful of clusters on the
/// west wall, occasional high-tower triggers, occasional noise events.
fn synthetic_events(n: usize, seed: u64) -> Vec<EventRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(n);

    for event_number in 0..n as u64 {
        let n_clusters = rng.gen_range(1..8);
        let mut clusters = ClusterCollection::new();
        let mut any_tile = TriggerTiles::none();

        for id in 0..n_clusters {
            let ecore = rng.gen_range(0.1..4.0_f64);
            let theta = std::f64::consts::FRAC_PI_2 + rng.gen_range(-0.35..0.35);
            let phi = rng.gen_range(-0.6..0.6_f64);
            let r = 5.0;
            let tiles = TriggerTiles {
                a: ecore > 1.4,
                b: ecore > 2.1,
                c: ecore > 2.8,
            };
            any_tile.a |= tiles.a;
            any_tile.b |= tiles.b;
            any_tile.c |= tiles.c;
            clusters.push(
                Cluster::new(
                    id,
                    0,
                    rng.gen_range(0..4),
                    rng.gen_range(1..35),
                    rng.gen_range(1..71),
                    r * theta.sin() * phi.cos(),
                    r * theta.sin() * phi.sin(),
                    r * theta.cos(),
                    ecore,
                    rng.gen_range(-12.0..12.0),
                    rng.gen_range(0.0..1.0),
                )
                .with_trigger_tiles(tiles),
            );
        }

        // a few charged tracks toward the same wall
        let mut tracks = TrackCollection::new();
        for _ in 0..rng.gen_range(0..4) {
            tracks.push(Track::new(
                rng.gen_range(0.2..2.0),
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
            ));
        }

        let masks = photon_pipeline::TriggerMasks::default();
        let mut live = masks.vertex;
        let mut scaled = masks.vertex;
        if any_tile.a && rng.gen_bool(0.8) {
            live |= masks.tower_a;
            scaled |= masks.tower_a;
        }
        if any_tile.b && rng.gen_bool(0.8) {
            live |= masks.tower_b;
            scaled |= masks.tower_b;
        }
        if any_tile.c && rng.gen_bool(0.8) {
            live |= masks.tower_c;
            scaled |= masks.tower_c;
        }
        // a sliver of pulser noise
        if rng.gen_bool(0.01) {
            live |= masks.noise;
        }

        records.push(EventRecord {
            context: EventContext {
                event_number,
                vertex_z: rng.gen_range(-30.0..30.0),
                start_time: rng.gen_range(-1.0..1.0),
                triggers: TriggerWords::new(live, scaled),
            },
            clusters: Some(clusters),
            tracks: Some(tracks),
        });
    }

    info!("generated {} synthetic events", records.len());
    records
}
