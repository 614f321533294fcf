//! Histogram Fills and the In-Memory Sink
//!
//! The pipeline core never owns histograms: it emits named
//! [`FillRequest`] values and hands them to a [`HistogramSink`]. The
//! provided [`MemorySink`] accumulates them into labeled counters, 1-D
//! histograms and sparse n-dimensional histograms, and can serialize the
//! lot to JSON for offline inspection.

use std::collections::{BTreeMap, HashMap};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ═══════════════════════════════════════════════════════════════════════════════
// FILL REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// One categorized fill emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FillRequest {
    /// Fill an n-dimensional spectrum at the given coordinates
    Spectrum {
        name: &'static str,
        values: Vec<f64>,
    },
    /// Increment a labeled counter bin
    Count {
        name: &'static str,
        label: &'static str,
    },
}

impl FillRequest {
    pub fn name(&self) -> &'static str {
        match self {
            FillRequest::Spectrum { name, .. } => name,
            FillRequest::Count { name, .. } => name,
        }
    }
}

/// Receiver of fill requests. The core only ever calls `record`.
pub trait HistogramSink {
    fn record(&mut self, fill: &FillRequest);
}

/// Histogram names the default engine booking uses
pub mod names {
    /// Labeled per-event trigger statistics
    pub const EVENTS: &str = "events";
    /// Direct-photon candidates per event
    pub const NPHOTONS: &str = "nphotons";
    /// Cluster pT vs sector, good towers only
    pub const CLUSTER_PT: &str = "cluster_pt";
    /// Cluster pT vs sector, status map ignored
    pub const CLUSTER_PT_NOSTATUS: &str = "cluster_pt_nostatus";
    /// (sector, pT, tof) for corrected photon candidates
    pub const CLUSTER_TOF: &str = "cluster_tof";
    /// (sector, pT, tof) for uncorrected photon candidates
    pub const CLUSTER_TOF_RAW: &str = "cluster_tof_raw";
    /// Pair spectrum, full selection including time of flight
    pub const PI0_MASS: &str = "pi0_mass";
    /// Pair spectrum without the time-of-flight stage
    pub const PI0_MASS_NOTOF: &str = "pi0_mass_notof";
    /// Pair spectrum over uncorrected clusters
    pub const PI0_MASS_RAW: &str = "pi0_mass_raw";
    /// Same-sector pair subset for sector-by-sector energy calibration
    pub const PI0_CALIB: &str = "pi0_calib";
    /// Same-sector calibration subset over uncorrected clusters
    pub const PI0_CALIB_RAW: &str = "pi0_calib_raw";
    /// Single direct-photon candidate spectrum
    pub const PHOTON: &str = "photon";
    /// Direct-photon candidate paired with every partner
    pub const PHOTON_PAIR: &str = "photon_pair";
}

// ═══════════════════════════════════════════════════════════════════════════════
// 1-D HISTOGRAM
// ═══════════════════════════════════════════════════════════════════════════════

/// Uniform-bin 1-D histogram with under/overflow and running moments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges, `n_bins + 1` entries
    pub edges: Vec<f64>,
    /// Bin counts
    pub counts: Vec<u64>,
    /// Total entries including under/overflow
    pub total: u64,
    pub underflow: u64,
    pub overflow: u64,
    sum: f64,
    sum_sq: f64,
}

impl Histogram {
    pub fn new(min: f64, max: f64, n_bins: usize) -> Self {
        let step = (max - min) / n_bins as f64;
        let edges: Vec<f64> = (0..=n_bins).map(|i| min + i as f64 * step).collect();
        Self {
            edges,
            counts: vec![0; n_bins],
            total: 0,
            underflow: 0,
            overflow: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.total += 1;
        self.sum += value;
        self.sum_sq += value * value;

        if value < self.edges[0] {
            self.underflow += 1;
            return;
        }
        if value >= *self.edges.last().unwrap() {
            self.overflow += 1;
            return;
        }

        let bin = self.edges.partition_point(|&e| e <= value) - 1;
        if bin < self.counts.len() {
            self.counts[bin] += 1;
        }
    }

    pub fn mean(&self) -> f64 {
        if self.total > 0 {
            self.sum / self.total as f64
        } else {
            0.0
        }
    }

    pub fn std(&self) -> f64 {
        if self.total > 1 {
            let mean = self.mean();
            (self.sum_sq / self.total as f64 - mean * mean).max(0.0).sqrt()
        } else {
            0.0
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LABELED COUNTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Counter histogram with string-labeled bins
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabeledCounter {
    counts: BTreeMap<String, u64>,
}

impl LabeledCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&mut self, label: &str) {
        *self.counts.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.counts.iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPARSE N-DIMENSIONAL HISTOGRAM
// ═══════════════════════════════════════════════════════════════════════════════

/// One axis of a sparse histogram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinAxis {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub n_bins: usize,
}

impl BinAxis {
    pub fn new(label: &str, min: f64, max: f64, n_bins: usize) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
            n_bins,
        }
    }

    /// Bin index for a value; out-of-range values saturate into the
    /// first or last bin.
    pub fn bin(&self, value: f64) -> usize {
        if value < self.min {
            return 0;
        }
        let width = (self.max - self.min) / self.n_bins as f64;
        let bin = ((value - self.min) / width) as usize;
        bin.min(self.n_bins - 1)
    }
}

/// Sparse n-dimensional histogram: only touched bins are stored.
#[derive(Debug, Clone)]
pub struct SparseHistogram {
    pub axes: Vec<BinAxis>,
    pub entries: u64,
    bins: HashMap<Vec<usize>, f64>,
}

impl SparseHistogram {
    pub fn new(axes: Vec<BinAxis>) -> Self {
        Self {
            axes,
            entries: 0,
            bins: HashMap::new(),
        }
    }

    /// Fill with unit weight. A coordinate count mismatching the axis
    /// count is dropped with a warning.
    pub fn fill(&mut self, values: &[f64]) {
        if values.len() != self.axes.len() {
            warn!(
                "sparse fill with {} coordinates on {} axes dropped",
                values.len(),
                self.axes.len()
            );
            return;
        }
        let key: Vec<usize> = self
            .axes
            .iter()
            .zip(values)
            .map(|(axis, &v)| axis.bin(v))
            .collect();
        *self.bins.entry(key).or_insert(0.0) += 1.0;
        self.entries += 1;
    }

    pub fn n_filled_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_content(&self, key: &[usize]) -> f64 {
        self.bins.get(key).copied().unwrap_or(0.0)
    }

    /// Sum of weights over all filled bins
    pub fn integral(&self) -> f64 {
        self.bins.values().sum()
    }

    /// Project the histogram onto one axis, summing the others
    pub fn project(&self, axis: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.axes[axis].n_bins];
        for (key, weight) in &self.bins {
            out[key[axis]] += weight;
        }
        out
    }

    fn bins_json(&self) -> serde_json::Value {
        let mut rows: Vec<(&Vec<usize>, &f64)> = self.bins.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        json!(rows
            .into_iter()
            .map(|(k, w)| json!([k, w]))
            .collect::<Vec<_>>())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory histogram sink with explicit booking.
///
/// Fills addressed to unbooked names are counted and dropped; the
/// summary makes them visible instead of failing the event.
#[derive(Debug, Default)]
pub struct MemorySink {
    counters: BTreeMap<&'static str, LabeledCounter>,
    spectra: BTreeMap<&'static str, SparseHistogram>,
    histograms: BTreeMap<&'static str, Histogram>,
    unbooked: BTreeMap<String, u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book every histogram the default engine fill sequence produces.
    pub fn with_default_booking() -> Self {
        let sector = || BinAxis::new("sector", 0.0, 8.0, 8);
        let pt = || BinAxis::new("pt", 0.0, 30.0, 60);
        let mass = || BinAxis::new("mass", 0.0, 1.0, 100);
        let polar = || BinAxis::new("polar", -2.0, 2.0, 40);
        let azimuth = || BinAxis::new("azimuth", -2.0, 5.0, 35);
        let trig = || BinAxis::new("trigger", 0.0, 4.0, 4);
        let isolated = || BinAxis::new("isolated", 0.0, 2.0, 2);
        let tof = || BinAxis::new("tof", -50.0, 50.0, 100);
        let energy = || BinAxis::new("energy", 0.0, 30.0, 60);

        let mut sink = Self::new();
        sink.book_counter(names::EVENTS);
        sink.book_histogram(names::NPHOTONS, Histogram::new(0.0, 20.0, 20));
        for name in [names::CLUSTER_PT, names::CLUSTER_PT_NOSTATUS] {
            sink.book_spectrum(name, vec![pt(), sector()]);
        }
        for name in [names::CLUSTER_TOF, names::CLUSTER_TOF_RAW] {
            sink.book_spectrum(name, vec![sector(), pt(), tof()]);
        }
        for name in [names::PI0_MASS, names::PI0_MASS_NOTOF, names::PI0_MASS_RAW] {
            sink.book_spectrum(name, vec![sector(), pt(), mass(), polar(), azimuth(), trig()]);
        }
        for name in [names::PI0_CALIB, names::PI0_CALIB_RAW] {
            sink.book_spectrum(name, vec![sector(), pt(), mass()]);
        }
        sink.book_spectrum(
            names::PHOTON,
            vec![sector(), pt(), energy(), polar(), azimuth(), trig(), isolated()],
        );
        sink.book_spectrum(
            names::PHOTON_PAIR,
            vec![sector(), pt(), mass(), polar(), azimuth(), trig(), isolated()],
        );
        sink
    }

    pub fn book_counter(&mut self, name: &'static str) {
        self.counters.insert(name, LabeledCounter::new());
    }

    pub fn book_spectrum(&mut self, name: &'static str, axes: Vec<BinAxis>) {
        self.spectra.insert(name, SparseHistogram::new(axes));
    }

    pub fn book_histogram(&mut self, name: &'static str, histogram: Histogram) {
        self.histograms.insert(name, histogram);
    }

    pub fn counter(&self, name: &str) -> Option<&LabeledCounter> {
        self.counters.get(name)
    }

    pub fn spectrum(&self, name: &str) -> Option<&SparseHistogram> {
        self.spectra.get(name)
    }

    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.histograms.get(name)
    }

    /// Total entries over all booked objects
    pub fn total_entries(&self) -> u64 {
        let counters: u64 = self
            .counters
            .values()
            .map(|c| c.iter().map(|(_, n)| n).sum::<u64>())
            .sum();
        let spectra: u64 = self.spectra.values().map(|s| s.entries).sum();
        let histos: u64 = self.histograms.values().map(|h| h.total).sum();
        counters + spectra + histos
    }

    /// Human-readable accumulation summary
    pub fn summary(&self) -> String {
        let mut out = String::from("histogram sink:\n");
        for (name, counter) in &self.counters {
            out.push_str(&format!("  {} (counter)\n", name));
            for (label, count) in counter.iter() {
                out.push_str(&format!("    {:30} {}\n", label, count));
            }
        }
        for (name, histo) in &self.histograms {
            out.push_str(&format!(
                "  {:30} entries {:8}  mean {:.3}  std {:.3}\n",
                name,
                histo.total,
                histo.mean(),
                histo.std()
            ));
        }
        for (name, spectrum) in &self.spectra {
            out.push_str(&format!(
                "  {:30} entries {:8}  filled bins {}\n",
                name,
                spectrum.entries,
                spectrum.n_filled_bins()
            ));
        }
        if !self.unbooked.is_empty() {
            out.push_str(&format!("  unbooked fills: {:?}\n", self.unbooked));
        }
        out
    }

    /// Serialize everything to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        let counters: serde_json::Value = self
            .counters
            .iter()
            .map(|(name, c)| (name.to_string(), json!(c)))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();
        let histograms: serde_json::Value = self
            .histograms
            .iter()
            .map(|(name, h)| (name.to_string(), json!(h)))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();
        let spectra: serde_json::Value = self
            .spectra
            .iter()
            .map(|(name, s)| {
                (
                    name.to_string(),
                    json!({
                        "axes": s.axes,
                        "entries": s.entries,
                        "bins": s.bins_json(),
                    }),
                )
            })
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();
        json!({
            "counters": counters,
            "histograms": histograms,
            "spectra": spectra,
        })
    }
}

impl HistogramSink for MemorySink {
    fn record(&mut self, fill: &FillRequest) {
        match fill {
            FillRequest::Count { name, label } => {
                if let Some(counter) = self.counters.get_mut(name) {
                    counter.fill(label);
                } else {
                    *self.unbooked.entry(name.to_string()).or_insert(0) += 1;
                }
            }
            FillRequest::Spectrum { name, values } => {
                if let Some(spectrum) = self.spectra.get_mut(name) {
                    spectrum.fill(values);
                } else if let Some(histogram) = self.histograms.get_mut(name) {
                    if let Some(&v) = values.first() {
                        histogram.fill(v);
                    }
                } else {
                    *self.unbooked.entry(name.to_string()).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Forward a batch of fills to a sink
pub fn dispatch(sink: &mut dyn HistogramSink, fills: &[FillRequest]) {
    for fill in fills {
        sink.record(fill);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_moments() {
        let mut h = Histogram::new(0.0, 10.0, 10);
        for v in [1.0, 2.0, 3.0, 4.0] {
            h.fill(v);
        }
        assert_eq!(h.total, 4);
        assert!((h.mean() - 2.5).abs() < 1e-12);
        assert_eq!(h.counts[1], 1);
    }

    #[test]
    fn test_histogram_under_overflow() {
        let mut h = Histogram::new(0.0, 1.0, 4);
        h.fill(-0.5);
        h.fill(1.5);
        h.fill(0.5);
        assert_eq!(h.underflow, 1);
        assert_eq!(h.overflow, 1);
        assert_eq!(h.counts.iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_sparse_fill_and_project() {
        let mut s = SparseHistogram::new(vec![
            BinAxis::new("sector", 0.0, 8.0, 8),
            BinAxis::new("pt", 0.0, 10.0, 10),
        ]);
        s.fill(&[2.0, 3.5]);
        s.fill(&[2.0, 3.7]);
        s.fill(&[5.0, 1.0]);
        assert_eq!(s.entries, 3);
        assert_eq!(s.bin_content(&[2, 3]), 2.0);
        let by_sector = s.project(0);
        assert_eq!(by_sector[2], 2.0);
        assert_eq!(by_sector[5], 1.0);
    }

    #[test]
    fn test_sparse_out_of_range_saturates() {
        let mut s = SparseHistogram::new(vec![BinAxis::new("polar", -2.0, 2.0, 4)]);
        s.fill(&[9999.0]);
        assert_eq!(s.bin_content(&[3]), 1.0);
    }

    #[test]
    fn test_sink_routing() {
        let mut sink = MemorySink::with_default_booking();
        sink.record(&FillRequest::Count {
            name: names::EVENTS,
            label: "all",
        });
        sink.record(&FillRequest::Spectrum {
            name: names::CLUSTER_PT,
            values: vec![2.0, 1.0],
        });
        sink.record(&FillRequest::Spectrum {
            name: names::NPHOTONS,
            values: vec![3.0],
        });
        assert_eq!(sink.counter(names::EVENTS).unwrap().get("all"), 1);
        assert_eq!(sink.spectrum(names::CLUSTER_PT).unwrap().entries, 1);
        assert_eq!(sink.histogram(names::NPHOTONS).unwrap().total, 1);
        assert_eq!(sink.total_entries(), 3);
    }

    #[test]
    fn test_unbooked_fill_is_counted_not_fatal() {
        let mut sink = MemorySink::new();
        sink.record(&FillRequest::Count {
            name: "nonexistent",
            label: "x",
        });
        assert!(sink.summary().contains("unbooked"));
    }
}
