//! Tower Geometry and Status Map
//!
//! The calorimeter is read out in eight sectors on two arms:
//!
//! ```text
//!        WEST ARM                 EAST ARM
//!   ┌────┬────┬────┬────┐    ┌────┬────┬────┬────┐
//!   │ S0 │ S1 │ S2 │ S3 │    │ S4 │ S5 │ S6 │ S7 │
//!   └────┴────┴────┴────┘    └────┴────┴────┴────┘
//!    fine granularity          fine      coarse
//!    36 × 72 towers            36 × 72   48 × 96
//! ```
//!
//! Sectors 0-5 use the fine-granularity towers (36 rows × 72 columns,
//! 2592 per sector); sectors 6-7 use the coarse towers (48 rows × 96
//! columns, 4608 per sector). Every physical tower also has a linear
//! channel id: fine towers occupy `[0, 15552)`, coarse towers
//! `[15552, 24768)`.
//!
//! [`TowerStatusMap`] is the per-job calibration/validity table over this
//! geometry. It is loaded once before event processing, read-only
//! afterwards, and safe to share across threads.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

// ═══════════════════════════════════════════════════════════════════════════════
// GEOMETRY CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of calorimeter sectors
pub const N_SECTORS: usize = 8;
/// Rows in a fine-granularity sector
pub const FINE_ROWS: usize = 36;
/// Columns in a fine-granularity sector
pub const FINE_COLS: usize = 72;
/// Rows in a coarse sector
pub const COARSE_ROWS: usize = 48;
/// Columns in a coarse sector
pub const COARSE_COLS: usize = 96;
/// Towers per fine sector
pub const FINE_SECTOR_TOWERS: usize = FINE_ROWS * FINE_COLS;
/// Towers per coarse sector
pub const COARSE_SECTOR_TOWERS: usize = COARSE_ROWS * COARSE_COLS;
/// First channel id of the coarse subtype
pub const COARSE_CHANNEL_BASE: usize = 6 * FINE_SECTOR_TOWERS;
/// Total number of physical towers
pub const N_TOWERS: usize = COARSE_CHANNEL_BASE + 2 * COARSE_SECTOR_TOWERS;

/// Status code of a fully trusted tower
pub const STATUS_GOOD: u32 = 0;
/// Status code force-assigned to towers on a sector's outer edge
pub const STATUS_EDGE: u32 = 20;
/// Sentinel status for towers never mentioned by the loaded table.
/// Deliberately distinct from [`STATUS_GOOD`]: an unknown tower is not
/// trusted.
pub const STATUS_UNKNOWN: u32 = 9999;

// ═══════════════════════════════════════════════════════════════════════════════
// SECTOR KIND
// ═══════════════════════════════════════════════════════════════════════════════

/// Granularity subtype of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorKind {
    /// Fine-granularity towers (sectors 0-5)
    Fine,
    /// Coarse towers (sectors 6-7)
    Coarse,
}

impl SectorKind {
    /// Subtype of the given sector index, `None` if out of range
    pub fn of_sector(sector: usize) -> Option<Self> {
        match sector {
            0..=5 => Some(SectorKind::Fine),
            6 | 7 => Some(SectorKind::Coarse),
            _ => None,
        }
    }

    /// Tower rows in a sector of this subtype
    pub fn rows(&self) -> usize {
        match self {
            SectorKind::Fine => FINE_ROWS,
            SectorKind::Coarse => COARSE_ROWS,
        }
    }

    /// Tower columns in a sector of this subtype
    pub fn cols(&self) -> usize {
        match self {
            SectorKind::Fine => FINE_COLS,
            SectorKind::Coarse => COARSE_COLS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOWER ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Address of one physical tower: (sector, row, column).
///
/// Immutable once computed. An address whose components are individually
/// in range may still not correspond to a physical tower (a fine sector
/// has no row 36 or column 72); such combinations are rejected by
/// [`tower_id`] and produce [`TowerLookup::Invalid`] on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TowerAddress {
    pub sector: usize,
    pub row: usize,
    pub col: usize,
}

impl TowerAddress {
    pub fn new(sector: usize, row: usize, col: usize) -> Self {
        Self { sector, row, col }
    }

    /// Subtype of the addressed sector
    pub fn kind(&self) -> Option<SectorKind> {
        SectorKind::of_sector(self.sector)
    }

    /// True if the tower sits on the outer edge of its sector grid
    pub fn is_edge(&self) -> bool {
        match self.kind() {
            Some(kind) => {
                self.row == 0
                    || self.col == 0
                    || self.row == kind.rows() - 1
                    || self.col == kind.cols() - 1
            }
            None => false,
        }
    }
}

/// Fold an (arm, raw-sector) pair into the offline sector numbering.
///
/// The west arm (arm 0) counts sectors 0-3 directly; the east arm (arm 1)
/// counts its raw sectors in the opposite sense, so raw sector `s` lands
/// at offline sector `7 - s`. Returns `None` for an unphysical pair.
pub fn offline_sector(arm: u8, raw_sector: u8) -> Option<usize> {
    if raw_sector > 3 {
        return None;
    }
    match arm {
        0 => Some(raw_sector as usize),
        1 => Some(7 - raw_sector as usize),
        _ => None,
    }
}

/// Linear channel id of a tower address, `None` if the combination does
/// not correspond to a physical tower.
pub fn tower_id(addr: TowerAddress) -> Option<usize> {
    let kind = addr.kind()?;
    if addr.row >= kind.rows() || addr.col >= kind.cols() {
        return None;
    }
    match kind {
        SectorKind::Fine => {
            Some(addr.sector * FINE_SECTOR_TOWERS + addr.row * FINE_COLS + addr.col)
        }
        SectorKind::Coarse => Some(
            COARSE_CHANNEL_BASE
                + (addr.sector - 6) * COARSE_SECTOR_TOWERS
                + addr.row * COARSE_COLS
                + addr.col,
        ),
    }
}

/// Inverse of [`tower_id`]: decode a linear channel id into an address.
pub fn tower_location(channel: usize) -> Option<TowerAddress> {
    if channel < COARSE_CHANNEL_BASE {
        let sector = channel / FINE_SECTOR_TOWERS;
        let rem = channel % FINE_SECTOR_TOWERS;
        Some(TowerAddress::new(sector, rem / FINE_COLS, rem % FINE_COLS))
    } else if channel < N_TOWERS {
        let rem = channel - COARSE_CHANNEL_BASE;
        let sector = 6 + rem / COARSE_SECTOR_TOWERS;
        let rem = rem % COARSE_SECTOR_TOWERS;
        Some(TowerAddress::new(sector, rem / COARSE_COLS, rem % COARSE_COLS))
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL REMAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Remap a channel id from the historical channel-table ordering into the
/// ordering decoded by [`tower_location`].
///
/// The channel-format status tables were produced with two sector blocks
/// transposed in each subtype. The offsets are subtype-specific and must
/// be exact; an off-by-one here shifts every status assignment by a
/// tower and silently breaks calibration.
pub fn remap_table_channel(channel: usize) -> usize {
    // fine subtype: channels of sectors 4 and 5 are swapped
    if (10368..COARSE_CHANNEL_BASE).contains(&channel) {
        if channel < 12960 {
            channel + FINE_SECTOR_TOWERS
        } else {
            channel - FINE_SECTOR_TOWERS
        }
    // coarse subtype: the two sector blocks are swapped
    } else if channel >= COARSE_CHANNEL_BASE {
        if channel < 20160 {
            channel + COARSE_SECTOR_TOWERS
        } else {
            channel - COARSE_SECTOR_TOWERS
        }
    } else {
        channel
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS MAP
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a status-map lookup.
///
/// `Invalid` is a value, not an error: callers treat it as "discard the
/// cluster" and keep processing the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TowerLookup {
    /// Status code of a physically addressable tower
    Status(u32),
    /// The address does not resolve to a physical tower
    Invalid,
}

impl TowerLookup {
    /// True iff the tower is addressable and fully trusted
    pub fn is_good(&self) -> bool {
        matches!(self, TowerLookup::Status(STATUS_GOOD))
    }
}

/// Read-only per-tower status table, loaded once per job.
///
/// Backed by an 8 × 48 × 96 cube; fine sectors only populate the
/// 36 × 72 corner of their slice, the rest stays unaddressable.
#[derive(Debug, Clone)]
pub struct TowerStatusMap {
    cube: Array3<u32>,
}

impl TowerStatusMap {
    /// Create a map with every tower at the unknown sentinel
    pub fn new() -> Self {
        Self {
            cube: Array3::from_elem((N_SECTORS, COARSE_ROWS, COARSE_COLS), STATUS_UNKNOWN),
        }
    }

    /// Create a map with every physical tower marked good. Intended for
    /// tests and synthetic-event runs.
    pub fn all_good() -> Self {
        let mut map = Self::new();
        for channel in 0..N_TOWERS {
            if let Some(addr) = tower_location(channel) {
                map.set_status(addr, STATUS_GOOD);
            }
        }
        map
    }

    /// Look up the status of one tower.
    pub fn lookup(&self, addr: TowerAddress) -> TowerLookup {
        match tower_id(addr) {
            Some(_) => TowerLookup::Status(self.cube[[addr.sector, addr.row, addr.col]]),
            None => TowerLookup::Invalid,
        }
    }

    /// Set the status of one tower. No-op for unaddressable combinations.
    pub fn set_status(&mut self, addr: TowerAddress, status: u32) {
        if tower_id(addr).is_some() {
            self.cube[[addr.sector, addr.row, addr.col]] = status;
        }
    }

    /// Count towers with status above `threshold`, split by subtype.
    pub fn count_bad(&self, threshold: u32) -> (usize, usize) {
        let mut bad_fine = 0;
        let mut bad_coarse = 0;
        for channel in 0..N_TOWERS {
            let addr = match tower_location(channel) {
                Some(a) => a,
                None => continue,
            };
            if let TowerLookup::Status(s) = self.lookup(addr) {
                if s > threshold && s != STATUS_UNKNOWN {
                    match addr.kind() {
                        Some(SectorKind::Fine) => bad_fine += 1,
                        Some(SectorKind::Coarse) => bad_coarse += 1,
                        None => {}
                    }
                }
            }
        }
        (bad_fine, bad_coarse)
    }

    /// Load a grid-format table: whitespace-separated rows of
    /// `sector row col status`.
    pub fn from_grid_file<P: AsRef<Path>>(path: P) -> AnalysisResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let map = Self::parse_grid(reader)?;
        let (bad_fine, bad_coarse) = map.count_bad(STATUS_GOOD);
        info!(
            "loaded grid status map {}: {} bad fine, {} bad coarse towers",
            path.as_ref().display(),
            bad_fine,
            bad_coarse
        );
        Ok(map)
    }

    /// Grid-format parser over any reader. Unlisted towers keep the
    /// unknown sentinel.
    pub fn parse_grid<R: BufRead>(reader: R) -> AnalysisResult<Self> {
        let mut map = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields = parse_fields(trimmed, 4, lineno)?;
            let addr = TowerAddress::new(fields[0], fields[1], fields[2]);
            if tower_id(addr).is_none() {
                return Err(AnalysisError::StatusMapFormat {
                    line: lineno + 1,
                    reason: format!("unaddressable tower {:?}", addr),
                });
            }
            map.set_status(addr, fields[3] as u32);
        }
        Ok(map)
    }

    /// Load a channel-format table: rows of `channel status`, using the
    /// historical channel ordering (see [`remap_table_channel`]).
    /// Edge towers are force-marked with [`STATUS_EDGE`] afterwards.
    pub fn from_channel_file<P: AsRef<Path>>(path: P) -> AnalysisResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let map = Self::parse_channels(reader)?;
        let (bad_fine, bad_coarse) = map.count_bad(STATUS_GOOD);
        info!(
            "loaded channel status map {}: {} bad fine, {} bad coarse towers",
            path.as_ref().display(),
            bad_fine,
            bad_coarse
        );
        Ok(map)
    }

    /// Channel-format parser over any reader.
    pub fn parse_channels<R: BufRead>(reader: R) -> AnalysisResult<Self> {
        let mut map = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields = parse_fields(trimmed, 2, lineno)?;
            let channel = remap_table_channel(fields[0]);
            let addr = match tower_location(channel) {
                Some(a) => a,
                None => {
                    return Err(AnalysisError::StatusMapFormat {
                        line: lineno + 1,
                        reason: format!("channel {} out of range", fields[0]),
                    })
                }
            };
            map.set_status(addr, fields[1] as u32);
            debug!("channel {} -> {:?} status {}", fields[0], addr, fields[1]);
        }
        // the channel tables do not list edge towers as such
        map.mark_edges();
        Ok(map)
    }

    /// Force-mark every tower on a sector edge with [`STATUS_EDGE`].
    pub fn mark_edges(&mut self) {
        for channel in 0..N_TOWERS {
            if let Some(addr) = tower_location(channel) {
                if addr.is_edge() {
                    self.set_status(addr, STATUS_EDGE);
                }
            }
        }
    }

    /// Per-status tower counts, for summary printing.
    pub fn status_census(&self) -> HashMap<u32, usize> {
        let mut census = HashMap::new();
        for channel in 0..N_TOWERS {
            if let Some(addr) = tower_location(channel) {
                if let TowerLookup::Status(s) = self.lookup(addr) {
                    *census.entry(s).or_insert(0) += 1;
                }
            }
        }
        census
    }
}

impl Default for TowerStatusMap {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_fields(line: &str, expected: usize, lineno: usize) -> AnalysisResult<Vec<usize>> {
    let fields: Vec<usize> = line
        .split_whitespace()
        .map(|f| f.parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|e| AnalysisError::StatusMapFormat {
            line: lineno + 1,
            reason: e.to_string(),
        })?;
    if fields.len() != expected {
        return Err(AnalysisError::StatusMapFormat {
            line: lineno + 1,
            reason: format!("expected {} fields, got {}", expected, fields.len()),
        });
    }
    Ok(fields)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_offline_sector_fold() {
        assert_eq!(offline_sector(0, 0), Some(0));
        assert_eq!(offline_sector(0, 3), Some(3));
        assert_eq!(offline_sector(1, 0), Some(7));
        assert_eq!(offline_sector(1, 3), Some(4));
        assert_eq!(offline_sector(1, 4), None);
        assert_eq!(offline_sector(2, 0), None);
    }

    #[test]
    fn test_tower_id_roundtrip() {
        for channel in [0, 71, 72, 2591, 2592, 15551, 15552, 15647, 24767] {
            let addr = tower_location(channel).unwrap();
            assert_eq!(tower_id(addr), Some(channel));
        }
        assert!(tower_location(N_TOWERS).is_none());
    }

    #[test]
    fn test_tower_id_rejects_fine_overhang() {
        // row 40 exists in the cube but not in a fine sector's real grid
        assert_eq!(tower_id(TowerAddress::new(2, 40, 0)), None);
        assert_eq!(tower_id(TowerAddress::new(2, 0, 80)), None);
        // the same row is fine in a coarse sector
        assert!(tower_id(TowerAddress::new(6, 40, 80)).is_some());
    }

    #[test]
    fn test_lookup_out_of_range_is_invalid() {
        let map = TowerStatusMap::all_good();
        assert_eq!(map.lookup(TowerAddress::new(8, 0, 0)), TowerLookup::Invalid);
        assert_eq!(
            map.lookup(TowerAddress::new(0, 40, 0)),
            TowerLookup::Invalid
        );
        assert!(map.lookup(TowerAddress::new(0, 10, 10)).is_good());
    }

    #[test]
    fn test_unlisted_tower_is_unknown_not_good() {
        let map = TowerStatusMap::new();
        let lookup = map.lookup(TowerAddress::new(0, 10, 10));
        assert_eq!(lookup, TowerLookup::Status(STATUS_UNKNOWN));
        assert!(!lookup.is_good());
    }

    #[test]
    fn test_parse_grid() {
        let table = "0 10 10 0\n0 10 11 50\n7 47 95 30\n";
        let map = TowerStatusMap::parse_grid(Cursor::new(table)).unwrap();
        assert!(map.lookup(TowerAddress::new(0, 10, 10)).is_good());
        assert_eq!(
            map.lookup(TowerAddress::new(0, 10, 11)),
            TowerLookup::Status(50)
        );
        assert_eq!(
            map.lookup(TowerAddress::new(7, 47, 95)),
            TowerLookup::Status(30)
        );
    }

    #[test]
    fn test_parse_grid_rejects_bad_address() {
        let table = "0 40 0 0\n";
        assert!(TowerStatusMap::parse_grid(Cursor::new(table)).is_err());
    }

    #[test]
    fn test_channel_remap_swaps_fine_blocks() {
        // first channel of the transposed fine block lands in sector 5
        assert_eq!(tower_location(remap_table_channel(10368)).unwrap().sector, 5);
        assert_eq!(tower_location(remap_table_channel(12960)).unwrap().sector, 4);
        // untouched below the fine swap window
        assert_eq!(remap_table_channel(0), 0);
        assert_eq!(remap_table_channel(10367), 10367);
    }

    #[test]
    fn test_channel_remap_swaps_coarse_blocks() {
        assert_eq!(tower_location(remap_table_channel(15552)).unwrap().sector, 7);
        assert_eq!(tower_location(remap_table_channel(20160)).unwrap().sector, 6);
    }

    #[test]
    fn test_parse_channels_marks_edges() {
        // channel 73 = sector 0, row 1, col 1 (interior)
        let table = "73 0\n";
        let map = TowerStatusMap::parse_channels(Cursor::new(table)).unwrap();
        assert!(map.lookup(TowerAddress::new(0, 1, 1)).is_good());
        // edges are forced regardless of the table contents
        assert_eq!(
            map.lookup(TowerAddress::new(0, 0, 0)),
            TowerLookup::Status(STATUS_EDGE)
        );
        assert_eq!(
            map.lookup(TowerAddress::new(6, 47, 50)),
            TowerLookup::Status(STATUS_EDGE)
        );
    }

    #[test]
    fn test_load_grid_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# per-tower status").unwrap();
        writeln!(file, "0 10 10 0").unwrap();
        writeln!(file, "1 2 3 50").unwrap();
        let map = TowerStatusMap::from_grid_file(file.path()).unwrap();
        assert!(map.lookup(TowerAddress::new(0, 10, 10)).is_good());
        assert_eq!(
            map.lookup(TowerAddress::new(1, 2, 3)),
            TowerLookup::Status(50)
        );
    }

    #[test]
    fn test_count_bad_ignores_unknown() {
        let mut map = TowerStatusMap::all_good();
        map.set_status(TowerAddress::new(0, 5, 5), 50);
        map.set_status(TowerAddress::new(6, 5, 5), 50);
        map.set_status(TowerAddress::new(7, 6, 6), 20);
        assert_eq!(map.count_bad(STATUS_GOOD), (1, 2));
    }
}
