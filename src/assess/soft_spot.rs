//! Soft-spot aggregation over a road's slowdown reports.
//!
//! Reports are floor-binned into square cells of `2 * tolerance` meters.
//! Binning (rather than nearest-neighbour clustering) keeps the result O(n)
//! and independent of input order.
//!
//! Per cell:
//! - severity is CRITICAL if any contributing report was CRITICAL, else SOFT
//! - confidence is HIGH only with reports from at least two distinct trucks
//! - the representative location is the first report in canonical order
//!   (timestamp, then report id), never the centroid
//!
//! Sites are ordered by distinct trucks desc, then report count desc, then
//! cell key, so repeated runs over the same reports are byte-identical.

use crate::records::{LocalPosition, ReportId, SlowdownSeverity, TruckReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

pub const DEFAULT_TOLERANCE_M: f64 = 5.0;
pub const HIGH_CONFIDENCE_MIN_TRUCKS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Open,
}

/// Grid cell index; the cell's origin is `index * grid_size` on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub ix: i64,
    pub iy: i64,
}

impl CellKey {
    pub fn origin(&self, grid_size_m: f64) -> LocalPosition {
        LocalPosition::new(self.ix as f64 * grid_size_m, self.iy as f64 * grid_size_m)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftSpotSite {
    /// Origin of the grid cell the site was binned into.
    pub cell: LocalPosition,
    /// First reported coordinates within the cell.
    pub location: LocalPosition,
    pub severity: SlowdownSeverity,
    pub confidence: Confidence,
    pub detection_count: usize,
    pub unique_trucks: usize,
    pub detected_by_trucks: Vec<String>,
    pub avg_speed_drop: f64,
    pub max_speed_drop: f64,
    pub first_detected_at: SystemTime,
    pub last_detected_at: SystemTime,
    pub status: SiteStatus,
}

impl SoftSpotSite {
    pub fn is_confirmed(&self) -> bool {
        self.confidence == Confidence::High
    }
}

/// Grid cell edge for a tolerance radius. Unusable tolerances fall back to
/// the default.
pub fn grid_size(tolerance_m: f64) -> f64 {
    let tolerance = if tolerance_m.is_finite() && tolerance_m > 0.0 {
        tolerance_m
    } else {
        DEFAULT_TOLERANCE_M
    };
    tolerance * 2.0
}

pub fn cell_key(position: &LocalPosition, grid_size_m: f64) -> CellKey {
    CellKey {
        ix: (position.x_m / grid_size_m).floor() as i64,
        iy: (position.y_m / grid_size_m).floor() as i64,
    }
}

struct CellAccumulator {
    first_location: LocalPosition,
    count: usize,
    drop_sum: f64,
    drop_max: f64,
    trucks: BTreeSet<String>,
    has_critical: bool,
    first_at: SystemTime,
    last_at: SystemTime,
}

impl CellAccumulator {
    fn new(first: &TruckReport) -> Self {
        Self {
            first_location: first.location,
            count: 0,
            drop_sum: 0.0,
            drop_max: 0.0,
            trucks: BTreeSet::new(),
            has_critical: false,
            first_at: first.timestamp,
            last_at: first.timestamp,
        }
    }

    fn push(&mut self, report: &TruckReport) {
        self.count += 1;
        self.drop_sum += report.speed_drop_percent;
        self.drop_max = self.drop_max.max(report.speed_drop_percent);
        self.trucks.insert(report.truck_id.clone());
        self.has_critical |= report.severity == SlowdownSeverity::Critical;
        self.first_at = self.first_at.min(report.timestamp);
        self.last_at = self.last_at.max(report.timestamp);
    }

    fn finish(self, key: CellKey, grid_size_m: f64) -> SoftSpotSite {
        let unique_trucks = self.trucks.len();
        SoftSpotSite {
            cell: key.origin(grid_size_m),
            location: self.first_location,
            severity: if self.has_critical {
                SlowdownSeverity::Critical
            } else {
                SlowdownSeverity::Soft
            },
            confidence: if unique_trucks >= HIGH_CONFIDENCE_MIN_TRUCKS {
                Confidence::High
            } else {
                Confidence::Low
            },
            detection_count: self.count,
            unique_trucks,
            detected_by_trucks: self.trucks.into_iter().collect(),
            avg_speed_drop: round_tenth(self.drop_sum / self.count as f64),
            max_speed_drop: round_tenth(self.drop_max),
            first_detected_at: self.first_at,
            last_detected_at: self.last_at,
            status: SiteStatus::Open,
        }
    }
}

/// Group slowdown reports into soft-spot sites. NONE reports are ignored and
/// an empty input yields no sites.
pub fn aggregate_soft_spots(reports: &[TruckReport], tolerance_m: f64) -> Vec<SoftSpotSite> {
    let grid = grid_size(tolerance_m);

    let mut ordered: Vec<&TruckReport> = reports
        .iter()
        .filter(|report| report.severity != SlowdownSeverity::None)
        .collect();
    ordered.sort_by_key(|report| canonical_order(report));

    let mut cells: BTreeMap<CellKey, CellAccumulator> = BTreeMap::new();
    for report in ordered {
        cells
            .entry(cell_key(&report.location, grid))
            .or_insert_with(|| CellAccumulator::new(report))
            .push(report);
    }

    let mut sites: Vec<SoftSpotSite> = cells
        .into_iter()
        .map(|(key, cell)| cell.finish(key, grid))
        .collect();
    // Stable: ties keep ascending cell order from the BTreeMap.
    sites.sort_by(|a, b| {
        b.unique_trucks
            .cmp(&a.unique_trucks)
            .then(b.detection_count.cmp(&a.detection_count))
    });
    sites
}

/// Site binned into the same grid cell as `position`.
///
/// The representative location is a raw report coordinate, so binning it
/// again yields the site's own cell key exactly.
pub fn matching_site<'a>(
    sites: &'a [SoftSpotSite],
    position: &LocalPosition,
    tolerance_m: f64,
) -> Option<&'a SoftSpotSite> {
    let grid = grid_size(tolerance_m);
    let key = cell_key(position, grid);
    sites
        .iter()
        .find(|site| cell_key(&site.location, grid) == key)
}

fn canonical_order(report: &TruckReport) -> (SystemTime, ReportId) {
    (report.timestamp, report.id)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
