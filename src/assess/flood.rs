//! Sump flood projection.
//!
//! Formula: time_to_flood = remaining_capacity / (inflow - active_pumping)
//! Status bands: > 24h safe, (6h, 24h] warning, <= 6h critical.

use crate::records::{FloodStatus, SumpState};
use serde::Serialize;

pub const SAFE_BUFFER_HOURS: f64 = 24.0;
pub const CRITICAL_BUFFER_HOURS: f64 = 6.0;

impl SumpState {
    pub fn max_volume(&self) -> f64 {
        self.length * self.width * self.depth
    }

    pub fn current_volume(&self) -> f64 {
        self.length * self.width * self.current_water_height
    }

    pub fn remaining_capacity(&self) -> f64 {
        self.max_volume() - self.current_volume()
    }

    /// Filled share of the sump, rounded. An empty geometry reads as 0.
    pub fn capacity_percent(&self) -> f64 {
        let max_volume = self.max_volume();
        if !(max_volume > 0.0) {
            return 0.0;
        }
        (self.current_volume() / max_volume * 100.0).round()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FloodProjection {
    pub status: FloodStatus,
    /// `f64::INFINITY` when pumps keep up; serialized as `null`.
    pub time_to_flood_hours: f64,
    pub time_to_flood_minutes: Option<u64>,
    pub net_inflow: f64,
    pub remaining_volume: f64,
    pub message: String,
}

impl FloodProjection {
    pub fn pumps_keeping_up(&self) -> bool {
        self.time_to_flood_hours.is_infinite()
    }
}

pub fn project_flood(
    remaining_capacity: f64,
    inflow_rate: f64,
    total_active_pumping: f64,
) -> FloodProjection {
    let net_inflow = inflow_rate - total_active_pumping;

    if net_inflow <= 0.0 {
        return FloodProjection {
            status: FloodStatus::Safe,
            time_to_flood_hours: f64::INFINITY,
            time_to_flood_minutes: None,
            net_inflow,
            remaining_volume: remaining_capacity,
            message: "Pumps are keeping up with inflow".to_string(),
        };
    }

    let hours = remaining_capacity / net_inflow;
    let status = flood_status_for_hours(hours);

    FloodProjection {
        status,
        time_to_flood_hours: hours,
        time_to_flood_minutes: Some((hours * 60.0).round().max(0.0) as u64),
        net_inflow,
        remaining_volume: remaining_capacity,
        message: flood_message(status, hours),
    }
}

pub fn project_sump(sump: &SumpState, total_active_pumping: f64) -> FloodProjection {
    project_flood(sump.remaining_capacity(), sump.inflow_rate, total_active_pumping)
}

fn flood_status_for_hours(hours: f64) -> FloodStatus {
    if hours > SAFE_BUFFER_HOURS {
        FloodStatus::Safe
    } else if hours > CRITICAL_BUFFER_HOURS {
        FloodStatus::Warning
    } else {
        FloodStatus::Critical
    }
}

fn flood_message(status: FloodStatus, hours: f64) -> String {
    match status {
        FloodStatus::Safe => "Safe - More than 24 hours buffer".to_string(),
        FloodStatus::Warning => format!("Warning - {} hours until critical", hours.round()),
        FloodStatus::Critical => format!("Critical - {hours:.1} hours until flood"),
    }
}
