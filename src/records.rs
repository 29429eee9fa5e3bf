//! Canonical records supplied by the persistence side.
//!
//! Field names follow one schema; any legacy field reconciliation happens
//! before data reaches these types. Derived fields (`status`, `health`,
//! `condition`, ...) are written back by the assessment pipeline.

use crate::assess::slowdown::classify_slowdown;
use crate::assess::soft_spot::SoftSpotSite;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub type ReportId = u64;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Position in meters relative to the fixed mine origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPosition {
    pub x_m: f64,
    pub y_m: f64,
}

impl LocalPosition {
    pub fn new(x_m: f64, y_m: f64) -> Self {
        Self { x_m, y_m }
    }

    /// True when both axes are within `tolerance_m` (inclusive).
    pub fn within(&self, other: &LocalPosition, tolerance_m: f64) -> bool {
        (self.x_m - other.x_m).abs() <= tolerance_m && (self.y_m - other.y_m).abs() <= tolerance_m
    }
}

// Sumps

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloodStatus {
    #[default]
    Safe,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumpState {
    pub id: String,
    pub name: String,
    pub length: f64,
    pub width: f64,
    pub depth: f64,
    pub current_water_height: f64,
    pub inflow_rate: f64,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub status: FloodStatus,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial sump reading. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SumpUpdate {
    pub name: Option<String>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub depth: Option<f64>,
    pub current_water_height: Option<f64>,
    pub inflow_rate: Option<f64>,
}

impl SumpUpdate {
    /// Applies onto a copy and validates the result, so a rejected update
    /// never reaches the store.
    pub fn apply(&self, sump: &SumpState) -> Result<SumpState, AppError> {
        let mut updated = sump.clone();
        if let Some(name) = &self.name {
            updated.name = non_blank(name, "name")?;
        }
        updated.length = self.length.unwrap_or(updated.length);
        updated.width = self.width.unwrap_or(updated.width);
        updated.depth = self.depth.unwrap_or(updated.depth);
        updated.current_water_height = self
            .current_water_height
            .unwrap_or(updated.current_water_height);
        updated.inflow_rate = self.inflow_rate.unwrap_or(updated.inflow_rate);

        let dimensions = [updated.length, updated.width, updated.depth];
        if dimensions.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(AppError::InvalidUpdate(
                "Sump dimensions must be positive".to_string(),
            ));
        }
        non_negative(updated.current_water_height, "currentWaterHeight")?;
        if updated.current_water_height > updated.depth {
            return Err(AppError::InvalidUpdate(
                "Water height cannot exceed sump depth".to_string(),
            ));
        }
        non_negative(updated.inflow_rate, "inflowRate")?;
        Ok(updated)
    }
}

fn non_negative(value: f64, field: &str) -> Result<(), AppError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AppError::InvalidUpdate(format!(
            "{field} must be finite and non-negative"
        )))
    }
}

fn non_blank(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidUpdate(format!("{field} cannot be blank")));
    }
    Ok(trimmed.to_string())
}

// Pumps

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpStatus {
    Running,
    #[default]
    Stopped,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TorqueTrend {
    #[default]
    Normal,
    Rising,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DischargeTrend {
    #[default]
    Normal,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTier {
    #[default]
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MotorSpec {
    pub power_kw: f64,
    pub torque_nm: f64,
    pub current_torque_nm: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpState {
    pub id: String,
    pub sump_id: String,
    pub rated_discharge: f64,
    pub current_discharge: f64,
    #[serde(default)]
    pub status: PumpStatus,
    #[serde(default)]
    pub torque_trend: TorqueTrend,
    #[serde(default)]
    pub discharge_trend: DischargeTrend,
    #[serde(default)]
    pub motor: MotorSpec,
    #[serde(default)]
    pub health: HealthTier,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial pump reading. A new `motor` block replaces the old one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PumpUpdate {
    pub current_discharge: Option<f64>,
    pub status: Option<PumpStatus>,
    pub torque_trend: Option<TorqueTrend>,
    pub discharge_trend: Option<DischargeTrend>,
    pub motor: Option<MotorSpec>,
}

impl PumpUpdate {
    pub fn apply(&self, pump: &PumpState) -> Result<PumpState, AppError> {
        let mut updated = pump.clone();
        if let Some(discharge) = self.current_discharge {
            non_negative(discharge, "currentDischarge")?;
            if discharge > updated.rated_discharge {
                return Err(AppError::InvalidUpdate(
                    "Current discharge cannot exceed rated discharge".to_string(),
                ));
            }
            updated.current_discharge = discharge;
        }
        updated.status = self.status.unwrap_or(updated.status);
        updated.torque_trend = self.torque_trend.unwrap_or(updated.torque_trend);
        updated.discharge_trend = self.discharge_trend.unwrap_or(updated.discharge_trend);
        updated.motor = self.motor.unwrap_or(updated.motor);
        Ok(updated)
    }
}

// Truck reports

/// Per-report slowdown tier. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlowdownSeverity {
    None,
    Soft,
    Critical,
}

/// Raw telemetry as submitted by an operator or a batch sync.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubmission {
    pub truck_id: String,
    #[serde(default)]
    pub payload_tonnes: f64,
    pub average_speed: f64,
    pub current_speed: f64,
    #[serde(rename = "x_m")]
    pub x_m: f64,
    #[serde(rename = "y_m")]
    pub y_m: f64,
    /// RFC 3339; missing means "now".
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ReportSubmission {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.truck_id.trim().is_empty() {
            return Err(AppError::InvalidReport("truckId is required".to_string()));
        }
        let speeds_ok = self.average_speed.is_finite()
            && self.current_speed.is_finite()
            && self.average_speed >= 0.0
            && self.current_speed >= 0.0;
        if !speeds_ok {
            return Err(AppError::InvalidReport(
                "speeds must be finite and non-negative".to_string(),
            ));
        }
        if !self.payload_tonnes.is_finite() || self.payload_tonnes < 0.0 {
            return Err(AppError::InvalidReport(
                "payloadTonnes must be non-negative".to_string(),
            ));
        }
        if !self.x_m.is_finite() || !self.y_m.is_finite() {
            return Err(AppError::InvalidReport(
                "x_m and y_m must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolve_timestamp(&self, now: SystemTime) -> Result<SystemTime, AppError> {
        match self.timestamp.as_deref() {
            None | Some("") => Ok(now),
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
                .map(SystemTime::from)
                .map_err(|err| AppError::InvalidTimestamp(format!("{raw}: {err}"))),
        }
    }
}

/// A classified slowdown report. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct TruckReport {
    pub id: ReportId,
    pub road_id: String,
    pub truck_id: String,
    pub payload_tonnes: f64,
    pub average_speed: f64,
    pub current_speed: f64,
    pub location: LocalPosition,
    pub timestamp: SystemTime,
    pub speed_drop_percent: f64,
    pub severity: SlowdownSeverity,
}

impl TruckReport {
    pub fn new(
        id: ReportId,
        road_id: &str,
        submission: &ReportSubmission,
        timestamp: SystemTime,
    ) -> Self {
        let classification = classify_slowdown(submission.average_speed, submission.current_speed);
        Self {
            id,
            road_id: road_id.to_string(),
            truck_id: submission.truck_id.trim().to_string(),
            payload_tonnes: submission.payload_tonnes,
            average_speed: submission.average_speed,
            current_speed: submission.current_speed,
            location: LocalPosition::new(submission.x_m, submission.y_m),
            timestamp,
            speed_drop_percent: classification.speed_drop_percent,
            severity: classification.severity,
        }
    }
}

// Roads

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadPriority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionTier {
    #[default]
    Good,
    Soft,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainageRisk {
    #[default]
    Safe,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoadGeometry {
    pub length_m: f64,
    pub design_cross_fall_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub priority: RoadPriority,
    #[serde(default)]
    pub geometry: RoadGeometry,
    #[serde(default)]
    pub required_cross_fall: f64,
    #[serde(default)]
    pub current_cross_fall: f64,
    /// Standing water on the surface, in cm.
    #[serde(default)]
    pub water_level_cm: f64,
    /// Set by inspection, independent of truck telemetry.
    #[serde(default)]
    pub soft_spot_flag: bool,
    #[serde(default)]
    pub condition: ConditionTier,
    #[serde(default)]
    pub drainage_risk: DrainageRisk,
    #[serde(skip)]
    pub condition_updated_at: Option<SystemTime>,
    /// Display snapshot of the last aggregation.
    #[serde(skip)]
    pub soft_spot_locations: Vec<SoftSpotSite>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial road survey: cross-fall, standing water and inspection fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoadUpdate {
    pub name: Option<String>,
    pub priority: Option<RoadPriority>,
    pub required_cross_fall: Option<f64>,
    pub current_cross_fall: Option<f64>,
    #[serde(alias = "waterLevel")]
    pub water_level_cm: Option<f64>,
    pub soft_spot_flag: Option<bool>,
}

impl RoadUpdate {
    pub fn apply(&self, road: &RoadState) -> Result<RoadState, AppError> {
        let mut updated = road.clone();
        if let Some(name) = &self.name {
            updated.name = non_blank(name, "name")?;
        }
        updated.priority = self.priority.unwrap_or(updated.priority);
        if let Some(required) = self.required_cross_fall {
            non_negative(required, "requiredCrossFall")?;
            updated.required_cross_fall = required;
        }
        if let Some(current) = self.current_cross_fall {
            non_negative(current, "currentCrossFall")?;
            updated.current_cross_fall = current;
        }
        if let Some(water_level) = self.water_level_cm {
            non_negative(water_level, "waterLevel")?;
            updated.water_level_cm = water_level;
        }
        updated.soft_spot_flag = self.soft_spot_flag.unwrap_or(updated.soft_spot_flag);
        Ok(updated)
    }
}

// Weather

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForecastPoint {
    /// Milliseconds since the unix epoch.
    pub timestamp: Option<i64>,
    /// Rainfall over the 3-hour window, in mm.
    #[serde(rename = "rainfall")]
    pub rainfall_mm: f64,
    pub rain_probability: f64,
    pub humidity: f64,
    pub wind_speed: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn submission(average_speed: f64, current_speed: f64) -> ReportSubmission {
        ReportSubmission {
            truck_id: " T-7 ".to_string(),
            payload_tonnes: 220.0,
            average_speed,
            current_speed,
            x_m: 100.0,
            y_m: 200.0,
            timestamp: None,
        }
    }

    fn sump() -> SumpState {
        SumpState {
            id: "s1".to_string(),
            name: "North".to_string(),
            length: 10.0,
            width: 10.0,
            depth: 5.0,
            current_water_height: 2.0,
            inflow_rate: 20.0,
            location: None,
            status: FloodStatus::Safe,
            is_active: true,
        }
    }

    #[test]
    fn sump_update_keeps_absent_fields() -> Result<(), AppError> {
        let update = SumpUpdate {
            current_water_height: Some(4.5),
            ..SumpUpdate::default()
        };

        let updated = update.apply(&sump())?;

        assert_eq!(updated.current_water_height, 4.5);
        assert_eq!(updated.inflow_rate, 20.0);
        assert_eq!(updated.name, "North");
        Ok(())
    }

    #[test]
    fn sump_water_above_depth_is_rejected() {
        let too_high = SumpUpdate {
            current_water_height: Some(5.1),
            ..SumpUpdate::default()
        };
        // Shrinking the pit below the current water line is caught too.
        let too_shallow = SumpUpdate {
            depth: Some(1.5),
            ..SumpUpdate::default()
        };

        assert!(matches!(
            too_high.apply(&sump()),
            Err(AppError::InvalidUpdate(message)) if message == "Water height cannot exceed sump depth"
        ));
        assert!(matches!(too_shallow.apply(&sump()), Err(AppError::InvalidUpdate(_))));
    }

    #[test]
    fn sump_update_rejects_negative_inflow() {
        let update = SumpUpdate {
            inflow_rate: Some(-1.0),
            ..SumpUpdate::default()
        };

        assert!(matches!(update.apply(&sump()), Err(AppError::InvalidUpdate(_))));
    }

    #[test]
    fn pump_discharge_is_capped_at_rated() -> Result<(), Box<dyn std::error::Error>> {
        let pump: PumpState = serde_json::from_value(serde_json::json!({
            "id": "p1", "sumpId": "s1", "ratedDischarge": 20.0, "currentDischarge": 18.0
        }))?;

        let over = PumpUpdate {
            current_discharge: Some(20.5),
            ..PumpUpdate::default()
        };
        assert!(matches!(over.apply(&pump), Err(AppError::InvalidUpdate(_))));

        let update: PumpUpdate = serde_json::from_value(serde_json::json!({
            "currentDischarge": 20.0,
            "status": "RUNNING",
            "torqueTrend": "RISING"
        }))?;
        let updated = update.apply(&pump)?;

        assert_eq!(updated.current_discharge, 20.0);
        assert_eq!(updated.status, PumpStatus::Running);
        assert_eq!(updated.torque_trend, TorqueTrend::Rising);
        assert_eq!(updated.discharge_trend, DischargeTrend::Normal);
        Ok(())
    }

    #[test]
    fn road_update_accepts_water_level_alias() -> Result<(), Box<dyn std::error::Error>> {
        let road: RoadState = serde_json::from_value(serde_json::json!({
            "id": "r1", "name": "Ramp", "requiredCrossFall": 3.0, "currentCrossFall": 3.0
        }))?;
        let update: RoadUpdate = serde_json::from_value(serde_json::json!({
            "currentCrossFall": 1.5,
            "waterLevel": 12.0
        }))?;

        let updated = update.apply(&road)?;

        assert_eq!(updated.current_cross_fall, 1.5);
        assert_eq!(updated.water_level_cm, 12.0);
        assert_eq!(updated.required_cross_fall, 3.0);

        let negative = RoadUpdate {
            current_cross_fall: Some(-0.5),
            ..RoadUpdate::default()
        };
        assert!(matches!(negative.apply(&road), Err(AppError::InvalidUpdate(_))));
        Ok(())
    }

    #[test]
    fn new_report_is_classified_at_creation() {
        let report = TruckReport::new(1, "road-1", &submission(30.0, 15.0), UNIX_EPOCH);

        assert_eq!(report.truck_id, "T-7");
        assert_eq!(report.speed_drop_percent, 50.0);
        assert_eq!(report.severity, SlowdownSeverity::Critical);
        assert_eq!(report.location, LocalPosition::new(100.0, 200.0));
    }

    #[test]
    fn submission_rejects_negative_speed() {
        let result = submission(-1.0, 10.0).validate();

        assert!(matches!(result, Err(AppError::InvalidReport(_))));
    }

    #[test]
    fn submission_rejects_blank_truck_id() {
        let mut invalid = submission(30.0, 10.0);
        invalid.truck_id = "   ".to_string();

        assert!(matches!(invalid.validate(), Err(AppError::InvalidReport(_))));
    }

    #[test]
    fn submission_timestamp_parses_rfc3339() -> Result<(), AppError> {
        let mut timed = submission(30.0, 10.0);
        timed.timestamp = Some("1970-01-01T00:01:40Z".to_string());

        let resolved = timed.resolve_timestamp(UNIX_EPOCH)?;

        assert_eq!(resolved, UNIX_EPOCH + Duration::from_secs(100));
        Ok(())
    }

    #[test]
    fn submission_without_timestamp_uses_now() -> Result<(), AppError> {
        let now = UNIX_EPOCH + Duration::from_secs(42);

        assert_eq!(submission(30.0, 10.0).resolve_timestamp(now)?, now);
        Ok(())
    }

    #[test]
    fn submission_with_bad_timestamp_is_rejected() {
        let mut timed = submission(30.0, 10.0);
        timed.timestamp = Some("yesterday".to_string());

        assert!(matches!(
            timed.resolve_timestamp(UNIX_EPOCH),
            Err(AppError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn within_tolerance_is_inclusive_on_both_axes() {
        let origin = LocalPosition::new(100.0, 100.0);

        assert!(origin.within(&LocalPosition::new(105.0, 95.0), 5.0));
        assert!(!origin.within(&LocalPosition::new(105.5, 100.0), 5.0));
    }

    #[test]
    fn submission_deserializes_from_api_shape() -> Result<(), serde_json::Error> {
        let parsed: ReportSubmission = serde_json::from_value(serde_json::json!({
            "truckId": "T-1",
            "payloadTonnes": 180.0,
            "averageSpeed": 32.0,
            "currentSpeed": 20.0,
            "x_m": 12.5,
            "y_m": -4.0
        }))?;

        assert_eq!(parsed.truck_id, "T-1");
        assert_eq!(parsed.x_m, 12.5);
        assert_eq!(parsed.timestamp, None);
        Ok(())
    }
}
