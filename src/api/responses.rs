use crate::assess::flood::FloodProjection;
use crate::assess::pump_health::{PumpHealth, PumpHealthSummary};
use crate::assess::road::{
    DrainageAssessment, OverallRisk, RoadWarning, SiteSummary, WarningLevel,
};
use crate::assess::soft_spot::{Confidence, SiteStatus, SoftSpotSite};
use crate::assess::storm::{EarlyWarning, StormAnalysis};
use crate::records::{
    ConditionTier, DrainageRisk, FloodStatus, ForecastPoint, LocalPosition, PumpStatus,
    ReportId, ReportSubmission, RoadPriority, SlowdownSeverity,
};
use crate::weather::WeatherForecast;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug)]
pub enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

// Errors

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidRequest,
    WeatherUnavailable,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

// Health

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub sumps: usize,
    pub pumps: usize,
    pub roads: usize,
    pub reports: usize,
    pub weather_configured: bool,
    pub timestamp: String,
}

// Sumps and pumps

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumpSummaryResponse {
    pub id: String,
    pub name: String,
    pub status: FloodStatus,
    pub capacity_percent: f64,
    pub active_pumps: usize,
    pub total_pumps: usize,
    pub total_pumping_capacity: f64,
    pub flood_analysis: FloodProjection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumpsSuccessResponse {
    pub count: usize,
    pub sumps: Vec<SumpSummaryResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumpDimensions {
    pub length: f64,
    pub width: f64,
    pub depth: f64,
    pub max_volume: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterStatus {
    pub current_height: f64,
    pub current_volume: f64,
    pub remaining_capacity: f64,
    pub capacity_percent: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InflowOutflow {
    pub inflow_rate: f64,
    pub total_pumping_capacity: f64,
    pub net_inflow: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpStatusResponse {
    pub pump_id: String,
    pub status: PumpStatus,
    #[serde(flatten)]
    pub health: PumpHealth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiltationAlert {
    pub detected: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub affected_pumps: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumpAnalysisResponse {
    pub sump_id: String,
    pub sump_name: String,
    pub dimensions: SumpDimensions,
    pub water_status: WaterStatus,
    pub inflow_outflow: InflowOutflow,
    pub flood_analysis: FloodProjection,
    pub pump_status: Vec<PumpStatusResponse>,
    pub siltation_alert: SiltationAlert,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumpUpdateSuccessResponse {
    pub message: String,
    pub sump: SumpSummaryResponse,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpUpdateSuccessResponse {
    pub message: String,
    pub pump: PumpStatusResponse,
    pub sump_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sump_status: Option<FloodStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flood_analysis: Option<FloodProjection>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpSummaryResponse {
    #[serde(flatten)]
    pub summary: PumpHealthSummary,
    pub timestamp: String,
}

// Roads

#[derive(Debug, Deserialize)]
pub struct TelemetryBatchRequest {
    #[serde(default)]
    pub readings: Vec<ReportSubmission>,
}

/// Repair point. Accepts the local-frame field names used by telemetry too.
#[derive(Debug, Deserialize)]
pub struct ClearSpotRequest {
    #[serde(rename = "xM", alias = "x_m", alias = "x")]
    pub x_m: f64,
    #[serde(rename = "yM", alias = "y_m", alias = "y")]
    pub y_m: f64,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoftSpotResponse {
    pub location: LocalPosition,
    pub cell: LocalPosition,
    pub severity: SlowdownSeverity,
    pub confidence: Confidence,
    pub detection_count: usize,
    pub unique_trucks: usize,
    pub detected_by_trucks: Vec<String>,
    pub avg_speed_drop: f64,
    pub max_speed_drop: f64,
    pub first_detected_at: String,
    pub last_detected_at: String,
    pub status: SiteStatus,
}

impl SoftSpotResponse {
    pub fn from_site(site: &SoftSpotSite) -> Result<Self, TimestampError> {
        Ok(Self {
            location: site.location,
            cell: site.cell,
            severity: site.severity,
            confidence: site.confidence,
            detection_count: site.detection_count,
            unique_trucks: site.unique_trucks,
            detected_by_trucks: site.detected_by_trucks.clone(),
            avg_speed_drop: site.avg_speed_drop,
            max_speed_drop: site.max_speed_drop,
            first_detected_at: format_timestamp(site.first_detected_at)?,
            last_detected_at: format_timestamp(site.last_detected_at)?,
            status: site.status,
        })
    }
}

pub fn map_sites<'a, I>(sites: I) -> Result<Vec<SoftSpotResponse>, TimestampError>
where
    I: IntoIterator<Item = &'a SoftSpotSite>,
{
    sites.into_iter().map(SoftSpotResponse::from_site).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySuccessResponse {
    pub telemetry_id: ReportId,
    pub speed_drop_percent: f64,
    pub severity: SlowdownSeverity,
    pub message: String,
    pub soft_spot_detected: bool,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trucks_confirmed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub road_soft_spots: Vec<SoftSpotResponse>,
    pub road_status: ConditionTier,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedReading {
    pub truck_id: String,
    pub severity: SlowdownSeverity,
    pub speed_drop_percent: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatchSuccessResponse {
    pub message: String,
    pub soft_spots_detected: usize,
    pub road_status: ConditionTier,
    pub high_confidence_spots: usize,
    pub results: Vec<FlaggedReading>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftSpotsSuccessResponse {
    pub road_id: String,
    pub road_name: String,
    pub condition: ConditionTier,
    pub soft_spot_detected: bool,
    pub awaiting_confirmation: bool,
    pub soft_spot_count: usize,
    pub sites: Vec<SoftSpotResponse>,
    pub summary: SiteSummary,
    pub drainage_risk: DrainageRisk,
    pub maintenance_required: bool,
    pub overall_risk: OverallRisk,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossFallAnalysis {
    pub required: f64,
    pub current: f64,
    pub deficiency: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainageSuccessResponse {
    pub road_id: String,
    pub cross_fall_analysis: CrossFallAnalysis,
    pub drainage_status: DrainageAssessment,
    pub water_level_cm: f64,
    pub priority_level: RoadPriority,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadUpdateSuccessResponse {
    pub message: String,
    pub road_id: String,
    pub cross_fall_analysis: CrossFallAnalysis,
    pub water_level_cm: f64,
    pub drainage_status: DrainageAssessment,
    pub condition: ConditionTier,
    pub overall_risk: OverallRisk,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSuccessResponse {
    pub message: String,
    pub deleted_telemetry_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_soft_spots: Option<usize>,
    pub road_status: ConditionTier,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadWarningResponse {
    pub road_id: String,
    pub road_name: String,
    pub priority: RoadPriority,
    pub condition: ConditionTier,
    pub warning_level: WarningLevel,
    pub soft_spot_count: usize,
    pub critical_count: usize,
    pub soft_count: usize,
    pub top_locations: Vec<SoftSpotResponse>,
    pub message: String,
    pub recommendation: String,
}

impl RoadWarningResponse {
    pub fn from_warning(warning: &RoadWarning) -> Result<Self, TimestampError> {
        Ok(Self {
            road_id: warning.road_id.clone(),
            road_name: warning.road_name.clone(),
            priority: warning.priority,
            condition: warning.condition,
            warning_level: warning.warning_level,
            soft_spot_count: warning.soft_spot_count(),
            critical_count: warning.critical_count,
            soft_count: warning.soft_count,
            top_locations: map_sites(&warning.top_locations)?,
            message: warning.message.clone(),
            recommendation: warning.recommendation.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningsSuccessResponse {
    pub total_roads: usize,
    pub roads_with_warnings: usize,
    pub warnings: Vec<RoadWarningResponse>,
    pub timestamp: String,
}

// Weather

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWarningRequest {
    #[serde(default)]
    pub forecast: Option<Vec<ForecastPoint>>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub sump_capacity_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWarningSuccessResponse {
    pub warning_level: EarlyWarning,
    pub storm_analysis: StormAnalysis,
    /// Present when the forecast came from the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastSuccessResponse {
    pub weather: WeatherForecast,
    pub storm_analysis: StormAnalysis,
    pub cached: bool,
    pub timestamp: String,
}
