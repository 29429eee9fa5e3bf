use crate::api::responses::{
    ClearSpotRequest, ClearSuccessResponse, CrossFallAnalysis, DrainageSuccessResponse,
    EarlyWarningRequest, EarlyWarningSuccessResponse, ErrorCode, ErrorResponse, FlaggedReading,
    ForecastQuery, ForecastSuccessResponse, HealthStatus, HealthSuccessResponse, InflowOutflow,
    PumpStatusResponse, PumpSummaryResponse, PumpUpdateSuccessResponse, RoadUpdateSuccessResponse,
    RoadWarningResponse, SiltationAlert, SoftSpotsSuccessResponse, SumpAnalysisResponse,
    SumpDimensions, SumpSummaryResponse, SumpUpdateSuccessResponse, SumpsSuccessResponse,
    TelemetryBatchRequest, TelemetryBatchSuccessResponse,
    TelemetrySuccessResponse, TimestampError, WarningsSuccessResponse, WaterStatus,
    format_timestamp, map_sites,
};
use crate::assess::pump_health::summarize_pumps;
use crate::assess::road::road_warnings;
use crate::assess::soft_spot::Confidence;
use crate::assess::storm::{EarlyWarningLevel, analyze_storm_risk, early_warning};
use crate::assess::{self, SumpAnalysis};
use crate::error::AppError;
use crate::records::{
    ForecastPoint, LocalPosition, PumpState, PumpStatus, PumpUpdate, ReportSubmission, RoadUpdate,
    SumpUpdate,
};
use crate::state::AppState;
use crate::weather::{ForecastLookup, WeatherError};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

pub type SharedState = Arc<RwLock<AppState>>;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

const HEALTH_ROUTE: &str = "/api/health";
const SUMPS_ROUTE: &str = "/api/sumps";
const SUMP_ANALYSIS_ROUTE: &str = "/api/sumps/{id}/analysis";
const SUMP_UPDATE_ROUTE: &str = "/api/sumps/{id}";
const PUMP_UPDATE_ROUTE: &str = "/api/pumps/{id}";
const PUMP_SUMMARY_ROUTE: &str = "/api/pumps/health-summary";
const TELEMETRY_ROUTE: &str = "/api/roads/{id}/telemetry";
const TELEMETRY_BATCH_ROUTE: &str = "/api/roads/{id}/telemetry/batch";
const SOFT_SPOTS_ROUTE: &str = "/api/roads/{id}/softspots";
const DRAINAGE_ROUTE: &str = "/api/roads/{id}/drainage-assessment";
const ROAD_UPDATE_ROUTE: &str = "/api/roads/{id}";
const CLEAR_SPOT_ROUTE: &str = "/api/roads/{id}/clear-softspot";
const CLEAR_ROAD_ROUTE: &str = "/api/roads/{id}/clear-softspots";
const WARNINGS_ROUTE: &str = "/api/roads/warnings";
const EARLY_WARNING_ROUTE: &str = "/api/weather/early-warning";
const FORECAST_ROUTE: &str = "/api/weather/forecast";

pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
    },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

/// Why a request could not be answered with a success body.
#[derive(Debug)]
enum Failure {
    App(AppError),
    Invalid(String),
    Weather(WeatherError),
    WeatherNotConfigured,
    Internal(String),
}

impl From<AppError> for Failure {
    fn from(err: AppError) -> Self {
        Failure::App(err)
    }
}

impl From<TimestampError> for Failure {
    fn from(_: TimestampError) -> Self {
        Failure::Internal("timestamp formatting failure".to_string())
    }
}

fn finish<T>(
    route: &'static str,
    now: SystemTime,
    status: StatusCode,
    result: Result<T, Failure>,
) -> ApiResponse<T> {
    match result {
        Ok(body) => ApiResponse::Success { status, body },
        Err(failure) => failure_response(route, now, failure),
    }
}

fn failure_response<T>(route: &'static str, now: SystemTime, failure: Failure) -> ApiResponse<T> {
    let (status, error_code, message) = match failure {
        Failure::App(
            err @ (AppError::SumpNotFound(_) | AppError::PumpNotFound(_) | AppError::RoadNotFound(_)),
        ) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, err.to_string()),
        Failure::App(
            err @ (AppError::InvalidReport(_)
            | AppError::InvalidUpdate(_)
            | AppError::InvalidTimestamp(_)),
        ) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, err.to_string()),
        Failure::App(AppError::StateLock) => {
            return internal_error(route, "state lock poisoned");
        }
        Failure::Invalid(message) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message),
        Failure::Weather(WeatherError::InvalidCoordinates(detail)) => (
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidRequest,
            format!("Invalid latitude or longitude: {detail}"),
        ),
        Failure::Weather(err) => {
            warn!(route, error = %err, "Weather provider unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::WeatherUnavailable,
                "Failed to fetch weather data".to_string(),
            )
        }
        Failure::WeatherNotConfigured => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::WeatherUnavailable,
            "Weather provider not configured".to_string(),
        ),
        Failure::Internal(message) => {
            return internal_error(route, &message);
        }
    };

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Error {
            status,
            body: ErrorResponse {
                error_code,
                error_message: message,
                timestamp,
            },
        },
        Err(_) => internal_error(route, "timestamp formatting failure"),
    }
}

fn rejected<T>(route: &'static str, now: SystemTime, message: String) -> ApiResponse<T> {
    failure_response(route, now, Failure::Invalid(message))
}

fn internal_error<T>(route: &'static str, message: &str) -> ApiResponse<T> {
    error!(route, message, "Internal error while handling request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: formatted,
        },
    }
}

// Health

pub async fn get_health(State(state): State<SharedState>) -> impl IntoResponse {
    build_health_response(&state, SystemTime::now())
}

fn build_health_response(state: &SharedState, now: SystemTime) -> ApiResponse<HealthSuccessResponse> {
    finish(HEALTH_ROUTE, now, StatusCode::OK, health_body(state, now))
}

fn health_body(state: &SharedState, now: SystemTime) -> Result<HealthSuccessResponse, Failure> {
    let guard = state.read().map_err(|_| AppError::StateLock)?;
    let weather_configured = guard.weather().is_some();
    let status = if weather_configured {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    Ok(HealthSuccessResponse {
        status,
        sumps: guard.sumps().len(),
        pumps: guard.pumps().len(),
        roads: guard.roads().len(),
        reports: guard.reports().len(),
        weather_configured,
        timestamp: format_timestamp(now)?,
    })
}

// Sumps and pumps

pub async fn get_sumps(State(state): State<SharedState>) -> impl IntoResponse {
    build_sumps_response(&state, SystemTime::now())
}

fn build_sumps_response(state: &SharedState, now: SystemTime) -> ApiResponse<SumpsSuccessResponse> {
    finish(SUMPS_ROUTE, now, StatusCode::OK, sumps_body(state, now))
}

fn sumps_body(state: &SharedState, now: SystemTime) -> Result<SumpsSuccessResponse, Failure> {
    let sumps: Vec<SumpSummaryResponse> = assess::assess_active_sumps(state)?
        .into_iter()
        .map(sump_summary)
        .collect();

    Ok(SumpsSuccessResponse {
        count: sumps.len(),
        sumps,
        timestamp: format_timestamp(now)?,
    })
}

fn sump_summary(analysis: SumpAnalysis) -> SumpSummaryResponse {
    let active_pumps = analysis
        .pumps
        .iter()
        .filter(|assessed| assessed.pump.status == PumpStatus::Running)
        .count();
    let capacity_percent = analysis.sump.capacity_percent();

    SumpSummaryResponse {
        id: analysis.sump.id,
        name: analysis.sump.name,
        status: analysis.flood.status,
        capacity_percent,
        active_pumps,
        total_pumps: analysis.pumps.len(),
        total_pumping_capacity: analysis.total_active_pumping,
        flood_analysis: analysis.flood,
    }
}

pub async fn get_sump_analysis(
    State(state): State<SharedState>,
    Path(sump_id): Path<String>,
) -> impl IntoResponse {
    build_sump_analysis_response(&state, &sump_id, SystemTime::now())
}

fn build_sump_analysis_response(
    state: &SharedState,
    sump_id: &str,
    now: SystemTime,
) -> ApiResponse<SumpAnalysisResponse> {
    finish(
        SUMP_ANALYSIS_ROUTE,
        now,
        StatusCode::OK,
        sump_analysis_body(state, sump_id, now),
    )
}

fn sump_analysis_body(
    state: &SharedState,
    sump_id: &str,
    now: SystemTime,
) -> Result<SumpAnalysisResponse, Failure> {
    let analysis = assess::assess_sump(state, sump_id)?;
    let sump = &analysis.sump;
    let affected_pumps: Vec<String> = analysis
        .pumps
        .iter()
        .filter(|assessed| assessed.health.siltation_suspected)
        .map(|assessed| assessed.pump.id.clone())
        .collect();

    Ok(SumpAnalysisResponse {
        sump_id: sump.id.clone(),
        sump_name: sump.name.clone(),
        dimensions: SumpDimensions {
            length: sump.length,
            width: sump.width,
            depth: sump.depth,
            max_volume: sump.max_volume(),
        },
        water_status: WaterStatus {
            current_height: sump.current_water_height,
            current_volume: sump.current_volume(),
            remaining_capacity: sump.remaining_capacity(),
            capacity_percent: sump.capacity_percent(),
        },
        inflow_outflow: InflowOutflow {
            inflow_rate: sump.inflow_rate,
            total_pumping_capacity: analysis.total_active_pumping,
            net_inflow: analysis.flood.net_inflow,
        },
        flood_analysis: analysis.flood.clone(),
        pump_status: analysis
            .pumps
            .iter()
            .map(|assessed| PumpStatusResponse {
                pump_id: assessed.pump.id.clone(),
                status: assessed.pump.status,
                health: assessed.health.clone(),
            })
            .collect(),
        siltation_alert: SiltationAlert {
            detected: analysis.siltation_alert,
            affected_pumps,
        },
        timestamp: format_timestamp(now)?,
    })
}

pub async fn get_pump_summary(State(state): State<SharedState>) -> impl IntoResponse {
    build_pump_summary_response(&state, SystemTime::now())
}

fn build_pump_summary_response(
    state: &SharedState,
    now: SystemTime,
) -> ApiResponse<PumpSummaryResponse> {
    finish(
        PUMP_SUMMARY_ROUTE,
        now,
        StatusCode::OK,
        pump_summary_body(state, now),
    )
}

fn pump_summary_body(state: &SharedState, now: SystemTime) -> Result<PumpSummaryResponse, Failure> {
    let pumps: Vec<PumpState> = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard
            .pumps()
            .iter()
            .filter(|pump| pump.is_active)
            .cloned()
            .collect()
    };

    Ok(PumpSummaryResponse {
        summary: summarize_pumps(&pumps),
        timestamp: format_timestamp(now)?,
    })
}

pub async fn put_sump(
    State(state): State<SharedState>,
    Path(sump_id): Path<String>,
    payload: Result<Json<SumpUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    match payload {
        Ok(Json(update)) => build_sump_update_response(&state, &sump_id, &update, now),
        Err(rejection) => rejected(SUMP_UPDATE_ROUTE, now, rejection.body_text()),
    }
}

fn build_sump_update_response(
    state: &SharedState,
    sump_id: &str,
    update: &SumpUpdate,
    now: SystemTime,
) -> ApiResponse<SumpUpdateSuccessResponse> {
    finish(
        SUMP_UPDATE_ROUTE,
        now,
        StatusCode::OK,
        sump_update_body(state, sump_id, update, now),
    )
}

fn sump_update_body(
    state: &SharedState,
    sump_id: &str,
    update: &SumpUpdate,
    now: SystemTime,
) -> Result<SumpUpdateSuccessResponse, Failure> {
    let analysis = assess::update_sump(state, sump_id, update)?;

    Ok(SumpUpdateSuccessResponse {
        message: "Sump updated".to_string(),
        sump: sump_summary(analysis),
        timestamp: format_timestamp(now)?,
    })
}

pub async fn put_pump(
    State(state): State<SharedState>,
    Path(pump_id): Path<String>,
    payload: Result<Json<PumpUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    match payload {
        Ok(Json(update)) => build_pump_update_response(&state, &pump_id, &update, now),
        Err(rejection) => rejected(PUMP_UPDATE_ROUTE, now, rejection.body_text()),
    }
}

fn build_pump_update_response(
    state: &SharedState,
    pump_id: &str,
    update: &PumpUpdate,
    now: SystemTime,
) -> ApiResponse<PumpUpdateSuccessResponse> {
    finish(
        PUMP_UPDATE_ROUTE,
        now,
        StatusCode::OK,
        pump_update_body(state, pump_id, update, now),
    )
}

fn pump_update_body(
    state: &SharedState,
    pump_id: &str,
    update: &PumpUpdate,
    now: SystemTime,
) -> Result<PumpUpdateSuccessResponse, Failure> {
    let outcome = assess::update_pump(state, pump_id, update)?;
    let (sump_status, flood_analysis) = match outcome.sump {
        Some(analysis) => (Some(analysis.flood.status), Some(analysis.flood)),
        None => (None, None),
    };

    Ok(PumpUpdateSuccessResponse {
        message: "Pump updated".to_string(),
        sump_id: outcome.pump.sump_id,
        pump: PumpStatusResponse {
            pump_id: outcome.pump.id,
            status: outcome.pump.status,
            health: outcome.health,
        },
        sump_status,
        flood_analysis,
        timestamp: format_timestamp(now)?,
    })
}

// Roads

pub async fn post_telemetry(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
    payload: Result<Json<ReportSubmission>, JsonRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    match payload {
        Ok(Json(submission)) => build_telemetry_response(&state, &road_id, &submission, now),
        Err(rejection) => rejected(TELEMETRY_ROUTE, now, rejection.body_text()),
    }
}

fn build_telemetry_response(
    state: &SharedState,
    road_id: &str,
    submission: &ReportSubmission,
    now: SystemTime,
) -> ApiResponse<TelemetrySuccessResponse> {
    finish(
        TELEMETRY_ROUTE,
        now,
        StatusCode::CREATED,
        telemetry_body(state, road_id, submission, now),
    )
}

fn telemetry_body(
    state: &SharedState,
    road_id: &str,
    submission: &ReportSubmission,
    now: SystemTime,
) -> Result<TelemetrySuccessResponse, Failure> {
    let outcome = assess::record_report_at(state, road_id, submission, now)?;
    let confirmed = outcome.confirmed();
    let trucks_confirmed = outcome
        .site
        .as_ref()
        .filter(|_| confirmed)
        .map(|site| site.unique_trucks);

    Ok(TelemetrySuccessResponse {
        telemetry_id: outcome.report.id,
        speed_drop_percent: outcome.report.speed_drop_percent,
        severity: outcome.report.severity,
        message: outcome.message.to_string(),
        soft_spot_detected: outcome.soft_spot_detected(),
        confidence: if confirmed {
            Confidence::High
        } else {
            Confidence::Low
        },
        trucks_confirmed,
        note: outcome.note.map(str::to_string),
        road_soft_spots: map_sites(outcome.assessment.confirmed_sites())?,
        road_status: outcome.assessment.condition,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn post_telemetry_batch(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
    payload: Result<Json<TelemetryBatchRequest>, JsonRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    match payload {
        Ok(Json(request)) => build_telemetry_batch_response(&state, &road_id, &request.readings, now),
        Err(rejection) => rejected(TELEMETRY_BATCH_ROUTE, now, rejection.body_text()),
    }
}

fn build_telemetry_batch_response(
    state: &SharedState,
    road_id: &str,
    readings: &[ReportSubmission],
    now: SystemTime,
) -> ApiResponse<TelemetryBatchSuccessResponse> {
    finish(
        TELEMETRY_BATCH_ROUTE,
        now,
        StatusCode::CREATED,
        telemetry_batch_body(state, road_id, readings, now),
    )
}

fn telemetry_batch_body(
    state: &SharedState,
    road_id: &str,
    readings: &[ReportSubmission],
    now: SystemTime,
) -> Result<TelemetryBatchSuccessResponse, Failure> {
    let outcome = assess::record_reports_at(state, road_id, readings, now)?;
    let results: Vec<FlaggedReading> = outcome
        .flagged
        .iter()
        .map(|report| FlaggedReading {
            truck_id: report.truck_id.clone(),
            severity: report.severity,
            speed_drop_percent: report.speed_drop_percent,
        })
        .collect();

    Ok(TelemetryBatchSuccessResponse {
        message: format!("{} telemetry readings processed", outcome.processed),
        soft_spots_detected: results.len(),
        road_status: outcome.assessment.condition,
        high_confidence_spots: outcome.assessment.summary.high_confidence_count,
        results,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn get_soft_spots(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
) -> impl IntoResponse {
    build_soft_spots_response(&state, &road_id, SystemTime::now())
}

fn build_soft_spots_response(
    state: &SharedState,
    road_id: &str,
    now: SystemTime,
) -> ApiResponse<SoftSpotsSuccessResponse> {
    finish(
        SOFT_SPOTS_ROUTE,
        now,
        StatusCode::OK,
        soft_spots_body(state, road_id, now),
    )
}

fn soft_spots_body(
    state: &SharedState,
    road_id: &str,
    now: SystemTime,
) -> Result<SoftSpotsSuccessResponse, Failure> {
    let assessment = assess::refresh_road_at(state, road_id, now)?;
    let road_name = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard.road(road_id)?.name.clone()
    };

    Ok(SoftSpotsSuccessResponse {
        road_id: assessment.road_id.clone(),
        road_name,
        condition: assessment.condition,
        soft_spot_detected: assessment.soft_spot_detected,
        awaiting_confirmation: assessment.awaiting_confirmation,
        soft_spot_count: assessment.sites.len(),
        sites: map_sites(&assessment.sites)?,
        summary: assessment.summary,
        drainage_risk: assessment.drainage.risk,
        maintenance_required: assessment.maintenance_required,
        overall_risk: assessment.overall_risk,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn get_drainage_assessment(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
) -> impl IntoResponse {
    build_drainage_response(&state, &road_id, SystemTime::now())
}

fn build_drainage_response(
    state: &SharedState,
    road_id: &str,
    now: SystemTime,
) -> ApiResponse<DrainageSuccessResponse> {
    finish(
        DRAINAGE_ROUTE,
        now,
        StatusCode::OK,
        drainage_body(state, road_id, now),
    )
}

fn drainage_body(
    state: &SharedState,
    road_id: &str,
    now: SystemTime,
) -> Result<DrainageSuccessResponse, Failure> {
    let road = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard.road(road_id)?.clone()
    };
    let drainage = road.drainage();
    let cross_fall_analysis = CrossFallAnalysis {
        required: road.required_cross_fall,
        current: road.current_cross_fall,
        deficiency: drainage.cross_fall_deficiency,
    };

    Ok(DrainageSuccessResponse {
        road_id: road.id,
        cross_fall_analysis,
        drainage_status: drainage,
        water_level_cm: road.water_level_cm,
        priority_level: road.priority,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn put_road(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
    payload: Result<Json<RoadUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    match payload {
        Ok(Json(update)) => build_road_update_response(&state, &road_id, &update, now),
        Err(rejection) => rejected(ROAD_UPDATE_ROUTE, now, rejection.body_text()),
    }
}

fn build_road_update_response(
    state: &SharedState,
    road_id: &str,
    update: &RoadUpdate,
    now: SystemTime,
) -> ApiResponse<RoadUpdateSuccessResponse> {
    finish(
        ROAD_UPDATE_ROUTE,
        now,
        StatusCode::OK,
        road_update_body(state, road_id, update, now),
    )
}

fn road_update_body(
    state: &SharedState,
    road_id: &str,
    update: &RoadUpdate,
    now: SystemTime,
) -> Result<RoadUpdateSuccessResponse, Failure> {
    let assessment = assess::update_road(state, road_id, update, now)?;
    let road = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard.road(road_id)?.clone()
    };

    Ok(RoadUpdateSuccessResponse {
        message: "Road updated".to_string(),
        road_id: assessment.road_id,
        cross_fall_analysis: CrossFallAnalysis {
            required: road.required_cross_fall,
            current: road.current_cross_fall,
            deficiency: assessment.drainage.cross_fall_deficiency,
        },
        water_level_cm: road.water_level_cm,
        drainage_status: assessment.drainage,
        condition: assessment.condition,
        overall_risk: assessment.overall_risk,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn post_clear_soft_spot(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
    payload: Result<Json<ClearSpotRequest>, JsonRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    match payload {
        Ok(Json(request)) => build_clear_spot_response(&state, &road_id, &request, now),
        Err(rejection) => rejected(CLEAR_SPOT_ROUTE, now, rejection.body_text()),
    }
}

fn build_clear_spot_response(
    state: &SharedState,
    road_id: &str,
    request: &ClearSpotRequest,
    now: SystemTime,
) -> ApiResponse<ClearSuccessResponse> {
    finish(
        CLEAR_SPOT_ROUTE,
        now,
        StatusCode::OK,
        clear_spot_body(state, road_id, request, now),
    )
}

fn clear_spot_body(
    state: &SharedState,
    road_id: &str,
    request: &ClearSpotRequest,
    now: SystemTime,
) -> Result<ClearSuccessResponse, Failure> {
    if !request.x_m.is_finite() || !request.y_m.is_finite() {
        return Err(Failure::Invalid("xM and yM must be finite".to_string()));
    }
    let point = LocalPosition::new(request.x_m, request.y_m);
    let (removed, assessment) = assess::clear_road_spot(state, road_id, point)?;

    Ok(ClearSuccessResponse {
        message: format!(
            "Soft spot at ({}m, {}m) marked as repaired.",
            point.x_m, point.y_m
        ),
        deleted_telemetry_count: removed,
        remaining_soft_spots: Some(assessment.sites.len()),
        road_status: assessment.condition,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn post_clear_soft_spots(
    State(state): State<SharedState>,
    Path(road_id): Path<String>,
) -> impl IntoResponse {
    build_clear_road_response(&state, &road_id, SystemTime::now())
}

fn build_clear_road_response(
    state: &SharedState,
    road_id: &str,
    now: SystemTime,
) -> ApiResponse<ClearSuccessResponse> {
    finish(
        CLEAR_ROAD_ROUTE,
        now,
        StatusCode::OK,
        clear_road_body(state, road_id, now),
    )
}

fn clear_road_body(
    state: &SharedState,
    road_id: &str,
    now: SystemTime,
) -> Result<ClearSuccessResponse, Failure> {
    let removed = assess::clear_road(state, road_id)?;
    let road_status = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard.road(road_id)?.condition
    };

    Ok(ClearSuccessResponse {
        message: "Road marked as repaired. All soft spots cleared.".to_string(),
        deleted_telemetry_count: removed,
        remaining_soft_spots: None,
        road_status,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn get_road_warnings(State(state): State<SharedState>) -> impl IntoResponse {
    build_warnings_response(&state, SystemTime::now())
}

fn build_warnings_response(
    state: &SharedState,
    now: SystemTime,
) -> ApiResponse<WarningsSuccessResponse> {
    finish(WARNINGS_ROUTE, now, StatusCode::OK, warnings_body(state, now))
}

fn warnings_body(state: &SharedState, now: SystemTime) -> Result<WarningsSuccessResponse, Failure> {
    let assessed = assess::active_road_sites(state, now)?;
    let warnings = road_warnings(
        assessed
            .iter()
            .map(|(road, sites)| (road, sites.as_slice())),
    );
    let warnings = warnings
        .iter()
        .map(RoadWarningResponse::from_warning)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WarningsSuccessResponse {
        total_roads: assessed.len(),
        roads_with_warnings: warnings.len(),
        warnings,
        timestamp: format_timestamp(now)?,
    })
}

// Weather

enum ForecastSource {
    Inline(Vec<ForecastPoint>),
    Fetched(ForecastLookup),
}

/// Runs the blocking provider off the async workers.
async fn fetch_forecast(state: &SharedState, lat: f64, lng: f64) -> Result<ForecastLookup, Failure> {
    let service = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard.weather()
    };
    let service = service.ok_or(Failure::WeatherNotConfigured)?;

    tokio::task::spawn_blocking(move || service.forecast(lat, lng))
        .await
        .map_err(|err| Failure::Internal(format!("forecast task failed: {err}")))?
        .map_err(Failure::Weather)
}

pub async fn post_early_warning(
    State(state): State<SharedState>,
    payload: Result<Json<EarlyWarningRequest>, JsonRejection>,
) -> ApiResponse<EarlyWarningSuccessResponse> {
    let now = SystemTime::now();
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejected(EARLY_WARNING_ROUTE, now, rejection.body_text()),
    };

    let source = match (request.forecast, request.lat, request.lng) {
        (Some(points), _, _) => Ok(ForecastSource::Inline(points)),
        (None, Some(lat), Some(lng)) => fetch_forecast(&state, lat, lng)
            .await
            .map(ForecastSource::Fetched),
        _ => Err(Failure::Invalid(
            "Location coordinates or forecast required".to_string(),
        )),
    };

    build_early_warning_response(source, request.sump_capacity_percent, now)
}

fn build_early_warning_response(
    source: Result<ForecastSource, Failure>,
    sump_capacity_percent: Option<f64>,
    now: SystemTime,
) -> ApiResponse<EarlyWarningSuccessResponse> {
    let result =
        source.and_then(|source| early_warning_body(&source, sump_capacity_percent, now));
    finish(EARLY_WARNING_ROUTE, now, StatusCode::OK, result)
}

fn early_warning_body(
    source: &ForecastSource,
    sump_capacity_percent: Option<f64>,
    now: SystemTime,
) -> Result<EarlyWarningSuccessResponse, Failure> {
    let (points, cached) = match source {
        ForecastSource::Inline(points) => (points.as_slice(), None),
        ForecastSource::Fetched(lookup) => (lookup.forecast.forecast.as_slice(), Some(lookup.cached)),
    };
    let storm_analysis = analyze_storm_risk(points);
    let warning_level = early_warning(&storm_analysis, sump_capacity_percent);

    if warning_level.level == EarlyWarningLevel::Critical {
        warn!(
            weather_risk = ?warning_level.weather_risk,
            sump_capacity_percent = warning_level.sump_capacity_percent,
            "Critical early warning issued"
        );
    }

    Ok(EarlyWarningSuccessResponse {
        warning_level,
        storm_analysis,
        cached,
        timestamp: format_timestamp(now)?,
    })
}

pub async fn get_forecast(
    State(state): State<SharedState>,
    query: Result<Query<ForecastQuery>, QueryRejection>,
) -> impl IntoResponse {
    let now = SystemTime::now();
    let lookup = match query {
        Ok(Query(ForecastQuery {
            lat: Some(lat),
            lng: Some(lng),
        })) => fetch_forecast(&state, lat, lng).await,
        Ok(_) => Err(Failure::Invalid(
            "Latitude and longitude are required".to_string(),
        )),
        Err(_) => Err(Failure::Invalid("Invalid latitude or longitude".to_string())),
    };

    build_forecast_response(lookup, now)
}

fn build_forecast_response(
    lookup: Result<ForecastLookup, Failure>,
    now: SystemTime,
) -> ApiResponse<ForecastSuccessResponse> {
    let result = lookup.and_then(|lookup| {
        let storm_analysis = analyze_storm_risk(&lookup.forecast.forecast);
        Ok(ForecastSuccessResponse {
            weather: lookup.forecast,
            storm_analysis,
            cached: lookup.cached,
            timestamp: format_timestamp(now)?,
        })
    });
    finish(FORECAST_ROUTE, now, StatusCode::OK, result)
}
