//! Derivation pipeline over the shared store.
//!
//! Every entry point copies a snapshot out under a read lock, runs the pure
//! evaluators without holding the lock, then writes derived fields back.

use crate::error::AppError;
use crate::records::{
    ConditionTier, FloodStatus, HealthTier, LocalPosition, PumpState, PumpUpdate, ReportSubmission,
    RoadState, RoadUpdate, SlowdownSeverity, SumpState, SumpUpdate, TruckReport,
};
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

pub mod flood;
pub mod pump_health;
pub mod road;
pub mod slowdown;
pub mod soft_spot;
pub mod storm;

use flood::{FloodProjection, project_sump};
use pump_health::{PumpHealth, evaluate_pump, total_active_discharge};
use road::{RoadAssessment, assess_road};
use soft_spot::{DEFAULT_TOLERANCE_M, SoftSpotSite, aggregate_soft_spots, matching_site};

pub const DEFAULT_REPORT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentSettings {
    pub tolerance_m: f64,
    pub report_retention: Duration,
}

impl Default for AssessmentSettings {
    fn default() -> Self {
        Self {
            tolerance_m: DEFAULT_TOLERANCE_M,
            report_retention: DEFAULT_REPORT_RETENTION,
        }
    }
}

// Sumps

#[derive(Debug, Clone, PartialEq)]
pub struct PumpAssessment {
    pub pump: PumpState,
    pub health: PumpHealth,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SumpAnalysis {
    pub sump: SumpState,
    pub total_active_pumping: f64,
    pub flood: FloodProjection,
    pub pumps: Vec<PumpAssessment>,
    /// At least one linked pump shows siltation.
    pub siltation_alert: bool,
}

pub fn assess_sump(state: &Arc<RwLock<AppState>>, sump_id: &str) -> Result<SumpAnalysis, AppError> {
    let (sump, pumps) = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        (guard.sump(sump_id)?.clone(), guard.pumps_for_sump(sump_id))
    };

    let analysis = analyze_sump(sump, pumps);
    log_sump_analysis(&analysis);

    let mut guard = state.write().map_err(|_| AppError::StateLock)?;
    guard.set_sump_status(&analysis.sump.id, analysis.flood.status)?;
    for assessed in &analysis.pumps {
        guard.set_pump_health(&assessed.pump.id, assessed.health.health);
    }

    Ok(analysis)
}

/// All active sumps, in store order.
pub fn assess_active_sumps(state: &Arc<RwLock<AppState>>) -> Result<Vec<SumpAnalysis>, AppError> {
    let snapshot: Vec<(SumpState, Vec<PumpState>)> = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        guard
            .sumps()
            .iter()
            .filter(|sump| sump.is_active)
            .map(|sump| (sump.clone(), guard.pumps_for_sump(&sump.id)))
            .collect()
    };

    let analyses: Vec<SumpAnalysis> = snapshot
        .into_iter()
        .map(|(sump, pumps)| analyze_sump(sump, pumps))
        .collect();
    analyses.iter().for_each(log_sump_analysis);

    let mut guard = state.write().map_err(|_| AppError::StateLock)?;
    for analysis in &analyses {
        guard.set_sump_status(&analysis.sump.id, analysis.flood.status)?;
        for assessed in &analysis.pumps {
            guard.set_pump_health(&assessed.pump.id, assessed.health.health);
        }
    }

    Ok(analyses)
}

/// Store a new sump reading, then re-run the flood projection on it.
pub fn update_sump(
    state: &Arc<RwLock<AppState>>,
    sump_id: &str,
    update: &SumpUpdate,
) -> Result<SumpAnalysis, AppError> {
    let stored = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.update_sump(sump_id, update)?
    };
    info!(
        sump_id,
        water_height = stored.current_water_height,
        inflow_rate = stored.inflow_rate,
        "Sump reading updated"
    );
    assess_sump(state, sump_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PumpUpdateOutcome {
    pub pump: PumpState,
    pub health: PumpHealth,
    /// Re-run projection of the linked sump, absent when the sump is gone.
    pub sump: Option<SumpAnalysis>,
}

/// Store a pump reading, re-evaluate its health and re-project its sump,
/// since the pump's discharge feeds the sump's net inflow.
pub fn update_pump(
    state: &Arc<RwLock<AppState>>,
    pump_id: &str,
    update: &PumpUpdate,
) -> Result<PumpUpdateOutcome, AppError> {
    let (mut pump, health) = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        let pump = guard.update_pump(pump_id, update)?;
        let health = evaluate_pump(&pump);
        guard.set_pump_health(pump_id, health.health);
        (pump, health)
    };
    pump.health = health.health;
    debug!(
        pump_id,
        capacity_percent = health.capacity_percent,
        health = ?health.health,
        "Pump reading updated"
    );

    let sump = match assess_sump(state, &pump.sump_id) {
        Ok(analysis) => Some(analysis),
        Err(AppError::SumpNotFound(_)) => None,
        Err(err) => return Err(err),
    };

    Ok(PumpUpdateOutcome { pump, health, sump })
}

fn analyze_sump(mut sump: SumpState, pumps: Vec<PumpState>) -> SumpAnalysis {
    let total_active_pumping = total_active_discharge(&pumps);
    let flood = project_sump(&sump, total_active_pumping);
    sump.status = flood.status;

    let pumps: Vec<PumpAssessment> = pumps
        .into_iter()
        .map(|mut pump| {
            let health = evaluate_pump(&pump);
            pump.health = health.health;
            PumpAssessment { pump, health }
        })
        .collect();
    let siltation_alert = pumps.iter().any(|p| p.health.siltation_suspected);

    SumpAnalysis {
        sump,
        total_active_pumping,
        flood,
        pumps,
        siltation_alert,
    }
}

fn log_sump_analysis(analysis: &SumpAnalysis) {
    if analysis.flood.status == FloodStatus::Critical {
        warn!(
            sump_id = %analysis.sump.id,
            hours = analysis.flood.time_to_flood_hours,
            "Sump flood projection critical"
        );
    }
    for assessed in &analysis.pumps {
        if assessed.health.health == HealthTier::Red {
            warn!(
                pump_id = %assessed.pump.id,
                capacity_percent = assessed.health.capacity_percent,
                siltation = assessed.health.siltation_suspected,
                "Pump requires maintenance"
            );
        }
    }
}

// Roads

pub fn refresh_road(
    state: &Arc<RwLock<AppState>>,
    road_id: &str,
) -> Result<RoadAssessment, AppError> {
    refresh_road_at(state, road_id, SystemTime::now())
}

/// Re-aggregate the road's live reports and write the result back.
pub fn refresh_road_at(
    state: &Arc<RwLock<AppState>>,
    road_id: &str,
    now: SystemTime,
) -> Result<RoadAssessment, AppError> {
    let (road, reports, tolerance) = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        (
            guard.road(road_id)?.clone(),
            guard.live_reports_for_road(road_id, now),
            guard.settings().tolerance_m,
        )
    };

    let sites = aggregate_soft_spots(&reports, tolerance);
    let assessment = assess_road(&road, sites);

    let previous = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.apply_road_assessment(&assessment, now)?
    };

    if previous != assessment.condition {
        if assessment.condition == ConditionTier::Critical {
            warn!(
                road_id,
                critical_sites = assessment.summary.critical_count,
                drainage = ?assessment.drainage.risk,
                "Road condition escalated to CRITICAL"
            );
        } else {
            info!(
                road_id,
                from = ?previous,
                to = ?assessment.condition,
                "Road condition changed"
            );
        }
    }

    Ok(assessment)
}

/// Store a road survey, then re-assess drainage and condition.
pub fn update_road(
    state: &Arc<RwLock<AppState>>,
    road_id: &str,
    update: &RoadUpdate,
    now: SystemTime,
) -> Result<RoadAssessment, AppError> {
    {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.update_road(road_id, update)?;
    }
    refresh_road_at(state, road_id, now)
}

/// Outcome of a single telemetry submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub report: TruckReport,
    /// Site of the grid cell the report landed in.
    pub site: Option<SoftSpotSite>,
    pub assessment: RoadAssessment,
    pub message: &'static str,
    pub note: Option<&'static str>,
}

impl ReportOutcome {
    pub fn soft_spot_detected(&self) -> bool {
        self.report.severity != SlowdownSeverity::None
    }

    pub fn confirmed(&self) -> bool {
        self.soft_spot_detected() && self.site.as_ref().is_some_and(SoftSpotSite::is_confirmed)
    }
}

/// Store one report, re-assess its road and describe the outcome.
pub fn record_report_at(
    state: &Arc<RwLock<AppState>>,
    road_id: &str,
    submission: &ReportSubmission,
    now: SystemTime,
) -> Result<ReportOutcome, AppError> {
    let timestamp = submission.resolve_timestamp(now)?;
    let (report, tolerance) = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        let report = guard.add_report(road_id, submission, timestamp)?;
        (report, guard.settings().tolerance_m)
    };
    debug!(
        road_id,
        truck_id = %report.truck_id,
        drop = report.speed_drop_percent,
        severity = ?report.severity,
        "Slowdown report classified"
    );

    let assessment = refresh_road_at(state, road_id, now)?;
    let site = matching_site(&assessment.sites, &report.location, tolerance).cloned();
    let (message, note) = outcome_message(&report, site.as_ref());

    Ok(ReportOutcome {
        report,
        site,
        assessment,
        message,
        note,
    })
}

const CONFIRMATION_NOTE: &str =
    "Will be confirmed when another truck reports slowdown at this location";

fn outcome_message(
    report: &TruckReport,
    site: Option<&SoftSpotSite>,
) -> (&'static str, Option<&'static str>) {
    if report.severity == SlowdownSeverity::None {
        return ("No issue detected", None);
    }
    match site.filter(|site| site.is_confirmed()) {
        Some(site) if site.severity == SlowdownSeverity::Critical => (
            "CRITICAL SPOT CONFIRMED: Multiple trucks confirmed, at least one with ≥50% speed drop",
            None,
        ),
        Some(_) => (
            "SOFT SPOT CONFIRMED: Multiple trucks reported slowdown at this location",
            None,
        ),
        None if report.severity == SlowdownSeverity::Critical => (
            "CRITICAL SLOWDOWN RECORDED: Speed drop ≥50% - awaiting 2nd truck confirmation",
            Some(CONFIRMATION_NOTE),
        ),
        None => (
            "SOFT SPOT DETECTED: Speed drop ≥30% recorded",
            Some(CONFIRMATION_NOTE),
        ),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub processed: usize,
    /// Reports that classified as SOFT or CRITICAL.
    pub flagged: Vec<TruckReport>,
    pub assessment: RoadAssessment,
}

/// Store a batch of reports for one road. The whole batch is validated
/// before any report is stored.
pub fn record_reports_at(
    state: &Arc<RwLock<AppState>>,
    road_id: &str,
    submissions: &[ReportSubmission],
    now: SystemTime,
) -> Result<BatchOutcome, AppError> {
    if submissions.is_empty() {
        return Err(AppError::InvalidReport("readings array is required".to_string()));
    }
    let mut timestamps = Vec::with_capacity(submissions.len());
    for submission in submissions {
        submission.validate()?;
        timestamps.push(submission.resolve_timestamp(now)?);
    }

    let flagged = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.road(road_id)?;
        let mut flagged = Vec::new();
        for (submission, timestamp) in submissions.iter().zip(timestamps) {
            let report = guard.add_report(road_id, submission, timestamp)?;
            if report.severity != SlowdownSeverity::None {
                flagged.push(report);
            }
        }
        flagged
    };
    info!(
        road_id,
        processed = submissions.len(),
        flagged = flagged.len(),
        "Telemetry batch stored"
    );

    let assessment = refresh_road_at(state, road_id, now)?;
    Ok(BatchOutcome {
        processed: submissions.len(),
        flagged,
        assessment,
    })
}

/// Repair at a point: drop nearby reports and re-assess from the rest.
pub fn clear_road_spot(
    state: &Arc<RwLock<AppState>>,
    road_id: &str,
    point: LocalPosition,
) -> Result<(usize, RoadAssessment), AppError> {
    let removed = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.remove_reports_near(road_id, &point)?
    };
    info!(road_id, x_m = point.x_m, y_m = point.y_m, removed, "Soft spot cleared");

    let assessment = refresh_road(state, road_id)?;
    Ok((removed, assessment))
}

/// Repair the whole road: drop every report and reset to GOOD.
pub fn clear_road(state: &Arc<RwLock<AppState>>, road_id: &str) -> Result<usize, AppError> {
    let removed = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        guard.clear_road_reports(road_id, SystemTime::now())?
    };
    info!(road_id, removed, "All soft spots cleared");
    Ok(removed)
}

/// Live aggregation for every active road, for dashboards.
pub fn active_road_sites(
    state: &Arc<RwLock<AppState>>,
    now: SystemTime,
) -> Result<Vec<(RoadState, Vec<SoftSpotSite>)>, AppError> {
    let snapshot = {
        let guard = state.read().map_err(|_| AppError::StateLock)?;
        let tolerance = guard.settings().tolerance_m;
        let roads: Vec<_> = guard
            .roads()
            .iter()
            .filter(|road| road.is_active)
            .map(|road| (road.clone(), guard.live_reports_for_road(&road.id, now)))
            .collect();
        (roads, tolerance)
    };

    let (roads, tolerance) = snapshot;
    Ok(roads
        .into_iter()
        .map(|(road, reports)| {
            let sites = aggregate_soft_spots(&reports, tolerance);
            (road, sites)
        })
        .collect())
}

// Retention

/// Drop expired reports and re-assess every road that lost one. Returns the
/// affected road ids.
pub fn prune_and_refresh(
    state: &Arc<RwLock<AppState>>,
    now: SystemTime,
) -> Result<Vec<String>, AppError> {
    let affected = {
        let mut guard = state.write().map_err(|_| AppError::StateLock)?;
        match guard.retention_cutoff(now) {
            Some(cutoff) => guard.prune_reports_before(cutoff),
            None => Vec::new(),
        }
    };

    for road_id in &affected {
        match refresh_road_at(state, road_id, now) {
            Ok(assessment) => info!(
                road_id = %road_id,
                condition = ?assessment.condition,
                "Road re-assessed after retention sweep"
            ),
            Err(AppError::RoadNotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(affected)
}

pub fn spawn_retention_thread(
    state: Arc<RwLock<AppState>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();

            match prune_and_refresh(&state, SystemTime::now()) {
                Ok(affected) if !affected.is_empty() => {
                    info!(roads = affected.len(), "Expired reports pruned");
                }
                Ok(_) => {}
                Err(e) => warn!("Error running retention sweep: {}", e),
            }

            sleep_with_stop(interval, &stop, cycle_start);
        }
    })
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool, start: Instant) {
    let elapsed = start.elapsed();
    if elapsed >= duration {
        return;
    }
    let remaining = duration - elapsed;
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;

    while slept < remaining {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(step);
        slept += step;
    }
}
