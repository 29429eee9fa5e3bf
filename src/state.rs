use crate::assess::AssessmentSettings;
use crate::assess::road::{RoadAssessment, clear_all_soft_spots, clear_soft_spot};
use crate::error::AppError;
use crate::records::{
    ConditionTier, FloodStatus, HealthTier, LocalPosition, PumpState, PumpUpdate, ReportId,
    ReportSubmission, RoadState, RoadUpdate, SumpState, SumpUpdate, TruckReport,
};
use crate::site::SiteFile;
use crate::weather::WeatherService;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// Latest derived tier of one road, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadCondition {
    pub road_id: String,
    pub condition: ConditionTier,
    #[serde(skip)]
    pub updated_at: SystemTime,
}

#[derive(Debug)]
pub struct AppState {
    sumps: Vec<SumpState>,
    pumps: Vec<PumpState>,
    roads: Vec<RoadState>,
    reports: Vec<TruckReport>,
    next_report_id: ReportId,
    settings: AssessmentSettings,
    weather: Option<Arc<WeatherService>>,
    road_conditions_tx: watch::Sender<Vec<RoadCondition>>,
}

impl AppState {
    pub fn new(settings: AssessmentSettings) -> Self {
        let (road_conditions_tx, _road_conditions_rx) = watch::channel(Vec::new());
        Self {
            sumps: Vec::new(),
            pumps: Vec::new(),
            roads: Vec::new(),
            reports: Vec::new(),
            next_report_id: 1,
            settings,
            weather: None,
            road_conditions_tx,
        }
    }

    /// Seed the store. Report timestamps missing from the file become `now`.
    pub fn from_site(
        site: SiteFile,
        settings: AssessmentSettings,
        now: SystemTime,
    ) -> Result<Self, AppError> {
        let mut state = Self::new(settings);
        state.sumps = site.sumps;
        state.pumps = site.pumps;
        state.roads = site.roads;
        for seed in &site.reports {
            let timestamp = seed.submission.resolve_timestamp(now)?;
            state.add_report(&seed.road_id, &seed.submission, timestamp)?;
        }
        state.publish_road_conditions();
        Ok(state)
    }

    pub fn settings(&self) -> &AssessmentSettings {
        &self.settings
    }

    pub fn weather(&self) -> Option<Arc<WeatherService>> {
        self.weather.clone()
    }

    pub fn set_weather(&mut self, weather: Option<Arc<WeatherService>>) {
        self.weather = weather;
    }

    // Sumps and pumps

    pub fn sumps(&self) -> &[SumpState] {
        &self.sumps
    }

    pub fn sump(&self, sump_id: &str) -> Result<&SumpState, AppError> {
        self.sumps
            .iter()
            .find(|sump| sump.id == sump_id)
            .ok_or_else(|| AppError::SumpNotFound(sump_id.to_string()))
    }

    pub fn set_sump_status(&mut self, sump_id: &str, status: FloodStatus) -> Result<(), AppError> {
        let sump = self
            .sumps
            .iter_mut()
            .find(|sump| sump.id == sump_id)
            .ok_or_else(|| AppError::SumpNotFound(sump_id.to_string()))?;
        sump.status = status;
        Ok(())
    }

    /// Replace the sump's reading with the validated update and return the
    /// stored copy. A rejected update leaves the sump untouched.
    pub fn update_sump(&mut self, sump_id: &str, update: &SumpUpdate) -> Result<SumpState, AppError> {
        let sump = self
            .sumps
            .iter_mut()
            .find(|sump| sump.id == sump_id)
            .ok_or_else(|| AppError::SumpNotFound(sump_id.to_string()))?;
        *sump = update.apply(sump)?;
        Ok(sump.clone())
    }

    pub fn pumps(&self) -> &[PumpState] {
        &self.pumps
    }

    pub fn pump(&self, pump_id: &str) -> Result<&PumpState, AppError> {
        self.pumps
            .iter()
            .find(|pump| pump.id == pump_id)
            .ok_or_else(|| AppError::PumpNotFound(pump_id.to_string()))
    }

    pub fn update_pump(&mut self, pump_id: &str, update: &PumpUpdate) -> Result<PumpState, AppError> {
        let pump = self
            .pumps
            .iter_mut()
            .find(|pump| pump.id == pump_id)
            .ok_or_else(|| AppError::PumpNotFound(pump_id.to_string()))?;
        *pump = update.apply(pump)?;
        Ok(pump.clone())
    }

    pub fn pumps_for_sump(&self, sump_id: &str) -> Vec<PumpState> {
        self.pumps
            .iter()
            .filter(|pump| pump.sump_id == sump_id && pump.is_active)
            .cloned()
            .collect()
    }

    /// Unknown pump ids are ignored; pumps may be removed between snapshot
    /// and write-back.
    pub fn set_pump_health(&mut self, pump_id: &str, health: HealthTier) {
        if let Some(pump) = self.pumps.iter_mut().find(|pump| pump.id == pump_id) {
            pump.health = health;
        }
    }

    // Roads

    pub fn roads(&self) -> &[RoadState] {
        &self.roads
    }

    pub fn road(&self, road_id: &str) -> Result<&RoadState, AppError> {
        self.roads
            .iter()
            .find(|road| road.id == road_id)
            .ok_or_else(|| AppError::RoadNotFound(road_id.to_string()))
    }

    fn road_mut(&mut self, road_id: &str) -> Result<&mut RoadState, AppError> {
        self.roads
            .iter_mut()
            .find(|road| road.id == road_id)
            .ok_or_else(|| AppError::RoadNotFound(road_id.to_string()))
    }

    /// Derived fields stay as they are until the road is re-assessed.
    pub fn update_road(&mut self, road_id: &str, update: &RoadUpdate) -> Result<RoadState, AppError> {
        let road = self.road_mut(road_id)?;
        *road = update.apply(road)?;
        Ok(road.clone())
    }

    pub fn subscribe_road_conditions(&self) -> watch::Receiver<Vec<RoadCondition>> {
        self.road_conditions_tx.subscribe()
    }

    /// Write derived road fields back and publish the new tiers. Returns the
    /// previous condition.
    pub fn apply_road_assessment(
        &mut self,
        assessment: &RoadAssessment,
        now: SystemTime,
    ) -> Result<ConditionTier, AppError> {
        let road = self.road_mut(&assessment.road_id)?;
        let previous = road.condition;
        road.condition = assessment.condition;
        road.drainage_risk = assessment.drainage.risk;
        road.soft_spot_locations = assessment.sites.clone();
        road.condition_updated_at = Some(now);
        self.publish_road_conditions();
        Ok(previous)
    }

    fn publish_road_conditions(&self) {
        let conditions = self
            .roads
            .iter()
            .map(|road| RoadCondition {
                road_id: road.id.clone(),
                condition: road.condition,
                updated_at: road.condition_updated_at.unwrap_or(SystemTime::UNIX_EPOCH),
            })
            .collect();
        self.road_conditions_tx.send_replace(conditions);
    }

    // Reports

    pub fn reports(&self) -> &[TruckReport] {
        &self.reports
    }

    pub fn add_report(
        &mut self,
        road_id: &str,
        submission: &ReportSubmission,
        timestamp: SystemTime,
    ) -> Result<TruckReport, AppError> {
        self.road(road_id)?;
        submission.validate()?;
        let report = TruckReport::new(self.next_report_id, road_id, submission, timestamp);
        self.next_report_id += 1;
        self.reports.push(report.clone());
        Ok(report)
    }

    /// Reports for the road that are still inside the retention window.
    pub fn live_reports_for_road(&self, road_id: &str, now: SystemTime) -> Vec<TruckReport> {
        let cutoff = self.retention_cutoff(now);
        self.reports
            .iter()
            .filter(|report| report.road_id == road_id)
            .filter(|report| cutoff.is_none_or(|cutoff| report.timestamp >= cutoff))
            .cloned()
            .collect()
    }

    /// Earliest timestamp still retained, if the window fits in `SystemTime`.
    pub fn retention_cutoff(&self, now: SystemTime) -> Option<SystemTime> {
        now.checked_sub(self.settings.report_retention)
    }

    /// Drop reports older than `cutoff` and return the affected road ids.
    pub fn prune_reports_before(&mut self, cutoff: SystemTime) -> Vec<String> {
        let mut affected = BTreeSet::new();
        self.reports.retain(|report| {
            let keep = report.timestamp >= cutoff;
            if !keep {
                affected.insert(report.road_id.clone());
            }
            keep
        });
        affected.into_iter().collect()
    }

    pub fn remove_reports_near(
        &mut self,
        road_id: &str,
        point: &LocalPosition,
    ) -> Result<usize, AppError> {
        self.road(road_id)?;
        let tolerance = self.settings.tolerance_m;
        Ok(clear_soft_spot(&mut self.reports, road_id, point, tolerance))
    }

    /// Remove every report for the road and reset it to GOOD.
    pub fn clear_road_reports(&mut self, road_id: &str, now: SystemTime) -> Result<usize, AppError> {
        let index = self
            .roads
            .iter()
            .position(|road| road.id == road_id)
            .ok_or_else(|| AppError::RoadNotFound(road_id.to_string()))?;
        let road = &mut self.roads[index];
        let removed = clear_all_soft_spots(&mut self.reports, road);
        road.condition_updated_at = Some(now);
        self.publish_road_conditions();
        Ok(removed)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(AssessmentSettings::default())
    }
}
