//! Site seed file: the records a process starts with.

use crate::records::{PumpState, ReportSubmission, RoadState, SumpState};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteFile {
    pub sumps: Vec<SumpState>,
    pub pumps: Vec<PumpState>,
    pub roads: Vec<RoadState>,
    pub reports: Vec<SeedReport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub road_id: String,
    #[serde(flatten)]
    pub submission: ReportSubmission,
}

#[derive(Debug, Error)]
pub enum SiteFileError {
    #[error("failed to read site file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse site file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid site file: {0}")]
    Invalid(String),
}

pub fn load_site_from_path(path: impl AsRef<Path>) -> Result<SiteFile, SiteFileError> {
    let contents = std::fs::read_to_string(path)?;
    parse_site(&contents)
}

pub fn parse_site(contents: &str) -> Result<SiteFile, SiteFileError> {
    let site: SiteFile = serde_json::from_str(contents)?;
    site.validate()?;
    Ok(site)
}

impl SiteFile {
    /// Rejects what the calculators assume never happens: broken geometry,
    /// dangling references and duplicate ids.
    pub fn validate(&self) -> Result<(), SiteFileError> {
        let mut sump_ids = HashSet::new();
        for sump in &self.sumps {
            if !sump_ids.insert(sump.id.as_str()) {
                return Err(invalid(format!("duplicate sump id {}", sump.id)));
            }
            let dimensions = [sump.length, sump.width, sump.depth];
            if dimensions.iter().any(|d| !d.is_finite() || *d <= 0.0) {
                return Err(invalid(format!("sump {} has non-positive dimensions", sump.id)));
            }
            if !(0.0..=sump.depth).contains(&sump.current_water_height) {
                return Err(invalid(format!(
                    "sump {} water height outside 0..=depth",
                    sump.id
                )));
            }
            if !sump.inflow_rate.is_finite() || sump.inflow_rate < 0.0 {
                return Err(invalid(format!("sump {} has negative inflow", sump.id)));
            }
        }

        let mut pump_ids = HashSet::new();
        for pump in &self.pumps {
            if !pump_ids.insert(pump.id.as_str()) {
                return Err(invalid(format!("duplicate pump id {}", pump.id)));
            }
            if !sump_ids.contains(pump.sump_id.as_str()) {
                return Err(invalid(format!(
                    "pump {} references unknown sump {}",
                    pump.id, pump.sump_id
                )));
            }
            let discharge_ok = pump.rated_discharge >= 0.0
                && pump.current_discharge >= 0.0
                && pump.current_discharge <= pump.rated_discharge;
            if !discharge_ok {
                return Err(invalid(format!(
                    "pump {} discharge must satisfy 0 <= current <= rated",
                    pump.id
                )));
            }
        }

        let mut road_ids = HashSet::new();
        for road in &self.roads {
            if !road_ids.insert(road.id.as_str()) {
                return Err(invalid(format!("duplicate road id {}", road.id)));
            }
        }

        for report in &self.reports {
            if !road_ids.contains(report.road_id.as_str()) {
                return Err(invalid(format!(
                    "report references unknown road {}",
                    report.road_id
                )));
            }
            report
                .submission
                .validate()
                .map_err(|err| invalid(err.to_string()))?;
        }

        Ok(())
    }
}

fn invalid(message: String) -> SiteFileError {
    SiteFileError::Invalid(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ConditionTier, PumpStatus};
    use serde_json::json;

    fn site_json() -> serde_json::Value {
        json!({
            "sumps": [{
                "id": "s1", "name": "North", "length": 10.0, "width": 10.0,
                "depth": 5.0, "currentWaterHeight": 2.0, "inflowRate": 40.0
            }],
            "pumps": [{
                "id": "p1", "sumpId": "s1", "ratedDischarge": 100.0,
                "currentDischarge": 80.0, "status": "RUNNING"
            }],
            "roads": [{"id": "r1", "name": "Ramp", "requiredCrossFall": 3.0, "currentCrossFall": 2.5}],
            "reports": [{
                "roadId": "r1", "truckId": "T1", "averageSpeed": 30.0,
                "currentSpeed": 15.0, "x_m": 1.0, "y_m": 2.0,
                "timestamp": "2024-05-01T06:00:00Z"
            }]
        })
    }

    #[test]
    fn parses_canonical_site() -> Result<(), SiteFileError> {
        let site = parse_site(&site_json().to_string())?;

        assert_eq!(site.sumps.len(), 1);
        assert_eq!(site.pumps[0].status, PumpStatus::Running);
        assert_eq!(site.roads[0].condition, ConditionTier::Good);
        assert!(site.roads[0].is_active);
        assert_eq!(site.reports[0].submission.truck_id, "T1");
        assert_eq!(
            site.reports[0].submission.timestamp.as_deref(),
            Some("2024-05-01T06:00:00Z")
        );
        Ok(())
    }

    #[test]
    fn missing_sections_are_empty() -> Result<(), SiteFileError> {
        let site = parse_site("{}")?;

        assert!(site.sumps.is_empty());
        assert!(site.reports.is_empty());
        Ok(())
    }

    #[test]
    fn dangling_pump_is_rejected() {
        let mut value = site_json();
        value["pumps"][0]["sumpId"] = json!("missing");

        assert!(matches!(
            parse_site(&value.to_string()),
            Err(SiteFileError::Invalid(_))
        ));
    }

    #[test]
    fn water_above_depth_is_rejected() {
        let mut value = site_json();
        value["sumps"][0]["currentWaterHeight"] = json!(6.0);

        assert!(matches!(
            parse_site(&value.to_string()),
            Err(SiteFileError::Invalid(_))
        ));
    }

    #[test]
    fn report_for_unknown_road_is_rejected() {
        let mut value = site_json();
        value["reports"][0]["roadId"] = json!("r9");

        assert!(matches!(
            parse_site(&value.to_string()),
            Err(SiteFileError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse_site("{"), Err(SiteFileError::Parse(_))));
    }

    #[test]
    fn bundled_site_file_is_valid() -> Result<(), SiteFileError> {
        let site = load_site_from_path("config/site.json")?;

        assert!(!site.sumps.is_empty());
        assert!(!site.roads.is_empty());
        Ok(())
    }
}
