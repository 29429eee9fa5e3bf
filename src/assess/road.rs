//! Haul-road condition: cross-fall drainage merged with aggregated soft spots.

use crate::assess::soft_spot::{Confidence, SoftSpotSite};
use crate::records::{
    ConditionTier, DrainageRisk, LocalPosition, RoadPriority, RoadState, SlowdownSeverity,
    TruckReport,
};
use serde::Serialize;

/// Deficiency at or below this many degrees is moderate; above is severe.
pub const MODERATE_DEFICIENCY_MAX: f64 = 1.0;
/// Standing water deeper than this (cm) counts toward overall risk.
pub const STANDING_WATER_CM: f64 = 10.0;
pub const WARNING_TOP_LOCATIONS: usize = 5;

impl RoadState {
    pub fn cross_fall_deficiency(&self) -> f64 {
        cross_fall_deficiency(self.required_cross_fall, self.current_cross_fall)
    }

    pub fn drainage(&self) -> DrainageAssessment {
        assess_drainage(self.required_cross_fall, self.current_cross_fall)
    }
}

pub fn cross_fall_deficiency(required: f64, current: f64) -> f64 {
    let deficiency = required - current;
    if deficiency.is_finite() {
        deficiency.max(0.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainageAssessment {
    pub risk: DrainageRisk,
    pub cross_fall_deficiency: f64,
    pub requires_regrading: bool,
    pub message: String,
    pub action: String,
}

pub fn assess_drainage(required_cross_fall: f64, current_cross_fall: f64) -> DrainageAssessment {
    let deficiency = cross_fall_deficiency(required_cross_fall, current_cross_fall);

    let (risk, message, action) = if deficiency <= 0.0 {
        (
            DrainageRisk::Safe,
            "Road drainage is adequate".to_string(),
            "None required",
        )
    } else if deficiency <= MODERATE_DEFICIENCY_MAX {
        (
            DrainageRisk::Moderate,
            format!("Water will pond - deficiency: {deficiency:.1}°"),
            "Schedule regrading before next rainfall",
        )
    } else {
        (
            DrainageRisk::Severe,
            format!("Significant drainage problem - deficiency: {deficiency:.1}°"),
            "URGENT: Regrading required immediately",
        )
    };

    DrainageAssessment {
        risk,
        cross_fall_deficiency: deficiency,
        requires_regrading: risk != DrainageRisk::Safe,
        message,
        action: action.to_string(),
    }
}

/// Tier from confirmed sites, the inspection flag and drainage.
///
/// LOW-confidence sites never move the tier.
pub fn condition_tier(
    sites: &[SoftSpotSite],
    soft_spot_flag: bool,
    drainage: DrainageRisk,
) -> ConditionTier {
    let confirmed = |severity: SlowdownSeverity| {
        sites
            .iter()
            .any(|site| site.confidence == Confidence::High && site.severity == severity)
    };

    if confirmed(SlowdownSeverity::Critical) || drainage == DrainageRisk::Severe {
        ConditionTier::Critical
    } else if confirmed(SlowdownSeverity::Soft) || soft_spot_flag || drainage == DrainageRisk::Moderate
    {
        ConditionTier::Soft
    } else {
        ConditionTier::Good
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub critical_count: usize,
    pub soft_count: usize,
    pub high_confidence_count: usize,
    pub low_confidence_count: usize,
}

impl SiteSummary {
    pub fn of(sites: &[SoftSpotSite]) -> Self {
        sites.iter().fold(Self::default(), |mut summary, site| {
            match site.severity {
                SlowdownSeverity::Critical => summary.critical_count += 1,
                SlowdownSeverity::Soft => summary.soft_count += 1,
                SlowdownSeverity::None => {}
            }
            match site.confidence {
                Confidence::High => summary.high_confidence_count += 1,
                Confidence::Low => summary.low_confidence_count += 1,
            }
            summary
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoadAssessment {
    pub road_id: String,
    pub condition: ConditionTier,
    pub drainage: DrainageAssessment,
    pub soft_spot_detected: bool,
    /// Only unconfirmed single-truck sites exist.
    pub awaiting_confirmation: bool,
    pub sites: Vec<SoftSpotSite>,
    pub summary: SiteSummary,
    pub maintenance_required: bool,
    pub overall_risk: OverallRisk,
}

impl RoadAssessment {
    pub fn confirmed_sites(&self) -> impl Iterator<Item = &SoftSpotSite> {
        self.sites.iter().filter(|site| site.is_confirmed())
    }
}

pub fn assess_road(road: &RoadState, sites: Vec<SoftSpotSite>) -> RoadAssessment {
    let drainage = road.drainage();
    let summary = SiteSummary::of(&sites);
    let condition = condition_tier(&sites, road.soft_spot_flag, drainage.risk);
    let soft_spot_detected = !sites.is_empty() || road.soft_spot_flag;

    let mut risks = 0;
    if drainage.risk == DrainageRisk::Severe {
        risks += 1;
    }
    if soft_spot_detected {
        risks += 1;
    }
    if road.water_level_cm > STANDING_WATER_CM {
        risks += 1;
    }
    let overall_risk = match risks {
        0 => OverallRisk::Low,
        1 => OverallRisk::Medium,
        _ => OverallRisk::High,
    };

    RoadAssessment {
        road_id: road.id.clone(),
        condition,
        maintenance_required: drainage.requires_regrading || soft_spot_detected,
        drainage,
        soft_spot_detected,
        awaiting_confirmation: summary.high_confidence_count == 0 && summary.low_confidence_count > 0,
        sites,
        summary,
        overall_risk,
    }
}

/// Drop the road's reports within `tolerance_m` of `point` on both axes.
/// Returns how many were removed; the caller re-aggregates what is left.
pub fn clear_soft_spot(
    reports: &mut Vec<TruckReport>,
    road_id: &str,
    point: &LocalPosition,
    tolerance_m: f64,
) -> usize {
    let before = reports.len();
    reports.retain(|report| {
        report.road_id != road_id || !report.location.within(point, tolerance_m)
    });
    before - reports.len()
}

/// Drop every report for the road and reset it to GOOD.
pub fn clear_all_soft_spots(reports: &mut Vec<TruckReport>, road: &mut RoadState) -> usize {
    let before = reports.len();
    reports.retain(|report| report.road_id != road.id);

    road.soft_spot_flag = false;
    road.soft_spot_locations.clear();
    road.condition = ConditionTier::Good;

    before - reports.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoadWarning {
    pub road_id: String,
    pub road_name: String,
    pub priority: RoadPriority,
    pub condition: ConditionTier,
    pub warning_level: WarningLevel,
    pub critical_count: usize,
    pub soft_count: usize,
    /// Confirmed critical sites first, then confirmed soft ones.
    pub top_locations: Vec<SoftSpotSite>,
    pub message: String,
    pub recommendation: String,
}

impl RoadWarning {
    pub fn soft_spot_count(&self) -> usize {
        self.critical_count + self.soft_count
    }
}

/// Dashboard warnings for roads with at least one confirmed site, critical
/// roads first and then by critical count.
pub fn road_warnings<'a, I>(assessed: I) -> Vec<RoadWarning>
where
    I: IntoIterator<Item = (&'a RoadState, &'a [SoftSpotSite])>,
{
    let mut warnings: Vec<RoadWarning> = assessed
        .into_iter()
        .filter_map(|(road, sites)| road_warning(road, sites))
        .collect();

    warnings.sort_by(|a, b| {
        let a_critical = a.warning_level == WarningLevel::Critical;
        let b_critical = b.warning_level == WarningLevel::Critical;
        b_critical
            .cmp(&a_critical)
            .then(b.critical_count.cmp(&a.critical_count))
    });
    warnings
}

fn road_warning(road: &RoadState, sites: &[SoftSpotSite]) -> Option<RoadWarning> {
    let confirmed_with = |severity: SlowdownSeverity| -> Vec<SoftSpotSite> {
        sites
            .iter()
            .filter(|site| site.is_confirmed() && site.severity == severity)
            .cloned()
            .collect()
    };
    let critical = confirmed_with(SlowdownSeverity::Critical);
    let soft = confirmed_with(SlowdownSeverity::Soft);

    if critical.is_empty() && soft.is_empty() {
        return None;
    }

    let name = if road.name.trim().is_empty() {
        road.id.as_str()
    } else {
        road.name.as_str()
    };
    let (warning_level, message, recommendation) = if critical.is_empty() {
        (
            WarningLevel::Warning,
            format!(
                "SOFT SPOTS: {} confirmed spot(s) at {name} - schedule maintenance",
                soft.len()
            ),
            "Monitor closely. Plan maintenance before conditions worsen.",
        )
    } else {
        (
            WarningLevel::Critical,
            format!(
                "CRITICAL: {} critical spot(s) at {name} - immediate repair required",
                critical.len()
            ),
            "Restrict heavy traffic. Deploy maintenance crew immediately.",
        )
    };

    let critical_count = critical.len();
    let soft_count = soft.len();
    let top_locations = critical
        .into_iter()
        .chain(soft)
        .take(WARNING_TOP_LOCATIONS)
        .collect();

    Some(RoadWarning {
        road_id: road.id.clone(),
        road_name: name.to_string(),
        priority: road.priority,
        condition: road.condition,
        warning_level,
        critical_count,
        soft_count,
        top_locations,
        message,
        recommendation: recommendation.to_string(),
    })
}
