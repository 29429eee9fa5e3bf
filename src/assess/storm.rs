//! Storm risk over the next 24 hours and the sump early-warning table.

use crate::records::ForecastPoint;
use serde::Serialize;

/// Forecast points are 3-hour windows; 8 of them cover a day.
pub const LOOKAHEAD_POINTS: usize = 8;
pub const HEAVY_RAIN_MM: f64 = 50.0;
pub const STORM_PROBABILITY_PERCENT: f64 = 70.0;
pub const HIGH_HUMIDITY_PERCENT: f64 = 85.0;
pub const STRONG_WIND_MS: f64 = 10.0;

pub const CAUTION_CAPACITY_PERCENT: f64 = 70.0;
pub const ELEVATED_CAPACITY_PERCENT: f64 = 50.0;
pub const DEFAULT_SUMP_CAPACITY_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StormRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StormAnalysis {
    pub heavy_rain_detected: bool,
    pub storm_probable: bool,
    pub high_humidity: bool,
    pub strong_wind: bool,
    pub risk_level: StormRisk,
    pub recommendations: Vec<String>,
}

pub fn analyze_storm_risk(forecast: &[ForecastPoint]) -> StormAnalysis {
    let mut analysis = StormAnalysis {
        heavy_rain_detected: false,
        storm_probable: false,
        high_humidity: false,
        strong_wind: false,
        risk_level: StormRisk::Low,
        recommendations: Vec::new(),
    };

    for point in forecast.iter().take(LOOKAHEAD_POINTS) {
        if point.rainfall_mm > HEAVY_RAIN_MM {
            analysis.heavy_rain_detected = true;
            analysis
                .recommendations
                .push(format!("Heavy rainfall expected: {:.1}mm", point.rainfall_mm));
        }
        if point.rain_probability > STORM_PROBABILITY_PERCENT {
            analysis.storm_probable = true;
        }
        if point.humidity > HIGH_HUMIDITY_PERCENT {
            analysis.high_humidity = true;
        }
        if point.wind_speed > STRONG_WIND_MS {
            analysis.strong_wind = true;
            analysis
                .recommendations
                .push(format!("Strong winds: {:.1} m/s", point.wind_speed));
        }
    }

    if analysis.heavy_rain_detected && analysis.storm_probable {
        analysis.risk_level = StormRisk::High;
        analysis
            .recommendations
            .push("URGENT: Start pumping early to create surge capacity".to_string());
    } else if analysis.storm_probable {
        analysis.risk_level = StormRisk::Medium;
        analysis
            .recommendations
            .push("Prepare pumping systems in advance".to_string());
    }

    analysis
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EarlyWarningLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWarning {
    pub level: EarlyWarningLevel,
    pub recommended_actions: Vec<String>,
    pub weather_risk: StormRisk,
    pub sump_capacity_percent: f64,
    pub should_proceed_with_activity: bool,
}

/// Cross the storm tier with how full the sump is. Both capacity thresholds
/// are strict.
pub fn early_warning(analysis: &StormAnalysis, sump_capacity_percent: Option<f64>) -> EarlyWarning {
    let capacity = sump_capacity_percent
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_SUMP_CAPACITY_PERCENT);
    let (level, actions) = warning_cell(analysis.risk_level, capacity);

    EarlyWarning {
        level,
        recommended_actions: actions.iter().map(|action| action.to_string()).collect(),
        weather_risk: analysis.risk_level,
        sump_capacity_percent: capacity,
        should_proceed_with_activity: level != EarlyWarningLevel::Critical,
    }
}

const CRITICAL_ACTIONS: &[&str] = &[
    "START PUMPING IMMEDIATELY",
    "Monitor sump water level continuously",
    "Prepare for potential flooding",
];
const HIGH_ACTIONS: &[&str] = &[
    "Increase pumping rate",
    "Monitor weather updates",
    "Prepare additional pumps if available",
];
const PREVENTIVE_ACTIONS: &[&str] = &["Start preventive pumping", "Monitor sump level closely"];
const STORM_WATCH_ACTIONS: &[&str] = &["Increase pumping", "Monitor weather"];
const ROUTINE_ACTIONS: &[&str] = &["Routine monitoring"];

fn warning_cell(risk: StormRisk, capacity: f64) -> (EarlyWarningLevel, &'static [&'static str]) {
    match risk {
        StormRisk::High if capacity > CAUTION_CAPACITY_PERCENT => {
            (EarlyWarningLevel::Critical, CRITICAL_ACTIONS)
        }
        StormRisk::High if capacity > ELEVATED_CAPACITY_PERCENT => {
            (EarlyWarningLevel::High, HIGH_ACTIONS)
        }
        StormRisk::High => (EarlyWarningLevel::Medium, PREVENTIVE_ACTIONS),
        StormRisk::Medium if capacity > CAUTION_CAPACITY_PERCENT => {
            (EarlyWarningLevel::Medium, STORM_WATCH_ACTIONS)
        }
        StormRisk::Medium => (EarlyWarningLevel::Low, ROUTINE_ACTIONS),
        StormRisk::Low => (EarlyWarningLevel::None, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(rainfall_mm: f64, rain_probability: f64) -> ForecastPoint {
        ForecastPoint {
            rainfall_mm,
            rain_probability,
            ..ForecastPoint::default()
        }
    }

    fn analysis(risk_level: StormRisk) -> StormAnalysis {
        StormAnalysis {
            heavy_rain_detected: false,
            storm_probable: false,
            high_humidity: false,
            strong_wind: false,
            risk_level,
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn empty_forecast_is_low_risk() {
        let result = analyze_storm_risk(&[]);

        assert_eq!(result.risk_level, StormRisk::Low);
        assert!(result.recommendations.is_empty());
    }

    #[test]
    fn heavy_rain_with_storm_probability_is_high() {
        let result = analyze_storm_risk(&[point(10.0, 80.0), point(62.5, 40.0)]);

        assert!(result.heavy_rain_detected);
        assert!(result.storm_probable);
        assert_eq!(result.risk_level, StormRisk::High);
        assert_eq!(
            result.recommendations,
            vec![
                "Heavy rainfall expected: 62.5mm".to_string(),
                "URGENT: Start pumping early to create surge capacity".to_string(),
            ]
        );
    }

    #[test]
    fn heavy_rain_alone_stays_low() {
        let result = analyze_storm_risk(&[point(80.0, 20.0)]);

        assert!(result.heavy_rain_detected);
        assert_eq!(result.risk_level, StormRisk::Low);
    }

    #[test]
    fn storm_probability_alone_is_medium() {
        let result = analyze_storm_risk(&[point(5.0, 71.0)]);

        assert_eq!(result.risk_level, StormRisk::Medium);
        assert_eq!(
            result.recommendations,
            vec!["Prepare pumping systems in advance".to_string()]
        );
    }

    #[test]
    fn thresholds_are_strict() {
        let mut edge = point(50.0, 70.0);
        edge.humidity = 85.0;
        edge.wind_speed = 10.0;

        let result = analyze_storm_risk(&[edge]);

        assert!(!result.heavy_rain_detected);
        assert!(!result.storm_probable);
        assert!(!result.high_humidity);
        assert!(!result.strong_wind);
    }

    #[test]
    fn points_beyond_the_first_day_are_ignored() {
        let mut forecast = vec![point(0.0, 0.0); LOOKAHEAD_POINTS];
        forecast.push(point(120.0, 95.0));

        assert_eq!(analyze_storm_risk(&forecast).risk_level, StormRisk::Low);
    }

    #[test]
    fn wind_recommendations_follow_point_order() {
        let mut gusty = point(0.0, 0.0);
        gusty.wind_speed = 12.34;
        let mut wet_and_gusty = point(55.0, 0.0);
        wet_and_gusty.wind_speed = 15.0;

        let result = analyze_storm_risk(&[gusty, wet_and_gusty]);

        assert!(result.strong_wind);
        assert_eq!(
            result.recommendations,
            vec![
                "Strong winds: 12.3 m/s".to_string(),
                "Heavy rainfall expected: 55.0mm".to_string(),
                "Strong winds: 15.0 m/s".to_string(),
            ]
        );
    }

    #[test]
    fn high_risk_full_sump_is_critical() {
        let warning = early_warning(&analysis(StormRisk::High), Some(71.0));

        assert_eq!(warning.level, EarlyWarningLevel::Critical);
        assert!(!warning.should_proceed_with_activity);
        assert_eq!(warning.recommended_actions[0], "START PUMPING IMMEDIATELY");
        assert_eq!(warning.recommended_actions.len(), 3);
    }

    #[test]
    fn high_risk_table_uses_strict_capacity_bounds() {
        let high = analysis(StormRisk::High);

        assert_eq!(early_warning(&high, Some(70.0)).level, EarlyWarningLevel::High);
        assert_eq!(early_warning(&high, Some(50.5)).level, EarlyWarningLevel::High);
        assert_eq!(early_warning(&high, Some(50.0)).level, EarlyWarningLevel::Medium);
        assert_eq!(
            early_warning(&high, Some(20.0)).recommended_actions,
            vec![
                "Start preventive pumping".to_string(),
                "Monitor sump level closely".to_string(),
            ]
        );
    }

    #[test]
    fn medium_risk_table() {
        let medium = analysis(StormRisk::Medium);

        let full = early_warning(&medium, Some(90.0));
        assert_eq!(full.level, EarlyWarningLevel::Medium);
        assert_eq!(
            full.recommended_actions,
            vec!["Increase pumping".to_string(), "Monitor weather".to_string()]
        );

        let partial = early_warning(&medium, Some(60.0));
        assert_eq!(partial.level, EarlyWarningLevel::Low);
        assert_eq!(partial.recommended_actions, vec!["Routine monitoring".to_string()]);
        assert_eq!(early_warning(&medium, Some(10.0)).level, EarlyWarningLevel::Low);
    }

    #[test]
    fn low_risk_has_no_actions() {
        let warning = early_warning(&analysis(StormRisk::Low), Some(99.0));

        assert_eq!(warning.level, EarlyWarningLevel::None);
        assert!(warning.recommended_actions.is_empty());
        assert!(warning.should_proceed_with_activity);
    }

    #[test]
    fn missing_capacity_defaults_to_fifty() {
        let warning = early_warning(&analysis(StormRisk::High), None);

        assert_eq!(warning.sump_capacity_percent, 50.0);
        assert_eq!(warning.level, EarlyWarningLevel::Medium);
    }

    #[test]
    fn warning_serializes_lowercase_levels() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(early_warning(&analysis(StormRisk::Medium), Some(75.0)))?;

        assert_eq!(value["level"], "medium");
        assert_eq!(value["weatherRisk"], "medium");
        assert_eq!(value["shouldProceedWithActivity"], true);
        Ok(())
    }
}
