//! Pump health tiers and siltation detection.
//!
//! Tier rules: capacity < 60% or siltation -> red, 60-69% -> yellow,
//! otherwise green. Siltation requires torque RISING and discharge FALLING.

use crate::records::{DischargeTrend, HealthTier, PumpState, PumpStatus, TorqueTrend};
use serde::Serialize;

pub const RED_BELOW_PERCENT: u32 = 60;
pub const YELLOW_BELOW_PERCENT: u32 = 70;

impl PumpState {
    /// Rounded current/rated ratio. A rated discharge of 0 is read as 1.
    pub fn capacity_percent(&self) -> u32 {
        capacity_percent(self.rated_discharge, self.current_discharge)
    }

    /// Only running pumps move water.
    pub fn effective_discharge(&self) -> f64 {
        match self.status {
            PumpStatus::Running => self.current_discharge.max(0.0),
            PumpStatus::Stopped | PumpStatus::Fault => 0.0,
        }
    }
}

pub fn capacity_percent(rated_discharge: f64, current_discharge: f64) -> u32 {
    let rated = if rated_discharge > 0.0 {
        rated_discharge
    } else {
        1.0
    };
    (current_discharge / rated * 100.0).round().max(0.0) as u32
}

pub fn siltation_suspected(torque_trend: TorqueTrend, discharge_trend: DischargeTrend) -> bool {
    torque_trend == TorqueTrend::Rising && discharge_trend == DischargeTrend::Falling
}

/// Sum of effective discharge; an empty set contributes nothing.
pub fn total_active_discharge<'a, I>(pumps: I) -> f64
where
    I: IntoIterator<Item = &'a PumpState>,
{
    pumps.into_iter().map(PumpState::effective_discharge).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiltationCheck {
    pub detected: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpHealth {
    pub health: HealthTier,
    pub capacity_percent: u32,
    pub capacity_loss: f64,
    pub siltation_suspected: bool,
    pub maintenance_required: bool,
    pub message: String,
    pub siltation: SiltationCheck,
}

pub fn evaluate_pump(pump: &PumpState) -> PumpHealth {
    let capacity_percent = pump.capacity_percent();
    let siltation = siltation_suspected(pump.torque_trend, pump.discharge_trend);

    let health = if capacity_percent < RED_BELOW_PERCENT || siltation {
        HealthTier::Red
    } else if capacity_percent < YELLOW_BELOW_PERCENT {
        HealthTier::Yellow
    } else {
        HealthTier::Green
    };

    let rated = if pump.rated_discharge > 0.0 {
        pump.rated_discharge
    } else {
        1.0
    };

    PumpHealth {
        health,
        capacity_percent,
        capacity_loss: rated - pump.current_discharge,
        siltation_suspected: siltation,
        maintenance_required: health == HealthTier::Red,
        message: health_message(pump.status, siltation, capacity_percent),
        siltation: siltation_check(siltation),
    }
}

fn health_message(status: PumpStatus, siltation: bool, capacity_percent: u32) -> String {
    let message = if status == PumpStatus::Fault {
        "FAULT: Pump malfunction - immediate attention required"
    } else if siltation {
        "ALERT: Siltation detected - desilting required"
    } else if capacity_percent < RED_BELOW_PERCENT {
        "CRITICAL: Maintenance urgently required"
    } else if capacity_percent < YELLOW_BELOW_PERCENT {
        "WARNING: Performance degrading, schedule maintenance"
    } else {
        "HEALTHY: Pump operating normally"
    };
    message.to_string()
}

fn siltation_check(detected: bool) -> SiltationCheck {
    if detected {
        SiltationCheck {
            detected,
            message: "Siltation suspected - desilting required".to_string(),
            recommendation: Some("Deploy vacuum truck or manual cleaning".to_string()),
        }
    } else {
        SiltationCheck {
            detected,
            message: "No siltation detected".to_string(),
            recommendation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpSummaryDetail {
    pub pump_id: String,
    pub sump_id: String,
    pub status: PumpStatus,
    pub health: HealthTier,
    pub rated_discharge: f64,
    pub current_discharge: f64,
    pub capacity_percent: u32,
    pub siltation_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpHealthSummary {
    pub total_pumps: usize,
    pub running_pumps: usize,
    pub stopped_pumps: usize,
    pub fault_pumps: usize,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
    pub siltation_issues: usize,
    pub total_active_discharge: f64,
    pub pump_details: Vec<PumpSummaryDetail>,
}

/// Fleet-wide counts, evaluated fresh from each pump's readings.
pub fn summarize_pumps(pumps: &[PumpState]) -> PumpHealthSummary {
    let mut summary = PumpHealthSummary {
        total_pumps: pumps.len(),
        running_pumps: 0,
        stopped_pumps: 0,
        fault_pumps: 0,
        healthy: 0,
        warning: 0,
        critical: 0,
        siltation_issues: 0,
        total_active_discharge: total_active_discharge(pumps),
        pump_details: Vec::with_capacity(pumps.len()),
    };

    for pump in pumps {
        match pump.status {
            PumpStatus::Running => summary.running_pumps += 1,
            PumpStatus::Stopped => summary.stopped_pumps += 1,
            PumpStatus::Fault => summary.fault_pumps += 1,
        }

        let evaluated = evaluate_pump(pump);
        match evaluated.health {
            HealthTier::Green => summary.healthy += 1,
            HealthTier::Yellow => summary.warning += 1,
            HealthTier::Red => summary.critical += 1,
        }
        if evaluated.siltation_suspected {
            summary.siltation_issues += 1;
        }

        summary.pump_details.push(PumpSummaryDetail {
            pump_id: pump.id.clone(),
            sump_id: pump.sump_id.clone(),
            status: pump.status,
            health: evaluated.health,
            rated_discharge: pump.rated_discharge,
            current_discharge: pump.current_discharge,
            capacity_percent: evaluated.capacity_percent,
            siltation_detected: evaluated.siltation_suspected,
        });
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MotorSpec;

    fn pump(rated: f64, current: f64) -> PumpState {
        PumpState {
            id: "P-1".to_string(),
            sump_id: "sump-1".to_string(),
            rated_discharge: rated,
            current_discharge: current,
            status: PumpStatus::Running,
            torque_trend: TorqueTrend::Normal,
            discharge_trend: DischargeTrend::Normal,
            motor: MotorSpec::default(),
            health: HealthTier::Green,
            is_active: true,
        }
    }

    fn with_trends(mut pump: PumpState, torque: TorqueTrend, discharge: DischargeTrend) -> PumpState {
        pump.torque_trend = torque;
        pump.discharge_trend = discharge;
        pump
    }

    #[test]
    fn fifty_nine_percent_is_red() {
        let health = evaluate_pump(&pump(100.0, 59.0));

        assert_eq!(health.capacity_percent, 59);
        assert_eq!(health.health, HealthTier::Red);
        assert!(health.maintenance_required);
        assert_eq!(health.message, "CRITICAL: Maintenance urgently required");
    }

    #[test]
    fn exactly_sixty_percent_is_yellow() {
        let health = evaluate_pump(&pump(100.0, 60.0));

        assert_eq!(health.health, HealthTier::Yellow);
        assert!(!health.maintenance_required);
    }

    #[test]
    fn seventy_percent_is_green() {
        let health = evaluate_pump(&pump(100.0, 70.0));

        assert_eq!(health.health, HealthTier::Green);
        assert_eq!(health.capacity_loss, 30.0);
        assert_eq!(health.message, "HEALTHY: Pump operating normally");
    }

    #[test]
    fn rising_torque_alone_is_not_siltation() {
        let health = evaluate_pump(&with_trends(
            pump(100.0, 90.0),
            TorqueTrend::Rising,
            DischargeTrend::Normal,
        ));

        assert!(!health.siltation_suspected);
        assert_eq!(health.health, HealthTier::Green);
    }

    #[test]
    fn falling_discharge_alone_is_not_siltation() {
        let health = evaluate_pump(&with_trends(
            pump(100.0, 90.0),
            TorqueTrend::Normal,
            DischargeTrend::Falling,
        ));

        assert!(!health.siltation_suspected);
    }

    #[test]
    fn siltation_forces_red_even_at_full_capacity() {
        let health = evaluate_pump(&with_trends(
            pump(100.0, 95.0),
            TorqueTrend::Rising,
            DischargeTrend::Falling,
        ));

        assert!(health.siltation_suspected);
        assert_eq!(health.health, HealthTier::Red);
        assert_eq!(health.message, "ALERT: Siltation detected - desilting required");
        assert_eq!(
            health.siltation.recommendation.as_deref(),
            Some("Deploy vacuum truck or manual cleaning")
        );
    }

    #[test]
    fn fault_status_overrides_message() {
        let mut faulted = pump(100.0, 95.0);
        faulted.status = PumpStatus::Fault;

        let health = evaluate_pump(&faulted);

        assert_eq!(
            health.message,
            "FAULT: Pump malfunction - immediate attention required"
        );
    }

    #[test]
    fn zero_rated_discharge_is_treated_as_one() {
        assert_eq!(capacity_percent(0.0, 0.0), 0);
        assert_eq!(capacity_percent(0.0, 2.0), 200);
    }

    #[test]
    fn only_running_pumps_contribute_discharge() {
        let running = pump(100.0, 80.0);
        let mut stopped = pump(100.0, 80.0);
        stopped.status = PumpStatus::Stopped;
        let mut fault = pump(100.0, 80.0);
        fault.status = PumpStatus::Fault;

        assert_eq!(total_active_discharge(&[running, stopped, fault]), 80.0);
        assert_eq!(total_active_discharge(&Vec::<PumpState>::new()), 0.0);
    }

    #[test]
    fn summary_counts_status_and_health() {
        let mut stopped = pump(100.0, 65.0);
        stopped.status = PumpStatus::Stopped;
        let silted = with_trends(pump(100.0, 90.0), TorqueTrend::Rising, DischargeTrend::Falling);

        let summary = summarize_pumps(&[pump(100.0, 90.0), stopped, silted]);

        assert_eq!(summary.total_pumps, 3);
        assert_eq!(summary.running_pumps, 2);
        assert_eq!(summary.stopped_pumps, 1);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.warning, 1);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.siltation_issues, 1);
        assert_eq!(summary.total_active_discharge, 180.0);
        assert_eq!(summary.pump_details.len(), 3);
    }
}
