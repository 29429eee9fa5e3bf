//! Per-report slowdown classification.
//!
//! Formula: speed_drop = (average - current) / average * 100, floored at 0.
//! A single report never confirms a soft spot; see `soft_spot` for that.

use crate::records::SlowdownSeverity;

pub const CRITICAL_DROP_PERCENT: f64 = 50.0;
pub const SOFT_DROP_PERCENT: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowdownClassification {
    pub speed_drop_percent: f64,
    pub severity: SlowdownSeverity,
}

/// Speed drop relative to the truck's running average.
///
/// An average of zero (or less) has no meaningful drop and yields 0.
pub fn speed_drop_percent(average_speed: f64, current_speed: f64) -> f64 {
    if !(average_speed > 0.0) || !current_speed.is_finite() {
        return 0.0;
    }
    ((average_speed - current_speed) * 100.0 / average_speed).max(0.0)
}

pub fn severity_for_drop(speed_drop_percent: f64) -> SlowdownSeverity {
    if speed_drop_percent >= CRITICAL_DROP_PERCENT {
        SlowdownSeverity::Critical
    } else if speed_drop_percent >= SOFT_DROP_PERCENT {
        SlowdownSeverity::Soft
    } else {
        SlowdownSeverity::None
    }
}

pub fn classify_slowdown(average_speed: f64, current_speed: f64) -> SlowdownClassification {
    let speed_drop_percent = speed_drop_percent(average_speed, current_speed);
    SlowdownClassification {
        speed_drop_percent,
        severity: severity_for_drop(speed_drop_percent),
    }
}
