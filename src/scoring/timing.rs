//! Launch timing relative to historically active windows

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use super::TimingConfig;

/// Timing score in [0, 100] for a creation time
pub fn timing_score(created_at: DateTime<Utc>, config: &TimingConfig) -> f64 {
    let hour = created_at.hour();

    let base = if in_window(hour, config.active_start_hour, config.active_end_hour) {
        config.active_score
    } else if in_window(
        hour,
        config.shoulder_start_hour,
        (config.active_start_hour + 23) % 24,
    ) {
        config.shoulder_score
    } else {
        config.off_hours_score
    };

    let factor = match created_at.weekday() {
        Weekday::Sat | Weekday::Sun => config.weekend_factor,
        _ => 1.0,
    };

    (base * factor).clamp(0.0, 100.0)
}

/// Inclusive hour window that may wrap past midnight
fn in_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        (start..=end).contains(&hour)
    } else {
        hour >= start || hour <= end
    }
}
