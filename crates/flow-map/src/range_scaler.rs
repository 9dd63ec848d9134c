//! Range Scaler
//!
//! Converts a date interval into a scale factor relative to the 7-day
//! baseline the flow ranges are expressed in.

use chrono::{DateTime, Utc};
use flow_core::{whole_days_between, DateRange, FlowError, FlowResult, SignalWindow};

/// Length of the window the baseline flow ranges describe
pub const BASELINE_DAYS: f64 = 7.0;

/// Whole days between `start` and `end` (rounded up) divided by 7.
///
/// A zero-length range is valid and scales to `0.0`.
pub fn scale_factor(start: DateTime<Utc>, end: DateTime<Utc>) -> FlowResult<f64> {
    if end < start {
        return Err(FlowError::InvalidRange { start, end });
    }
    Ok(whole_days_between(start, end) as f64 / BASELINE_DAYS)
}

pub fn scale_for(range: &DateRange) -> FlowResult<f64> {
    scale_factor(range.start(), range.end())
}

pub fn window_for(range: &DateRange) -> FlowResult<SignalWindow> {
    Ok(SignalWindow {
        date_range: *range,
        scale_factor: scale_for(range)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_zero_length_range_scales_to_zero() {
        assert_eq!(scale_factor(start(), start()).unwrap(), 0.0);
    }

    #[test]
    fn test_one_week_is_baseline() {
        assert_relative_eq!(scale_factor(start(), start() + Duration::days(7)).unwrap(), 1.0);
    }

    #[test]
    fn test_two_weeks_doubles() {
        assert_relative_eq!(scale_factor(start(), start() + Duration::days(14)).unwrap(), 2.0);
    }

    #[test]
    fn test_partial_day_rounds_up() {
        let scale = scale_factor(start(), start() + Duration::days(3) + Duration::minutes(5)).unwrap();
        assert_relative_eq!(scale, 4.0 / 7.0);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let err = scale_factor(start(), start() - Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, FlowError::InvalidRange { .. }));
    }

    #[test]
    fn test_window_carries_range() {
        let range = DateRange::last_days(30, start());
        let window = window_for(&range).unwrap();
        assert_eq!(window.date_range, range);
        assert_relative_eq!(window.scale_factor, 30.0 / 7.0);
    }
}
