//! Parsing of throttle period and cooldown strings.
//!
//! A period is a number followed by a single unit suffix: `s` (seconds),
//! `m` (minutes), `h` (hours) or `d` (days). Fractional numbers are accepted,
//! so `0.5s` and `1.5h` are both valid.

use std::time::Duration;

use crate::error::{Result, ThrottleError};

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_HOUR: f64 = 3600.0;
const SECS_PER_DAY: f64 = 86400.0;

/// Longest accepted period or cooldown: 100 years.
pub const MAX_PERIOD: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Parse a period string such as `1s`, `5m`, `1h` or `1d` into a [`Duration`].
pub fn parse_period(period: &str) -> Result<Duration> {
    let trimmed = period.trim();
    let Some(unit) = trimmed.chars().last() else {
        return Err(ThrottleError::Config("empty period string".to_string()));
    };

    let multiplier = match unit {
        's' => 1.0,
        'm' => SECS_PER_MINUTE,
        'h' => SECS_PER_HOUR,
        'd' => SECS_PER_DAY,
        other => {
            return Err(ThrottleError::Config(format!(
                "{} can't be converted to a duration, unknown unit '{}'",
                period, other
            )))
        }
    };

    let number = &trimmed[..trimmed.len() - unit.len_utf8()];
    let value: f64 = number.parse().map_err(|_| {
        ThrottleError::Config(format!(
            "{} can't be converted to a duration, '{}' is not a number",
            period, number
        ))
    })?;

    if !value.is_finite() || value <= 0.0 {
        return Err(ThrottleError::Config(format!(
            "{} must be a positive duration",
            period
        )));
    }

    let duration = Duration::try_from_secs_f64(value * multiplier)
        .map_err(|e| ThrottleError::Config(format!("{} is out of range: {}", period, e)))?;
    if duration.is_zero() {
        return Err(ThrottleError::Config(format!(
            "{} rounds down to a zero duration",
            period
        )));
    }

    if duration > MAX_PERIOD {
        return Err(ThrottleError::Config(format!(
            "{} exceeds the longest supported period of {} days",
            period,
            MAX_PERIOD.as_secs() / 86_400
        )));
    }

    Ok(duration)
}
