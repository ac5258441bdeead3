// crates/epayroll-core/src/core/time.rs
// ============================================================================
// Module: Electronic Payroll Time Model
// Description: Unix-millisecond timestamps and issue date/time rendering.
// Purpose: Keep every recorded instant explicit and reproducible.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Runtime components never read the wall clock directly; they receive
//! [`Timestamp`] values from an injected clock. Issue dates and times are
//! rendered in the organization's fixed UTC offset so the canonical document
//! and the CUNE agree on the same textual values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::Date;
use time::OffsetDateTime;
use time::UtcOffset;
use time::macros::format_description;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when rendering or parsing calendar values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// Timestamp is outside the representable calendar range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
    /// UTC offset is not a valid whole-minute offset.
    #[error("invalid utc offset: {0} minutes")]
    InvalidOffset(i16),
    /// Calendar date text is malformed.
    #[error("invalid calendar date: {0}")]
    InvalidDate(String),
    /// Formatting failed.
    #[error("time formatting failed: {0}")]
    Format(String),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Instant expressed as unix epoch milliseconds.
///
/// # Invariants
/// - Values are supplied by callers; the type never reads the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp shifted forward, saturating at the maximum.
    #[must_use]
    pub fn saturating_add_millis(self, millis: u64) -> Self {
        let delta = i64::try_from(millis).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(delta))
    }

    /// Returns the timestamp shifted backward, saturating at the minimum.
    #[must_use]
    pub fn saturating_sub_millis(self, millis: u64) -> Self {
        let delta = i64::try_from(millis).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(delta))
    }

    /// Returns the absolute distance to another timestamp in milliseconds.
    #[must_use]
    pub const fn abs_diff_millis(self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }
}

// ============================================================================
// SECTION: Calendar Rendering
// ============================================================================

/// Issue date and time rendered in the organization's offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueMoment {
    /// Calendar date as `YYYY-MM-DD`.
    pub date: String,
    /// Wall-clock time as `HH:MM:SS±hh:mm`.
    pub time: String,
}

/// Renders a timestamp as issue date and time in a fixed UTC offset.
///
/// # Errors
///
/// Returns [`TimeError`] when the timestamp or offset is out of range.
pub fn issue_moment(at: Timestamp, utc_offset_minutes: i16) -> Result<IssueMoment, TimeError> {
    let offset = UtcOffset::from_whole_seconds(i32::from(utc_offset_minutes) * 60)
        .map_err(|_| TimeError::InvalidOffset(utc_offset_minutes))?;
    let nanos = i128::from(at.as_unix_millis()) * 1_000_000;
    let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|err| TimeError::OutOfRange(err.to_string()))?
        .to_offset(offset);
    let date = instant
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| TimeError::Format(err.to_string()))?;
    let time = instant
        .format(format_description!(
            "[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
        ))
        .map_err(|err| TimeError::Format(err.to_string()))?;
    Ok(IssueMoment {
        date,
        time,
    })
}

/// Parses a `YYYY-MM-DD` calendar date.
///
/// # Errors
///
/// Returns [`TimeError::InvalidDate`] when the text is not a valid date.
pub fn parse_calendar_date(text: &str) -> Result<Date, TimeError> {
    Date::parse(text, format_description!("[year]-[month]-[day]"))
        .map_err(|_| TimeError::InvalidDate(text.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test fixtures use unwraps for clarity.")]

    use super::*;

    #[test]
    fn issue_moment_uses_organization_offset() {
        // 2024-01-31T03:30:00Z rendered at UTC-05:00.
        let at = Timestamp::from_unix_millis(1_706_671_800_000);
        let moment = issue_moment(at, -300).unwrap();
        assert_eq!(moment.date, "2024-01-30");
        assert_eq!(moment.time, "22:30:00-05:00");
    }

    #[test]
    fn issue_moment_renders_positive_offsets_with_sign() {
        let at = Timestamp::from_unix_millis(0);
        let moment = issue_moment(at, 90).unwrap();
        assert_eq!(moment.date, "1970-01-01");
        assert_eq!(moment.time, "01:30:00+01:30");
    }

    #[test]
    fn calendar_dates_are_validated() {
        assert!(parse_calendar_date("2024-02-29").is_ok());
        assert!(parse_calendar_date("2023-02-29").is_err());
        assert!(parse_calendar_date("2024/01/01").is_err());
    }
}
