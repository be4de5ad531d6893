//! Points in time as stored by Cocoa.
//!
//! Binary plists and `NSDate` archives store time as seconds since the Apple
//! epoch (2001-01-01T00:00:00Z). [`Timestamp`] keeps the Unix-epoch value and
//! converts on the way in and out.

use chrono::{DateTime, TimeZone, Utc};

/// Seconds between the Unix epoch and the Apple epoch
/// (Foundation's `NSTimeIntervalSince1970`)
pub const UNIX_TO_APPLE_EPOCH_DELTA: f64 = 978_307_200.0;

/// An immutable point in time with sub-second precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp {
    unix: f64,
}

impl Timestamp {
    /// Creates a timestamp from seconds since 1970-01-01T00:00:00Z
    pub fn from_unix(seconds: f64) -> Self {
        Self { unix: seconds }
    }

    /// Creates a timestamp from seconds since 2001-01-01T00:00:00Z
    pub fn from_apple(seconds: f64) -> Self {
        Self {
            unix: seconds + UNIX_TO_APPLE_EPOCH_DELTA,
        }
    }

    /// Creates a timestamp from a UTC date-time
    pub fn from_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> Self {
        let seconds = datetime.timestamp() as f64;
        let nanos = f64::from(datetime.timestamp_subsec_nanos()) / 1e9;
        Self::from_unix(seconds + nanos)
    }

    /// Seconds since the Unix epoch
    pub fn unix_seconds(&self) -> f64 {
        self.unix
    }

    /// Seconds since the Apple epoch
    pub fn apple_seconds(&self) -> f64 {
        self.unix - UNIX_TO_APPLE_EPOCH_DELTA
    }

    /// Converts to a UTC date-time, rounded to the nearest microsecond.
    ///
    /// Returns `None` for non-finite values or instants chrono cannot represent.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if !self.unix.is_finite() {
            return None;
        }

        let micros = (self.unix * 1e6).round();
        if micros.abs() >= i64::MAX as f64 {
            return None;
        }
        let micros = micros as i64;
        let seconds = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        DateTime::from_timestamp(seconds, nanos)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::from_datetime(&datetime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_offset() {
        let ts = Timestamp::from_apple(0.0);
        assert_eq!(ts.unix_seconds(), 978_307_200.0);
        assert_eq!(ts.apple_seconds(), 0.0);
        assert_eq!(
            ts.to_datetime(),
            Some(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_past_date() {
        let ts = Timestamp::from_apple(-100.0);
        assert_eq!(
            ts.to_datetime(),
            Some(Utc.with_ymd_and_hms(2000, 12, 31, 23, 58, 20).unwrap())
        );
    }

    #[test]
    fn test_datetime_round_trip() {
        let dt = Utc.with_ymd_and_hms(2017, 6, 23, 0, 4, 0).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.to_datetime(), Some(dt));
    }

    #[test]
    fn test_non_finite() {
        assert_eq!(Timestamp::from_unix(f64::NAN).to_datetime(), None);
        assert_eq!(Timestamp::from_unix(f64::INFINITY).to_datetime(), None);
    }
}
