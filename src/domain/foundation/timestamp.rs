//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Milliseconds elapsed from `other` to this timestamp.
    ///
    /// Returns 0 if `other` is after self.
    pub fn millis_since(&self, other: &Timestamp) -> u64 {
        self.0
            .signed_duration_since(other.0)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Creates a new timestamp by adding the specified number of milliseconds.
    pub fn plus_millis(&self, millis: u64) -> Self {
        Self(self.0 + Duration::milliseconds(millis as i64))
    }

    /// Creates a timestamp from Unix milliseconds.
    pub fn from_unix_millis(millis: u64) -> Self {
        use chrono::TimeZone;
        Self(
            Utc.timestamp_millis_opt(millis as i64)
                .single()
                .unwrap_or_default(),
        )
    }

    /// Returns the timestamp as Unix milliseconds.
    pub fn as_unix_millis(&self) -> u64 {
        self.0.timestamp_millis().max(0) as u64
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn timestamp_ordering_works() {
        let ts1 = Timestamp::now();
        sleep(Duration::from_millis(10));
        let ts2 = Timestamp::now();

        assert!(ts1.is_before(&ts2));
        assert!(ts2.is_after(&ts1));
        assert!(ts1 < ts2);
    }

    #[test]
    fn millis_since_is_saturating() {
        let ts1 = Timestamp::now();
        let ts2 = ts1.plus_millis(250);

        assert_eq!(ts2.millis_since(&ts1), 250);
        assert_eq!(ts1.millis_since(&ts2), 0);
    }

    #[test]
    fn unix_millis_round_trips() {
        let millis = 1_705_276_800_123_u64;
        let ts = Timestamp::from_unix_millis(millis);
        assert_eq!(ts.as_unix_millis(), millis);
    }

    #[test]
    fn timestamp_serializes_to_json() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).unwrap();
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }
}
