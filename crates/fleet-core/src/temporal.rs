//! # Clock — Heartbeat and Audit Timestamps
//!
//! `Timestamp` is the single clock representation used for heartbeats,
//! provision bookkeeping (`provision_updated_at`) and record audit fields.
//! It is always UTC and truncated to whole seconds, so two conductors
//! comparing a heartbeat age against the staleness window agree on the
//! answer regardless of their local timezone.
//!
//! Non-UTC inputs are rejected by [`Timestamp::parse()`].

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Seconds-precision UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Wrap a chrono instant, dropping sub-second precision.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse an RFC 3339 timestamp. Only the `Z` suffix is accepted.
    pub fn parse(s: &str) -> Result<Self, FleetError> {
        if !s.ends_with('Z') {
            return Err(FleetError::InvalidTimestamp(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| FleetError::InvalidTimestamp(format!("{s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Create a timestamp from a Unix epoch value in seconds.
    pub fn from_epoch_secs(secs: i64) -> Result<Self, FleetError> {
        let dt = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| FleetError::InvalidTimestamp(format!("unix timestamp {secs}")))?;
        Ok(Self(dt))
    }

    /// The wrapped chrono value.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Unix epoch seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Whole seconds elapsed from `earlier` to `self`. Negative if `earlier`
    /// is in the future relative to `self`.
    pub fn seconds_since(&self, earlier: &Timestamp) -> i64 {
        self.epoch_secs() - earlier.epoch_secs()
    }

    /// Whether more than `max_age` has elapsed between `self` and `now`.
    pub fn is_older_than(&self, now: &Timestamp, max_age: Duration) -> bool {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        now.seconds_since(self) > max_age
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
