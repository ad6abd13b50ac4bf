//! Market-aware time-to-live policies for quote data.
//!
//! A policy answers one question: given the wall-clock time a value was
//! fetched, how many whole seconds remain until the upstream source publishes
//! a newer one. Quote-backed stores use the answer both to skip network
//! round-trips while cached data is still current and to schedule the next
//! proactive refresh.
//!
//! All policies are pure functions of the local wall-clock time. Sub-second
//! precision is discarded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

const SECONDS_PER_HOUR: u64 = 3600;

/// Last whole second of a day (23:59:59).
const LAST_SECOND_OF_DAY: u64 = 86_399;

/// Stock quotes are published ten seconds before the top of the hour.
pub const DEFAULT_PUBLISH_LEAD_SECONDS: u32 = 10;

// ============================================================================
// Policy
// ============================================================================

/// How long a cached quote stays current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "PolicyRepr")]
pub enum TtlPolicy {
    /// Expire at the last second of the current day (metal spot prices).
    #[default]
    EndOfDay,
    /// Expire at the next hourly publish boundary, `lead_seconds` before the
    /// top of the hour. Inside the lead window the boundary rolls over to the
    /// following hour.
    HourlyPublish { lead_seconds: u32 },
    /// Constant lifetime independent of the time of day. Never zero when
    /// parsed from text or config.
    FixedInterval { seconds: u64 },
}

/// Unvalidated shape of `TtlPolicy` as it appears in config files.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PolicyRepr {
    EndOfDay,
    HourlyPublish { lead_seconds: u32 },
    FixedInterval { seconds: u64 },
}

impl TryFrom<PolicyRepr> for TtlPolicy {
    type Error = PolicyParseError;

    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        match repr {
            PolicyRepr::EndOfDay => Ok(TtlPolicy::EndOfDay),
            PolicyRepr::HourlyPublish { lead_seconds } => Ok(TtlPolicy::HourlyPublish { lead_seconds }),
            PolicyRepr::FixedInterval { seconds: 0 } => Err(PolicyParseError::ZeroInterval),
            PolicyRepr::FixedInterval { seconds } => Ok(TtlPolicy::FixedInterval { seconds }),
        }
    }
}

/// Result of evaluating a policy at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlDecision {
    pub seconds_until_expiry: u64,
}

impl TtlDecision {
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.seconds_until_expiry)
    }
}

impl TtlPolicy {
    /// Hourly publish policy with the lead observed for stock quotes.
    pub fn hourly() -> Self {
        TtlPolicy::HourlyPublish {
            lead_seconds: DEFAULT_PUBLISH_LEAD_SECONDS,
        }
    }

    /// Seconds until data fetched at `now` should be considered stale.
    pub fn ttl_seconds(&self, now: NaiveDateTime) -> u64 {
        match *self {
            TtlPolicy::EndOfDay => {
                let seconds_into_day = u64::from(now.time().num_seconds_from_midnight());
                LAST_SECOND_OF_DAY.saturating_sub(seconds_into_day)
            }
            TtlPolicy::HourlyPublish { lead_seconds } => {
                let lead = u64::from(lead_seconds).min(SECONDS_PER_HOUR);
                let seconds_into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
                let boundary = SECONDS_PER_HOUR - lead;
                if seconds_into_hour < boundary {
                    boundary - seconds_into_hour
                } else {
                    boundary + SECONDS_PER_HOUR - seconds_into_hour
                }
            }
            TtlPolicy::FixedInterval { seconds } => seconds,
        }
    }

    pub fn decide(&self, now: NaiveDateTime) -> TtlDecision {
        TtlDecision {
            seconds_until_expiry: self.ttl_seconds(now),
        }
    }

    /// Evaluate the policy against the wall-clock time of `now` in its own zone.
    pub fn ttl_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> u64 {
        self.ttl_seconds(now.naive_local())
    }

    /// Instant at which a value fetched at `fetched_at` expires, evaluated in
    /// the local timezone.
    pub fn expires_at(&self, fetched_at: DateTime<Utc>) -> DateTime<Utc> {
        let local = fetched_at.with_timezone(&chrono::Local);
        let ttl = self.ttl_at(&local);
        let truncated = fetched_at - Duration::nanoseconds(i64::from(fetched_at.nanosecond()));
        truncated + Duration::seconds(ttl as i64)
    }

    /// Whether a value fetched at `fetched_at` is still current at `now`.
    pub fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < self.expires_at(fetched_at)
    }
}

impl fmt::Display for TtlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlPolicy::EndOfDay => write!(f, "end-of-day"),
            TtlPolicy::HourlyPublish { lead_seconds } => write!(f, "hourly:{}", lead_seconds),
            TtlPolicy::FixedInterval { seconds } => write!(f, "fixed:{}", seconds),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyParseError {
    #[error("Unknown TTL policy: {0} (expected end-of-day, hourly[:LEAD] or fixed:SECONDS)")]
    Unknown(String),

    #[error("Invalid number in TTL policy: {0}")]
    InvalidNumber(String),

    #[error("Fixed TTL interval must be at least one second")]
    ZeroInterval,
}

impl FromStr for TtlPolicy {
    type Err = PolicyParseError;

    /// Parses `end-of-day`, `hourly`, `hourly:LEAD` and `fixed:SECONDS`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (kind, arg) = match lower.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (lower.as_str(), None),
        };

        match (kind, arg) {
            ("end-of-day" | "eod" | "metal", None) => Ok(TtlPolicy::EndOfDay),
            ("hourly" | "stock", None) => Ok(TtlPolicy::hourly()),
            ("hourly", Some(lead)) => lead
                .parse()
                .map(|lead_seconds| TtlPolicy::HourlyPublish { lead_seconds })
                .map_err(|_| PolicyParseError::InvalidNumber(lead.to_string())),
            ("fixed", Some(secs)) => match secs.parse::<u64>() {
                Ok(0) => Err(PolicyParseError::ZeroInterval),
                Ok(seconds) => Ok(TtlPolicy::FixedInterval { seconds }),
                Err(_) => Err(PolicyParseError::InvalidNumber(secs.to_string())),
            },
            _ => Err(PolicyParseError::Unknown(s.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
