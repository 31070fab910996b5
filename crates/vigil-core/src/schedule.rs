//! Site check schedules: fixed intervals and cron expressions.
//!
//! A [`Schedule`] is parsed once into an immutable value; the next fire
//! time is a pure function of `(now, schedule)` so the scheduler never
//! holds mutable schedule state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

/// Parsed schedule for a monitored site.
///
/// Two forms are accepted:
/// - intervals with an `s`/`m`/`h`/`d` suffix, e.g. `"5m"`, `"12h"`
/// - five-field cron expressions, e.g. `"*/15 * * * *"`
#[derive(Debug, Clone)]
pub struct Schedule {
    raw: String,
    kind: ScheduleKind,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Parse a schedule expression. Malformed input is rejected with a
    /// diagnostic so registration fails before a job is created.
    pub fn parse(expr: &str) -> Result<Self, AppError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(AppError::ScheduleError("empty schedule expression".into()));
        }

        // Five fields means cron; anything else is an interval.
        if trimmed.split_whitespace().count() >= 5 {
            return Self::parse_cron(trimmed);
        }
        Self::parse_interval(trimmed)
    }

    fn parse_cron(expr: &str) -> Result<Self, AppError> {
        // The cron crate wants a seconds field; operators write the
        // classic five-field form.
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(AppError::ScheduleError(format!(
                "cron expression must have exactly 5 fields, got {}: '{}'",
                fields.len(),
                expr
            )));
        }
        let with_seconds = format!("0 {}", fields.join(" "));
        let schedule = cron::Schedule::from_str(&with_seconds)
            .map_err(|e| AppError::ScheduleError(format!("invalid cron '{expr}': {e}")))?;

        Ok(Self {
            raw: expr.to_string(),
            kind: ScheduleKind::Cron(Box::new(schedule)),
        })
    }

    fn parse_interval(expr: &str) -> Result<Self, AppError> {
        if !expr.is_ascii() {
            return Err(AppError::ScheduleError(format!(
                "invalid interval expression '{expr}'"
            )));
        }
        let (value, unit) = expr.split_at(expr.len().saturating_sub(1));
        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86400,
            _ => {
                return Err(AppError::ScheduleError(format!(
                    "interval must end in s/m/h/d, got '{expr}'"
                )));
            }
        };
        let n: u64 = value.parse().map_err(|_| {
            AppError::ScheduleError(format!("invalid interval value in '{expr}'"))
        })?;
        if n == 0 {
            return Err(AppError::ScheduleError(format!(
                "interval must be positive, got '{expr}'"
            )));
        }

        Ok(Self {
            raw: expr.to_string(),
            kind: ScheduleKind::Every(Duration::from_secs(n * multiplier)),
        })
    }

    /// The next fire time strictly after `now`.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match &self.kind {
            ScheduleKind::Every(d) => {
                now + TimeDelta::from_std(*d).unwrap_or(TimeDelta::seconds(60))
            }
            ScheduleKind::Cron(schedule) => schedule
                .after(&now)
                .next()
                // A cron expression with no future firings (possible with
                // fixed dates in the past) falls back to a daily recheck.
                .unwrap_or(now + TimeDelta::days(1)),
        }
    }

    /// The fixed interval, when this schedule is interval-based.
    pub fn interval(&self) -> Option<Duration> {
        match &self.kind {
            ScheduleKind::Every(d) => Some(*d),
            ScheduleKind::Cron(_) => None,
        }
    }

    pub fn is_cron(&self) -> bool {
        matches!(self.kind, ScheduleKind::Cron(_))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Schedule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Serialize for Schedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Schedule::parse(&raw).map_err(serde::de::Error::custom)
    }
}
