use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::models::Site;
use crate::schedule::Schedule;

/// Status of a monitoring job. Owned and mutated by the scheduler only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Running,
    Paused,
    Failed,
    CircuitOpen,
    /// Terminal, set on site deletion.
    Removed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
            JobStatus::CircuitOpen => "circuit_open",
            JobStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "failed" => Ok(JobStatus::Failed),
            "circuit_open" => Ok(JobStatus::CircuitOpen),
            "removed" => Ok(JobStatus::Removed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Retry backoff: `initial · base^(attempt−1)`, capped, with ±50% jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_secs_f64(config.initial_delay_seconds),
            max_delay: Duration::from_secs_f64(config.max_delay_seconds),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl RetryPolicy {
    /// Un-jittered delay for a given attempt (1-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Delay with jitter applied: uniform in [0.5, 1.5] × base delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor = 0.5 + jitter_unit() as f64;
        Duration::from_secs_f64((base.as_secs_f64() * factor).min(self.max_delay.as_secs_f64()))
    }
}

/// Uniform-ish value in [0, 1) from a time-seeded xorshift; good enough
/// for retry jitter, not crypto.
fn jitter_unit() -> f32 {
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x % 10_000) as f32 / 10_000.0
}

/// Scheduling state of one site's checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorJob {
    pub id: Uuid,
    pub site_id: Uuid,
    pub schedule: Schedule,
    pub status: JobStatus,
    pub priority: i32,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Consecutive failed checks, feeding site-down detection and the breaker.
    pub consecutive_failures: u32,
}

impl MonitorJob {
    /// A fresh job for a site, first run at the schedule's next fire.
    pub fn for_site(site: &Site, now: DateTime<Utc>, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id: site.id,
            schedule: site.schedule.clone(),
            status: JobStatus::Scheduled,
            priority: site.priority,
            next_run_at: site.schedule.next_fire(now),
            last_run_at: None,
            last_success_at: None,
            retry_count: 0,
            max_retries,
            consecutive_failures: 0,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the job is due at `now`, honoring the misfire grace window:
    /// late by no more than `grace` still runs, older misfires are dropped.
    pub fn due_state(&self, now: DateTime<Utc>, grace: Duration) -> DueState {
        if self.status != JobStatus::Scheduled && self.status != JobStatus::Failed {
            return DueState::NotDue;
        }
        if now < self.next_run_at {
            return DueState::NotDue;
        }
        let late = now - self.next_run_at;
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::seconds(30));
        if late <= grace {
            DueState::Due
        } else {
            DueState::Misfired
        }
    }

    /// Record a successful run and plan the next fire.
    pub fn complete_success(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Scheduled;
        self.last_run_at = Some(now);
        self.last_success_at = Some(now);
        self.retry_count = 0;
        self.consecutive_failures = 0;
        self.next_run_at = self.schedule.next_fire(now);
    }

    /// Record a failed run. Retryable failures back off; exhausted or
    /// non-retryable ones return to the regular cadence.
    pub fn complete_failure(&mut self, now: DateTime<Utc>, retryable: bool, policy: &RetryPolicy) {
        self.last_run_at = Some(now);
        self.consecutive_failures += 1;

        if retryable && self.can_retry() {
            self.retry_count += 1;
            self.status = JobStatus::Scheduled;
            let delay = policy.delay(self.retry_count);
            self.next_run_at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::seconds(60));
        } else {
            self.retry_count = 0;
            self.status = JobStatus::Failed;
            self.next_run_at = self.schedule.next_fire(now);
        }
    }

    /// Advance past a dropped misfire to the next regular fire.
    pub fn skip_misfire(&mut self, now: DateTime<Utc>) {
        self.next_run_at = self.schedule.next_fire(now);
    }
}

/// Result of the due-check against the misfire grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    NotDue,
    Due,
    /// Missed by more than the grace window; skip to the next fire.
    Misfired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SiteThresholds;
    use chrono::TimeZone;

    fn test_site(schedule: &str) -> Site {
        Site {
            id: Uuid::new_v4(),
            url: "https://example.com".into(),
            name: "example".into(),
            schedule: Schedule::parse(schedule).unwrap(),
            active: true,
            max_depth: 1,
            priority: 0,
            thresholds: SiteThresholds::default(),
            keep_scans: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn job_status_roundtrip() {
        for status in [
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Failed,
            JobStatus::CircuitOpen,
            JobStatus::Removed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: false,
        };
        assert_eq!(policy.base_delay(1), Duration::from_secs(10));
        assert_eq!(policy.base_delay(2), Duration::from_secs(20));
        assert_eq!(policy.base_delay(3), Duration::from_secs(40));
        assert_eq!(policy.base_delay(4), Duration::from_secs(60));
        assert_eq!(policy.base_delay(5), Duration::from_secs(60));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(600),
            exponential_base: 2.0,
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay(1).as_secs_f64();
            assert!((5.0..15.0).contains(&d), "delay out of band: {d}");
        }
    }

    #[test]
    fn new_job_is_scheduled_at_next_fire() {
        let site = test_site("5m");
        let job = MonitorJob::for_site(&site, now(), 3);
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.next_run_at, now() + TimeDelta::minutes(5));
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn due_state_respects_grace_window() {
        let site = test_site("5m");
        let mut job = MonitorJob::for_site(&site, now(), 3);
        job.next_run_at = now();

        let grace = Duration::from_secs(30);
        assert_eq!(job.due_state(now() - TimeDelta::seconds(1), grace), DueState::NotDue);
        assert_eq!(job.due_state(now(), grace), DueState::Due);
        assert_eq!(
            job.due_state(now() + TimeDelta::seconds(30), grace),
            DueState::Due
        );
        assert_eq!(
            job.due_state(now() + TimeDelta::seconds(31), grace),
            DueState::Misfired
        );
    }

    #[test]
    fn paused_jobs_are_never_due() {
        let site = test_site("5m");
        let mut job = MonitorJob::for_site(&site, now(), 3);
        job.next_run_at = now();
        job.status = JobStatus::Paused;
        assert_eq!(
            job.due_state(now(), Duration::from_secs(30)),
            DueState::NotDue
        );
    }

    #[test]
    fn success_resets_counters_and_reschedules() {
        let site = test_site("5m");
        let mut job = MonitorJob::for_site(&site, now(), 3);
        job.retry_count = 2;
        job.consecutive_failures = 4;

        job.complete_success(now());
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.consecutive_failures, 0);
        assert_eq!(job.next_run_at, now() + TimeDelta::minutes(5));
        assert_eq!(job.last_success_at, Some(now()));
    }

    #[test]
    fn retryable_failure_backs_off() {
        let site = test_site("1h");
        let mut job = MonitorJob::for_site(&site, now(), 3);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            exponential_base: 2.0,
            jitter: false,
        };

        job.complete_failure(now(), true, &policy);
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.consecutive_failures, 1);
        assert_eq!(job.next_run_at, now() + TimeDelta::minutes(1));
    }

    #[test]
    fn exhausted_retries_return_to_cadence() {
        let site = test_site("1h");
        let mut job = MonitorJob::for_site(&site, now(), 2);
        job.retry_count = 2;

        job.complete_failure(now(), true, &RetryPolicy::default());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.next_run_at, now() + TimeDelta::hours(1));
    }

    #[test]
    fn non_retryable_failure_skips_backoff() {
        let site = test_site("1h");
        let mut job = MonitorJob::for_site(&site, now(), 3);

        job.complete_failure(now(), false, &RetryPolicy::default());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.next_run_at, now() + TimeDelta::hours(1));
    }

    #[test]
    fn consecutive_failures_accumulate_across_cadence_failures() {
        let site = test_site("1h");
        let mut job = MonitorJob::for_site(&site, now(), 0);
        for i in 1..=5 {
            job.complete_failure(now(), true, &RetryPolicy::default());
            assert_eq!(job.consecutive_failures, i);
        }
    }
}
