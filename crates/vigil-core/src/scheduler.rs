//! Job scheduler driving per-site checks.
//!
//! The scheduler owns all mutable scheduling state: the job map, the
//! in-flight site set (per-site coalescing), per-site circuit breakers
//! and the global concurrency semaphore. External surfaces mutate that
//! state only through [`SchedulerCommand`]s on the control channel, so
//! there is no lock-per-site.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::MonitorConfig;
use crate::error::AppError;
use crate::job::{DueState, JobStatus, MonitorJob, RetryPolicy};
use crate::models::Site;
use crate::workflow::CheckOutcome;

/// Executes one check for a site. Implemented by the workflow engine;
/// mocked in tests.
pub trait CheckRunner: Send + Sync + Clone + 'static {
    fn run_check(
        &self,
        site: Site,
        consecutive_failures: u32,
    ) -> impl Future<Output = Result<CheckOutcome, AppError>> + Send;
}

/// Operator-facing mutations, funneled through the control channel.
pub enum SchedulerCommand {
    RegisterSite(Site),
    UpdateSite(Site),
    UnregisterSite(Uuid),
    PauseSite(Uuid),
    ResumeSite(Uuid),
    PauseAll,
    ResumeAll,
    TriggerImmediate {
        site_id: Uuid,
        reply: oneshot::Sender<Result<Uuid, AppError>>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
}

/// Point-in-time scheduler state for status queries.
#[derive(Debug)]
pub struct SchedulerStatus {
    pub jobs: Vec<MonitorJob>,
    pub in_flight: usize,
    pub breakers: Vec<BreakerSnapshot>,
}

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug)]
pub enum SchedulerEvent<'a> {
    Started,
    JobRegistered { site_id: Uuid },
    JobRemoved { site_id: Uuid },
    Dispatched { site_id: Uuid },
    Coalesced { site_id: Uuid },
    Misfired { site_id: Uuid, late: Duration },
    Completed { site_id: Uuid },
    Failed {
        site_id: Uuid,
        error: &'a AppError,
        will_retry: bool,
    },
    CircuitOpened { site_id: Uuid },
    Draining { in_flight: usize },
    Stopped,
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started => tracing::info!("Scheduler started"),
            SchedulerEvent::JobRegistered { site_id } => {
                tracing::info!(%site_id, "Job registered");
            }
            SchedulerEvent::JobRemoved { site_id } => {
                tracing::info!(%site_id, "Job removed");
            }
            SchedulerEvent::Dispatched { site_id } => {
                tracing::debug!(%site_id, "Check dispatched");
            }
            SchedulerEvent::Coalesced { site_id } => {
                tracing::debug!(%site_id, "Check coalesced, previous still running");
            }
            SchedulerEvent::Misfired { site_id, late } => {
                tracing::warn!(%site_id, late_secs = late.as_secs(), "Misfire dropped");
            }
            SchedulerEvent::Completed { site_id } => {
                tracing::info!(%site_id, "Check completed");
            }
            SchedulerEvent::Failed {
                site_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%site_id, %error, %will_retry, "Check failed");
            }
            SchedulerEvent::CircuitOpened { site_id } => {
                tracing::warn!(%site_id, "Circuit opened for site");
            }
            SchedulerEvent::Draining { in_flight } => {
                tracing::info!(%in_flight, "Scheduler draining");
            }
            SchedulerEvent::Stopped => tracing::info!("Scheduler stopped"),
        }
    }
}

struct Completion {
    site_id: Uuid,
    result: Result<CheckOutcome, AppError>,
}

/// The scheduling loop. Constructed by the orchestrator and consumed by
/// [`SchedulerService::run`].
pub struct SchedulerService<R: CheckRunner> {
    runner: R,
    config: MonitorConfig,
    retry_policy: RetryPolicy,
    sites: HashMap<Uuid, Site>,
    jobs: HashMap<Uuid, MonitorJob>,
    in_flight: HashSet<Uuid>,
    breakers: HashMap<Uuid, CircuitBreaker>,
    semaphore: Arc<Semaphore>,
    completion_tx: mpsc::Sender<Completion>,
    /// Taken by `run`; the loop owns it from then on.
    completion_rx: Option<mpsc::Receiver<Completion>>,
}

impl<R: CheckRunner> SchedulerService<R> {
    pub fn new(runner: R, config: MonitorConfig) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(64);
        let semaphore = Arc::new(Semaphore::new(config.scheduler.max_concurrent_jobs));
        let retry_policy = RetryPolicy::from(config.retry);
        Self {
            runner,
            config,
            retry_policy,
            sites: HashMap::new(),
            jobs: HashMap::new(),
            in_flight: HashSet::new(),
            breakers: HashMap::new(),
            semaphore,
            completion_tx,
            completion_rx: Some(completion_rx),
        }
    }

    /// Run the scheduling loop until cancellation, then drain in-flight
    /// checks bounded by the drain deadline.
    pub async fn run<RP: SchedulerReporter>(
        mut self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        cancel: CancellationToken,
        reporter: RP,
    ) {
        reporter.report(SchedulerEvent::Started);
        let mut completion_rx = self
            .completion_rx
            .take()
            .expect("scheduler can only run once");
        let mut tick = tokio::time::interval(self.config.scheduler.tick_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => self.scan_due(&reporter),
                Some(cmd) = commands.recv() => self.handle_command(cmd, &reporter),
                Some(completion) = completion_rx.recv() => {
                    self.handle_completion(completion, &reporter);
                }
            }
        }

        self.drain(&mut completion_rx, &reporter).await;
        reporter.report(SchedulerEvent::Stopped);
    }

    /// Let running workflows finish, bounded by the drain deadline.
    async fn drain<RP: SchedulerReporter>(
        &mut self,
        completion_rx: &mut mpsc::Receiver<Completion>,
        reporter: &RP,
    ) {
        if self.in_flight.is_empty() {
            return;
        }
        reporter.report(SchedulerEvent::Draining {
            in_flight: self.in_flight.len(),
        });

        let deadline = tokio::time::Instant::now() + self.config.workflow.drain_deadline();
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, completion_rx.recv()).await {
                Ok(Some(completion)) => {
                    self.in_flight.remove(&completion.site_id);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        abandoned = self.in_flight.len(),
                        "Drain deadline reached, abandoning in-flight checks"
                    );
                    break;
                }
            }
        }
    }

    fn handle_command<RP: SchedulerReporter>(&mut self, cmd: SchedulerCommand, reporter: &RP) {
        match cmd {
            SchedulerCommand::RegisterSite(site) => self.register_site(site, reporter),
            SchedulerCommand::UpdateSite(site) => {
                if let Some(job) = self.jobs.get_mut(&site.id) {
                    if job.schedule != site.schedule {
                        job.schedule = site.schedule.clone();
                        job.next_run_at = site.schedule.next_fire(Utc::now());
                    }
                    job.priority = site.priority;
                }
                self.sites.insert(site.id, site);
            }
            SchedulerCommand::UnregisterSite(site_id) => {
                self.sites.remove(&site_id);
                self.breakers.remove(&site_id);
                if let Some(mut job) = self.jobs.remove(&site_id) {
                    job.status = JobStatus::Removed;
                }
                reporter.report(SchedulerEvent::JobRemoved { site_id });
            }
            SchedulerCommand::PauseSite(site_id) => {
                if let Some(job) = self.jobs.get_mut(&site_id) {
                    job.status = JobStatus::Paused;
                }
            }
            SchedulerCommand::ResumeSite(site_id) => {
                if let Some(job) = self.jobs.get_mut(&site_id) {
                    job.status = JobStatus::Scheduled;
                    job.next_run_at = job.schedule.next_fire(Utc::now());
                }
                // Operator resume also closes the breaker.
                if let Some(breaker) = self.breakers.get(&site_id) {
                    breaker.reset();
                }
            }
            SchedulerCommand::PauseAll => {
                for job in self.jobs.values_mut() {
                    if job.status != JobStatus::Removed {
                        job.status = JobStatus::Paused;
                    }
                }
            }
            SchedulerCommand::ResumeAll => {
                let now = Utc::now();
                for job in self.jobs.values_mut() {
                    if job.status == JobStatus::Paused {
                        job.status = JobStatus::Scheduled;
                        job.next_run_at = job.schedule.next_fire(now);
                    }
                }
            }
            SchedulerCommand::TriggerImmediate { site_id, reply } => {
                let result = self.trigger_immediate(site_id, reporter);
                let _ = reply.send(result);
            }
            SchedulerCommand::Status { reply } => {
                let _ = reply.send(SchedulerStatus {
                    jobs: self.jobs.values().cloned().collect(),
                    in_flight: self.in_flight.len(),
                    breakers: self.breakers.values().map(|b| b.snapshot()).collect(),
                });
            }
        }
    }

    fn register_site<RP: SchedulerReporter>(&mut self, site: Site, reporter: &RP) {
        if !site.active {
            return;
        }
        let job = MonitorJob::for_site(&site, Utc::now(), self.config.retry.max_attempts);
        self.breakers.insert(
            site.id,
            CircuitBreaker::new(format!("site-{}", site.id), &self.config.breaker),
        );
        reporter.report(SchedulerEvent::JobRegistered { site_id: site.id });
        self.jobs.insert(site.id, job);
        self.sites.insert(site.id, site);
    }

    fn trigger_immediate<RP: SchedulerReporter>(
        &mut self,
        site_id: Uuid,
        reporter: &RP,
    ) -> Result<Uuid, AppError> {
        let site = self
            .sites
            .get(&site_id)
            .cloned()
            .ok_or_else(|| AppError::Generic(format!("unknown site: {site_id}")))?;

        if self.in_flight.contains(&site_id) {
            reporter.report(SchedulerEvent::Coalesced { site_id });
            return Err(AppError::Generic(format!(
                "check already in flight for site {site_id}"
            )));
        }

        if let Some(breaker) = self.breakers.get(&site_id) {
            if !breaker.allow_request() {
                return Err(AppError::Generic(format!(
                    "circuit open for site {site_id}"
                )));
            }
        }

        Ok(self.dispatch(site, reporter))
    }

    /// Scan for due jobs; honors the misfire grace window and per-site
    /// coalescing.
    fn scan_due<RP: SchedulerReporter>(&mut self, reporter: &RP) {
        let now = Utc::now();
        let grace = self.config.scheduler.misfire_grace();

        let due_sites: Vec<Uuid> = self
            .jobs
            .values()
            .filter(|job| job.status != JobStatus::Removed)
            .filter(|job| {
                matches!(
                    job.due_state(now, grace),
                    DueState::Due | DueState::Misfired
                ) || (job.status == JobStatus::CircuitOpen && now >= job.next_run_at)
            })
            .map(|job| job.site_id)
            .collect();

        for site_id in due_sites {
            let Some(job) = self.jobs.get_mut(&site_id) else {
                continue;
            };

            // Circuit-open jobs only go out as the breaker's single probe.
            if job.status == JobStatus::CircuitOpen {
                let allowed = self
                    .breakers
                    .get(&site_id)
                    .map(|b| b.allow_request())
                    .unwrap_or(true);
                if !allowed {
                    job.next_run_at = now + TimeDelta::seconds(5);
                    continue;
                }
            } else {
                match job.due_state(now, grace) {
                    DueState::Misfired => {
                        let late = (now - job.next_run_at)
                            .to_std()
                            .unwrap_or_default();
                        reporter.report(SchedulerEvent::Misfired { site_id, late });
                        job.skip_misfire(now);
                        continue;
                    }
                    DueState::Due => {}
                    DueState::NotDue => continue,
                }

                if self.in_flight.contains(&site_id) {
                    // Previous check still running: skip this firing.
                    reporter.report(SchedulerEvent::Coalesced { site_id });
                    job.skip_misfire(now);
                    continue;
                }

                let allowed = self
                    .breakers
                    .get(&site_id)
                    .map(|b| b.allow_request())
                    .unwrap_or(true);
                if !allowed {
                    job.status = JobStatus::CircuitOpen;
                    job.next_run_at = now + TimeDelta::seconds(5);
                    continue;
                }
            }

            let Some(site) = self.sites.get(&site_id).cloned() else {
                continue;
            };
            self.dispatch(site, reporter);
        }
    }

    /// Spawn one check. The task queues FIFO on the global semaphore, so
    /// the concurrency cap holds across all sites.
    fn dispatch<RP: SchedulerReporter>(&mut self, site: Site, reporter: &RP) -> Uuid {
        let site_id = site.id;
        let dispatch_id = Uuid::new_v4();
        let consecutive_failures = self
            .jobs
            .get(&site_id)
            .map(|j| j.consecutive_failures)
            .unwrap_or(0);

        if let Some(job) = self.jobs.get_mut(&site_id) {
            job.status = JobStatus::Running;
        }
        self.in_flight.insert(site_id);
        reporter.report(SchedulerEvent::Dispatched { site_id });

        let runner = self.runner.clone();
        let semaphore = self.semaphore.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => runner.run_check(site, consecutive_failures).await,
                Err(_) => Err(AppError::Generic("scheduler shut down".into())),
            };
            let _ = completion_tx.send(Completion { site_id, result }).await;
        });

        dispatch_id
    }

    fn handle_completion<RP: SchedulerReporter>(
        &mut self,
        completion: Completion,
        reporter: &RP,
    ) {
        let site_id = completion.site_id;
        self.in_flight.remove(&site_id);
        let now = Utc::now();

        let Some(job) = self.jobs.get_mut(&site_id) else {
            return; // site was unregistered while the check ran
        };
        let breaker = self.breakers.get(&site_id);

        match completion.result {
            Ok(_outcome) => {
                if let Some(b) = breaker {
                    b.record_success();
                }
                job.complete_success(now);
                reporter.report(SchedulerEvent::Completed { site_id });
            }
            Err(error) => {
                if let Some(b) = breaker {
                    b.record_failure(&error);
                }
                let will_retry = error.is_retryable() && job.can_retry();
                job.complete_failure(now, error.is_retryable(), &self.retry_policy);
                reporter.report(SchedulerEvent::Failed {
                    site_id,
                    error: &error,
                    will_retry,
                });

                if breaker.map(|b| b.is_open()).unwrap_or(false)
                    && job.status != JobStatus::CircuitOpen
                {
                    job.status = JobStatus::CircuitOpen;
                    job.next_run_at = now
                        + TimeDelta::from_std(self.config.breaker.recovery_timeout())
                            .unwrap_or(TimeDelta::seconds(60));
                    reporter.report(SchedulerEvent::CircuitOpened { site_id });
                }
            }
        }
    }
}

/// Typed handle over the control channel.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn new(tx: mpsc::Sender<SchedulerCommand>) -> Self {
        Self { tx }
    }

    async fn send(&self, cmd: SchedulerCommand) -> Result<(), AppError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| AppError::Generic("scheduler is not running".into()))
    }

    pub async fn register_site(&self, site: Site) -> Result<(), AppError> {
        self.send(SchedulerCommand::RegisterSite(site)).await
    }

    pub async fn update_site(&self, site: Site) -> Result<(), AppError> {
        self.send(SchedulerCommand::UpdateSite(site)).await
    }

    pub async fn unregister_site(&self, site_id: Uuid) -> Result<(), AppError> {
        self.send(SchedulerCommand::UnregisterSite(site_id)).await
    }

    pub async fn pause_site(&self, site_id: Uuid) -> Result<(), AppError> {
        self.send(SchedulerCommand::PauseSite(site_id)).await
    }

    pub async fn resume_site(&self, site_id: Uuid) -> Result<(), AppError> {
        self.send(SchedulerCommand::ResumeSite(site_id)).await
    }

    pub async fn pause_all(&self) -> Result<(), AppError> {
        self.send(SchedulerCommand::PauseAll).await
    }

    pub async fn resume_all(&self) -> Result<(), AppError> {
        self.send(SchedulerCommand::ResumeAll).await
    }

    pub async fn trigger_immediate(&self, site_id: Uuid) -> Result<Uuid, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::TriggerImmediate { site_id, reply })
            .await?;
        rx.await
            .map_err(|_| AppError::Generic("scheduler dropped the request".into()))?
    }

    pub async fn status(&self) -> Result<SchedulerStatus, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Status { reply }).await?;
        rx.await
            .map_err(|_| AppError::Generic("scheduler dropped the request".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use crate::testutil::{MockRunner, clone_app_error};
    use crate::models::SiteThresholds;

    fn test_site(url: &str) -> Site {
        Site {
            id: Uuid::new_v4(),
            url: url.into(),
            name: url.into(),
            schedule: Schedule::parse("1h").unwrap(),
            active: true,
            max_depth: 1,
            priority: 0,
            thresholds: SiteThresholds::default(),
            keep_scans: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fast_config(max_concurrent: usize) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.scheduler.max_concurrent_jobs = max_concurrent;
        config.scheduler.tick_interval_ms = 10;
        config.workflow.drain_deadline_seconds = 2;
        config
    }

    async fn spawn_scheduler(
        runner: MockRunner,
        config: MonitorConfig,
    ) -> (SchedulerHandle, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let service = SchedulerService::new(runner, config);
        let token = cancel.clone();
        tokio::spawn(async move {
            service.run(rx, token, TracingSchedulerReporter).await;
        });
        (SchedulerHandle::new(tx), cancel)
    }

    async fn wait_until<F>(handle: &SchedulerHandle, mut predicate: F)
    where
        F: FnMut(&SchedulerStatus) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = handle.status().await.unwrap();
            if predicate(&status) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached; status: {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn register_creates_exactly_one_job() {
        let (handle, cancel) = spawn_scheduler(MockRunner::succeeding(), fast_config(3)).await;
        let site = test_site("https://a.example.com");
        handle.register_site(site.clone()).await.unwrap();

        wait_until(&handle, |s| s.jobs.len() == 1).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.jobs[0].site_id, site.id);
        assert_eq!(status.jobs[0].status, JobStatus::Scheduled);
        cancel.cancel();
    }

    #[tokio::test]
    async fn inactive_sites_get_no_job() {
        let (handle, cancel) = spawn_scheduler(MockRunner::succeeding(), fast_config(3)).await;
        let mut site = test_site("https://a.example.com");
        site.active = false;
        handle.register_site(site).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = handle.status().await.unwrap();
        assert!(status.jobs.is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn immediate_check_runs_and_completes() {
        let runner = MockRunner::succeeding();
        let (handle, cancel) = spawn_scheduler(runner.clone(), fast_config(3)).await;
        let site = test_site("https://a.example.com");
        handle.register_site(site.clone()).await.unwrap();

        handle.trigger_immediate(site.id).await.unwrap();
        wait_until(&handle, |s| {
            s.jobs[0].last_success_at.is_some() && s.in_flight == 0
        })
        .await;
        assert_eq!(runner.run_count(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn immediate_check_on_unknown_site_errors() {
        let (handle, cancel) = spawn_scheduler(MockRunner::succeeding(), fast_config(3)).await;
        let err = handle.trigger_immediate(Uuid::new_v4()).await.unwrap_err();
        assert!(err.to_string().contains("unknown site"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn concurrent_checks_respect_global_cap() {
        let runner = MockRunner::slow(Duration::from_millis(100));
        let (handle, cancel) = spawn_scheduler(runner.clone(), fast_config(3)).await;

        let mut ids = Vec::new();
        for i in 0..10 {
            let site = test_site(&format!("https://s{i}.example.com"));
            ids.push(site.id);
            handle.register_site(site).await.unwrap();
        }
        for id in &ids {
            handle.trigger_immediate(*id).await.unwrap();
        }

        wait_until(&handle, |s| {
            s.jobs.iter().all(|j| j.last_success_at.is_some())
        })
        .await;

        assert_eq!(runner.run_count(), 10);
        assert!(
            runner.max_concurrency() <= 3,
            "cap exceeded: {}",
            runner.max_concurrency()
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn second_immediate_while_running_is_coalesced() {
        let runner = MockRunner::slow(Duration::from_millis(200));
        let (handle, cancel) = spawn_scheduler(runner.clone(), fast_config(3)).await;
        let site = test_site("https://a.example.com");
        handle.register_site(site.clone()).await.unwrap();

        handle.trigger_immediate(site.id).await.unwrap();
        let second = handle.trigger_immediate(site.id).await;
        assert!(second.is_err(), "second trigger must coalesce");

        wait_until(&handle, |s| s.in_flight == 0).await;
        assert_eq!(runner.run_count(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn failures_open_the_circuit_and_block_dispatch() {
        let runner =
            MockRunner::failing_with(|| AppError::TransientFetch("connection refused".into()));
        let mut config = fast_config(3);
        config.breaker.failure_threshold = 3;
        config.breaker.recovery_timeout_seconds = 3600;
        config.retry.max_attempts = 0; // fail straight through
        let (handle, cancel) = spawn_scheduler(runner.clone(), config).await;

        let site = test_site("https://down.example.com");
        handle.register_site(site.clone()).await.unwrap();

        for _ in 0..3 {
            handle.trigger_immediate(site.id).await.unwrap();
            wait_until(&handle, |s| s.in_flight == 0).await;
        }

        wait_until(&handle, |s| {
            s.breakers
                .iter()
                .any(|b| b.state == crate::circuit_breaker::CircuitState::Open)
        })
        .await;

        // While open, no further fetch goes out for that site.
        let blocked = handle.trigger_immediate(site.id).await;
        assert!(blocked.is_err());
        assert_eq!(runner.run_count(), 3);
        cancel.cancel();
    }

    #[tokio::test]
    async fn operator_resume_closes_breaker_and_allows_checks() {
        let runner = MockRunner::failing_with(|| AppError::TransientFetch("refused".into()));
        let mut config = fast_config(3);
        config.breaker.failure_threshold = 1;
        config.breaker.recovery_timeout_seconds = 3600;
        config.retry.max_attempts = 0;
        let (handle, cancel) = spawn_scheduler(runner.clone(), config).await;

        let site = test_site("https://down.example.com");
        handle.register_site(site.clone()).await.unwrap();
        handle.trigger_immediate(site.id).await.unwrap();
        wait_until(&handle, |s| s.in_flight == 0).await;
        assert!(handle.trigger_immediate(site.id).await.is_err());

        handle.resume_site(site.id).await.unwrap();
        wait_until(&handle, |s| {
            s.breakers
                .iter()
                .all(|b| b.state == crate::circuit_breaker::CircuitState::Closed)
        })
        .await;
        assert!(handle.trigger_immediate(site.id).await.is_ok());
        cancel.cancel();
    }

    #[tokio::test]
    async fn paused_jobs_are_not_dispatched() {
        let runner = MockRunner::succeeding();
        let mut config = fast_config(3);
        config.scheduler.tick_interval_ms = 5;
        let (handle, cancel) = spawn_scheduler(runner.clone(), config).await;

        let mut site = test_site("https://a.example.com");
        site.schedule = Schedule::parse("1s").unwrap();
        handle.register_site(site.clone()).await.unwrap();
        handle.pause_all().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(runner.run_count(), 0);

        let status = handle.status().await.unwrap();
        assert_eq!(status.jobs[0].status, JobStatus::Paused);
        cancel.cancel();
    }

    #[tokio::test]
    async fn due_jobs_fire_on_schedule() {
        let runner = MockRunner::succeeding();
        let mut config = fast_config(3);
        config.scheduler.tick_interval_ms = 10;
        let (handle, cancel) = spawn_scheduler(runner.clone(), config).await;

        let mut site = test_site("https://a.example.com");
        site.schedule = Schedule::parse("1s").unwrap();
        handle.register_site(site).await.unwrap();

        wait_until(&handle, |s| {
            !s.jobs.is_empty() && s.jobs[0].last_success_at.is_some()
        })
        .await;
        assert!(runner.run_count() >= 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn retryable_failure_schedules_backoff_retry() {
        let runner = MockRunner::failing_with(|| {
            clone_app_error(&AppError::TransientFetch("reset".into()))
        });
        let mut config = fast_config(3);
        config.retry.max_attempts = 3;
        config.retry.initial_delay_seconds = 120.0;
        config.breaker.failure_threshold = 50;
        let (handle, cancel) = spawn_scheduler(runner.clone(), config).await;

        let site = test_site("https://flaky.example.com");
        handle.register_site(site.clone()).await.unwrap();
        handle.trigger_immediate(site.id).await.unwrap();

        wait_until(&handle, |s| s.jobs[0].retry_count == 1).await;
        let status = handle.status().await.unwrap();
        let job = &status.jobs[0];
        assert_eq!(job.status, JobStatus::Scheduled);
        // Backoff pushed the next run out, jitter keeps it within ±50%.
        let delta = job.next_run_at - Utc::now();
        assert!(delta > TimeDelta::seconds(50), "delta {delta}");
        cancel.cancel();
    }

    #[tokio::test]
    async fn unregister_removes_the_job() {
        let (handle, cancel) = spawn_scheduler(MockRunner::succeeding(), fast_config(3)).await;
        let site = test_site("https://a.example.com");
        handle.register_site(site.clone()).await.unwrap();
        wait_until(&handle, |s| s.jobs.len() == 1).await;

        handle.unregister_site(site.id).await.unwrap();
        wait_until(&handle, |s| s.jobs.is_empty()).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_checks() {
        let runner = MockRunner::slow(Duration::from_millis(150));
        let (handle, cancel) = spawn_scheduler(runner.clone(), fast_config(3)).await;
        let site = test_site("https://a.example.com");
        handle.register_site(site.clone()).await.unwrap();
        handle.trigger_immediate(site.id).await.unwrap();

        // Cancel while the check is still running.
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runner.run_count(), 1);
    }
}
