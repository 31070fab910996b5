//! Lifecycle glue: owns startup/shutdown ordering and binds the store,
//! scheduler and workflow engine together.
//!
//! Startup brings the store up first (the scheduler reads site
//! registrations from it), then the scheduler loop. Shutdown reverses
//! the order and lets in-flight workflows drain within the configured
//! deadline.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::AppError;
use crate::models::{NewSite, Site};
use crate::scheduler::{
    CheckRunner, SchedulerHandle, SchedulerService, SchedulerStatus, TracingSchedulerReporter,
};
use crate::traits::MonitorStore;

/// Health of one engine component.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub component: String,
    pub healthy: bool,
    pub detail: String,
}

/// Status surface exposed to operator interfaces.
#[derive(Debug)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub uptime: Duration,
    pub active_jobs: usize,
    pub in_flight: usize,
    pub components: Vec<ComponentHealth>,
}

struct RunningState {
    handle: SchedulerHandle,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    started_at: Instant,
}

/// Owns the monitoring lifecycle. External surfaces (CLI, API, chat)
/// call into this and nothing else.
pub struct Orchestrator<R: CheckRunner, S: MonitorStore> {
    runner: R,
    store: S,
    config: MonitorConfig,
    state: Option<RunningState>,
}

impl<R: CheckRunner, S: MonitorStore> Orchestrator<R, S> {
    pub fn new(runner: R, store: S, config: MonitorConfig) -> Self {
        Self {
            runner,
            store,
            config,
            state: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// Start monitoring: verify the store, spawn the scheduler loop and
    /// register every active site.
    pub async fn start(&mut self) -> Result<(), AppError> {
        if self.state.is_some() {
            return Err(AppError::Generic("orchestrator already running".into()));
        }

        // Store first, so everything after can read it.
        let sites = self.store.list_sites(true).await?;

        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let service = SchedulerService::new(self.runner.clone(), self.config.clone());
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            service.run(rx, token, TracingSchedulerReporter).await;
        });
        let handle = SchedulerHandle::new(tx);

        for site in sites {
            handle.register_site(site).await?;
        }

        self.state = Some(RunningState {
            handle,
            cancel,
            join,
            started_at: Instant::now(),
        });
        tracing::info!("Monitoring started");
        Ok(())
    }

    /// Stop monitoring. The scheduler drains in-flight workflows bounded
    /// by the drain deadline before the task is joined.
    pub async fn stop(&mut self) -> Result<(), AppError> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        state.cancel.cancel();

        let grace = self.config.workflow.drain_deadline() + Duration::from_secs(5);
        if tokio::time::timeout(grace, state.join).await.is_err() {
            tracing::error!("Scheduler failed to stop within the drain deadline");
        }
        tracing::info!("Monitoring stopped");
        Ok(())
    }

    fn handle(&self) -> Result<&SchedulerHandle, AppError> {
        self.state
            .as_ref()
            .map(|s| &s.handle)
            .ok_or_else(|| AppError::Generic("monitoring is not running".into()))
    }

    pub async fn pause_all(&self) -> Result<(), AppError> {
        self.handle()?.pause_all().await
    }

    pub async fn resume_all(&self) -> Result<(), AppError> {
        self.handle()?.resume_all().await
    }

    pub async fn pause_site(&self, site_id: Uuid) -> Result<(), AppError> {
        self.handle()?.pause_site(site_id).await
    }

    pub async fn resume_site(&self, site_id: Uuid) -> Result<(), AppError> {
        self.handle()?.resume_site(site_id).await
    }

    /// Register a site for monitoring: persist it, then schedule it if
    /// the engine is running.
    pub async fn register_site(&self, site: NewSite) -> Result<Site, AppError> {
        let site = self.store.create_site(site).await?;
        if let Some(state) = &self.state {
            state.handle.register_site(site.clone()).await?;
        }
        Ok(site)
    }

    /// Remove a site; storage cascades to snapshots, vectors and alerts.
    pub async fn unregister_site(&self, site_id: Uuid) -> Result<(), AppError> {
        if let Some(state) = &self.state {
            state.handle.unregister_site(site_id).await?;
        }
        self.store.delete_site(site_id).await
    }

    pub async fn update_site(&self, site: Site) -> Result<(), AppError> {
        self.store.update_site(&site).await?;
        if let Some(state) = &self.state {
            state.handle.update_site(site).await?;
        }
        Ok(())
    }

    /// Run a check for one site right now, outside its schedule.
    pub async fn trigger_immediate(&self, site_id: Uuid) -> Result<Uuid, AppError> {
        self.handle()?.trigger_immediate(site_id).await
    }

    async fn scheduler_status(&self) -> Option<SchedulerStatus> {
        match &self.state {
            Some(state) => state.handle.status().await.ok(),
            None => None,
        }
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let store_health = match self.store.list_sites(false).await {
            Ok(sites) => ComponentHealth {
                component: "store".into(),
                healthy: true,
                detail: format!("{} sites", sites.len()),
            },
            Err(e) => ComponentHealth {
                component: "store".into(),
                healthy: false,
                detail: e.to_string(),
            },
        };

        let scheduler_status = self.scheduler_status().await;
        let scheduler_health = ComponentHealth {
            component: "scheduler".into(),
            healthy: scheduler_status.is_some(),
            detail: match &scheduler_status {
                Some(s) => format!("{} jobs, {} in flight", s.jobs.len(), s.in_flight),
                None => "not running".into(),
            },
        };

        let breaker_health = scheduler_status
            .as_ref()
            .map(|s| {
                let open = s
                    .breakers
                    .iter()
                    .filter(|b| b.state != crate::circuit_breaker::CircuitState::Closed)
                    .count();
                ComponentHealth {
                    component: "breakers".into(),
                    healthy: open == 0,
                    detail: format!("{open} open of {}", s.breakers.len()),
                }
            })
            .unwrap_or(ComponentHealth {
                component: "breakers".into(),
                healthy: true,
                detail: "no breakers".into(),
            });

        OrchestratorStatus {
            running: self.state.is_some(),
            uptime: self
                .state
                .as_ref()
                .map(|s| s.started_at.elapsed())
                .unwrap_or_default(),
            active_jobs: scheduler_status.as_ref().map(|s| s.jobs.len()).unwrap_or(0),
            in_flight: scheduler_status.as_ref().map(|s| s.in_flight).unwrap_or(0),
            components: vec![store_health, scheduler_health, breaker_health],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use crate::testutil::{MockRunner, MockStore};

    fn new_site(url: &str) -> NewSite {
        NewSite::new(url, url, Schedule::parse("1h").unwrap())
    }

    fn fast_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.scheduler.tick_interval_ms = 10;
        config.workflow.drain_deadline_seconds = 2;
        config
    }

    #[tokio::test]
    async fn start_registers_existing_active_sites() {
        let store = MockStore::empty();
        store
            .create_site(new_site("https://a.example.com"))
            .await
            .unwrap();
        store
            .create_site(new_site("https://b.example.com"))
            .await
            .unwrap();

        let mut orch = Orchestrator::new(MockRunner::succeeding(), store, fast_config());
        orch.start().await.unwrap();

        let status = orch.status().await;
        assert!(status.running);
        assert_eq!(status.active_jobs, 2);
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut orch =
            Orchestrator::new(MockRunner::succeeding(), MockStore::empty(), fast_config());
        orch.start().await.unwrap();
        assert!(orch.start().await.is_err());
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_not_running_is_a_noop() {
        let mut orch =
            Orchestrator::new(MockRunner::succeeding(), MockStore::empty(), fast_config());
        orch.stop().await.unwrap();
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn register_persists_and_schedules() {
        let store = MockStore::empty();
        let mut orch = Orchestrator::new(MockRunner::succeeding(), store.clone(), fast_config());
        orch.start().await.unwrap();

        let site = orch.register_site(new_site("https://c.example.com")).await.unwrap();
        assert!(store.get_site(site.id).await.unwrap().is_some());

        let status = orch.status().await;
        assert_eq!(status.active_jobs, 1);
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unregister_removes_site_and_job() {
        let store = MockStore::empty();
        let mut orch = Orchestrator::new(MockRunner::succeeding(), store.clone(), fast_config());
        orch.start().await.unwrap();

        let site = orch.register_site(new_site("https://c.example.com")).await.unwrap();
        orch.unregister_site(site.id).await.unwrap();

        assert!(store.get_site(site.id).await.unwrap().is_none());
        let status = orch.status().await;
        assert_eq!(status.active_jobs, 0);
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn trigger_immediate_requires_running_engine() {
        let orch =
            Orchestrator::new(MockRunner::succeeding(), MockStore::empty(), fast_config());
        assert!(orch.trigger_immediate(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn immediate_check_executes_via_runner() {
        let runner = MockRunner::succeeding();
        let store = MockStore::empty();
        let mut orch = Orchestrator::new(runner.clone(), store, fast_config());
        orch.start().await.unwrap();

        let site = orch.register_site(new_site("https://c.example.com")).await.unwrap();
        orch.trigger_immediate(site.id).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while runner.run_count() == 0 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_component_health() {
        let mut orch =
            Orchestrator::new(MockRunner::succeeding(), MockStore::empty(), fast_config());

        let stopped = orch.status().await;
        assert!(!stopped.running);
        assert!(stopped.components.iter().any(|c| c.component == "scheduler" && !c.healthy));

        orch.start().await.unwrap();
        let running = orch.status().await;
        assert!(running.running);
        assert!(running.components.iter().all(|c| match c.component.as_str() {
            "store" | "scheduler" | "breakers" => c.healthy,
            _ => true,
        }));
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_roundtrip() {
        let store = MockStore::empty();
        let mut orch = Orchestrator::new(MockRunner::succeeding(), store, fast_config());
        orch.start().await.unwrap();
        orch.register_site(new_site("https://c.example.com")).await.unwrap();

        orch.pause_all().await.unwrap();
        orch.resume_all().await.unwrap();
        orch.stop().await.unwrap();
    }
}
