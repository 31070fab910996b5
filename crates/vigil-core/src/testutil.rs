//! Test utilities: mock implementations of all core ports.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks
//! use `Arc<Mutex<_>>` for interior mutability, allowing test assertions
//! on recorded calls.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Alert, AlertStatus, ClassifierWeights, ContentVector, NewAlert, NewSite, NewSnapshot, Site,
    Snapshot, Verdict, VectorKind,
};
use crate::scheduler::CheckRunner;
use crate::traits::{
    AlertSink, Embedder, FetchOutcome, Fetcher, LlmClassifier, LlmRequest, LlmVerdict,
    MonitorStore,
};
use crate::workflow::{CheckOutcome, WorkflowReport};

/// Manual clone for [`AppError`] so mocks can replay the same failure.
pub fn clone_app_error(error: &AppError) -> AppError {
    match error {
        AppError::TransientFetch(m) => AppError::TransientFetch(m.clone()),
        AppError::PermanentFetch { status, message } => AppError::PermanentFetch {
            status: *status,
            message: message.clone(),
        },
        AppError::RenderError(m) => AppError::RenderError(m.clone()),
        AppError::ExtractionError(m) => AppError::ExtractionError(m.clone()),
        AppError::VectorizationError(m) => AppError::VectorizationError(m.clone()),
        AppError::ClassifierError(m) => AppError::ClassifierError(m.clone()),
        AppError::LlmError {
            message,
            status_code,
            retryable,
        } => AppError::LlmError {
            message: message.clone(),
            status_code: *status_code,
            retryable: *retryable,
        },
        AppError::SerializationError(e) => AppError::Generic(e.to_string()),
        AppError::Timeout(s) => AppError::Timeout(*s),
        AppError::RateLimitExceeded => AppError::RateLimitExceeded,
        AppError::NetworkError(m) => AppError::NetworkError(m.clone()),
        AppError::StorageError(m) => AppError::StorageError(m.clone()),
        AppError::ScheduleError(m) => AppError::ScheduleError(m.clone()),
        AppError::ConfigError(m) => AppError::ConfigError(m.clone()),
        AppError::InvariantViolation(m) => AppError::InvariantViolation(m.clone()),
        AppError::Generic(m) => AppError::Generic(m.clone()),
    }
}

// ---------------------------------------------------------------------------
// Page fixtures
// ---------------------------------------------------------------------------

/// A realistic corporate page with enough distinct keywords for the
/// similarity math to behave like production content.
pub fn benign_page() -> String {
    r#"<html>
      <head>
        <title>Acme Corporation — Industrial Widgets</title>
        <meta name="description" content="Precision industrial widgets and gears">
      </head>
      <body>
        <div class="hero" id="main-hero">
          <h1>Welcome to Acme Corporation</h1>
          <p>We manufacture industrial widgets for every purpose.</p>
        </div>
        <section class="catalog">
          <h2>Product Catalog</h2>
          <p>Browse precision gears, bearings, couplings and fasteners
             machined under strict quality assurance standards.</p>
          <p>Our engineering team supports custom tooling, prototype
             fabrication and volume production orders worldwide.</p>
        </section>
        <footer><p>Contact sales for distributor pricing details.</p></footer>
      </body>
    </html>"#
        .to_string()
}

/// The same site after a textbook defacement.
pub fn defaced_page() -> String {
    r#"<html>
      <head><title>0wn3d</title></head>
      <body>
        <marquee>HACKED BY phantom_crew</marquee>
        <h1>your security is a joke, you got pwned</h1>
        <p>greetz to all the crew, nothing personal admin</p>
      </body>
    </html>"#
        .to_string()
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

enum FetchScript {
    /// Serve pages in order; the last one repeats.
    Pages(Vec<String>),
    /// Fail every call with a replay of this error.
    Fail(AppError),
}

/// Mock fetcher with a scripted response sequence.
#[derive(Clone)]
pub struct MockFetcher {
    script: Arc<Mutex<FetchScript>>,
    served: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn serving(page: String) -> Self {
        Self::serving_sequence(vec![page])
    }

    pub fn serving_repeatedly(page: String) -> Self {
        Self::serving_sequence(vec![page])
    }

    pub fn serving_sequence(pages: Vec<String>) -> Self {
        Self {
            script: Arc::new(Mutex::new(FetchScript::Pages(pages))),
            served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(error: AppError) -> Self {
        Self {
            script: Arc::new(Mutex::new(FetchScript::Fail(error))),
            served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, AppError> {
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        match &*script {
            FetchScript::Pages(pages) => {
                let page = pages.get(n).or_else(|| pages.last()).cloned().unwrap_or_default();
                Ok(FetchOutcome {
                    raw_html: page,
                    http_status: 200,
                    final_url: url.to_string(),
                    elapsed: Duration::from_millis(10),
                })
            }
            FetchScript::Fail(error) => Err(clone_app_error(error)),
        }
    }
}

// ---------------------------------------------------------------------------
// MockEmbedder
// ---------------------------------------------------------------------------

enum EmbedScript {
    Uniform(f32),
    Hashing,
    Fail,
}

/// Mock embedder: deterministic vectors without a model.
#[derive(Clone)]
pub struct MockEmbedder {
    dimension: usize,
    script: Arc<EmbedScript>,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedder {
    /// Every embedding is `[value; dimension]`.
    pub fn uniform(dimension: usize, value: f32) -> Self {
        Self {
            dimension,
            script: Arc::new(EmbedScript::Uniform(value)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Text-dependent deterministic vectors: same text, same vector.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            dimension,
            script: Arc::new(EmbedScript::Hashing),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            dimension: 0,
            script: Arc::new(EmbedScript::Fail),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str, _kind: VectorKind) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.script {
            EmbedScript::Uniform(v) => Ok(vec![*v; self.dimension]),
            EmbedScript::Hashing => {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                let mut seed = hasher.finish();
                let payload = (0..self.dimension)
                    .map(|_| {
                        seed ^= seed << 13;
                        seed ^= seed >> 7;
                        seed ^= seed << 17;
                        ((seed % 2000) as f32 / 1000.0) - 1.0
                    })
                    .collect();
                Ok(payload)
            }
            EmbedScript::Fail => Err(AppError::VectorizationError("mock embedder down".into())),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// MockLlm
// ---------------------------------------------------------------------------

enum LlmScript {
    Reply {
        verdict: Verdict,
        confidence: f64,
        reasoning: String,
    },
    Hang,
    Fail(AppError),
}

/// Mock LLM classifier.
#[derive(Clone)]
pub struct MockLlm {
    script: Arc<LlmScript>,
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
}

impl MockLlm {
    pub fn replying(verdict: Verdict, confidence: f64, reasoning: &str) -> Self {
        Self {
            script: Arc::new(LlmScript::Reply {
                verdict,
                confidence,
                reasoning: reasoning.to_string(),
            }),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Never resolves; pairs with a timeout to exercise abstention.
    pub fn hanging() -> Self {
        Self {
            script: Arc::new(LlmScript::Hang),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(error: AppError) -> Self {
        Self {
            script: Arc::new(LlmScript::Fail(error)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl LlmClassifier for MockLlm {
    async fn classify(&self, request: &LlmRequest) -> Result<LlmVerdict, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        match &*self.script {
            LlmScript::Reply {
                verdict,
                confidence,
                reasoning,
            } => Ok(LlmVerdict {
                verdict: *verdict,
                confidence: *confidence,
                reasoning: reasoning.clone(),
            }),
            LlmScript::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            LlmScript::Fail(error) => Err(clone_app_error(error)),
        }
    }
}

// ---------------------------------------------------------------------------
// MockAlertSink
// ---------------------------------------------------------------------------

/// Mock notification sink that records emitted alerts.
#[derive(Clone, Default)]
pub struct MockAlertSink {
    pub alerts: Arc<Mutex<Vec<Alert>>>,
}

impl MockAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl AlertSink for MockAlertSink {
    async fn emit(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    sites: HashMap<Uuid, Site>,
    /// Insertion order doubles as capture order per site.
    snapshots: Vec<Snapshot>,
    alerts: Vec<Alert>,
    vectors: Vec<ContentVector>,
    weights: HashMap<Uuid, ClassifierWeights>,
    snapshot_save_attempts: usize,
    snapshot_save_failures_left: usize,
    fp_rate_queries: Vec<(Uuid, usize)>,
}

/// In-memory store implementing the full storage port.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.inner.lock().unwrap().snapshots.clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().unwrap().snapshots.len()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().unwrap().alerts.clone()
    }

    pub fn alert_count(&self) -> usize {
        self.inner.lock().unwrap().alerts.len()
    }

    pub fn vectors(&self) -> Vec<ContentVector> {
        self.inner.lock().unwrap().vectors.clone()
    }

    /// Make the next `n` snapshot saves fail with a storage error.
    pub fn fail_next_snapshot_saves(&self, n: usize) {
        self.inner.lock().unwrap().snapshot_save_failures_left = n;
    }

    pub fn snapshot_save_attempts(&self) -> usize {
        self.inner.lock().unwrap().snapshot_save_attempts
    }

    /// Operator-side adjudication, as the external command surface would
    /// do it.
    pub fn set_alert_status(&self, alert_id: Uuid, status: AlertStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.status = status;
            alert.updated_at = Utc::now();
        }
    }

    /// Seed a site's adjudication history: `resolved` confirmed alerts
    /// and `false_positives` operator-dismissed ones.
    pub fn seed_adjudicated_alerts(&self, site_id: Uuid, resolved: usize, false_positives: usize) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        for i in 0..resolved + false_positives {
            let status = if i < resolved {
                AlertStatus::Resolved
            } else {
                AlertStatus::FalsePositive
            };
            inner.alerts.push(Alert {
                id: Uuid::new_v4(),
                site_id,
                snapshot_id: None,
                kind: crate::models::AlertKind::Suspicious,
                severity: crate::models::AlertSeverity::Low,
                title: "seeded".into(),
                description: "seeded adjudicated alert".into(),
                verdict_label: None,
                confidence: None,
                similarity: None,
                status,
                created_at: now,
                updated_at: now,
            });
        }
    }

    /// `(site_id, window)` pairs passed to `false_positive_rate`.
    pub fn fp_rate_queries(&self) -> Vec<(Uuid, usize)> {
        self.inner.lock().unwrap().fp_rate_queries.clone()
    }
}

impl MonitorStore for MockStore {
    async fn create_site(&self, site: NewSite) -> Result<Site, AppError> {
        let now = Utc::now();
        let site = Site {
            id: Uuid::new_v4(),
            url: site.url,
            name: site.name,
            schedule: site.schedule,
            active: true,
            max_depth: site.max_depth,
            priority: site.priority,
            thresholds: site.thresholds,
            keep_scans: site.keep_scans,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, AppError> {
        Ok(self.inner.lock().unwrap().sites.get(&id).cloned())
    }

    async fn list_sites(&self, active_only: bool) -> Result<Vec<Site>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut sites: Vec<Site> = inner
            .sites
            .values()
            .filter(|s| !active_only || s.active)
            .cloned()
            .collect();
        sites.sort_by_key(|s| s.created_at);
        Ok(sites)
    }

    async fn update_site(&self, site: &Site) -> Result<(), AppError> {
        self.inner
            .lock()
            .unwrap()
            .sites
            .insert(site.id, site.clone());
        Ok(())
    }

    async fn delete_site(&self, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sites.remove(&id);
        inner.snapshots.retain(|s| s.site_id != id);
        inner.vectors.retain(|v| v.site_id != id);
        inner.alerts.retain(|a| a.site_id != id);
        inner.weights.remove(&id);
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: NewSnapshot) -> Result<Snapshot, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshot_save_attempts += 1;
        if inner.snapshot_save_failures_left > 0 {
            inner.snapshot_save_failures_left -= 1;
            return Err(AppError::StorageError("mock save failure".into()));
        }

        let saved = Snapshot {
            id: snapshot.id,
            site_id: snapshot.site_id,
            captured_at: Utc::now(),
            http_status: snapshot.http_status,
            response_time_ms: snapshot.response_time_ms,
            raw_html: snapshot.raw_html,
            extracted_text: snapshot.extracted_text,
            fingerprints: snapshot.fingerprints,
            outline: snapshot.outline,
            truncated: snapshot.truncated,
            vector_ref: snapshot.vector_ref,
            prev_similarity: snapshot.prev_similarity,
            verdict: snapshot.verdict,
            confidence: snapshot.confidence,
        };
        inner.snapshots.push(saved.clone());
        Ok(saved)
    }

    async fn latest_snapshot(&self, site_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .find(|s| s.site_id == site_id)
            .cloned())
    }

    async fn baseline_snapshot(&self, site_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .find(|s| {
                s.site_id == site_id
                    && s.verdict.map(|v| v.is_baseline()).unwrap_or(false)
            })
            .cloned())
    }

    async fn recent_snapshots(
        &self,
        site_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Snapshot>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.site_id == site_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_snapshot_verdict(
        &self,
        snapshot_id: Uuid,
        verdict: Verdict,
        confidence: f64,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(snapshot) = inner.snapshots.iter_mut().find(|s| s.id == snapshot_id) {
            snapshot.verdict = Some(verdict);
            snapshot.confidence = Some(confidence);
        }
        Ok(())
    }

    async fn prune_snapshots(&self, site_id: Uuid, keep: u32) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let site_snapshot_ids: Vec<Uuid> = inner
            .snapshots
            .iter()
            .filter(|s| s.site_id == site_id)
            .map(|s| s.id)
            .collect();
        if site_snapshot_ids.len() <= keep as usize {
            return Ok(0);
        }
        let cutoff = site_snapshot_ids.len() - keep as usize;
        let pruned: Vec<Uuid> = site_snapshot_ids[..cutoff].to_vec();
        inner.snapshots.retain(|s| !pruned.contains(&s.id));
        // Vectors follow their snapshot out.
        inner.vectors.retain(|v| !pruned.contains(&v.snapshot_id));
        Ok(pruned.len() as u64)
    }

    async fn save_alert(&self, alert: NewAlert) -> Result<Alert, AppError> {
        let now = Utc::now();
        let saved = Alert {
            id: Uuid::new_v4(),
            site_id: alert.site_id,
            snapshot_id: alert.snapshot_id,
            kind: alert.kind,
            severity: alert.severity,
            title: alert.title,
            description: alert.description,
            verdict_label: alert.verdict_label,
            confidence: alert.confidence,
            similarity: alert.similarity,
            status: AlertStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().alerts.push(saved.clone());
        Ok(saved)
    }

    async fn open_alerts(
        &self,
        site_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Alert>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .alerts
            .iter()
            .rev()
            .filter(|a| a.status == AlertStatus::Open)
            .filter(|a| site_id.map(|id| a.site_id == id).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn false_positive_rate(
        &self,
        site_id: Uuid,
        window: usize,
    ) -> Result<Option<f64>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fp_rate_queries.push((site_id, window));

        let recent: Vec<AlertStatus> = inner
            .alerts
            .iter()
            .rev()
            .filter(|a| a.site_id == site_id && a.status.is_adjudicated())
            .take(window)
            .map(|a| a.status)
            .collect();
        if recent.is_empty() {
            return Ok(None);
        }
        let false_positives = recent
            .iter()
            .filter(|s| **s == AlertStatus::FalsePositive)
            .count();
        Ok(Some(false_positives as f64 / recent.len() as f64))
    }

    async fn save_vectors(&self, vectors: &[ContentVector]) -> Result<(), AppError> {
        self.inner
            .lock()
            .unwrap()
            .vectors
            .extend(vectors.iter().cloned());
        Ok(())
    }

    async fn vectors_for_snapshot(
        &self,
        snapshot_id: Uuid,
    ) -> Result<Vec<ContentVector>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .vectors
            .iter()
            .filter(|v| v.snapshot_id == snapshot_id)
            .cloned()
            .collect())
    }

    async fn get_weights(&self, site_id: Uuid) -> Result<Option<ClassifierWeights>, AppError> {
        Ok(self.inner.lock().unwrap().weights.get(&site_id).copied())
    }

    async fn save_weights(
        &self,
        site_id: Uuid,
        weights: ClassifierWeights,
    ) -> Result<(), AppError> {
        self.inner.lock().unwrap().weights.insert(site_id, weights);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

enum RunnerScript {
    Succeed { delay: Duration },
    Fail(Box<dyn Fn() -> AppError + Send + Sync>),
}

/// Mock check runner for scheduler tests; records concurrency.
#[derive(Clone)]
pub struct MockRunner {
    script: Arc<RunnerScript>,
    runs: Arc<AtomicUsize>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockRunner {
    pub fn succeeding() -> Self {
        Self::slow(Duration::from_millis(5))
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            script: Arc::new(RunnerScript::Succeed { delay }),
            runs: Arc::new(AtomicUsize::new(0)),
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_with<F>(make_error: F) -> Self
    where
        F: Fn() -> AppError + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(RunnerScript::Fail(Box::new(make_error))),
            runs: Arc::new(AtomicUsize::new(0)),
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl CheckRunner for MockRunner {
    async fn run_check(
        &self,
        site: Site,
        _consecutive_failures: u32,
    ) -> Result<CheckOutcome, AppError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let active = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let result = match &*self.script {
            RunnerScript::Succeed { delay } => {
                tokio::time::sleep(*delay).await;
                Ok(CheckOutcome {
                    execution_id: Uuid::new_v4(),
                    site_id: site.id,
                    snapshot_id: Some(Uuid::new_v4()),
                    change: None,
                    verdict: Some(Verdict::Benign),
                    alerts_emitted: 0,
                    report: WorkflowReport::default(),
                })
            }
            RunnerScript::Fail(make_error) => Err(make_error()),
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
