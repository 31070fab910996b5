//! Ports consumed by the core engine.
//!
//! Concrete implementations live in `vigil-client` (network) and
//! `vigil-db` (persistence); handwritten mocks live in
//! [`crate::testutil`].

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Alert, ClassifierWeights, ContentVector, NewAlert, NewSite, NewSnapshot, Site, Snapshot,
    Verdict, VectorKind,
};

/// Result of rendering a page.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub raw_html: String,
    pub http_status: u16,
    pub final_url: String,
    pub elapsed: Duration,
}

/// Fetches rendered page state from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchOutcome, AppError>> + Send;
}

/// Produces fixed-dimension semantic embeddings.
///
/// Deterministic for a fixed model; on failure the caller proceeds
/// without vectors.
pub trait Embedder: Send + Sync + Clone {
    fn embed(
        &self,
        text: &str,
        kind: VectorKind,
    ) -> impl Future<Output = Result<Vec<f32>, AppError>> + Send;

    /// Embedding dimension agreed between core and implementation.
    fn dimension(&self) -> usize;
}

/// Context handed to the LLM classifier.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub site_url: String,
    pub site_name: String,
    pub changed_excerpts: Vec<String>,
    pub static_context: Vec<String>,
    pub previous_verdict: Option<Verdict>,
}

/// Structured reply from the LLM classifier.
#[derive(Debug, Clone)]
pub struct LlmVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reasoning: String,
}

/// Adjudicates a suspicious change via a language model.
pub trait LlmClassifier: Send + Sync + Clone {
    fn classify(
        &self,
        request: &LlmRequest,
    ) -> impl Future<Output = Result<LlmVerdict, AppError>> + Send;
}

/// Notification port. Delivery is fire-and-forget and best-effort; the
/// core never blocks on it. Routing, retries, rate-limiting and
/// deduplication belong to implementations.
pub trait AlertSink: Send + Sync + Clone {
    fn emit(&self, alert: &Alert) -> impl Future<Output = ()> + Send;
}

/// Sink that logs alerts through `tracing`; the default when no
/// notification transport is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    async fn emit(&self, alert: &Alert) {
        tracing::warn!(
            site_id = %alert.site_id,
            kind = %alert.kind,
            severity = %alert.severity,
            title = %alert.title,
            "ALERT"
        );
    }
}

/// Storage port: CRUD over sites, snapshots, alerts, vectors and
/// per-site classifier weights.
pub trait MonitorStore: Send + Sync + Clone {
    // -- sites --

    fn create_site(&self, site: NewSite) -> impl Future<Output = Result<Site, AppError>> + Send;

    fn get_site(&self, id: Uuid) -> impl Future<Output = Result<Option<Site>, AppError>> + Send;

    fn list_sites(
        &self,
        active_only: bool,
    ) -> impl Future<Output = Result<Vec<Site>, AppError>> + Send;

    fn update_site(&self, site: &Site) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Remove a site; cascades to snapshots, vectors and alerts.
    fn delete_site(&self, id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    // -- snapshots --

    fn save_snapshot(
        &self,
        snapshot: NewSnapshot,
    ) -> impl Future<Output = Result<Snapshot, AppError>> + Send;

    fn latest_snapshot(
        &self,
        site_id: Uuid,
    ) -> impl Future<Output = Result<Option<Snapshot>, AppError>> + Send;

    /// Most recent snapshot whose verdict is benign or initial.
    fn baseline_snapshot(
        &self,
        site_id: Uuid,
    ) -> impl Future<Output = Result<Option<Snapshot>, AppError>> + Send;

    fn recent_snapshots(
        &self,
        site_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Snapshot>, AppError>> + Send;

    fn update_snapshot_verdict(
        &self,
        snapshot_id: Uuid,
        verdict: Verdict,
        confidence: f64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Keep only the newest `keep` snapshots for the site. Vectors of
    /// pruned snapshots are removed in the same pass.
    fn prune_snapshots(
        &self,
        site_id: Uuid,
        keep: u32,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    // -- alerts --

    fn save_alert(&self, alert: NewAlert) -> impl Future<Output = Result<Alert, AppError>> + Send;

    fn open_alerts(
        &self,
        site_id: Option<Uuid>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Alert>, AppError>> + Send;

    /// Share of the site's most recent `window` adjudicated alerts the
    /// operator marked as false positives, in [0, 1]. `None` when the
    /// site has no adjudicated alerts yet — the confidence calculation
    /// then treats the historical factor as neutral.
    fn false_positive_rate(
        &self,
        site_id: Uuid,
        window: usize,
    ) -> impl Future<Output = Result<Option<f64>, AppError>> + Send;

    // -- vectors --

    fn save_vectors(
        &self,
        vectors: &[ContentVector],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn vectors_for_snapshot(
        &self,
        snapshot_id: Uuid,
    ) -> impl Future<Output = Result<Vec<ContentVector>, AppError>> + Send;

    // -- adaptive weights --

    fn get_weights(
        &self,
        site_id: Uuid,
    ) -> impl Future<Output = Result<Option<ClassifierWeights>, AppError>> + Send;

    fn save_weights(
        &self,
        site_id: Uuid,
        weights: ClassifierWeights,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
