//! Per-check workflow: the fetch → extract → detect → classify → persist
//! → alert DAG.
//!
//! Steps declare their dependencies in a static table and are dispatched
//! in topological waves; steps in the same wave run concurrently
//! (detect and vectorize both depend only on extract). Partial-failure
//! semantics follow the step contracts: a vectorize failure is tolerated,
//! an extract failure aborts the check, a persist failure is retried once
//! and then surfaced to the scheduler.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::classifier::{
    ClassificationOutcome, ClassificationPipeline, ClassificationRequest, ConfidenceContext,
    adapt_weights,
};
use crate::config::MonitorConfig;
use crate::detect::{ChangeClass, ChangeDetector, ChangeReport};
use crate::error::AppError;
use crate::extract::{ContentExtractor, ExtractedContent};
use crate::models::{
    Alert, AlertKind, AlertSeverity, ContentVector, NewAlert, NewSnapshot, Site, Snapshot,
    Verdict, VectorKind,
};
use crate::traits::{AlertSink, Embedder, FetchOutcome, Fetcher, LlmClassifier, MonitorStore};
use crate::vectorize::Vectorizer;

/// Trailing window of adjudicated alerts feeding the historical
/// confidence factor.
const FALSE_POSITIVE_WINDOW: usize = 20;

/// The workflow's step nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Fetch,
    Extract,
    Detect,
    Vectorize,
    Classify,
    Persist,
    Alert,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Fetch => "fetch",
            Step::Extract => "extract",
            Step::Detect => "detect",
            Step::Vectorize => "vectorize",
            Step::Classify => "classify",
            Step::Persist => "persist",
            Step::Alert => "alert",
        }
    }

    /// Static dependency table defining the DAG.
    pub fn deps(&self) -> &'static [Step] {
        match self {
            Step::Fetch => &[],
            Step::Extract => &[Step::Fetch],
            Step::Detect => &[Step::Extract],
            Step::Vectorize => &[Step::Extract],
            Step::Classify => &[Step::Detect, Step::Vectorize],
            Step::Persist => &[Step::Classify],
            Step::Alert => &[Step::Persist],
        }
    }

    pub const ALL: [Step; 7] = [
        Step::Fetch,
        Step::Extract,
        Step::Detect,
        Step::Vectorize,
        Step::Classify,
        Step::Persist,
        Step::Alert,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    /// Step failed; whether that aborts the check depends on the step.
    Failed,
    /// Condition not met (e.g. classify on a minor change).
    Skipped,
}

/// Per-step record kept for observability.
#[derive(Debug)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub elapsed: Duration,
    pub detail: Option<String>,
}

/// Execution trace of one workflow run.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub steps: Vec<StepRecord>,
}

impl WorkflowReport {
    pub fn status_of(&self, step: Step) -> Option<StepStatus> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.status)
    }
}

/// Result of a completed check.
#[derive(Debug)]
pub struct CheckOutcome {
    pub execution_id: Uuid,
    pub site_id: Uuid,
    pub snapshot_id: Option<Uuid>,
    pub change: Option<ChangeClass>,
    pub verdict: Option<Verdict>,
    pub alerts_emitted: usize,
    pub report: WorkflowReport,
}

/// Mutable state threaded through the waves. Steps read it immutably;
/// their outputs are applied between waves.
#[derive(Default)]
struct WorkflowState {
    fetch: Option<FetchOutcome>,
    content: Option<ExtractedContent>,
    snapshot_id: Option<Uuid>,
    baseline: Option<Snapshot>,
    baseline_vectors: Vec<ContentVector>,
    change: Option<ChangeReport>,
    vectors: Vec<ContentVector>,
    vectorize_failed: bool,
    classification: Option<ClassificationOutcome>,
    persisted: Option<Snapshot>,
    alerts_emitted: usize,
}

enum StepOutput {
    Fetched(FetchOutcome),
    Extracted {
        content: Box<ExtractedContent>,
        snapshot_id: Uuid,
    },
    Detected {
        baseline: Option<Snapshot>,
        baseline_vectors: Vec<ContentVector>,
        report: Option<ChangeReport>,
    },
    Vectorized(Vec<ContentVector>),
    VectorizeFailed,
    Classified(Box<ClassificationOutcome>),
    Persisted(Box<Snapshot>),
    Alerted(usize),
    Nothing,
}

struct StepRun {
    status: StepStatus,
    output: StepOutput,
    error: Option<AppError>,
    detail: Option<String>,
}

impl StepRun {
    fn success(output: StepOutput) -> Self {
        Self {
            status: StepStatus::Success,
            output,
            error: None,
            detail: None,
        }
    }

    fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            output: StepOutput::Nothing,
            error: None,
            detail: Some(detail.into()),
        }
    }

    fn failed(error: AppError) -> Self {
        Self {
            status: StepStatus::Failed,
            detail: Some(error.to_string()),
            output: StepOutput::Nothing,
            error: Some(error),
        }
    }
}

/// Drives one site check through the step DAG.
///
/// Generic over every external dependency, enabling dependency injection
/// and tests without real network, browser, LLM or database.
pub struct CheckWorkflow<F, E, L, S, A>
where
    F: Fetcher,
    E: Embedder,
    L: LlmClassifier,
    S: MonitorStore,
    A: AlertSink + 'static,
{
    fetcher: F,
    embedder: E,
    extractor: std::sync::Arc<ContentExtractor>,
    detector: ChangeDetector,
    vectorizer: Vectorizer,
    pipeline: std::sync::Arc<ClassificationPipeline<L>>,
    store: S,
    alert_sink: A,
    config: MonitorConfig,
}

impl<F, E, L, S, A> Clone for CheckWorkflow<F, E, L, S, A>
where
    F: Fetcher,
    E: Embedder,
    L: LlmClassifier,
    S: MonitorStore,
    A: AlertSink + 'static,
{
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            embedder: self.embedder.clone(),
            extractor: self.extractor.clone(),
            detector: self.detector.clone(),
            vectorizer: self.vectorizer.clone(),
            pipeline: self.pipeline.clone(),
            store: self.store.clone(),
            alert_sink: self.alert_sink.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F, E, L, S, A> CheckWorkflow<F, E, L, S, A>
where
    F: Fetcher,
    E: Embedder,
    L: LlmClassifier,
    S: MonitorStore,
    A: AlertSink + 'static,
{
    pub fn new(
        fetcher: F,
        embedder: E,
        llm: L,
        store: S,
        alert_sink: A,
        config: MonitorConfig,
    ) -> Result<Self, AppError> {
        let extractor = ContentExtractor::new(&config.extractor)?;
        let pipeline =
            ClassificationPipeline::new(llm, config.classifier.clone(), &config.breaker)?;
        Ok(Self {
            fetcher,
            embedder,
            extractor: std::sync::Arc::new(extractor),
            detector: ChangeDetector::new(config.detector),
            vectorizer: Vectorizer::new(config.vectorizer),
            pipeline: std::sync::Arc::new(pipeline),
            store,
            alert_sink,
            config,
        })
    }

    /// Run one check for a site. `consecutive_failures` is the failure
    /// streak before this run, used for site-down accounting.
    pub async fn run(
        &self,
        site: &Site,
        consecutive_failures: u32,
    ) -> Result<CheckOutcome, AppError> {
        let execution_id = Uuid::new_v4();
        tracing::info!(site = %site.url, %execution_id, "Check started");

        match tokio::time::timeout(
            self.config.workflow.total_deadline(),
            self.run_dag(site, consecutive_failures, execution_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(site = %site.url, %execution_id, "Workflow deadline exceeded");
                Err(AppError::Timeout(self.config.workflow.total_deadline_seconds))
            }
        }
    }

    async fn run_dag(
        &self,
        site: &Site,
        consecutive_failures: u32,
        execution_id: Uuid,
    ) -> Result<CheckOutcome, AppError> {
        let mut state = WorkflowState::default();
        let mut report = WorkflowReport::default();
        let mut statuses: HashMap<Step, StepStatus> = HashMap::new();
        let mut abort: Option<AppError> = None;

        while abort.is_none() {
            let ready: Vec<Step> = Step::ALL
                .iter()
                .copied()
                .filter(|s| !statuses.contains_key(s))
                .filter(|s| s.deps().iter().all(|d| statuses.contains_key(d)))
                .collect();
            if ready.is_empty() {
                break;
            }

            let wave = futures::future::join_all(
                ready.iter().map(|step| self.timed_step(*step, site, &state)),
            )
            .await;

            for (step, (run, elapsed)) in ready.into_iter().zip(wave) {
                statuses.insert(step, run.status);
                report.steps.push(StepRecord {
                    step,
                    status: run.status,
                    elapsed,
                    detail: run.detail,
                });

                apply_output(&mut state, run.output);

                if run.status == StepStatus::Failed {
                    match step {
                        Step::Fetch => {
                            let error = run.error.unwrap_or(AppError::Generic("fetch".into()));
                            self.handle_fetch_failure(site, consecutive_failures, &error)
                                .await;
                            abort = Some(error);
                        }
                        Step::Extract | Step::Persist => {
                            abort = run.error;
                        }
                        // Vectorize, classify and alert failures are
                        // locally recovered.
                        _ => {}
                    }
                }
            }
        }

        if let Some(error) = abort {
            tracing::warn!(site = %site.url, %execution_id, error = %error, "Check aborted");
            return Err(error);
        }

        let outcome = CheckOutcome {
            execution_id,
            site_id: site.id,
            snapshot_id: state.persisted.as_ref().map(|s| s.id),
            change: state.change.as_ref().map(|c| c.class),
            verdict: state.persisted.as_ref().and_then(|s| s.verdict),
            alerts_emitted: state.alerts_emitted,
            report,
        };
        tracing::info!(
            site = %site.url,
            %execution_id,
            change = ?outcome.change,
            verdict = ?outcome.verdict,
            alerts = outcome.alerts_emitted,
            "Check finished"
        );
        Ok(outcome)
    }

    fn timed_step<'a>(
        &'a self,
        step: Step,
        site: &'a Site,
        state: &'a WorkflowState,
    ) -> impl Future<Output = (StepRun, Duration)> + 'a {
        async move {
            let started = Instant::now();
            let run = self.run_step(step, site, state).await;
            (run, started.elapsed())
        }
    }

    async fn run_step(&self, step: Step, site: &Site, state: &WorkflowState) -> StepRun {
        match step {
            Step::Fetch => self.step_fetch(site).await,
            Step::Extract => self.step_extract(site, state),
            Step::Detect => self.step_detect(site, state).await,
            Step::Vectorize => self.step_vectorize(site, state).await,
            Step::Classify => self.step_classify(site, state).await,
            Step::Persist => self.step_persist(site, state).await,
            Step::Alert => self.step_alert(site, state).await,
        }
    }

    async fn step_fetch(&self, site: &Site) -> StepRun {
        let result = tokio::time::timeout(
            self.config.workflow.fetch_timeout(),
            self.fetcher.fetch(&site.url),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => {
                if outcome.http_status >= 400 {
                    return StepRun::failed(AppError::from_http_status(
                        outcome.http_status,
                        &site.url,
                    ));
                }
                StepRun::success(StepOutput::Fetched(outcome))
            }
            Ok(Err(e)) => StepRun::failed(e),
            Err(_) => StepRun::failed(AppError::Timeout(
                self.config.workflow.fetch_timeout_seconds,
            )),
        }
    }

    fn step_extract(&self, site: &Site, state: &WorkflowState) -> StepRun {
        let Some(fetch) = &state.fetch else {
            return StepRun::skipped("no fetched page");
        };
        if fetch.raw_html.trim().is_empty() {
            return StepRun::failed(AppError::ExtractionError("empty document".into()));
        }

        let content = self.extractor.extract(&fetch.raw_html, &site.url);
        if content.normalized_text.is_empty() && content.outline.is_empty() {
            return StepRun::failed(AppError::ExtractionError(
                "no extractable content".into(),
            ));
        }
        StepRun::success(StepOutput::Extracted {
            content: Box::new(content),
            // The snapshot id is fixed here so vectors created in the
            // parallel branch can reference it before persist runs.
            snapshot_id: Uuid::new_v4(),
        })
    }

    async fn step_detect(&self, site: &Site, state: &WorkflowState) -> StepRun {
        let Some(content) = &state.content else {
            return StepRun::skipped("no extracted content");
        };

        let baseline = match self.store.baseline_snapshot(site.id).await {
            Ok(b) => b,
            Err(e) => return StepRun::failed(e),
        };

        let Some(baseline) = baseline else {
            // First snapshot of this site: nothing to compare against.
            return StepRun::success(StepOutput::Detected {
                baseline: None,
                baseline_vectors: Vec::new(),
                report: None,
            });
        };

        let baseline_vectors = self
            .store
            .vectors_for_snapshot(baseline.id)
            .await
            .unwrap_or_default();

        let baseline_content = baseline.to_extracted();
        let report = self.detector.detect(
            &baseline_content,
            &baseline.fingerprints,
            content,
            &content.fingerprints(),
            &site.thresholds,
        );

        tracing::debug!(
            site = %site.url,
            class = ?report.class,
            keyword_similarity = report.keyword_similarity,
            structural_similarity = report.structural_similarity,
            "Change detection"
        );

        StepRun::success(StepOutput::Detected {
            baseline: Some(baseline),
            baseline_vectors,
            report: Some(report),
        })
    }

    async fn step_vectorize(&self, site: &Site, state: &WorkflowState) -> StepRun {
        let (Some(content), Some(snapshot_id)) = (&state.content, state.snapshot_id) else {
            return StepRun::skipped("no extracted content");
        };

        match self
            .vectorizer
            .vectorize_content(&self.embedder, content, site.id, snapshot_id)
            .await
        {
            Ok(vectors) => StepRun::success(StepOutput::Vectorized(vectors)),
            Err(e) => {
                // Non-fatal: the classifier runs without vectors.
                tracing::warn!(site = %site.url, error = %e, "Vectorization failed");
                StepRun {
                    status: StepStatus::Failed,
                    output: StepOutput::VectorizeFailed,
                    detail: Some(e.to_string()),
                    error: None,
                }
            }
        }
    }

    async fn step_classify(&self, site: &Site, state: &WorkflowState) -> StepRun {
        let Some(report) = &state.change else {
            return StepRun::skipped("initial snapshot");
        };
        if !report.class.needs_classification() {
            return StepRun::skipped(format!("change class {:?}", report.class));
        }
        let Some(content) = &state.content else {
            return StepRun::skipped("no extracted content");
        };

        let baseline_text = state
            .baseline
            .as_ref()
            .map(|b| b.extracted_text.clone())
            .unwrap_or_default();
        let (changed_excerpts, static_context) = split_changed_blocks(content, &baseline_text);

        let weights = self
            .store
            .get_weights(site.id)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

        // The site's adjudication track record drives the historical
        // confidence factor; a lookup failure degrades to neutral.
        let historical_fp_rate = self
            .store
            .false_positive_rate(site.id, FALSE_POSITIVE_WINDOW)
            .await
            .ok()
            .flatten();

        let request = ClassificationRequest {
            site_url: site.url.clone(),
            site_name: site.name.clone(),
            rule_texts: rule_texts(content),
            changed_excerpts,
            static_context,
            baseline_vectors: state.baseline_vectors.clone(),
            new_vectors: state.vectors.clone(),
            previous_verdict: state.baseline.as_ref().and_then(|b| b.verdict),
            weights,
            context: ConfidenceContext {
                has_baseline: state.baseline.is_some(),
                has_site_context: true,
                historical_fp_rate,
                vectors_available: !state.vectors.is_empty()
                    && !state.baseline_vectors.is_empty(),
            },
        };

        let outcome = self.pipeline.classify(&request).await;
        StepRun::success(StepOutput::Classified(Box::new(outcome)))
    }

    async fn step_persist(&self, site: &Site, state: &WorkflowState) -> StepRun {
        let (Some(fetch), Some(content), Some(snapshot_id)) =
            (&state.fetch, &state.content, state.snapshot_id)
        else {
            return StepRun::skipped("nothing to persist");
        };

        let verdict = persisted_verdict(state);
        let confidence = match (&state.classification, &state.change) {
            (Some(c), _) => Some(c.confidence),
            (None, _) => state.baseline.as_ref().and_then(|b| b.confidence),
        };

        let vector_ref = state
            .vectors
            .iter()
            .find(|v| v.kind == VectorKind::Main)
            .map(|v| v.id);

        let snapshot = NewSnapshot {
            id: snapshot_id,
            site_id: site.id,
            http_status: fetch.http_status,
            response_time_ms: fetch.elapsed.as_secs_f64() * 1000.0,
            raw_html: Some(fetch.raw_html.clone().into_bytes()),
            extracted_text: content.normalized_text.clone(),
            fingerprints: content.fingerprints(),
            outline: content.outline.clone(),
            truncated: content.truncated,
            vector_ref,
            prev_similarity: state.change.as_ref().map(|c| c.keyword_similarity),
            verdict: Some(verdict),
            confidence,
        };

        // One in-workflow retry before the failure surfaces to the
        // scheduler.
        let saved = match self.store.save_snapshot(snapshot.clone()).await {
            Ok(s) => s,
            Err(first) => {
                tracing::warn!(site = %site.url, error = %first, "Persist failed, retrying once");
                match self.store.save_snapshot(snapshot).await {
                    Ok(s) => s,
                    Err(second) => return StepRun::failed(second),
                }
            }
        };

        if !state.vectors.is_empty() {
            if let Err(e) = self.store.save_vectors(&state.vectors).await {
                tracing::warn!(site = %site.url, error = %e, "Vector persist failed");
            }
        }

        // Adaptive weights update happens here, not in the classifier,
        // to avoid read-modify-write races between steps.
        if let Some(classification) = &state.classification {
            let adapted = adapt_weights(classification.weights, classification.agreement);
            if let Err(e) = self.store.save_weights(site.id, adapted).await {
                tracing::warn!(site = %site.url, error = %e, "Weights persist failed");
            }
        }

        let keep = site.keep_scans.unwrap_or(self.config.retention.keep_scans);
        if let Err(e) = self.store.prune_snapshots(site.id, keep).await {
            tracing::warn!(site = %site.url, error = %e, "Snapshot pruning failed");
        }

        StepRun::success(StepOutput::Persisted(Box::new(saved)))
    }

    async fn step_alert(&self, site: &Site, state: &WorkflowState) -> StepRun {
        let Some(snapshot) = &state.persisted else {
            return StepRun::skipped("nothing persisted");
        };
        let Some(verdict) = snapshot.verdict else {
            return StepRun::skipped("no verdict");
        };

        let kind = match verdict {
            Verdict::Defacement => AlertKind::Defacement,
            Verdict::Suspicious => AlertKind::Suspicious,
            // An unresolved significant change is still worth an
            // operator's look, at low severity.
            Verdict::Unclear if state.classification.is_some() => AlertKind::Suspicious,
            _ => return StepRun::skipped(format!("verdict {verdict}")),
        };

        let confidence = snapshot.confidence.unwrap_or(0.0);
        let severity = alert_severity(verdict, confidence);
        let similarity = state.change.as_ref().map(|c| c.keyword_similarity);
        let reasoning = state
            .classification
            .as_ref()
            .map(|c| c.reasoning.clone())
            .unwrap_or_else(|| "no classifier reasoning available".into());

        let alert = NewAlert {
            site_id: site.id,
            snapshot_id: Some(snapshot.id),
            kind,
            severity,
            title: format!("{} on {}", kind, site.name),
            description: reasoning,
            verdict_label: Some(verdict),
            confidence: Some(confidence),
            similarity,
        };

        match self.store.save_alert(alert).await {
            Ok(saved) => {
                self.dispatch_alert(saved);
                StepRun::success(StepOutput::Alerted(1))
            }
            Err(e) => {
                tracing::error!(site = %site.url, error = %e, "Alert persist failed");
                StepRun {
                    status: StepStatus::Failed,
                    output: StepOutput::Nothing,
                    detail: Some(e.to_string()),
                    error: None,
                }
            }
        }
    }

    /// Fire-and-forget notification; the workflow never blocks on delivery.
    fn dispatch_alert(&self, alert: Alert) {
        let sink = self.alert_sink.clone();
        tokio::spawn(async move {
            sink.emit(&alert).await;
        });
    }

    /// Site-down accounting on fetch failure: the alert fires exactly once,
    /// when the streak crosses the breaker threshold.
    async fn handle_fetch_failure(
        &self,
        site: &Site,
        consecutive_failures: u32,
        error: &AppError,
    ) {
        if !error.should_trip_circuit() {
            return;
        }
        let streak = consecutive_failures + 1;
        if streak != self.config.breaker.failure_threshold {
            return;
        }

        let alert = NewAlert {
            site_id: site.id,
            snapshot_id: None,
            kind: AlertKind::SiteDown,
            severity: AlertSeverity::High,
            title: format!("site_down on {}", site.name),
            description: format!("{streak} consecutive fetch failures; last: {error}"),
            verdict_label: None,
            confidence: None,
            similarity: None,
        };
        match self.store.save_alert(alert).await {
            Ok(saved) => self.dispatch_alert(saved),
            Err(e) => tracing::error!(site = %site.url, error = %e, "site_down alert persist failed"),
        }
    }
}

impl<F, E, L, S, A> crate::scheduler::CheckRunner for CheckWorkflow<F, E, L, S, A>
where
    F: Fetcher + 'static,
    E: Embedder + 'static,
    L: LlmClassifier + 'static,
    S: MonitorStore + 'static,
    A: AlertSink + 'static,
{
    async fn run_check(
        &self,
        site: Site,
        consecutive_failures: u32,
    ) -> Result<CheckOutcome, AppError> {
        self.run(&site, consecutive_failures).await
    }
}

fn apply_output(state: &mut WorkflowState, output: StepOutput) {
    match output {
        StepOutput::Fetched(o) => state.fetch = Some(o),
        StepOutput::Extracted {
            content,
            snapshot_id,
        } => {
            state.content = Some(*content);
            state.snapshot_id = Some(snapshot_id);
        }
        StepOutput::Detected {
            baseline,
            baseline_vectors,
            report,
        } => {
            state.baseline = baseline;
            state.baseline_vectors = baseline_vectors;
            state.change = report;
        }
        StepOutput::Vectorized(vectors) => state.vectors = vectors,
        StepOutput::VectorizeFailed => state.vectorize_failed = true,
        StepOutput::Classified(outcome) => state.classification = Some(*outcome),
        StepOutput::Persisted(snapshot) => state.persisted = Some(*snapshot),
        StepOutput::Alerted(n) => state.alerts_emitted += n,
        StepOutput::Nothing => {}
    }
}

/// The verdict written onto the new snapshot.
fn persisted_verdict(state: &WorkflowState) -> Verdict {
    if let Some(classification) = &state.classification {
        return classification.verdict;
    }
    match &state.change {
        // Unchanged inherits the baseline verdict.
        Some(report) if report.class == ChangeClass::Unchanged => state
            .baseline
            .as_ref()
            .and_then(|b| b.verdict)
            .unwrap_or(Verdict::Benign),
        // Minor changes keep the baseline and are benign by definition.
        Some(report) if report.class == ChangeClass::Minor => Verdict::Benign,
        // Significant/ambiguous with no classification result.
        Some(_) => Verdict::Unclear,
        // First snapshot.
        None => Verdict::Initial,
    }
}

fn alert_severity(verdict: Verdict, confidence: f64) -> AlertSeverity {
    match verdict {
        Verdict::Defacement => {
            if confidence >= 0.6 {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            }
        }
        Verdict::Suspicious => {
            if confidence >= 0.6 {
                AlertSeverity::Medium
            } else {
                AlertSeverity::Low
            }
        }
        _ => AlertSeverity::Low,
    }
}

/// Split the new snapshot's text blocks into changed excerpts (absent from
/// the baseline text) and static context (still present).
fn split_changed_blocks(
    content: &ExtractedContent,
    baseline_text: &str,
) -> (Vec<String>, Vec<String>) {
    let mut changed = Vec::new();
    let mut kept = Vec::new();
    for block in &content.text_blocks {
        if baseline_text.contains(&block.to_lowercase()) {
            kept.push(block.clone());
        } else {
            changed.push(block.clone());
        }
    }
    (changed, kept)
}

fn rule_texts(content: &ExtractedContent) -> Vec<String> {
    let mut texts = vec![content.normalized_text.clone()];
    if !content.title.is_empty() {
        texts.push(content.title.clone());
    }
    if !content.meta_description.is_empty() {
        texts.push(content.meta_description.clone());
    }
    texts.extend(content.text_blocks.iter().cloned());
    texts
}
