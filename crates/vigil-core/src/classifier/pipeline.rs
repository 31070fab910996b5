//! Pipeline driving the three sub-classifiers and merging their votes.
//!
//! Parallel mode runs rules, semantic analysis and the LLM call
//! concurrently. When the LLM circuit is open the pipeline falls back to
//! sequential mode over the remaining classifiers and the LLM abstains.

use std::time::Instant;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{BreakerConfig, ClassifierConfig};
use crate::error::AppError;
use crate::models::{ClassifierWeights, ContentVector, Verdict};
use crate::traits::{LlmClassifier, LlmRequest};

use super::ensemble::{self, ClassificationOutcome, ClassifierVote, ConfidenceContext};
use super::rules::RuleBasedClassifier;
use super::semantic::SemanticAnalyzer;

/// Everything the pipeline needs to adjudicate one change.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub site_url: String,
    pub site_name: String,
    /// Texts scanned by the rule classifier: normalized text, text blocks,
    /// title and meta description of the new snapshot.
    pub rule_texts: Vec<String>,
    /// Excerpts that changed relative to the baseline.
    pub changed_excerpts: Vec<String>,
    /// Unchanged content supplied to the LLM for reference.
    pub static_context: Vec<String>,
    pub baseline_vectors: Vec<ContentVector>,
    pub new_vectors: Vec<ContentVector>,
    pub previous_verdict: Option<Verdict>,
    pub weights: ClassifierWeights,
    pub context: ConfidenceContext,
}

pub struct ClassificationPipeline<L: LlmClassifier> {
    rules: RuleBasedClassifier,
    semantic: SemanticAnalyzer,
    llm: L,
    llm_breaker: CircuitBreaker,
    config: ClassifierConfig,
}

impl<L: LlmClassifier> ClassificationPipeline<L> {
    pub fn new(llm: L, config: ClassifierConfig, breaker: &BreakerConfig) -> Result<Self, AppError> {
        Ok(Self {
            rules: RuleBasedClassifier::new()?,
            semantic: SemanticAnalyzer::new(),
            llm,
            llm_breaker: CircuitBreaker::new("llm", breaker),
            config,
        })
    }

    /// Adjudicate one significant change into a final verdict.
    pub async fn classify(&self, request: &ClassificationRequest) -> ClassificationOutcome {
        let started = Instant::now();

        let votes = if self.llm_breaker.allow_request() {
            self.classify_parallel(request).await
        } else {
            tracing::warn!(site = %request.site_url, "LLM circuit open, sequential fallback");
            self.classify_sequential(request)
        };

        let mut outcome = ensemble::combine(
            votes,
            request.weights,
            &self.config.confidence_thresholds,
            &request.context,
        );
        outcome.processing_time = started.elapsed();

        tracing::info!(
            site = %request.site_url,
            verdict = %outcome.verdict,
            confidence = outcome.confidence,
            agreement = outcome.agreement,
            elapsed_ms = outcome.processing_time.as_millis() as u64,
            "Classification complete"
        );
        outcome
    }

    async fn classify_parallel(&self, request: &ClassificationRequest) -> Vec<ClassifierVote> {
        let rules_task = async { self.run_rules(request) };
        let semantic_task = async { self.run_semantic(request) };
        let llm_task = self.run_llm(request);

        let (rules_vote, semantic_vote, llm_vote) =
            tokio::join!(rules_task, semantic_task, llm_task);
        vec![rules_vote, semantic_vote, llm_vote]
    }

    /// Fallback when the LLM circuit is open: remaining classifiers run
    /// in order and the LLM abstains outright.
    fn classify_sequential(&self, request: &ClassificationRequest) -> Vec<ClassifierVote> {
        let rules_vote = self.run_rules(request);
        let semantic_vote = self.run_semantic(request);
        vec![
            rules_vote,
            semantic_vote,
            ClassifierVote::Abstained {
                name: "llm",
                reason: "circuit open".into(),
            },
        ]
    }

    fn run_rules(&self, request: &ClassificationRequest) -> ClassifierVote {
        let texts: Vec<&str> = request.rule_texts.iter().map(String::as_str).collect();
        ClassifierVote::Rules(self.rules.classify(&texts))
    }

    fn run_semantic(&self, request: &ClassificationRequest) -> ClassifierVote {
        match self
            .semantic
            .analyze(&request.baseline_vectors, &request.new_vectors)
        {
            Some(analysis) => ClassifierVote::Semantic(analysis),
            None => ClassifierVote::Abstained {
                name: "semantic",
                reason: "no comparable vectors".into(),
            },
        }
    }

    async fn run_llm(&self, request: &ClassificationRequest) -> ClassifierVote {
        let llm_request = LlmRequest {
            site_url: request.site_url.clone(),
            site_name: request.site_name.clone(),
            changed_excerpts: request.changed_excerpts.clone(),
            static_context: request.static_context.clone(),
            previous_verdict: request.previous_verdict,
        };

        let result =
            tokio::time::timeout(self.config.llm_timeout(), self.llm.classify(&llm_request)).await;

        match result {
            Ok(Ok(verdict)) => {
                self.llm_breaker.record_success();
                ClassifierVote::Llm(verdict)
            }
            Ok(Err(e)) => {
                self.llm_breaker.record_failure(&e);
                tracing::warn!(site = %request.site_url, error = %e, "LLM classifier abstained");
                ClassifierVote::Abstained {
                    name: "llm",
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                let timeout_err = AppError::Timeout(self.config.llm_timeout_seconds);
                self.llm_breaker.record_failure(&timeout_err);
                tracing::warn!(site = %request.site_url, "LLM classifier timed out");
                ClassifierVote::Abstained {
                    name: "llm",
                    reason: "timeout".into(),
                }
            }
        }
    }

    /// Expose breaker state for health reporting.
    pub fn llm_breaker(&self) -> &CircuitBreaker {
        &self.llm_breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ConfidenceLevel;
    use crate::models::VectorKind;
    use crate::testutil::MockLlm;
    use std::time::Duration;
    use uuid::Uuid;

    fn vector(kind: VectorKind, payload: Vec<f32>) -> ContentVector {
        ContentVector {
            id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            kind,
            dimension: payload.len(),
            payload,
        }
    }

    fn request(rule_texts: Vec<String>, old: Vec<f32>, new: Vec<f32>) -> ClassificationRequest {
        ClassificationRequest {
            site_url: "https://example.com".into(),
            site_name: "example".into(),
            rule_texts,
            changed_excerpts: vec!["changed text".into()],
            static_context: vec!["static text".into()],
            baseline_vectors: vec![vector(VectorKind::Main, old)],
            new_vectors: vec![vector(VectorKind::Main, new)],
            previous_verdict: Some(Verdict::Benign),
            weights: ClassifierWeights::default(),
            context: ConfidenceContext {
                has_baseline: true,
                has_site_context: true,
                historical_fp_rate: Some(0.0),
                vectors_available: true,
            },
        }
    }

    fn pipeline(llm: MockLlm) -> ClassificationPipeline<MockLlm> {
        ClassificationPipeline::new(llm, ClassifierConfig::default(), &BreakerConfig::default())
            .unwrap()
    }

    #[tokio::test]
    async fn clear_defacement_end_to_end() {
        let llm = MockLlm::replying(Verdict::Defacement, 0.95, "hacked-by banner");
        let pipeline = pipeline(llm);

        let req = request(
            vec!["HACKED BY phantom_crew".into(), "pwned".into()],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
        );
        let outcome = pipeline.classify(&req).await;

        assert_eq!(outcome.verdict, Verdict::Defacement);
        assert!(outcome.confidence >= 0.8);
        assert_eq!(outcome.level, ConfidenceLevel::VeryHigh);
    }

    #[tokio::test]
    async fn llm_timeout_becomes_abstention_not_error() {
        let llm = MockLlm::hanging();
        let mut config = ClassifierConfig::default();
        config.llm_timeout_seconds = 0; // elapses immediately
        let pipeline =
            ClassificationPipeline::new(llm, config, &BreakerConfig::default()).unwrap();

        let req = request(
            vec!["significant keyword change".into()],
            vec![1.0, 0.2],
            vec![0.8, 0.7],
        );
        let outcome = pipeline.classify(&req).await;

        assert!(
            outcome
                .votes
                .iter()
                .any(|v| v.abstained() && v.name() == "llm")
        );
        // Remaining classifiers still produce a verdict.
        assert_ne!(outcome.votes.len(), 0);
    }

    #[tokio::test]
    async fn llm_error_abstains_and_ensemble_proceeds() {
        let llm = MockLlm::failing(AppError::LlmError {
            message: "upstream".into(),
            status_code: 500,
            retryable: true,
        });
        let pipeline = pipeline(llm);

        let req = request(vec!["benign change".into()], vec![1.0, 0.0], vec![1.0, 0.01]);
        let outcome = pipeline.classify(&req).await;

        assert!(outcome.votes.iter().any(|v| v.abstained()));
        assert_eq!(outcome.verdict, Verdict::Benign);
    }

    #[tokio::test]
    async fn open_breaker_forces_sequential_fallback() {
        let llm = MockLlm::failing(AppError::NetworkError("down".into()));
        let breaker_config = BreakerConfig {
            failure_threshold: 1,
            recovery_timeout_seconds: 3600,
        };
        let pipeline = ClassificationPipeline::new(
            llm,
            ClassifierConfig::default(),
            &breaker_config,
        )
        .unwrap();

        let req = request(vec!["text".into()], vec![1.0, 0.0], vec![1.0, 0.0]);

        // First call records the failure and opens the circuit.
        let _ = pipeline.classify(&req).await;
        assert!(pipeline.llm_breaker().is_open());

        // Second call takes the sequential path with an llm abstention.
        let outcome = pipeline.classify(&req).await;
        let llm_vote = outcome
            .votes
            .iter()
            .find(|v| v.name() == "llm")
            .expect("llm vote present");
        assert!(llm_vote.abstained());
    }

    #[tokio::test]
    async fn ambiguous_change_resolves_unclear() {
        // No suspicious tokens, the LLM abstains, and the semantic
        // similarity sits in the medium band, which projects to unclear
        // at 0.3·0.6 = 0.18 and outweighs the clean-scan benign vote
        // at 0.2·0.5 = 0.10.
        let llm = MockLlm::hanging();
        let mut config = ClassifierConfig::default();
        config.llm_timeout_seconds = 0;
        let pipeline =
            ClassificationPipeline::new(llm, config, &BreakerConfig::default()).unwrap();

        let angle = (0.88f64).acos();
        let req = request(
            vec!["totally ordinary wording".into()],
            vec![1.0, 0.0],
            vec![angle.cos() as f32, angle.sin() as f32],
        );
        let outcome = pipeline.classify(&req).await;
        assert_eq!(outcome.verdict, Verdict::Unclear);
    }

    #[tokio::test]
    async fn processing_time_is_recorded() {
        let llm = MockLlm::replying(Verdict::Benign, 0.9, "fine");
        let pipeline = pipeline(llm);
        let req = request(vec!["text".into()], vec![1.0, 0.0], vec![1.0, 0.0]);
        let outcome = pipeline.classify(&req).await;
        assert!(outcome.processing_time < Duration::from_secs(5));
    }
}
