//! The ensemble classification pipeline.
//!
//! Three sub-classifiers (rule-based, semantic, LLM) run concurrently and
//! their verdicts are combined with confidence-weighted voting. A failed
//! sub-classifier abstains; the ensemble proceeds with whatever remains.

pub mod ensemble;
pub mod pipeline;
pub mod rules;
pub mod semantic;

pub use ensemble::{
    ClassificationOutcome, ClassifierVote, ConfidenceContext, ConfidenceLevel, adapt_weights,
};
pub use pipeline::{ClassificationPipeline, ClassificationRequest};
pub use rules::{RuleBasedClassifier, RuleVerdict};
pub use semantic::{RiskLevel, SemanticAnalysis, SemanticAnalyzer};
