//! Confidence-weighted voting over the sub-classifier results.
//!
//! Every sub-result is a tagged [`ClassifierVote`] with `Abstained` as a
//! distinct tag; the ensemble folds over the list with no common base
//! type. Abstention contributes zero weight.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfidenceThresholds;
use crate::models::{ClassifierWeights, Verdict};
use crate::traits::LlmVerdict;

use super::rules::RuleVerdict;
use super::semantic::{RiskLevel, SemanticAnalysis};

/// One sub-classifier's contribution.
#[derive(Debug, Clone)]
pub enum ClassifierVote {
    Rules(RuleVerdict),
    Semantic(SemanticAnalysis),
    Llm(LlmVerdict),
    Abstained {
        name: &'static str,
        reason: String,
    },
}

impl ClassifierVote {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierVote::Rules(_) => "rules",
            ClassifierVote::Semantic(_) => "semantic",
            ClassifierVote::Llm(_) => "llm",
            ClassifierVote::Abstained { name, .. } => name,
        }
    }

    pub fn abstained(&self) -> bool {
        matches!(self, ClassifierVote::Abstained { .. })
    }

    /// The verdict, effective weight, and clarity this vote contributes.
    fn ballot(&self, weights: &ClassifierWeights) -> Option<(Verdict, f64, f64)> {
        match self {
            ClassifierVote::Rules(r) => Some((r.verdict, weights.rules * r.confidence, r.confidence)),
            ClassifierVote::Llm(l) => Some((l.verdict, weights.llm * l.confidence, l.confidence)),
            ClassifierVote::Semantic(s) => {
                // Risk-to-verdict projection.
                let (verdict, factor) = match s.risk {
                    RiskLevel::Critical | RiskLevel::High => (Verdict::Defacement, 0.8),
                    RiskLevel::Low => (Verdict::Benign, 0.8),
                    RiskLevel::Medium => (Verdict::Unclear, 0.6),
                };
                Some((verdict, weights.semantic * factor, s.clarity()))
            }
            ClassifierVote::Abstained { .. } => None,
        }
    }
}

/// Bucketed confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64, thresholds: &ConfidenceThresholds) -> Self {
        if score >= thresholds.very_high {
            ConfidenceLevel::VeryHigh
        } else if score >= thresholds.high {
            ConfidenceLevel::High
        } else if score >= thresholds.medium {
            ConfidenceLevel::Medium
        } else if score >= thresholds.low {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceLevel::VeryLow => "very_low",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::VeryHigh => "very_high",
        };
        write!(f, "{s}")
    }
}

/// Signal quality context feeding the confidence factors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceContext {
    pub has_baseline: bool,
    pub has_site_context: bool,
    /// False-positive rate over the site's trailing window, when known.
    pub historical_fp_rate: Option<f64>,
    pub vectors_available: bool,
}

/// Final adjudication of a significant change.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub verdict: Verdict,
    pub confidence: f64,
    pub level: ConfidenceLevel,
    /// Weighted share of non-abstaining classifiers that agree with the
    /// final verdict; drives adaptive weighting.
    pub agreement: f64,
    pub reasoning: String,
    pub votes: Vec<ClassifierVote>,
    pub weights: ClassifierWeights,
    pub processing_time: Duration,
}

/// Fold the votes into a final verdict and calibrated confidence.
pub fn combine(
    votes: Vec<ClassifierVote>,
    weights: ClassifierWeights,
    thresholds: &ConfidenceThresholds,
    context: &ConfidenceContext,
) -> ClassificationOutcome {
    let ballots: Vec<(Verdict, f64, f64)> =
        votes.iter().filter_map(|v| v.ballot(&weights)).collect();

    // Caution order doubles as the tie-break: the first strict maximum wins.
    let order = [
        Verdict::Defacement,
        Verdict::Suspicious,
        Verdict::Unclear,
        Verdict::Benign,
    ];
    let mut verdict = Verdict::Unclear;
    let mut best = f64::NEG_INFINITY;
    for candidate in order {
        let tally: f64 = ballots
            .iter()
            .filter(|(v, _, _)| *v == candidate)
            .map(|(_, w, _)| w)
            .sum();
        if tally > best {
            best = tally;
            verdict = candidate;
        }
    }
    if ballots.is_empty() {
        verdict = Verdict::Unclear;
    }

    let total_weight: f64 = ballots.iter().map(|(_, w, _)| w).sum();
    let concurring_weight: f64 = ballots
        .iter()
        .filter(|(v, _, _)| *v == verdict)
        .map(|(_, w, _)| w)
        .sum();
    let agreement = if total_weight > 0.0 {
        concurring_weight / total_weight
    } else {
        0.0
    };

    let concurring: Vec<&(Verdict, f64, f64)> =
        ballots.iter().filter(|(v, _, _)| *v == verdict).collect();
    let clarity = if concurring.is_empty() {
        0.0
    } else {
        concurring.iter().map(|(_, _, c)| c).sum::<f64>() / concurring.len() as f64
    };

    let context_factor = match (context.has_baseline, context.has_site_context) {
        (true, true) => 1.0,
        (true, false) => 0.65,
        (false, true) => 0.5,
        (false, false) => 0.3,
    };
    let historical = context
        .historical_fp_rate
        .map(|rate| (1.0 - rate).clamp(0.0, 1.0))
        .unwrap_or(0.5);
    let semantic_quality = if context.vectors_available { 1.0 } else { 0.0 };

    let confidence = (0.30 * agreement
        + 0.20 * clarity
        + 0.20 * context_factor
        + 0.15 * historical
        + 0.15 * semantic_quality)
        .clamp(0.0, 1.0);

    let reasoning = build_reasoning(&votes, &weights, verdict, confidence);

    ClassificationOutcome {
        verdict,
        confidence,
        level: ConfidenceLevel::from_score(confidence, thresholds),
        agreement,
        reasoning,
        votes,
        weights,
        processing_time: Duration::ZERO,
    }
}

/// Apply the adaptive weighting rule after a check: low agreement across
/// recent checks signals unreliable classifiers and dampens all weights.
pub fn adapt_weights(current: ClassifierWeights, agreement: f64) -> ClassifierWeights {
    if agreement < 0.3 {
        current.dampened()
    } else {
        current
    }
}

fn build_reasoning(
    votes: &[ClassifierVote],
    weights: &ClassifierWeights,
    verdict: Verdict,
    confidence: f64,
) -> String {
    let mut parts = vec![format!(
        "ensemble verdict {verdict} (confidence {confidence:.2})"
    )];
    for vote in votes {
        match vote {
            ClassifierVote::Rules(r) => {
                let evidence = if r.evidence.is_empty() {
                    "no rule matches".to_string()
                } else {
                    r.evidence[..r.evidence.len().min(3)].join(", ")
                };
                parts.push(format!(
                    "rules (w {:.2}): {} {:.2} [{evidence}]",
                    weights.rules, r.verdict, r.confidence
                ));
            }
            ClassifierVote::Semantic(s) => {
                parts.push(format!(
                    "semantic (w {:.2}): risk {} similarity {:.2}",
                    weights.semantic, s.risk, s.overall_similarity
                ));
            }
            ClassifierVote::Llm(l) => {
                parts.push(format!(
                    "llm (w {:.2}): {} {:.2} — {}",
                    weights.llm,
                    l.verdict,
                    l.confidence,
                    truncate(&l.reasoning, 160)
                ));
            }
            ClassifierVote::Abstained { name, reason } => {
                parts.push(format!("{name}: abstained ({reason})"));
            }
        }
    }
    parts.join("; ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}
