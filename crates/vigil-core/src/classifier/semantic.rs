//! Semantic drift analysis between baseline and new content vectors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ContentVector, VectorKind};
use crate::vectorize::cosine_similarity;

/// Risk band derived from the main-content similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_similarity(similarity: f64) -> Self {
        if similarity >= 0.95 {
            RiskLevel::Low
        } else if similarity >= 0.80 {
            RiskLevel::Medium
        } else if similarity >= 0.50 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Per-kind drift comparison plus the overall risk assessment.
#[derive(Debug, Clone)]
pub struct SemanticAnalysis {
    /// Similarity of the main (or combined) vectors.
    pub overall_similarity: f64,
    /// Similarity per vector kind present on both sides.
    pub per_kind: Vec<(VectorKind, f64)>,
    /// Kind with the largest drift and its magnitude (1 − similarity).
    pub max_drift: Option<(VectorKind, f64)>,
    pub risk: RiskLevel,
}

impl SemanticAnalysis {
    /// How decisive this analysis is, used for the clarity factor:
    /// big drift or near-identity are both clear signals, the middle is not.
    pub fn clarity(&self) -> f64 {
        match self.risk {
            RiskLevel::Critical => 0.9,
            RiskLevel::High => 0.75,
            RiskLevel::Medium => 0.5,
            RiskLevel::Low => 0.8,
        }
    }
}

/// Compares the vector families of two snapshots.
#[derive(Debug, Clone, Default)]
pub struct SemanticAnalyzer;

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Compare baseline and new vectors. Returns `None` when no kind is
    /// present on both sides — the semantic classifier then abstains.
    pub fn analyze(
        &self,
        baseline: &[ContentVector],
        new: &[ContentVector],
    ) -> Option<SemanticAnalysis> {
        let mut per_kind = Vec::new();
        for kind in VectorKind::ALL {
            let old_v = baseline.iter().find(|v| v.kind == kind);
            let new_v = new.iter().find(|v| v.kind == kind);
            if let (Some(old_v), Some(new_v)) = (old_v, new_v) {
                per_kind.push((kind, cosine_similarity(&old_v.payload, &new_v.payload)));
            }
        }

        if per_kind.is_empty() {
            return None;
        }

        let overall_similarity = per_kind
            .iter()
            .find(|(k, _)| *k == VectorKind::Main)
            .or_else(|| per_kind.iter().find(|(k, _)| *k == VectorKind::Combined))
            .map(|(_, s)| *s)
            .unwrap_or_else(|| {
                per_kind.iter().map(|(_, s)| s).sum::<f64>() / per_kind.len() as f64
            });

        let max_drift = per_kind
            .iter()
            .map(|(k, s)| (*k, 1.0 - s))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        Some(SemanticAnalysis {
            overall_similarity,
            per_kind,
            max_drift,
            risk: RiskLevel::from_similarity(overall_similarity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn risk_bands_match_thresholds() {
        assert_eq!(RiskLevel::from_similarity(0.99), RiskLevel::Low);
        assert_eq!(RiskLevel::from_similarity(0.95), RiskLevel::Low);
        assert_eq!(RiskLevel::from_similarity(0.90), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_similarity(0.80), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_similarity(0.62), RiskLevel::High);
        assert_eq!(RiskLevel::from_similarity(0.50), RiskLevel::High);
        assert_eq!(RiskLevel::from_similarity(0.49), RiskLevel::Critical);
    }

    #[test]
    fn identical_vectors_are_low_risk() {
        let old = vec![vector(VectorKind::Main, vec![0.5, 0.5, 0.1])];
        let new = vec![vector(VectorKind::Main, vec![0.5, 0.5, 0.1])];
        let analysis = SemanticAnalyzer::new().analyze(&old, &new).unwrap();
        assert!(analysis.overall_similarity > 0.99);
        assert_eq!(analysis.risk, RiskLevel::Low);
    }

    #[test]
    fn orthogonal_vectors_are_critical() {
        let old = vec![vector(VectorKind::Main, vec![1.0, 0.0])];
        let new = vec![vector(VectorKind::Main, vec![0.0, 1.0])];
        let analysis = SemanticAnalyzer::new().analyze(&old, &new).unwrap();
        assert!(analysis.overall_similarity < 0.5);
        assert_eq!(analysis.risk, RiskLevel::Critical);
    }

    #[test]
    fn no_comparable_kinds_abstains() {
        let old = vec![vector(VectorKind::Title, vec![1.0, 0.0])];
        let new = vec![vector(VectorKind::Meta, vec![0.0, 1.0])];
        assert!(SemanticAnalyzer::new().analyze(&old, &new).is_none());
        assert!(SemanticAnalyzer::new().analyze(&[], &[]).is_none());
    }

    #[test]
    fn max_drift_reports_most_shifted_kind() {
        let old = vec![
            vector(VectorKind::Main, vec![1.0, 0.0]),
            vector(VectorKind::Title, vec![1.0, 0.0]),
        ];
        let new = vec![
            vector(VectorKind::Main, vec![1.0, 0.1]),
            vector(VectorKind::Title, vec![0.0, 1.0]),
        ];
        let analysis = SemanticAnalyzer::new().analyze(&old, &new).unwrap();
        let (kind, drift) = analysis.max_drift.unwrap();
        assert_eq!(kind, VectorKind::Title);
        assert!(drift > 0.9);
    }

    #[test]
    fn falls_back_to_combined_then_mean() {
        let old = vec![vector(VectorKind::Combined, vec![1.0, 0.0])];
        let new = vec![vector(VectorKind::Combined, vec![1.0, 0.0])];
        let analysis = SemanticAnalyzer::new().analyze(&old, &new).unwrap();
        assert!(analysis.overall_similarity > 0.99);

        let old = vec![vector(VectorKind::Title, vec![1.0, 0.0])];
        let new = vec![vector(VectorKind::Title, vec![1.0, 0.0])];
        let analysis = SemanticAnalyzer::new().analyze(&old, &new).unwrap();
        assert!(analysis.overall_similarity > 0.99);
    }
}
