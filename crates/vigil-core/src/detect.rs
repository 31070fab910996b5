//! Multi-dimensional change detection between a baseline and a new snapshot.
//!
//! The detector decides whether a change is worth sending to the
//! classification pipeline at all: identical fingerprints short-circuit to
//! unchanged, high keyword and structural similarity is a minor change,
//! and everything else is either significant or ambiguous.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::extract::{ExtractedContent, OutlineNode};
use crate::hashing::FingerprintSet;
use crate::models::SiteThresholds;

/// Structural similarity below this counts as "differs substantially"
/// independent of the keyword score.
const STRUCTURAL_CRITICAL: f64 = 0.70;

/// Magnitude classification of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// All four fingerprints equal; verdict inherits the baseline.
    Unchanged,
    /// Within thresholds; persist, keep the baseline, skip the classifier.
    Minor,
    /// Classifier invoked with reduced priority.
    Ambiguous,
    /// Classifier invoked.
    Significant,
}

impl ChangeClass {
    /// Whether this change requires the classification pipeline.
    pub fn needs_classification(&self) -> bool {
        matches!(self, ChangeClass::Significant | ChangeClass::Ambiguous)
    }
}

/// Which fingerprints differ between baseline and new content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFingerprints {
    pub content: bool,
    pub structure: bool,
    pub text_blocks: bool,
    pub semantic: bool,
}

impl ChangedFingerprints {
    fn between(old: &FingerprintSet, new: &FingerprintSet) -> Self {
        Self {
            content: old.content_hash != new.content_hash,
            structure: old.structure_hash != new.structure_hash,
            text_blocks: old.text_block_hash != new.text_block_hash,
            semantic: old.semantic_hash != new.semantic_hash,
        }
    }

    pub fn any(&self) -> bool {
        self.content || self.structure || self.text_blocks || self.semantic
    }
}

/// Outcome of comparing a new snapshot against the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub class: ChangeClass,
    pub keyword_similarity: f64,
    pub structural_similarity: f64,
    pub changed: ChangedFingerprints,
}

/// Compares snapshots and classifies change magnitude.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    config: DetectorConfig,
}

impl ChangeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Run the decision tree over a baseline/new pair.
    ///
    /// Per-site threshold overrides take precedence over the global
    /// configuration.
    pub fn detect(
        &self,
        baseline: &ExtractedContent,
        baseline_fp: &FingerprintSet,
        new: &ExtractedContent,
        new_fp: &FingerprintSet,
        overrides: &SiteThresholds,
    ) -> ChangeReport {
        let changed = ChangedFingerprints::between(baseline_fp, new_fp);
        if !changed.any() {
            return ChangeReport {
                class: ChangeClass::Unchanged,
                keyword_similarity: 1.0,
                structural_similarity: 1.0,
                changed,
            };
        }

        let similarity_threshold = overrides
            .similarity
            .unwrap_or(self.config.similarity_threshold);
        let structural_threshold = overrides
            .structural
            .unwrap_or(self.config.structural_threshold);
        let critical_threshold = overrides
            .critical_change
            .unwrap_or(self.config.critical_change_threshold);

        let keyword_similarity = keyword_similarity(&baseline.keywords, &new.keywords);
        let structural_similarity = structural_similarity(&baseline.outline, &new.outline);

        let class = if keyword_similarity >= similarity_threshold
            && structural_similarity >= structural_threshold
        {
            ChangeClass::Minor
        } else if keyword_similarity < critical_threshold
            || structural_similarity < STRUCTURAL_CRITICAL
        {
            ChangeClass::Significant
        } else {
            ChangeClass::Ambiguous
        };

        ChangeReport {
            class,
            keyword_similarity,
            structural_similarity,
            changed,
        }
    }
}

/// Weighted combination of Jaccard, overlap and Dice coefficients with an
/// overlap bonus, clipped to [0, 1]. Empty sets yield 0 — every term is
/// defined as 0 when its denominator is 0, so there is no division by zero.
pub fn keyword_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    let min_size = a.len().min(b.len()) as f64;
    let total = (a.len() + b.len()) as f64;

    let jaccard = if union > 0.0 { intersection / union } else { 0.0 };
    let overlap = if min_size > 0.0 {
        intersection / min_size
    } else {
        0.0
    };
    let dice = if total > 0.0 {
        2.0 * intersection / total
    } else {
        0.0
    };

    let mut similarity = 0.2 * jaccard + 0.6 * overlap + 0.2 * dice;

    let ratio = if min_size > 0.0 {
        intersection / min_size
    } else {
        0.0
    };
    if ratio >= 0.5 {
        similarity += f64::min(0.15, 0.2 * ratio);
    }

    similarity.clamp(0.0, 1.0)
}

/// `1 − normalized edit distance` over the outline signature sequences.
pub fn structural_similarity(old: &[OutlineNode], new: &[OutlineNode]) -> f64 {
    if old.is_empty() && new.is_empty() {
        return 1.0;
    }
    if old.is_empty() || new.is_empty() {
        return 0.0;
    }

    let old_sigs: Vec<String> = old.iter().map(OutlineNode::signature).collect();
    let new_sigs: Vec<String> = new.iter().map(OutlineNode::signature).collect();

    let distance = edit_distance(&old_sigs, &new_sigs) as f64;
    let max_len = old_sigs.len().max(new_sigs.len()) as f64;
    1.0 - distance / max_len
}

/// Levenshtein distance over two signature sequences, two-row DP.
fn edit_distance(a: &[String], b: &[String]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, item_a) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, item_b) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(item_a != item_b);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::FingerprintSet;

    fn keywords(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn node(tag: &str, depth: usize) -> OutlineNode {
        OutlineNode {
            tag: tag.to_string(),
            depth,
            classes: vec![],
            id: None,
        }
    }

    fn content_with(keywords_list: &[&str], outline: Vec<OutlineNode>) -> ExtractedContent {
        let text = keywords_list.join(" ");
        ExtractedContent {
            normalized_text: text.clone(),
            keywords: keywords(keywords_list),
            text_blocks: vec![text],
            outline,
            ..ExtractedContent::default()
        }
    }

    fn detector() -> ChangeDetector {
        ChangeDetector::new(DetectorConfig::default())
    }

    #[test]
    fn identical_fingerprints_short_circuit_to_unchanged() {
        let content = content_with(&["widgets", "catalog", "orders"], vec![node("div", 0)]);
        let fp = content.fingerprints();
        let report = detector().detect(
            &content,
            &fp,
            &content,
            &fp,
            &SiteThresholds::default(),
        );
        assert_eq!(report.class, ChangeClass::Unchanged);
        assert_eq!(report.keyword_similarity, 1.0);
        assert_eq!(report.structural_similarity, 1.0);
        assert!(!report.changed.any());
    }

    #[test]
    fn empty_keyword_sets_have_zero_similarity() {
        assert_eq!(keyword_similarity(&BTreeSet::new(), &BTreeSet::new()), 0.0);
        assert_eq!(
            keyword_similarity(&keywords(&["one"]), &BTreeSet::new()),
            0.0
        );
    }

    #[test]
    fn identical_keyword_sets_are_fully_similar() {
        let set = keywords(&["alpha", "beta", "gamma", "delta"]);
        assert_eq!(keyword_similarity(&set, &set), 1.0);
    }

    #[test]
    fn disjoint_keyword_sets_have_zero_similarity() {
        let a = keywords(&["alpha", "beta"]);
        let b = keywords(&["gamma", "delta"]);
        assert_eq!(keyword_similarity(&a, &b), 0.0);
    }

    #[test]
    fn overlap_bonus_applies_above_half() {
        // 3 of 4 shared: J=3/5, O=3/4, D=6/8 → base 0.72, bonus 0.15.
        let a = keywords(&["alpha", "beta", "gamma", "delta"]);
        let b = keywords(&["alpha", "beta", "gamma", "epsilon"]);
        let sim = keyword_similarity(&a, &b);
        assert!((sim - 0.87).abs() < 1e-9, "got {sim}");
    }

    #[test]
    fn minor_rewording_keeps_baseline() {
        // 18 of 20 keywords survive, same structure: a benign rewording.
        let base_words: Vec<String> = (0..20).map(|i| format!("keyword{i:02}")).collect();
        let mut new_words = base_words[..18].to_vec();
        new_words.push("replacement".into());
        new_words.push("addition".into());

        let base_refs: Vec<&str> = base_words.iter().map(String::as_str).collect();
        let new_refs: Vec<&str> = new_words.iter().map(String::as_str).collect();

        let outline = vec![node("body", 0), node("div", 1), node("p", 2)];
        let baseline = content_with(&base_refs, outline.clone());
        let new = content_with(&new_refs, outline);

        let report = detector().detect(
            &baseline,
            &baseline.fingerprints(),
            &new,
            &new.fingerprints(),
            &SiteThresholds::default(),
        );
        assert_eq!(report.class, ChangeClass::Minor);
        assert!(report.keyword_similarity >= 0.85);
        assert_eq!(report.structural_similarity, 1.0);
    }

    #[test]
    fn full_content_replacement_is_significant() {
        let baseline = content_with(
            &["widgets", "catalog", "orders", "support"],
            vec![node("body", 0), node("div", 1)],
        );
        let new = content_with(
            &["hacked", "pwned", "greetings"],
            vec![node("body", 0), node("marquee", 1)],
        );
        let report = detector().detect(
            &baseline,
            &baseline.fingerprints(),
            &new,
            &new.fingerprints(),
            &SiteThresholds::default(),
        );
        assert_eq!(report.class, ChangeClass::Significant);
        assert!(report.keyword_similarity < 0.5);
    }

    #[test]
    fn structural_gutting_is_significant_despite_similar_keywords() {
        let outline: Vec<OutlineNode> = (0..10).map(|i| node("div", i)).collect();
        let words: Vec<String> = (0..10).map(|i| format!("word{i}")).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();

        let baseline = content_with(&refs, outline);
        let new = content_with(&refs, vec![node("body", 0)]);

        let report = detector().detect(
            &baseline,
            &baseline.fingerprints(),
            &new,
            &new.fingerprints(),
            &SiteThresholds::default(),
        );
        assert_eq!(report.class, ChangeClass::Significant);
        assert!(report.structural_similarity < STRUCTURAL_CRITICAL);
    }

    #[test]
    fn middling_keyword_drift_is_ambiguous() {
        // 12 of 20 keywords survive with structure intact: between the
        // critical and similarity thresholds.
        let base_words: Vec<String> = (0..20).map(|i| format!("keyword{i:02}")).collect();
        let mut new_words = base_words[..12].to_vec();
        for i in 0..8 {
            new_words.push(format!("fresh{i}"));
        }
        let base_refs: Vec<&str> = base_words.iter().map(String::as_str).collect();
        let new_refs: Vec<&str> = new_words.iter().map(String::as_str).collect();

        let outline = vec![node("body", 0), node("div", 1)];
        let baseline = content_with(&base_refs, outline.clone());
        let new = content_with(&new_refs, outline);

        let report = detector().detect(
            &baseline,
            &baseline.fingerprints(),
            &new,
            &new.fingerprints(),
            &SiteThresholds::default(),
        );
        assert_eq!(report.class, ChangeClass::Ambiguous);
        assert!(report.class.needs_classification());
    }

    #[test]
    fn per_site_overrides_take_precedence() {
        let baseline = content_with(&["alpha", "beta", "gamma", "delta"], vec![node("div", 0)]);
        let new = content_with(&["alpha", "beta", "gamma", "epsilon"], vec![node("div", 0)]);

        // Similarity ≈ 0.87 passes the default 0.85 but fails a strict 0.95.
        let strict = SiteThresholds {
            similarity: Some(0.95),
            structural: None,
            critical_change: None,
        };
        let report = detector().detect(
            &baseline,
            &baseline.fingerprints(),
            &new,
            &new.fingerprints(),
            &strict,
        );
        assert_ne!(report.class, ChangeClass::Minor);
    }

    #[test]
    fn structural_similarity_boundaries() {
        assert_eq!(structural_similarity(&[], &[]), 1.0);
        assert_eq!(structural_similarity(&[node("div", 0)], &[]), 0.0);

        let a = vec![node("div", 0), node("p", 1)];
        let b = vec![node("div", 0), node("span", 1)];
        assert_eq!(structural_similarity(&a, &b), 0.5);
    }

    #[test]
    fn edit_distance_basics() {
        let a: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let b: Vec<String> = vec!["a".into(), "x".into(), "c".into()];
        assert_eq!(edit_distance(&a, &b), 1);
        assert_eq!(edit_distance(&a, &a), 0);
        assert_eq!(edit_distance(&a, &[]), 3);
    }
}
