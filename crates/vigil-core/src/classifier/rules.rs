//! Rule-based defacement classifier.
//!
//! Scans page text against a keyword table and an ordered table of
//! weighted regular expressions. The score is the maximum matched weight
//! and every match is kept as evidence.

use regex::Regex;

use crate::error::AppError;
use crate::models::Verdict;

const DEFACEMENT_SCORE: f64 = 0.85;
const SUSPICIOUS_SCORE: f64 = 0.6;

/// Defacement-indicator tokens and their prior weights. Matched
/// case-insensitively on whole words.
const KEYWORD_TABLE: &[(&str, f64)] = &[
    ("hacked", 0.9),
    ("defaced", 0.95),
    ("pwned", 0.8),
    ("owned", 0.8),
    ("unauthorized", 0.7),
    ("breached", 0.7),
    ("compromised", 0.7),
    ("vandalized", 0.8),
    ("hijacked", 0.8),
];

/// Weighted patterns checked in order after the keyword table.
const PATTERN_TABLE: &[(&str, f64)] = &[
    (r"(?i)hacked\s+by\s+\w+", 0.95),
    (r"(?i)defaced\s+by\s+\w+", 0.95),
    (r"(?i)owned\s+by\s+\w+", 0.9),
    (r"(?i)greetz\s+to\s+\w+", 0.8),
    (r"(?i)cryptocurrency\s+miner", 0.8),
    (r"(?i)bitcoin\s+mining", 0.8),
];

/// A clean scan is still a moderately informative benign signal.
const CLEAN_SCAN_CONFIDENCE: f64 = 0.5;

/// Result of the rule scan.
#[derive(Debug, Clone)]
pub struct RuleVerdict {
    pub verdict: Verdict,
    /// Maximum matched rule weight; 0.0 when nothing matched.
    pub score: f64,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

pub struct RuleBasedClassifier {
    keywords: Vec<(Regex, String, f64)>,
    patterns: Vec<(Regex, String, f64)>,
}

impl RuleBasedClassifier {
    pub fn new() -> Result<Self, AppError> {
        let keywords = KEYWORD_TABLE
            .iter()
            .map(|(word, weight)| {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
                    .map_err(|e| AppError::ConfigError(format!("keyword rule '{word}': {e}")))?;
                Ok((re, word.to_string(), *weight))
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let patterns = PATTERN_TABLE
            .iter()
            .map(|(pattern, weight)| {
                let re = Regex::new(pattern)
                    .map_err(|e| AppError::ConfigError(format!("pattern rule '{pattern}': {e}")))?;
                Ok((re, pattern.to_string(), *weight))
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Self { keywords, patterns })
    }

    /// Scan the given texts (normalized text, text blocks, title, meta).
    pub fn classify(&self, texts: &[&str]) -> RuleVerdict {
        let combined = texts.join(" ");
        let mut score: f64 = 0.0;
        let mut evidence = Vec::new();

        for (re, word, weight) in &self.keywords {
            if re.is_match(&combined) {
                evidence.push(format!("keyword: {word}"));
                score = score.max(*weight);
            }
        }
        for (re, pattern, weight) in &self.patterns {
            if let Some(m) = re.find(&combined) {
                evidence.push(format!("pattern: {pattern} ('{}')", m.as_str()));
                score = score.max(*weight);
            }
        }

        let verdict = if score >= DEFACEMENT_SCORE {
            Verdict::Defacement
        } else if score >= SUSPICIOUS_SCORE {
            Verdict::Suspicious
        } else {
            Verdict::Benign
        };

        let confidence = if evidence.is_empty() {
            CLEAN_SCAN_CONFIDENCE
        } else {
            score
        };

        RuleVerdict {
            verdict,
            score,
            confidence,
            evidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RuleBasedClassifier {
        RuleBasedClassifier::new().unwrap()
    }

    #[test]
    fn clean_content_is_benign_with_moderate_confidence() {
        let result = classifier().classify(&["welcome to our product catalog"]);
        assert_eq!(result.verdict, Verdict::Benign);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, CLEAN_SCAN_CONFIDENCE);
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn hacked_by_pattern_scores_defacement() {
        let result = classifier().classify(&["this site was HACKED BY phantom_crew"]);
        assert_eq!(result.verdict, Verdict::Defacement);
        assert!(result.confidence >= 0.95);
        assert!(result.evidence.iter().any(|e| e.starts_with("pattern:")));
    }

    #[test]
    fn score_is_max_of_matches_not_sum() {
        let result = classifier().classify(&["unauthorized access, system breached"]);
        // Two 0.7 keywords: max stays 0.7, suspicious bucket.
        assert_eq!(result.verdict, Verdict::Suspicious);
        assert!((result.confidence - 0.7).abs() < 1e-9);
        assert_eq!(result.evidence.len(), 2);
    }

    #[test]
    fn matching_is_whole_word() {
        // "powned" must not hit "owned", "hackedy" must not hit "hacked".
        let result = classifier().classify(&["powned hackedy preowned"]);
        assert_eq!(result.verdict, Verdict::Benign);
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let result = classifier().classify(&["YOU HAVE BEEN PWNED"]);
        assert_eq!(result.verdict, Verdict::Suspicious);
        assert!((result.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn scans_across_all_supplied_texts() {
        let result = classifier().classify(&["benign body", "Defaced by someone", "benign title"]);
        assert_eq!(result.verdict, Verdict::Defacement);
    }

    #[test]
    fn defacement_threshold_boundary() {
        // "hacked" alone is 0.9 ≥ 0.85 → defacement.
        let result = classifier().classify(&["hacked"]);
        assert_eq!(result.verdict, Verdict::Defacement);
        // "pwned" alone is 0.8, below 0.85 → suspicious.
        let result = classifier().classify(&["pwned"]);
        assert_eq!(result.verdict, Verdict::Suspicious);
    }
}
