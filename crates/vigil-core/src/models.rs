use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::{ExtractedContent, OutlineNode, extract_keywords};
use crate::hashing::FingerprintSet;
use crate::schedule::Schedule;

/// Adjudicated classification of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Benign,
    Suspicious,
    Defacement,
    Unclear,
    /// First snapshot of a site; serves as the initial baseline.
    Initial,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Benign => "benign",
            Verdict::Suspicious => "suspicious",
            Verdict::Defacement => "defacement",
            Verdict::Unclear => "unclear",
            Verdict::Initial => "initial",
        }
    }

    /// True when the snapshot can serve as a comparison baseline.
    pub fn is_baseline(&self) -> bool {
        matches!(self, Verdict::Benign | Verdict::Initial)
    }

    /// Tie-break preference, erring on the side of caution.
    /// Higher wins: defacement > suspicious > unclear > benign.
    pub fn caution_rank(&self) -> u8 {
        match self {
            Verdict::Defacement => 3,
            Verdict::Suspicious => 2,
            Verdict::Unclear => 1,
            Verdict::Benign | Verdict::Initial => 0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "benign" => Ok(Verdict::Benign),
            "suspicious" => Ok(Verdict::Suspicious),
            "defacement" => Ok(Verdict::Defacement),
            "unclear" => Ok(Verdict::Unclear),
            "initial" => Ok(Verdict::Initial),
            _ => Err(format!("Unknown verdict: {}", s)),
        }
    }
}

/// Per-site detector threshold overrides. `None` falls back to the
/// global detector configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteThresholds {
    pub similarity: Option<f64>,
    pub structural: Option<f64>,
    pub critical_change: Option<f64>,
}

/// A website registered for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub schedule: Schedule,
    pub active: bool,
    /// Crawl fanout for linked pages, typically 1-2.
    pub max_depth: u32,
    pub priority: i32,
    pub thresholds: SiteThresholds,
    /// Per-site snapshot retention override; global default applies when None.
    pub keep_scans: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a new site.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub url: String,
    pub name: String,
    pub schedule: Schedule,
    pub max_depth: u32,
    pub priority: i32,
    pub thresholds: SiteThresholds,
    pub keep_scans: Option<u32>,
}

impl NewSite {
    pub fn new(url: impl Into<String>, name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            schedule,
            max_depth: 1,
            priority: 0,
            thresholds: SiteThresholds::default(),
            keep_scans: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }
}

/// A captured page state, immutable once persisted.
///
/// `verdict` and `confidence` may be back-filled by the classifier.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub site_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub http_status: u16,
    pub response_time_ms: f64,
    pub raw_html: Option<Vec<u8>>,
    pub extracted_text: String,
    pub fingerprints: FingerprintSet,
    /// DOM outline retained for structural comparison against later snapshots.
    pub outline: Vec<OutlineNode>,
    pub truncated: bool,
    pub vector_ref: Option<Uuid>,
    pub prev_similarity: Option<f64>,
    pub verdict: Option<Verdict>,
    pub confidence: Option<f64>,
}

impl Snapshot {
    /// Reconstruct the comparison projections of this snapshot.
    ///
    /// `extracted_text` is already normalized, so keywords are derivable;
    /// text blocks are not retained (their hash is) and stay empty.
    pub fn to_extracted(&self) -> ExtractedContent {
        ExtractedContent {
            normalized_text: self.extracted_text.clone(),
            keywords: extract_keywords(&self.extracted_text),
            outline: self.outline.clone(),
            word_count: self.extracted_text.split_whitespace().count(),
            truncated: self.truncated,
            ..ExtractedContent::default()
        }
    }
}

/// DTO for inserting a new snapshot.
///
/// The id is generated by the workflow before persist so that vectors
/// created in the parallel branch can reference it.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub id: Uuid,
    pub site_id: Uuid,
    pub http_status: u16,
    pub response_time_ms: f64,
    pub raw_html: Option<Vec<u8>>,
    pub extracted_text: String,
    pub fingerprints: FingerprintSet,
    pub outline: Vec<OutlineNode>,
    pub truncated: bool,
    pub vector_ref: Option<Uuid>,
    pub prev_similarity: Option<f64>,
    pub verdict: Option<Verdict>,
    pub confidence: Option<f64>,
}

/// What a stored vector embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    Main,
    Title,
    TextBlocks,
    Meta,
    Combined,
}

impl VectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorKind::Main => "main",
            VectorKind::Title => "title",
            VectorKind::TextBlocks => "text_blocks",
            VectorKind::Meta => "meta",
            VectorKind::Combined => "combined",
        }
    }

    pub const ALL: [VectorKind; 5] = [
        VectorKind::Main,
        VectorKind::Title,
        VectorKind::TextBlocks,
        VectorKind::Meta,
        VectorKind::Combined,
    ];
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(VectorKind::Main),
            "title" => Ok(VectorKind::Title),
            "text_blocks" => Ok(VectorKind::TextBlocks),
            "meta" => Ok(VectorKind::Meta),
            "combined" => Ok(VectorKind::Combined),
            _ => Err(format!("Unknown vector kind: {}", s)),
        }
    }
}

/// A semantic embedding tied to a snapshot. Kept only while the snapshot lives.
#[derive(Debug, Clone, Serialize)]
pub struct ContentVector {
    pub id: Uuid,
    pub site_id: Uuid,
    pub snapshot_id: Uuid,
    pub kind: VectorKind,
    pub dimension: usize,
    pub payload: Vec<f32>,
}

/// Kind of alert raised by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Defacement,
    Suspicious,
    SiteDown,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Defacement => "defacement",
            AlertKind::Suspicious => "suspicious",
            AlertKind::SiteDown => "site_down",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "defacement" => Ok(AlertKind::Defacement),
            "suspicious" => Ok(AlertKind::Suspicious),
            "site_down" => Ok(AlertKind::SiteDown),
            _ => Err(format!("Unknown alert kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
    /// Operator adjudicated the alert as wrong; feeds the per-site
    /// false-positive rate used by the confidence calculation.
    FalsePositive,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalsePositive => "false_positive",
        }
    }

    /// Closed one way or the other; only adjudicated alerts count toward
    /// the false-positive rate.
    pub fn is_adjudicated(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            "false_positive" => Ok(AlertStatus::FalsePositive),
            _ => Err(format!("Unknown alert status: {}", s)),
        }
    }
}

/// An alert raised on an adverse classification or site outage.
/// Created by the core; mutated only by operator commands outside it.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub site_id: Uuid,
    pub snapshot_id: Option<Uuid>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub verdict_label: Option<Verdict>,
    pub confidence: Option<f64>,
    pub similarity: Option<f64>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// DTO for raising a new alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub site_id: Uuid,
    pub snapshot_id: Option<Uuid>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub verdict_label: Option<Verdict>,
    pub confidence: Option<f64>,
    pub similarity: Option<f64>,
}

/// Per-site adaptive classifier weights, persisted between checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierWeights {
    pub llm: f64,
    pub semantic: f64,
    pub rules: f64,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            llm: 0.5,
            semantic: 0.3,
            rules: 0.2,
        }
    }
}

impl ClassifierWeights {
    /// Dampen all weights when recent classifier agreement is low.
    pub fn dampened(&self) -> Self {
        Self {
            llm: self.llm * 0.8,
            semantic: self.semantic * 0.8,
            rules: self.rules * 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_roundtrip() {
        for v in [
            Verdict::Benign,
            Verdict::Suspicious,
            Verdict::Defacement,
            Verdict::Unclear,
            Verdict::Initial,
        ] {
            let parsed: Verdict = v.as_str().parse().unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn test_baseline_verdicts() {
        assert!(Verdict::Benign.is_baseline());
        assert!(Verdict::Initial.is_baseline());
        assert!(!Verdict::Suspicious.is_baseline());
        assert!(!Verdict::Defacement.is_baseline());
        assert!(!Verdict::Unclear.is_baseline());
    }

    #[test]
    fn test_caution_ordering() {
        assert!(Verdict::Defacement.caution_rank() > Verdict::Suspicious.caution_rank());
        assert!(Verdict::Suspicious.caution_rank() > Verdict::Unclear.caution_rank());
        assert!(Verdict::Unclear.caution_rank() > Verdict::Benign.caution_rank());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }

    #[test]
    fn test_vector_kind_roundtrip() {
        for kind in VectorKind::ALL {
            let parsed: VectorKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_alert_status_roundtrip() {
        for status in [
            AlertStatus::Open,
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            AlertStatus::FalsePositive,
        ] {
            let parsed: AlertStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_adjudicated_statuses() {
        assert!(AlertStatus::Resolved.is_adjudicated());
        assert!(AlertStatus::FalsePositive.is_adjudicated());
        assert!(!AlertStatus::Open.is_adjudicated());
        assert!(!AlertStatus::Acknowledged.is_adjudicated());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ClassifierWeights::default();
        assert!((w.llm + w.semantic + w.rules - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dampened_weights() {
        let w = ClassifierWeights::default().dampened();
        assert!((w.llm - 0.4).abs() < 1e-9);
        assert!((w.semantic - 0.24).abs() < 1e-9);
        assert!((w.rules - 0.16).abs() < 1e-9);
    }
}
