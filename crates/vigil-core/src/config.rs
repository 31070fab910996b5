//! Monitoring engine configuration.
//!
//! Loaded from a TOML file with every section optional; missing keys fall
//! back to the defaults below. Secrets (API keys, database URLs) stay in
//! the environment and are read by the crates that need them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ClassifierWeights;

/// Top-level configuration for the monitoring engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub vectorizer: VectorizerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("invalid config {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running checks.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Jobs missed by no more than this still run; older misfires are dropped.
    #[serde(default = "default_misfire_grace_seconds")]
    pub misfire_grace_seconds: u64,
    /// Due-job scan cadence.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            misfire_grace_seconds: default_misfire_grace_seconds(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_navigation_timeout_seconds")]
    pub navigation_timeout_seconds: u64,
    /// Resource types never loaded during a render.
    #[serde(default = "default_blocked_resources")]
    pub blocked_resource_types: Vec<String>,
    /// User agents rotated per session.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            navigation_timeout_seconds: default_navigation_timeout_seconds(),
            blocked_resource_types: default_blocked_resources(),
            user_agents: default_user_agents(),
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_structural_threshold")]
    pub structural_threshold: f64,
    #[serde(default = "default_critical_change_threshold")]
    pub critical_change_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            structural_threshold: default_structural_threshold(),
            critical_change_threshold: default_critical_change_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub base_weights: ClassifierWeights,
    #[serde(default)]
    pub confidence_thresholds: ConfidenceThresholds,
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_weights: ClassifierWeights::default(),
            confidence_thresholds: ConfidenceThresholds::default(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
            llm_max_tokens: default_llm_max_tokens(),
        }
    }
}

impl ClassifierConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }
}

/// Boundaries between the named confidence buckets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    #[serde(default = "default_very_high")]
    pub very_high: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
    #[serde(default = "default_low")]
    pub low: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            very_high: default_very_high(),
            high: default_high(),
            medium: default_medium(),
            low: default_low(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VectorizerConfig {
    /// Characters kept after preprocessing.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Texts longer than this are chunked on sentence boundaries.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    /// Embedding dimension agreed with the embedding implementation.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
            chunk_threshold: default_chunk_threshold(),
            dimension: default_dimension(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_seconds")]
    pub initial_delay_seconds: f64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_seconds: default_initial_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Tags whose content never matters for defacement detection.
    #[serde(default = "default_ignore_tags")]
    pub ignore_tags: Vec<String>,
    /// Significant block tags mined for text blocks.
    #[serde(default = "default_block_tags")]
    pub block_tags: Vec<String>,
    /// Patterns stripped before hashing because they churn benignly.
    #[serde(default = "default_dynamic_patterns")]
    pub dynamic_patterns: Vec<String>,
    #[serde(default = "default_min_block_len")]
    pub min_block_len: usize,
    /// Oversize cap; content beyond it is truncated and flagged.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ignore_tags: default_ignore_tags(),
            block_tags: default_block_tags(),
            dynamic_patterns: default_dynamic_patterns(),
            min_block_len: default_min_block_len(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_total_deadline_seconds")]
    pub total_deadline_seconds: u64,
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    /// Drain window for in-flight workflows on shutdown.
    #[serde(default = "default_drain_deadline_seconds")]
    pub drain_deadline_seconds: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            total_deadline_seconds: default_total_deadline_seconds(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            drain_deadline_seconds: default_drain_deadline_seconds(),
        }
    }
}

impl WorkflowConfig {
    pub fn total_deadline(&self) -> Duration {
        Duration::from_secs(self.total_deadline_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_deadline_seconds)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Snapshots kept per site; per-site overrides win when set.
    #[serde(default = "default_keep_scans")]
    pub keep_scans: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_scans: default_keep_scans(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    10
}
fn default_misfire_grace_seconds() -> u64 {
    30
}
fn default_tick_interval_ms() -> u64 {
    500
}
fn default_pool_size() -> usize {
    3
}
fn default_navigation_timeout_seconds() -> u64 {
    30
}
fn default_blocked_resources() -> Vec<String> {
    vec!["image".into(), "media".into(), "font".into()]
}
fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
    ]
}
fn default_similarity_threshold() -> f64 {
    0.85
}
fn default_structural_threshold() -> f64 {
    0.90
}
fn default_critical_change_threshold() -> f64 {
    0.50
}
fn default_llm_timeout_seconds() -> u64 {
    60
}
fn default_llm_max_tokens() -> u32 {
    1024
}
fn default_very_high() -> f64 {
    0.8
}
fn default_high() -> f64 {
    0.6
}
fn default_medium() -> f64 {
    0.4
}
fn default_low() -> f64 {
    0.2
}
fn default_max_content_length() -> usize {
    8000
}
fn default_chunk_threshold() -> usize {
    1000
}
fn default_dimension() -> usize {
    384
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_seconds() -> f64 {
    1.0
}
fn default_max_delay_seconds() -> f64 {
    300.0
}
fn default_exponential_base() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_seconds() -> u64 {
    60
}
fn default_ignore_tags() -> Vec<String> {
    [
        "script", "style", "noscript", "meta", "link", "head", "svg", "path", "nav", "iframe",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_block_tags() -> Vec<String> {
    [
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "p",
        "div",
        "li",
        "article",
        "section",
        "td",
        "th",
        "blockquote",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_dynamic_patterns() -> Vec<String> {
    vec![
        r"\d{4}-\d{2}-\d{2}".into(),
        r"\d{1,2}:\d{2}(?::\d{2})?".into(),
        r"(?i)copyright\s+\d{4}".into(),
        r"(?i)last\s+updated?:?\s*\d+".into(),
        r#"session[_-]?id["']?\s*[:=]\s*["']?[\w\-]+"#.into(),
        r#"csrf[_-]?token["']?\s*[:=]\s*["']?[\w\-]+"#.into(),
        r#"nonce["']?\s*[:=]\s*["']?[\w\-]+"#.into(),
    ]
}
fn default_min_block_len() -> usize {
    10
}
fn default_max_content_chars() -> usize {
    100_000
}
fn default_total_deadline_seconds() -> u64 {
    120
}
fn default_fetch_timeout_seconds() -> u64 {
    30
}
fn default_drain_deadline_seconds() -> u64 {
    30
}
fn default_keep_scans() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.scheduler.max_concurrent_jobs, 10);
        assert_eq!(config.scheduler.misfire_grace_seconds, 30);
        assert_eq!(config.browser.pool_size, 3);
        assert_eq!(config.detector.similarity_threshold, 0.85);
        assert_eq!(config.detector.structural_threshold, 0.90);
        assert_eq!(config.detector.critical_change_threshold, 0.50);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.recovery_timeout_seconds, 60);
        assert_eq!(config.workflow.total_deadline_seconds, 120);
        assert_eq!(config.workflow.fetch_timeout_seconds, 30);
        assert_eq!(config.retention.keep_scans, 20);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [scheduler]
            max_concurrent_jobs = 3

            [detector]
            similarity_threshold = 0.75
            "#
        )
        .unwrap();

        let config = MonitorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.scheduler.max_concurrent_jobs, 3);
        assert_eq!(config.scheduler.misfire_grace_seconds, 30);
        assert_eq!(config.detector.similarity_threshold, 0.75);
        assert_eq!(config.detector.structural_threshold, 0.90);
        assert_eq!(config.browser.pool_size, 3);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = MonitorConfig::from_file("/nonexistent/vigil.toml").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not [valid toml").unwrap();
        let err = MonitorConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn default_dynamic_patterns_compile() {
        for pattern in default_dynamic_patterns() {
            assert!(regex::Regex::new(&pattern).is_ok(), "pattern: {pattern}");
        }
    }
}
