pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod hashing;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod schedule;
pub mod scheduler;
pub mod testutil;
pub mod traits;
pub mod vectorize;
pub mod workflow;

pub use config::MonitorConfig;
pub use error::AppError;
pub use models::{
    Alert, AlertKind, AlertSeverity, AlertStatus, ClassifierWeights, ContentVector, NewAlert,
    NewSite, NewSnapshot, Site, Snapshot, Verdict, VectorKind,
};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use schedule::Schedule;
pub use traits::{
    AlertSink, Embedder, FetchOutcome, Fetcher, LlmClassifier, LlmRequest, LlmVerdict,
    MonitorStore, TracingAlertSink,
};
pub use workflow::{CheckOutcome, CheckWorkflow};
