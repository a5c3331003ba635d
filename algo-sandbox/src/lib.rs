//! # Algorithm Sandbox
//!
//! Runs untrusted algorithm submissions in network-isolated, resource-capped
//! containers. Submissions are screened by a pluggable security gate, run on
//! a bounded worker pool, and can be executed synchronously or submitted
//! asynchronously and polled by execution id.

mod catalog;
mod config;
mod error;
mod executor;
mod languages;
mod recorder;
mod registry;
mod runner;
mod security;
mod service;
mod types;
mod workspace;

#[cfg(test)]
mod tests;

pub use catalog::{AlgorithmCatalog, StaticAlgorithmCatalog};
pub use config::{QueuePolicy, RuntimeKind, SandboxConfig};
pub use error::Error;
pub use executor::SandboxExecutor;
pub use languages::{LanguageProfile, ToolCheck, CONTAINER_OUTPUT_DIR, CONTAINER_SOURCE_DIR};
pub use recorder::{ExecutionRecorder, TracingRecorder};
pub use registry::{AsyncExecutionRegistry, PollOutcome, RegistryStats, WorkerPool};
pub use runner::{ContainerRunner, DockerRunner, ProcessRunner};
pub use security::{
    CodeSecurityGate, DenyRule, PatternSecurityGate, RiskCategory, SecurityViolation,
    DEFAULT_MAX_CODE_LENGTH,
};
pub use service::{ExecutionService, RequestLimits};
pub use types::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, Language, DEFAULT_MEMORY_LIMIT_MB,
    DEFAULT_TIMEOUT_SECS,
};
pub use workspace::{ExecutionWorkspace, Workspace};

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, Error>;
