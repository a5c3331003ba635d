use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    catalog::{AlgorithmCatalog, StaticAlgorithmCatalog},
    config::SandboxConfig,
    error::Error,
    executor::SandboxExecutor,
    recorder::{ExecutionRecorder, TracingRecorder},
    registry::PollOutcome,
    security::{CodeSecurityGate, PatternSecurityGate},
    types::{ExecutionRequest, ExecutionResult, ExecutionStatus},
    Result,
};

/// Bounds applied to request fields before anything else runs.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_timeout: Duration,
    pub max_memory_mb: u64,
}

impl From<&SandboxConfig> for RequestLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            max_timeout: Duration::from_secs(config.max_timeout_seconds),
            max_memory_mb: config.max_memory_mb,
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

/// Entry point for running submissions: existence check, security gate,
/// sandbox, then the recorder.
#[derive(Clone)]
pub struct ExecutionService {
    catalog: Arc<dyn AlgorithmCatalog>,
    gate: Arc<dyn CodeSecurityGate>,
    recorder: Arc<dyn ExecutionRecorder>,
    executor: SandboxExecutor,
    limits: RequestLimits,
}

impl ExecutionService {
    pub fn new(
        catalog: Arc<dyn AlgorithmCatalog>,
        gate: Arc<dyn CodeSecurityGate>,
        recorder: Arc<dyn ExecutionRecorder>,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            catalog,
            gate,
            recorder,
            executor,
            limits: RequestLimits::default(),
        }
    }

    /// Service wired the way the server runs it: static catalog, pattern
    /// gate and tracing recorder.
    pub fn from_config(config: SandboxConfig) -> Self {
        let limits = RequestLimits::from(&config);
        let catalog = Arc::new(StaticAlgorithmCatalog::new(config.algorithm_ids.clone()));
        let gate = Arc::new(PatternSecurityGate::new(config.max_code_length));
        Self::new(
            catalog,
            gate,
            Arc::new(TracingRecorder),
            SandboxExecutor::from_config(config),
        )
        .with_limits(limits)
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    /// Run synchronously. Policy rejections come back as results; only a
    /// malformed request is an `Err`.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.check_request(&request)?;

        let result = match self.admit(&request).await {
            Ok(()) => self.executor.execute(&request).await,
            Err(Error::AlgorithmNotFound(id)) => ExecutionResult::rejected(
                ExecutionStatus::AlgorithmNotFound,
                format!("Algorithm not found: {}", id),
            ),
            Err(Error::UnsafeCode(reason)) => ExecutionResult::rejected(
                ExecutionStatus::UnsafeCode,
                format!("Code contains unsafe operations: {}", reason),
            ),
            Err(e) => return Err(e),
        };

        self.recorder.record(&request, &result);
        Ok(result)
    }

    /// Schedule a run and return its execution id. Rejections are errors
    /// here since there is no result to carry them.
    pub async fn execute_async(&self, request: ExecutionRequest) -> Result<String> {
        self.check_request(&request)?;
        if let Err(e) = self.admit(&request).await {
            let status = match e {
                Error::AlgorithmNotFound(_) => ExecutionStatus::AlgorithmNotFound,
                _ => ExecutionStatus::UnsafeCode,
            };
            self.recorder
                .record(&request, &ExecutionResult::rejected(status, e.to_string()));
            return Err(e);
        }

        let algorithm_id = request.algorithm_id;
        let recorder = self.recorder.clone();
        let execution_id = self
            .executor
            .execute_async_with(request, move |request, result| {
                recorder.record(request, result)
            })
            .await?;

        self.recorder.async_started(&execution_id, algorithm_id);
        Ok(execution_id)
    }

    pub async fn poll(&self, execution_id: &str) -> PollOutcome {
        let outcome = self.executor.poll(execution_id).await;
        match &outcome {
            PollOutcome::Completed(result) => {
                self.recorder.async_completed(execution_id, result.success)
            }
            PollOutcome::Unknown => debug!("Poll for unknown execution {}", execution_id),
            _ => {}
        }
        outcome
    }

    pub async fn cancel(&self, execution_id: &str) -> bool {
        let removed = self.executor.cancel(execution_id).await;
        if removed {
            self.recorder.cancelled(execution_id);
        }
        removed
    }

    pub fn validate_security(&self, code: &str, language: &str) -> bool {
        self.gate.validate(code, language)
    }

    pub async fn sandbox_status(&self) -> String {
        self.executor.status().await
    }

    /// Shape checks that come before any policy decision.
    fn check_request(&self, request: &ExecutionRequest) -> Result<()> {
        if request.language.trim().is_empty() {
            return Err(Error::InvalidRequest("language is required".to_string()));
        }
        if request.timeout.is_zero() || request.timeout > self.limits.max_timeout {
            return Err(Error::InvalidRequest(format!(
                "timeoutSeconds must be between 1 and {}",
                self.limits.max_timeout.as_secs()
            )));
        }
        if request.memory_limit_mb == 0 || request.memory_limit_mb > self.limits.max_memory_mb {
            return Err(Error::InvalidRequest(format!(
                "memoryLimitMB must be between 1 and {}",
                self.limits.max_memory_mb
            )));
        }
        Ok(())
    }

    /// Existence check, then the security gate.
    async fn admit(&self, request: &ExecutionRequest) -> Result<()> {
        if !self.catalog.exists(request.algorithm_id).await {
            warn!("Algorithm {} does not exist", request.algorithm_id);
            return Err(Error::AlgorithmNotFound(request.algorithm_id));
        }
        if let Err(violation) = self.gate.screen(&request.code, &request.language) {
            info!(
                "Rejected submission for algorithm {}: {}",
                request.algorithm_id, violation
            );
            return Err(Error::UnsafeCode(violation.to_string()));
        }
        Ok(())
    }
}
