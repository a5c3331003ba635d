use tracing::{info, warn};

use crate::types::{ExecutionRequest, ExecutionResult};

/// Receives finished executions and async lifecycle events.
///
/// Called inline on the request path, so implementations must not block.
pub trait ExecutionRecorder: Send + Sync {
    fn record(&self, request: &ExecutionRequest, result: &ExecutionResult);

    fn async_started(&self, _execution_id: &str, _algorithm_id: i64) {}

    fn async_completed(&self, _execution_id: &str, _success: bool) {}

    fn cancelled(&self, _execution_id: &str) {}
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl ExecutionRecorder for TracingRecorder {
    fn record(&self, request: &ExecutionRequest, result: &ExecutionResult) {
        if result.success {
            info!(
                algorithm_id = request.algorithm_id,
                language = %request.language,
                execution_time_ms = result.execution_time_ms,
                "Algorithm execution succeeded"
            );
        } else {
            warn!(
                algorithm_id = request.algorithm_id,
                language = %request.language,
                status = %result.status,
                error = %result.error,
                "Algorithm execution failed"
            );
        }
    }

    fn async_started(&self, execution_id: &str, algorithm_id: i64) {
        info!(execution_id, algorithm_id, "Async execution started");
    }

    fn async_completed(&self, execution_id: &str, success: bool) {
        if success {
            info!(execution_id, "Async execution completed");
        } else {
            warn!(execution_id, "Async execution failed");
        }
    }

    fn cancelled(&self, execution_id: &str) {
        info!(execution_id, "Execution cancelled");
    }
}
