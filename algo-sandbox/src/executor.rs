use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{RuntimeKind, SandboxConfig},
    registry::{AsyncExecutionRegistry, PollOutcome, RegistryStats, WorkerPool},
    runner::{ContainerRunner, DockerRunner, ProcessRunner},
    types::{ExecutionRequest, ExecutionResult, ExecutionStatus, Language},
    workspace::ExecutionWorkspace,
    Result,
};

/// Workspace allocation plus a runner, behind the shared worker pool.
#[derive(Clone)]
pub struct SandboxExecutor {
    runner: Arc<dyn ContainerRunner>,
    workspaces: ExecutionWorkspace,
    registry: AsyncExecutionRegistry,
}

impl SandboxExecutor {
    pub fn new(
        runner: Arc<dyn ContainerRunner>,
        workspaces: ExecutionWorkspace,
        registry: AsyncExecutionRegistry,
    ) -> Self {
        Self {
            runner,
            workspaces,
            registry,
        }
    }

    /// Executor with the runtime, pool and workspace root named in `config`.
    pub fn from_config(config: SandboxConfig) -> Self {
        let config = Arc::new(config);
        let runner: Arc<dyn ContainerRunner> = match config.runtime {
            RuntimeKind::Docker => Arc::new(DockerRunner::new(config.clone())),
            RuntimeKind::Process => Arc::new(ProcessRunner::new(config.clone())),
        };
        let registry = AsyncExecutionRegistry::new(
            WorkerPool::new(config.max_concurrent_executions),
            config.queue_policy,
            config.result_ttl(),
        );
        info!(
            "Sandbox executor using {} runtime with {} workers, workspaces under {}",
            runner.name(),
            config.max_concurrent_executions,
            config.workspace_root.display()
        );
        Self::new(
            runner,
            ExecutionWorkspace::new(config.workspace_root.clone()),
            registry,
        )
    }

    pub fn runner(&self) -> &Arc<dyn ContainerRunner> {
        &self.runner
    }

    pub fn registry(&self) -> &AsyncExecutionRegistry {
        &self.registry
    }

    pub fn is_language_supported(&self, language: &str) -> bool {
        language.parse::<Language>().is_ok()
    }

    /// Run `request` to completion on a pool worker.
    ///
    /// Unsupported languages are answered without taking a worker or
    /// touching the filesystem. The run itself is detached: if the caller
    /// goes away, it still finishes, releases its workspace and only then
    /// frees its worker.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        if request.parsed_language().is_none() {
            let started = Instant::now();
            return Self::unsupported(request).with_execution_time(started.elapsed());
        }

        let executor = self.clone();
        let request = request.clone();
        let task = tokio::spawn(async move {
            let _permit = match executor.registry.pool().acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("{}", e);
                    return ExecutionResult::system_error(e.to_string());
                }
            };
            let execution_id = Uuid::new_v4().to_string();
            executor.execute_on_worker(&execution_id, &request).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution task failed: {}", e);
                ExecutionResult::system_error(format!("Execution task failed: {}", e))
            }
        }
    }

    /// Schedule `request` and return its execution id immediately.
    pub async fn execute_async(&self, request: ExecutionRequest) -> Result<String> {
        self.execute_async_with(request, |_, _| {}).await
    }

    /// Like [`SandboxExecutor::execute_async`], calling `on_complete` on the
    /// worker once the result is final.
    pub async fn execute_async_with<C>(
        &self,
        request: ExecutionRequest,
        on_complete: C,
    ) -> Result<String>
    where
        C: FnOnce(&ExecutionRequest, &ExecutionResult) + Send + 'static,
    {
        let executor = self.clone();
        self.registry
            .submit(move |execution_id| async move {
                let result = executor
                    .execute_on_worker(&execution_id, &request)
                    .await
                    .with_execution_id(execution_id.clone());
                on_complete(&request, &result);
                result
            })
            .await
    }

    pub async fn poll(&self, execution_id: &str) -> PollOutcome {
        self.registry.poll(execution_id).await
    }

    pub async fn cancel(&self, execution_id: &str) -> bool {
        self.registry.cancel(execution_id).await
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// One-line capacity summary.
    pub async fn status(&self) -> String {
        if !self.runner.is_available().await {
            return format!(
                "Sandbox unavailable: {} runtime is not reachable",
                self.runner.name()
            );
        }
        let stats = self.stats().await;
        let mut status = format!(
            "Sandbox ready: {} runtime, max concurrent executions {}, free workers {}, queued {}, running {}",
            self.runner.name(),
            stats.workers,
            stats.free_workers,
            stats.queued,
            stats.running
        );
        if !self.runner.is_isolated() {
            status.push_str(" (not isolated: submissions share the host network and filesystem)");
        }
        status
    }

    /// Body of a run once its worker permit is held. Timing starts here, so
    /// queueing for a worker is never counted.
    async fn execute_on_worker(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
    ) -> ExecutionResult {
        let started = Instant::now();
        let result = match request.parsed_language() {
            Some(language) => self.run(execution_id, request, language).await,
            None => Self::unsupported(request),
        };
        result.with_execution_time(started.elapsed())
    }

    fn unsupported(request: &ExecutionRequest) -> ExecutionResult {
        warn!("Rejected unsupported language: {}", request.language);
        ExecutionResult::rejected(
            ExecutionStatus::UnsupportedLanguage,
            format!("Unsupported language: {}", request.language),
        )
    }

    /// Prepare, run and release a workspace. The workspace is gone before
    /// this returns, whatever the outcome.
    async fn run(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
        language: Language,
    ) -> ExecutionResult {
        info!(
            "Starting {} execution {} for algorithm {}",
            language, execution_id, request.algorithm_id
        );

        let workspace = match self.workspaces.prepare(execution_id, request, language).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("Failed to prepare workspace for {}: {}", execution_id, e);
                return ExecutionResult::system_error(format!("Failed to prepare workspace: {}", e));
            }
        };
        debug!("Workspace ready at {}", workspace.root_dir().display());

        let result = self.runner.run(&workspace, request, language).await;

        if let Err(e) = workspace.release().await {
            warn!("Failed to release workspace {}: {}", execution_id, e);
        }

        info!("Execution {} finished: {}", execution_id, result.status);
        result
    }
}
