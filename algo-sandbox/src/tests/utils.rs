pub mod defaults {
    use crate::{QueuePolicy, SandboxConfig};
    use std::path::Path;
    use tokio::time::Duration;

    pub fn test_config(workspace_root: &Path) -> SandboxConfig {
        SandboxConfig::default()
            .with_workspace_root(workspace_root)
            .with_max_concurrent_executions(2)
            .with_queue_policy(QueuePolicy::Unbounded)
    }

    pub fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn short_timeout() -> Duration {
        Duration::from_secs(1)
    }
}

pub mod fakes {
    use crate::{
        AsyncExecutionRegistry, ContainerRunner, ExecutionRecorder, ExecutionRequest,
        ExecutionResult, ExecutionWorkspace, Language, QueuePolicy, SandboxExecutor, WorkerPool,
        Workspace,
    };
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use tokio::time::{sleep, Duration};

    /// What the scripted runner does with every execution.
    #[derive(Debug, Clone)]
    pub enum Script {
        Exit {
            code: i32,
            stdout: &'static str,
            stderr: &'static str,
        },
        /// Sleep past the request's deadline
        Hang,
        /// Sleep, then exit 0
        Work(Duration),
        /// Behave like a runtime that failed to start
        Fault(&'static str),
    }

    /// Runner that never spawns anything.
    ///
    /// Records which workspaces it saw, and whether the entry file was in
    /// place while it ran.
    pub struct ScriptedRunner {
        script: Script,
        runs: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        workspaces: Mutex<Vec<PathBuf>>,
        entry_present: Mutex<Vec<bool>>,
    }

    impl ScriptedRunner {
        pub fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                runs: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                workspaces: Mutex::new(Vec::new()),
                entry_present: Mutex::new(Vec::new()),
            })
        }

        pub fn succeeding(stdout: &'static str) -> Arc<Self> {
            Self::new(Script::Exit {
                code: 0,
                stdout,
                stderr: "",
            })
        }

        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }

        /// Runs in flight right now.
        pub fn active(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub fn workspaces(&self) -> Vec<PathBuf> {
            self.workspaces.lock().unwrap().clone()
        }

        pub fn entry_files_present(&self) -> Vec<bool> {
            self.entry_present.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRunner for ScriptedRunner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn run(
            &self,
            workspace: &Workspace,
            request: &ExecutionRequest,
            language: Language,
        ) -> ExecutionResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.workspaces
                .lock()
                .unwrap()
                .push(workspace.root_dir().to_path_buf());
            let entry = workspace.source_dir().join(language.profile().entry_file());
            self.entry_present.lock().unwrap().push(entry.exists());

            let result = match &self.script {
                Script::Exit {
                    code,
                    stdout,
                    stderr,
                } => ExecutionResult::completed(*code, stdout.to_string(), stderr.to_string()),
                Script::Hang => {
                    sleep(request.timeout).await;
                    ExecutionResult::timeout(request.timeout)
                }
                Script::Work(duration) => {
                    sleep(*duration).await;
                    ExecutionResult::completed(0, String::new(), String::new())
                }
                Script::Fault(message) => ExecutionResult::system_error(*message),
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Executor over a scripted runner with `workers` pool slots.
    pub fn executor(root: &Path, runner: Arc<ScriptedRunner>, workers: usize) -> SandboxExecutor {
        let registry = AsyncExecutionRegistry::new(
            WorkerPool::new(workers),
            QueuePolicy::Unbounded,
            Duration::from_secs(600),
        );
        SandboxExecutor::new(runner, ExecutionWorkspace::new(root), registry)
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Recorded(i64, crate::ExecutionStatus),
        Started(String),
        Completed(String, bool),
        Cancelled(String),
    }

    /// Recorder that keeps every event for later assertions.
    #[derive(Default)]
    pub struct MemoryRecorder {
        events: Mutex<Vec<Event>>,
    }

    impl MemoryRecorder {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn recorded(&self) -> Vec<crate::ExecutionStatus> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    Event::Recorded(_, status) => Some(status),
                    _ => None,
                })
                .collect()
        }
    }

    impl ExecutionRecorder for MemoryRecorder {
        fn record(&self, request: &ExecutionRequest, result: &ExecutionResult) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Recorded(request.algorithm_id, result.status));
        }

        fn async_started(&self, execution_id: &str, _algorithm_id: i64) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Started(execution_id.to_string()));
        }

        fn async_completed(&self, execution_id: &str, success: bool) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Completed(execution_id.to_string(), success));
        }

        fn cancelled(&self, execution_id: &str) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Cancelled(execution_id.to_string()));
        }
    }
}

pub mod polling {
    use crate::{ExecutionResult, PollOutcome};
    use std::future::Future;
    use tokio::time::{sleep, Duration};

    /// Poll until the outcome is `Completed`, for at most ~10 seconds.
    pub async fn until_completed<F, Fut>(mut poll: F) -> ExecutionResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome>,
    {
        for _ in 0..1000 {
            if let PollOutcome::Completed(result) = poll().await {
                return result;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("execution did not complete in time");
    }
}
