use async_trait::async_trait;
use nix::sys::resource::{getrusage, setrlimit, Resource, UsageWho};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{completed_result, exit_code, supervise, ContainerRunner, Supervised};
use crate::{
    config::SandboxConfig,
    types::{ExecutionRequest, ExecutionResult, Language},
    workspace::Workspace,
};

/// Runs submissions with the host's own toolchains under rlimits.
///
/// Meant for development hosts without a container runtime. Processes keep
/// host network access and see the host filesystem. CPU time, file size and
/// wall-clock time are enforced, and the data segment is capped at the
/// request's memory limit for languages that tolerate it. Peak memory is
/// also checked after the fact.
pub struct ProcessRunner {
    config: Arc<SandboxConfig>,
}

impl ProcessRunner {
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        warn!("Process runtime selected: submissions are NOT network-isolated");
        Self { config }
    }

    fn command(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        language: Language,
    ) -> Command {
        let source_dir = workspace.source_dir();
        let output_dir = workspace.output_dir();
        let script = language
            .profile()
            .command(&source_dir.to_string_lossy(), &output_dir.to_string_lossy());
        debug!("Process command: {}", script);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(script)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin")
            .env("HOME", &output_dir)
            .env("TMPDIR", &output_dir)
            .current_dir(&source_dir);

        // CPU seconds get one second of slack over the wall-clock deadline.
        let cpu_time = request.timeout.as_secs() + 1;
        let file_size = self.config.max_file_size_bytes;
        let data_size = language
            .profile()
            .caps_data_segment()
            .then(|| request.memory_limit_mb * 1024 * 1024);

        unsafe {
            command.pre_exec(move || {
                // Own process group, so a timeout can take out grandchildren.
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Failed to set file size limit: {}", e),
                    )
                })?;
                setrlimit(Resource::RLIMIT_CPU, cpu_time, cpu_time).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Failed to set CPU time limit: {}", e),
                    )
                })?;
                if let Some(data_size) = data_size {
                    setrlimit(Resource::RLIMIT_DATA, data_size, data_size).map_err(|e| {
                        std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Failed to set data size limit: {}", e),
                        )
                    })?;
                }
                Ok(())
            });
        }

        command
    }

    fn kill_group(pid: Option<u32>) {
        if let Some(pid) = pid {
            let group = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pid, e);
            }
        }
    }

    /// Peak RSS of reaped children in KB. Shared by every child of this
    /// process, so an upper bound rather than a per-run figure.
    fn peak_memory_kb() -> Option<u64> {
        let usage = getrusage(UsageWho::RUSAGE_CHILDREN).ok()?;
        let max_rss = usage.max_rss() as u64;
        // macOS reports bytes, Linux kilobytes
        #[cfg(target_os = "macos")]
        let max_rss = max_rss / 1024;
        Some(max_rss)
    }
}

#[async_trait]
impl ContainerRunner for ProcessRunner {
    fn name(&self) -> &'static str {
        "process"
    }

    fn is_isolated(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        Language::ALL
            .iter()
            .any(|language| language.profile().check_tools().is_ok())
    }

    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        language: Language,
    ) -> ExecutionResult {
        if let Err(e) = language.profile().check_tools() {
            return ExecutionResult::system_error(e.to_string());
        }

        let command = self.command(workspace, request, language);
        match supervise(command, request.stdin(), request.timeout).await {
            Ok(Supervised::TimedOut { pid }) => {
                info!(
                    "Execution {} timed out after {:?}",
                    workspace.execution_id(),
                    request.timeout
                );
                Self::kill_group(pid);
                ExecutionResult::timeout(request.timeout)
            }
            Ok(Supervised::Exited {
                status,
                stdout,
                stderr,
            }) => {
                let peak_kb = Self::peak_memory_kb();
                let limit_kb = request.memory_limit_mb * 1024;
                let result =
                    completed_result(workspace, exit_code(&status), stdout, stderr).await;
                let exceeded =
                    !result.success && peak_kb.map(|kb| kb > limit_kb).unwrap_or(false);
                result
                    .with_memory_used_kb(peak_kb)
                    .with_memory_exceeded(exceeded)
            }
            Err(e) => {
                error!("Failed to run {}: {}", workspace.execution_id(), e);
                ExecutionResult::system_error(e.to_string())
            }
        }
    }
}
