//! Isolated process supervision
//!
//! A [`ContainerRunner`] turns a prepared [`Workspace`] into an
//! [`ExecutionResult`]. Runners never return errors: spawn and I/O faults are
//! folded into `status = ERROR` so nothing escapes the sandbox boundary.

mod docker;
mod process;

pub use docker::DockerRunner;
pub use process::ProcessRunner;

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, warn};

use crate::{
    error::Error,
    types::{ExecutionRequest, ExecutionResult, Language},
    workspace::Workspace,
    Result,
};

/// Per-stream capture limit. Output past it is read and discarded, so the
/// program neither blocks nor dies of a broken pipe.
pub const MAX_OUTPUT_BYTES: u64 = 1024 * 1024;

#[async_trait]
pub trait ContainerRunner: Send + Sync {
    /// Short backend name for status lines and logs.
    fn name(&self) -> &'static str;

    /// Whether the backend can start executions on this host.
    async fn is_available(&self) -> bool;

    /// Whether submissions are cut off from the host network and filesystem.
    fn is_isolated(&self) -> bool {
        true
    }

    /// Compile and run the workspace's entry file. Blocks until the program
    /// exits or `request.timeout` expires.
    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        language: Language,
    ) -> ExecutionResult;
}

/// How a supervised process ended.
#[derive(Debug)]
pub(crate) enum Supervised {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    /// Deadline hit; the direct child has been killed.
    TimedOut { pid: Option<u32> },
}

/// Spawn `command`, feed `input` on stdin, and wait up to `timeout` for it to
/// exit and for its output streams to close.
pub(crate) async fn supervise(
    mut command: Command,
    input: Option<&str>,
    timeout: Duration,
) -> Result<Supervised> {
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let deadline = Instant::now() + timeout;
    let mut child = command
        .spawn()
        .map_err(|e| Error::Sandbox(format!("Failed to spawn process: {}", e)))?;
    let pid = child.id();

    // Written from a task so a program that never reads stdin cannot stall us.
    let stdin_task = match (input, child.stdin.take()) {
        (Some(input), Some(mut stdin)) => {
            let input = input.to_string();
            Some(tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Stdin closed early: {}", e);
                }
                // Dropping stdin signals EOF
            }))
        }
        _ => None,
    };

    let stdout_task = child.stdout.take().map(read_capped);
    let stderr_task = child.stderr.take().map(read_capped);

    let waited = time::timeout_at(deadline, child.wait()).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            abort_all(stdin_task, [stdout_task, stderr_task]);
            return Err(Error::Sandbox(format!("Process error: {}", e)));
        }
        Err(_) => {
            warn!("Process {:?} exceeded {:?}, killing", pid, timeout);
            let _ = child.kill().await;
            abort_all(stdin_task, [stdout_task, stderr_task]);
            return Ok(Supervised::TimedOut { pid });
        }
    };

    // Output streams can outlive the child when it leaves descendants behind.
    let streams = async {
        let stdout = join_output(stdout_task).await;
        let stderr = join_output(stderr_task).await;
        (stdout, stderr)
    };
    match time::timeout_at(deadline, streams).await {
        Ok((stdout, stderr)) => Ok(Supervised::Exited {
            status,
            stdout,
            stderr,
        }),
        Err(_) => {
            warn!("Output of process {:?} still open at deadline", pid);
            Ok(Supervised::TimedOut { pid })
        }
    }
}

fn read_capped<R>(stream: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut capped = stream.take(MAX_OUTPUT_BYTES);
        if let Err(e) = capped.read_to_end(&mut buf).await {
            debug!("Failed to read process output: {}", e);
        }
        match io::copy(&mut capped.into_inner(), &mut io::sink()).await {
            Ok(0) => {}
            Ok(dropped) => debug!("Discarded {} bytes of output past the cap", dropped),
            Err(e) => debug!("Failed to drain process output: {}", e),
        }
        String::from_utf8_lossy(&buf).trim_end().to_string()
    })
}

async fn join_output(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}

fn abort_all(stdin: Option<JoinHandle<()>>, streams: [Option<JoinHandle<String>>; 2]) {
    if let Some(task) = stdin {
        task.abort();
    }
    for task in streams.into_iter().flatten() {
        task.abort();
    }
}

/// Exit code, mapping signal deaths to the shell's `128 + signal`.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Builds the result for a process that exited, appending the output
/// artifact if the program wrote one.
pub(crate) async fn completed_result(
    workspace: &Workspace,
    exit_code: i32,
    stdout: String,
    stderr: String,
) -> ExecutionResult {
    let mut result = ExecutionResult::completed(exit_code, stdout, stderr);
    if let Some(artifact) = workspace.output_artifact().await {
        result.append_output(&artifact);
    }
    result
}
