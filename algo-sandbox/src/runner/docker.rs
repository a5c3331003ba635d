use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{ContainerWaitResponse, HostConfig},
    Docker, API_DEFAULT_VERSION,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::{completed_result, ContainerRunner, MAX_OUTPUT_BYTES};
use crate::{
    config::SandboxConfig,
    error::Error,
    languages::{CONTAINER_OUTPUT_DIR, CONTAINER_SOURCE_DIR},
    types::{ExecutionRequest, ExecutionResult, Language},
    workspace::{Workspace, INPUT_FILE},
    Result,
};

const CLIENT_TIMEOUT_SECS: u64 = 120;

/// One throwaway container per execution, driven through the Docker API.
pub struct DockerRunner {
    config: Arc<SandboxConfig>,
    client: Option<Docker>,
}

impl DockerRunner {
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        let connected = match &config.docker_socket {
            Some(socket) => {
                Docker::connect_with_socket(socket, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        };
        let client = match connected {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Docker client unavailable: {}", e);
                None
            }
        };
        Self { config, client }
    }

    pub fn container_name(execution_id: &str) -> String {
        format!("algo-sandbox-{}", execution_id)
    }

    /// Shell script run inside the container. Input, when present, is read
    /// from the mounted source directory.
    pub fn container_script(request: &ExecutionRequest, language: Language) -> String {
        let command = language.profile().container_command();
        match request.stdin() {
            Some(_) => format!(
                "exec < '{}/{}'; {}",
                CONTAINER_SOURCE_DIR, INPUT_FILE, command
            ),
            None => command,
        }
    }

    /// Container definition carrying the isolation settings for one execution.
    pub fn container_config(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        language: Language,
    ) -> Config<String> {
        let memory = (request.memory_limit_mb * 1024 * 1024) as i64;
        let host_config = HostConfig {
            memory: Some(memory),
            memory_swap: Some(memory),
            nano_cpus: Some((f64::from(self.config.cpus) * 1_000_000_000.0) as i64),
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                format!("rw,noexec,nosuid,size={}m", self.config.scratch_size_mb),
            )])),
            pids_limit: Some(i64::from(self.config.pids_limit)),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            binds: Some(vec![
                format!(
                    "{}:{}:ro",
                    workspace.source_dir().display(),
                    CONTAINER_SOURCE_DIR
                ),
                format!(
                    "{}:{}:rw",
                    workspace.output_dir().display(),
                    CONTAINER_OUTPUT_DIR
                ),
            ]),
            ..Default::default()
        };

        Config {
            image: Some(self.config.image_for(language)),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                Self::container_script(request, language),
            ]),
            working_dir: Some(CONTAINER_SOURCE_DIR.to_string()),
            network_disabled: Some(true),
            labels: Some(HashMap::from([(
                "algo-sandbox.execution-id".to_string(),
                workspace.execution_id().to_string(),
            )])),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn client(&self) -> Result<&Docker> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Sandbox("Docker client is not configured".to_string()))
    }

    /// Pull `image` unless the daemon already has it. Bounded by the pull
    /// timeout, never by the execution deadline.
    pub(crate) async fn ensure_image(&self, image: &str) -> Result<()> {
        let docker = self.client()?;
        match docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => {
                return Err(Error::Sandbox(format!(
                    "Failed to inspect image {}: {}",
                    image, e
                )))
            }
        }

        info!("Pulling image {}", image);
        let pull = async {
            let options = Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            });
            let mut progress = docker.create_image(options, None, None);
            while let Some(step) = progress.next().await {
                step.map_err(|e| Error::Sandbox(format!("Failed to pull {}: {}", image, e)))?;
            }
            Ok::<_, Error>(())
        };
        time::timeout(self.config.image_pull_timeout(), pull)
            .await
            .map_err(|_| {
                Error::Sandbox(format!(
                    "Timed out pulling {} after {:?}",
                    image,
                    self.config.image_pull_timeout()
                ))
            })?
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        language: Language,
    ) -> Result<ExecutionResult> {
        let docker = self.client()?;
        let name = Self::container_name(workspace.execution_id());
        self.ensure_image(&self.config.image_for(language)).await?;

        // Armed before creation: a create the daemon completes after we are
        // cancelled is still cleaned up.
        let container = ContainerGuard::new(docker.clone(), name.clone());
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let result = match docker
            .create_container(
                Some(options),
                self.container_config(workspace, request, language),
            )
            .await
        {
            Ok(_) => {
                debug!("Created container {}", name);
                self.supervise(docker, &name, workspace, request).await
            }
            Err(e) => Err(Error::Sandbox(format!("Failed to create container: {}", e))),
        };
        container.remove().await;
        result
    }

    async fn supervise(
        &self,
        docker: &Docker,
        name: &str,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let deadline = Instant::now() + request.timeout;
        docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to start container: {}", e)))?;

        let mut wait = docker.wait_container(name, None::<WaitContainerOptions<String>>);
        let exit_code = match time::timeout_at(deadline, wait.next()).await {
            Ok(item) => exit_code_from_wait(item)?,
            Err(_) => {
                info!("Container {} timed out after {:?}", name, request.timeout);
                if let Err(e) = docker
                    .kill_container(name, None::<KillContainerOptions<String>>)
                    .await
                {
                    debug!("Kill of {} had nothing to stop: {}", name, e);
                }
                return Ok(ExecutionResult::timeout(request.timeout));
            }
        };

        let (stdout, stderr) = collect_logs(docker, name).await;
        let oom = self.oom_killed(docker, name).await;
        Ok(completed_result(workspace, exit_code, stdout, stderr)
            .await
            .with_memory_exceeded(oom))
    }

    async fn oom_killed(&self, docker: &Docker, name: &str) -> bool {
        match docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                debug!("Failed to inspect {}: {}", name, e);
                false
            }
        }
    }
}

/// Exit status of the program, from the first item of a wait stream.
///
/// The client reports a non-zero status as an error carrying the code; that
/// is still the program's own exit and never a runtime fault.
fn exit_code_from_wait(
    item: Option<std::result::Result<ContainerWaitResponse, DockerError>>,
) -> Result<i32> {
    match item {
        Some(Ok(response)) => Ok(response.status_code as i32),
        Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code as i32),
        Some(Err(e)) => Err(Error::Sandbox(format!("Failed to wait for container: {}", e))),
        None => Err(Error::Sandbox(
            "Container wait ended without an exit status".to_string(),
        )),
    }
}

async fn collect_logs(docker: &Docker, name: &str) -> (String, String) {
    let options = Some(LogsOptions::<String> {
        stdout: true,
        stderr: true,
        ..Default::default()
    });
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut logs = docker.logs(name, options);
    while let Some(chunk) = logs.next().await {
        match chunk {
            Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                push_capped(&mut stdout, &message)
            }
            Ok(LogOutput::StdErr { message }) => push_capped(&mut stderr, &message),
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read logs of {}: {}", name, e);
                break;
            }
        }
    }
    (lossy(&stdout), lossy(&stderr))
}

fn push_capped(buf: &mut Vec<u8>, chunk: &[u8]) {
    let room = (MAX_OUTPUT_BYTES as usize).saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

async fn remove_container(docker: &Docker, name: &str) {
    let options = RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    };
    match docker.remove_container(name, Some(options)).await {
        Ok(()) => debug!("Removed container {}", name),
        Err(DockerError::DockerResponseServerError {
            status_code: 404, ..
        }) => debug!("Container {} was never created", name),
        Err(e) => warn!("Failed to remove container {}: {}", name, e),
    }
}

/// Force-removes its container unless [`ContainerGuard::remove`] ran first,
/// so a cancelled run cannot leave a container behind.
struct ContainerGuard {
    docker: Docker,
    name: String,
    removed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, name: String) -> Self {
        Self {
            docker,
            name,
            removed: false,
        }
    }

    async fn remove(mut self) {
        self.removed = true;
        remove_container(&self.docker, &self.name).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let docker = self.docker.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Run of {} was abandoned, removing its container", name);
                runtime.spawn(async move { remove_container(&docker, &name).await });
            }
            Err(_) => error!("No runtime left to remove container {}", name),
        }
    }
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        match &self.client {
            Some(docker) => docker.ping().await.is_ok(),
            None => false,
        }
    }

    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        language: Language,
    ) -> ExecutionResult {
        match self.execute(workspace, request, language).await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution {} failed in docker: {}", workspace.execution_id(), e);
                ExecutionResult::system_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionStatus;
    use crate::workspace::ExecutionWorkspace;
    use assert_fs::TempDir;
    use std::time::Duration;

    async fn prepared(
        temp: &TempDir,
        request: &ExecutionRequest,
        language: Language,
    ) -> Workspace {
        ExecutionWorkspace::new(temp.path())
            .prepare("abc123", request, language)
            .await
            .unwrap()
    }

    /// Runner against the local daemon, or `None` when there is none.
    async fn live_runner() -> Option<Arc<DockerRunner>> {
        let runner = DockerRunner::new(Arc::new(SandboxConfig::default()));
        if !runner.is_available().await {
            eprintln!("Skipping test: docker daemon not available");
            return None;
        }
        Some(Arc::new(runner))
    }

    #[tokio::test]
    async fn test_container_config_carries_isolation() {
        let temp = TempDir::new().unwrap();
        let runner = DockerRunner::new(Arc::new(SandboxConfig::default()));
        let request = ExecutionRequest::new(1, "python", "print(1+1)").with_memory_limit_mb(256);
        let workspace = prepared(&temp, &request, Language::Python).await;

        let mut config = runner.container_config(&workspace, &request, Language::Python);
        let host = config.host_config.take().unwrap();

        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(1_000_000_000));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.tmpfs.unwrap()["/tmp"],
            "rw,noexec,nosuid,size=64m".to_string()
        );
        let binds = host.binds.unwrap();
        assert_eq!(
            binds[0],
            format!("{}:/workspace:ro", workspace.source_dir().display())
        );
        assert_eq!(
            binds[1],
            format!("{}:/output:rw", workspace.output_dir().display())
        );

        assert_eq!(config.image.as_deref(), Some("python:3.11-slim"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(
            config.cmd.unwrap(),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "python3 -B '/workspace/main.py'".to_string()
            ]
        );
    }

    #[test]
    fn test_input_is_redirected_from_source_mount() {
        let request = ExecutionRequest::new(1, "c", "int main(){}").with_input("5");
        let script = DockerRunner::container_script(&request, Language::C);
        assert!(script.starts_with("exec < '/workspace/input.txt'; "), "{}", script);

        let silent = ExecutionRequest::new(1, "c", "int main(){}");
        assert_eq!(
            DockerRunner::container_script(&silent, Language::C),
            Language::C.profile().container_command()
        );
    }

    #[tokio::test]
    async fn test_image_follows_prefix() {
        let temp = TempDir::new().unwrap();
        let config = SandboxConfig::default().with_image_prefix("alg-cockpit");
        let runner = DockerRunner::new(Arc::new(config));
        let request = ExecutionRequest::new(1, "java", "class Main {}");
        let workspace = prepared(&temp, &request, Language::Java).await;

        let config = runner.container_config(&workspace, &request, Language::Java);
        assert_eq!(config.image.as_deref(), Some("alg-cockpit-java"));
    }

    #[test]
    fn test_wait_status_is_the_programs_exit() {
        let exited = |code| {
            Some(Err(DockerError::DockerContainerWaitError {
                error: String::new(),
                code,
            }))
        };
        assert_eq!(exit_code_from_wait(exited(125)).unwrap(), 125);
        assert_eq!(exit_code_from_wait(exited(137)).unwrap(), 137);
        assert_eq!(
            exit_code_from_wait(Some(Ok(ContainerWaitResponse {
                status_code: 0,
                error: None,
            })))
            .unwrap(),
            0
        );
        assert!(matches!(
            exit_code_from_wait(None),
            Err(Error::Sandbox(_))
        ));
    }

    #[tokio::test]
    async fn test_exit_125_is_a_failed_run() {
        let temp = TempDir::new().unwrap();
        let request = ExecutionRequest::new(1, "c", "int main(){ return 125; }");
        let workspace = prepared(&temp, &request, Language::C).await;

        let code = exit_code_from_wait(Some(Err(DockerError::DockerContainerWaitError {
            error: String::new(),
            code: 125,
        })))
        .unwrap();
        let result =
            completed_result(&workspace, code, "partial".to_string(), String::new()).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, Some(125));
        assert_eq!(result.output, "partial");
    }

    #[test]
    fn test_logs_are_capped() {
        let mut buf = Vec::new();
        push_capped(&mut buf, &vec![b'a'; MAX_OUTPUT_BYTES as usize - 1]);
        push_capped(&mut buf, b"bcd");
        push_capped(&mut buf, b"efg");
        assert_eq!(buf.len() as u64, MAX_OUTPUT_BYTES);
        assert_eq!(buf.last(), Some(&b'b'));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_system_error() {
        let temp = TempDir::new().unwrap();
        let config = SandboxConfig::default().with_docker_socket("/nonexistent/docker.sock");
        let runner = DockerRunner::new(Arc::new(config));
        let request = ExecutionRequest::new(1, "python", "print(1)");
        let workspace = prepared(&temp, &request, Language::Python).await;

        assert!(!runner.is_available().await);
        let result = runner.run(&workspace, &request, Language::Python).await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_live_exit_125_keeps_output() {
        let Some(runner) = live_runner().await else {
            return;
        };
        let temp = TempDir::new().unwrap();
        let request =
            ExecutionRequest::new(1, "python", "print('partial')\nraise SystemExit(125)")
                .with_timeout(Duration::from_secs(20));
        let workspace = prepared(&temp, &request, Language::Python).await;

        let result = runner.run(&workspace, &request, Language::Python).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, Some(125));
        assert_eq!(result.output, "partial");
    }

    #[tokio::test]
    async fn test_abandoned_run_removes_container() {
        let Some(runner) = live_runner().await else {
            return;
        };
        let image = runner.config.image_for(Language::Python);
        if runner.ensure_image(&image).await.is_err() {
            eprintln!("Skipping test: {} not available", image);
            return;
        }
        let docker = runner.client().unwrap().clone();
        let temp = TempDir::new().unwrap();
        let request = ExecutionRequest::new(1, "python", "while True:\n    pass")
            .with_timeout(Duration::from_secs(30));
        let workspace = prepared(&temp, &request, Language::Python).await;
        let name = DockerRunner::container_name(workspace.execution_id());

        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(&workspace, &request, Language::Python).await })
        };

        let mut started = false;
        for _ in 0..100 {
            if docker
                .inspect_container(&name, None::<InspectContainerOptions>)
                .await
                .is_ok()
            {
                started = true;
                break;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        assert!(started, "container {} never appeared", name);

        task.abort();
        let _ = task.await;

        let mut removed = false;
        for _ in 0..100 {
            if docker
                .inspect_container(&name, None::<InspectContainerOptions>)
                .await
                .is_err()
            {
                removed = true;
                break;
            }
            time::sleep(Duration::from_millis(100)).await;
        }
        assert!(removed, "container {} outlived its run", name);
    }
}
