use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{error::Error, types::Language, Result};

/// Which isolation backend runs submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// One Docker container per execution
    Docker,
    /// Local toolchains under rlimits; no network isolation
    Process,
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "process" => Ok(RuntimeKind::Process),
            _ => Err(format!("Unknown runtime: {}", s)),
        }
    }
}

/// What to do with async submissions once every worker is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "limit")]
pub enum QueuePolicy {
    /// Queue without limit
    Unbounded,
    /// Queue up to `n` waiting submissions, then reject
    Bounded(usize),
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub runtime: RuntimeKind,
    /// Docker daemon socket; the local default when unset
    pub docker_socket: Option<String>,
    /// Upper bound for pulling a missing image, outside the run deadline
    pub image_pull_timeout_secs: u64,
    /// Parent directory for per-execution workspaces
    pub workspace_root: PathBuf,
    /// When set, images are named `<prefix>-<language>`
    pub image_prefix: Option<String>,
    /// Per-language image overrides, keyed by language tag
    pub images: HashMap<String, String>,
    pub max_concurrent_executions: usize,
    pub queue_policy: QueuePolicy,
    /// How long completed async results stay pollable
    pub result_ttl_secs: u64,
    /// CPU share per container
    pub cpus: f32,
    /// Size of the writable /tmp scratch area
    pub scratch_size_mb: u64,
    /// Maximum number of processes per container
    pub pids_limit: u32,
    pub max_code_length: usize,
    pub max_timeout_seconds: u64,
    pub max_memory_mb: u64,
    /// Largest file a program may write (process runtime)
    pub max_file_size_bytes: u64,
    /// Known algorithm ids; empty means every id exists
    pub algorithm_ids: Vec<i64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Docker,
            docker_socket: None,
            image_pull_timeout_secs: 600,
            workspace_root: std::env::temp_dir().join("algo-sandbox"),
            image_prefix: None,
            images: HashMap::new(),
            max_concurrent_executions: 10,
            queue_policy: QueuePolicy::Unbounded,
            result_ttl_secs: 600,
            cpus: 1.0,
            scratch_size_mb: 64,
            pids_limit: 64,
            max_code_length: 10_000,
            max_timeout_seconds: 60,
            max_memory_mb: 1024,
            max_file_size_bytes: 10 * 1024 * 1024, // 10MB
            algorithm_ids: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Load a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: SandboxConfig =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(Error::Config(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.cpus <= 0.0 {
            return Err(Error::Config("cpus must be positive".to_string()));
        }
        if self.max_code_length == 0 || self.max_timeout_seconds == 0 || self.max_memory_mb == 0 {
            return Err(Error::Config(
                "code, timeout and memory limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max;
        self
    }

    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = Some(prefix.into());
        self
    }

    pub fn with_docker_socket(mut self, socket: impl Into<String>) -> Self {
        self.docker_socket = Some(socket.into());
        self
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn image_pull_timeout(&self) -> Duration {
        Duration::from_secs(self.image_pull_timeout_secs)
    }

    /// Image for a language: explicit override, then prefix, then default.
    pub fn image_for(&self, language: Language) -> String {
        if let Some(image) = self.images.get(language.tag()) {
            return image.clone();
        }
        match &self.image_prefix {
            Some(prefix) => format!("{}-{}", prefix, language.tag()),
            None => language.profile().default_image().to_string(),
        }
    }
}
