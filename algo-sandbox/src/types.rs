use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::languages::{
    CExecutor, CppExecutor, JavaExecutor, JavaScriptExecutor, LanguageProfile, PythonExecutor,
};

/// Default wall-clock budget for one execution.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default memory ceiling for one execution.
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 128;

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
    JavaScript,
    Cpp,
    C,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Java,
        Language::Python,
        Language::JavaScript,
        Language::Cpp,
        Language::C,
    ];

    /// Lowercase tag used on the wire, in image names and in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
            Language::C => "c",
        }
    }

    /// Per-language behaviour: entry file, commands, image, denylist.
    pub fn profile(&self) -> &'static dyn LanguageProfile {
        match self {
            Language::Java => &JavaExecutor,
            Language::Python => &PythonExecutor,
            Language::JavaScript => &JavaScriptExecutor,
            Language::Cpp => &CppExecutor,
            Language::C => &CExecutor,
        }
    }
}

impl FromStr for Language {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "java" => Ok(Language::Java),
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            "cpp" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            _ => Err(crate::Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Code execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Algorithm the submission belongs to
    pub algorithm_id: i64,
    /// Raw language tag; unknown tags are kept so they can be reported
    pub language: String,
    /// Source code to execute
    pub code: String,
    /// Data fed to the program's stdin
    #[serde(default)]
    pub input_data: Option<String>,
    /// Execution timeout
    #[serde(
        rename = "timeoutSeconds",
        with = "duration_serde",
        default = "default_timeout"
    )]
    pub timeout: Duration,
    /// Memory ceiling in megabytes
    #[serde(rename = "memoryLimitMB", default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

fn default_memory_limit_mb() -> u64 {
    DEFAULT_MEMORY_LIMIT_MB
}

impl ExecutionRequest {
    pub fn new(algorithm_id: i64, language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            algorithm_id,
            language: language.into(),
            code: code.into(),
            input_data: None,
            timeout: default_timeout(),
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_data = Some(input.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    /// Parsed language, or `None` when the tag is not one we can run.
    pub fn parsed_language(&self) -> Option<Language> {
        self.language.parse().ok()
    }

    /// Input data, ignoring blank strings.
    pub fn stdin(&self) -> Option<&str> {
        self.input_data
            .as_deref()
            .filter(|input| !input.trim().is_empty())
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
    UnsafeCode,
    AlgorithmNotFound,
    UnsupportedLanguage,
    Error,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::UnsafeCode => "UNSAFE_CODE",
            ExecutionStatus::AlgorithmNotFound => "ALGORITHM_NOT_FOUND",
            ExecutionStatus::UnsupportedLanguage => "UNSUPPORTED_LANGUAGE",
            ExecutionStatus::Error => "ERROR",
        };
        f.write_str(token)
    }
}

/// Execution result
///
/// Built only through the constructors below so that `success` always
/// agrees with `status` and a timed-out run never carries an exit code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Program output (stdout, plus the output artifact if one was written)
    pub output: String,
    /// Program errors (stderr) or the rejection/fault description
    pub error: String,
    pub execution_time_ms: u64,
    /// Best-effort peak memory
    #[serde(rename = "memoryUsedKB")]
    pub memory_used_kb: Option<u64>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Best-effort out-of-memory flag
    pub memory_exceeded: bool,
    pub status: ExecutionStatus,
    /// Present only for async executions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl ExecutionResult {
    fn empty(status: ExecutionStatus) -> Self {
        Self {
            success: status == ExecutionStatus::Success,
            output: String::new(),
            error: String::new(),
            execution_time_ms: 0,
            memory_used_kb: None,
            exit_code: None,
            timed_out: false,
            memory_exceeded: false,
            status,
            execution_id: None,
        }
    }

    /// Result of a run that exited on its own.
    pub fn completed(exit_code: i32, output: String, error: String) -> Self {
        let status = if exit_code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        Self {
            output,
            error,
            exit_code: Some(exit_code),
            ..Self::empty(status)
        }
    }

    /// Result of a run that was killed at its deadline.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            error: format!("Execution timed out after {} seconds", timeout.as_secs()),
            timed_out: true,
            ..Self::empty(ExecutionStatus::Timeout)
        }
    }

    /// Result of a request that never reached a container.
    pub fn rejected(status: ExecutionStatus, error: impl Into<String>) -> Self {
        debug_assert!(!matches!(
            status,
            ExecutionStatus::Success | ExecutionStatus::Timeout
        ));
        Self {
            error: error.into(),
            ..Self::empty(status)
        }
    }

    /// Infrastructure fault.
    pub fn system_error(error: impl Into<String>) -> Self {
        Self::rejected(ExecutionStatus::Error, error)
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_memory_used_kb(mut self, memory_used_kb: Option<u64>) -> Self {
        self.memory_used_kb = memory_used_kb;
        self
    }

    pub fn with_memory_exceeded(mut self, memory_exceeded: bool) -> Self {
        self.memory_exceeded = memory_exceeded;
        self
    }

    /// Appends the contents of an output artifact to the captured stdout.
    pub fn append_output(&mut self, artifact: &str) {
        if artifact.is_empty() {
            return;
        }
        if self.output.is_empty() {
            self.output = artifact.to_string();
        } else {
            self.output.push('\n');
            self.output.push_str(artifact);
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
