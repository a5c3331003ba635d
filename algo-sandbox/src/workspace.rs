use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error};

use crate::{error::Error, types::ExecutionRequest, types::Language, Result};

/// Name of the stdin copy written next to the source.
pub const INPUT_FILE: &str = "input.txt";
/// Artifact a program may write to its output directory.
pub const OUTPUT_ARTIFACT: &str = "output.txt";

/// Allocates per-execution directories under a shared root.
#[derive(Debug, Clone)]
pub struct ExecutionWorkspace {
    root: PathBuf,
}

/// Exclusive directory tree for one execution.
///
/// ```text
/// <root>/executions/<id>/src   source + input, mounted read-only
/// <root>/executions/<id>/out   build artifacts and output.txt
/// ```
///
/// The tree is removed by [`Workspace::release`], or on drop if release was
/// never reached.
#[derive(Debug)]
pub struct Workspace {
    execution_id: String,
    root_dir: PathBuf,
    released: bool,
}

impl ExecutionWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the workspace and materialise the request's source and input.
    pub async fn prepare(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
        language: Language,
    ) -> Result<Workspace> {
        let root_dir = self.root.join("executions").join(execution_id);
        if fs::try_exists(&root_dir).await.unwrap_or(false) {
            return Err(Error::Sandbox(format!(
                "Workspace already exists: {}",
                root_dir.display()
            )));
        }

        // From here on the guard owns the directory, so early returns clean up.
        let workspace = Workspace {
            execution_id: execution_id.to_string(),
            root_dir,
            released: false,
        };

        for dir in [workspace.source_dir(), workspace.output_dir()] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                Error::Sandbox(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let source_path = workspace.source_dir().join(language.profile().entry_file());
        fs::write(&source_path, &request.code)
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to write source file: {}", e)))?;

        if let Some(input) = request.stdin() {
            fs::write(workspace.source_dir().join(INPUT_FILE), input)
                .await
                .map_err(|e| Error::Sandbox(format!("Failed to write input file: {}", e)))?;
        }

        debug!(
            "Prepared workspace for {} at {}",
            execution_id,
            workspace.root_dir.display()
        );
        Ok(workspace)
    }
}

impl Workspace {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root_dir.join("src")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root_dir.join("out")
    }

    /// Contents of the output artifact, if the program wrote one.
    pub async fn output_artifact(&self) -> Option<String> {
        let path = self.output_dir().join(OUTPUT_ARTIFACT);
        match fs::read(&path).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).trim_end().to_string()),
            Err(_) => None,
        }
    }

    /// Remove the directory tree.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_dir_all(&self.root_dir).await {
            Ok(()) => {
                debug!("Released workspace {}", self.root_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("Failed to clean up workspace directory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest::new(1, "python", code)
    }

    #[tokio::test]
    async fn test_prepare_writes_entry_file() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());

        let workspace = workspaces
            .prepare("exec-1", &request("print(1)"), Language::Python)
            .await?;

        let source = workspace.source_dir().join("main.py");
        assert_eq!(std::fs::read_to_string(source)?, "print(1)");
        assert!(workspace.output_dir().is_dir());
        assert!(!workspace.source_dir().join(INPUT_FILE).exists());
        workspace.release().await
    }

    #[tokio::test]
    async fn test_prepare_writes_input_file() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());
        let request = request("print(input())").with_input("hello\n");

        let workspace = workspaces
            .prepare("exec-2", &request, Language::Python)
            .await?;

        let input = workspace.source_dir().join(INPUT_FILE);
        assert_eq!(std::fs::read_to_string(input)?, "hello\n");
        workspace.release().await
    }

    #[tokio::test]
    async fn test_java_uses_main_class_filename() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());

        let workspace = workspaces
            .prepare("exec-3", &request("class Main {}"), Language::Java)
            .await?;

        assert!(workspace.source_dir().join("Main.java").exists());
        workspace.release().await
    }

    #[tokio::test]
    async fn test_release_removes_tree() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());
        let workspace = workspaces
            .prepare("exec-4", &request("print(1)"), Language::Python)
            .await?;
        let dir = workspace.root_dir().to_path_buf();
        assert!(dir.exists());

        workspace.release().await?;
        assert!(!dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_removes_tree() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());
        let workspace = workspaces
            .prepare("exec-5", &request("print(1)"), Language::Python)
            .await?;
        let dir = workspace.root_dir().to_path_buf();

        drop(workspace);
        assert!(!dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_id_is_refused() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());
        let first = workspaces
            .prepare("exec-6", &request("print(1)"), Language::Python)
            .await?;

        let second = workspaces
            .prepare("exec-6", &request("print(2)"), Language::Python)
            .await;
        assert!(matches!(second, Err(Error::Sandbox(_))));
        // The failed attempt must not have removed the live workspace.
        assert!(first.root_dir().exists());
        first.release().await
    }

    #[tokio::test]
    async fn test_output_artifact() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let workspaces = ExecutionWorkspace::new(temp.path());
        let workspace = workspaces
            .prepare("exec-7", &request("print(1)"), Language::Python)
            .await?;
        assert_eq!(workspace.output_artifact().await, None);

        std::fs::write(workspace.output_dir().join(OUTPUT_ARTIFACT), "42\n")?;
        assert_eq!(workspace.output_artifact().await.as_deref(), Some("42"));
        workspace.release().await
    }
}
