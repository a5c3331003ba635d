//! Language-specific execution profiles
//!
//! Each supported language is a unit struct implementing [`LanguageProfile`].
//! Dispatch goes through [`Language::profile`](crate::Language::profile), so
//! adding a language means adding a file here and one match arm there.

mod c;
mod cpp;
mod java;
mod javascript;
mod python;

pub use c::CExecutor;
pub use cpp::CppExecutor;
pub use java::JavaExecutor;
pub use javascript::JavaScriptExecutor;
pub use python::PythonExecutor;

use crate::{error::Error, security::DenyRule, types::Language};
use which::which;

/// Mount point of the read-only source directory inside a container.
pub const CONTAINER_SOURCE_DIR: &str = "/workspace";
/// Mount point of the writable build/output directory inside a container.
pub const CONTAINER_OUTPUT_DIR: &str = "/output";

/// Static behaviour of one language.
pub trait LanguageProfile: ToolCheck + Send + Sync {
    fn language(&self) -> Language;

    /// Canonical source filename. Fixed per language so commands are static.
    fn entry_file(&self) -> &'static str;

    /// Image used when the config has no override.
    fn default_image(&self) -> &'static str;

    /// Shell command that compiles (if needed) and runs the entry file found
    /// in `source_dir`, writing build artifacts to `output_dir`.
    fn command(&self, source_dir: &str, output_dir: &str) -> String;

    /// Command line used inside a container.
    fn container_command(&self) -> String {
        self.command(CONTAINER_SOURCE_DIR, CONTAINER_OUTPUT_DIR)
    }

    /// Patterns that reject a submission outright.
    fn denylist(&self) -> &'static [DenyRule];

    /// Whether the process runtime may cap the data segment at the request's
    /// memory limit. VM runtimes that commit their heap at startup cannot
    /// start under small caps.
    fn caps_data_segment(&self) -> bool {
        true
    }
}

pub trait ToolCheck {
    /// Binaries a host needs to run this language without a container.
    fn required_tools(&self) -> Vec<&'static str>;

    fn check_tools(&self) -> Result<(), Error> {
        let missing: Vec<_> = self
            .required_tools()
            .iter()
            .filter(|tool| which(tool).is_err())
            .map(|s| (*s).to_string())
            .collect();

        if !missing.is_empty() {
            return Err(Error::System(format!(
                "Missing required tools: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
