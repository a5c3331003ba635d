use crate::{
    languages::{LanguageProfile, ToolCheck},
    security::{DenyRule, RiskCategory},
    types::Language,
};

pub struct PythonExecutor;

static DENYLIST: &[DenyRule] = &[
    DenyRule::new(
        RiskCategory::DangerousImport,
        r"(?i)\b(import|from)\s+(os|sys|subprocess|shutil|importlib|ctypes|socket|urllib|requests|pickle|marshal|multiprocessing|signal|pty|builtins)\b",
    ),
    DenyRule::new(
        RiskCategory::DynamicEvaluation,
        r"(?i)\b(exec|eval|compile|__import__)\s*\(",
    ),
    DenyRule::new(RiskCategory::FileIo, r"(?i)\b(open|file)\s*\("),
    DenyRule::new(
        RiskCategory::Reflection,
        r"(?i)\b(getattr|setattr|delattr|globals|locals|vars|dir|type)\s*\(",
    ),
    DenyRule::new(
        RiskCategory::Reflection,
        r"__(subclasses|bases|mro|class|dict|globals|builtins|code)__",
    ),
];

impl ToolCheck for PythonExecutor {
    fn required_tools(&self) -> Vec<&'static str> {
        vec!["python3"]
    }
}

impl LanguageProfile for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn entry_file(&self) -> &'static str {
        "main.py"
    }

    fn default_image(&self) -> &'static str {
        "python:3.11-slim"
    }

    fn command(&self, source_dir: &str, _output_dir: &str) -> String {
        // -B: the source mount is read-only, never try to write .pyc files
        format!("python3 -B '{}/main.py'", source_dir)
    }

    fn denylist(&self) -> &'static [DenyRule] {
        DENYLIST
    }
}
