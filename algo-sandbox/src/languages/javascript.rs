use crate::{
    languages::{LanguageProfile, ToolCheck},
    security::{DenyRule, RiskCategory},
    types::Language,
};

pub struct JavaScriptExecutor;

// `Function` is matched case-sensitively so the `function` keyword passes.
static DENYLIST: &[DenyRule] = &[
    DenyRule::new(
        RiskCategory::DynamicEvaluation,
        r"(?i:\b(eval|settimeout|setinterval|setimmediate)\s*\()|\bFunction\s*\(|\bnew\s+Function\b",
    ),
    DenyRule::new(
        RiskCategory::ProcessExecution,
        r"(?im)\b(require|import|exec)\s*\(|^\s*import\s|child_process|\bprocess\s*\.\s*(binding|dlopen|kill|exit|env|chdir|mainmodule|execpath)\b",
    ),
    DenyRule::new(
        RiskCategory::GlobalObjectAccess,
        r"(?i)\b(window|document|location|history|navigator|globalthis|global)\s*\.",
    ),
];

impl ToolCheck for JavaScriptExecutor {
    fn required_tools(&self) -> Vec<&'static str> {
        vec!["node"]
    }
}

impl LanguageProfile for JavaScriptExecutor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn entry_file(&self) -> &'static str {
        "main.js"
    }

    fn default_image(&self) -> &'static str {
        "node:20-slim"
    }

    fn command(&self, source_dir: &str, _output_dir: &str) -> String {
        format!("node '{}/main.js'", source_dir)
    }

    fn denylist(&self) -> &'static [DenyRule] {
        DENYLIST
    }

    fn caps_data_segment(&self) -> bool {
        false
    }
}
