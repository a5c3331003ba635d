use crate::{
    languages::{cpp::NATIVE_DENYLIST, LanguageProfile, ToolCheck},
    security::DenyRule,
    types::Language,
};

pub struct CExecutor;

impl ToolCheck for CExecutor {
    fn required_tools(&self) -> Vec<&'static str> {
        vec!["gcc"]
    }
}

impl LanguageProfile for CExecutor {
    fn language(&self) -> Language {
        Language::C
    }

    fn entry_file(&self) -> &'static str {
        "main.c"
    }

    fn default_image(&self) -> &'static str {
        "gcc:13"
    }

    fn command(&self, source_dir: &str, output_dir: &str) -> String {
        format!(
            "gcc -O2 -std=c11 -o '{out}/main' '{src}/main.c' -lm && '{out}/main'",
            src = source_dir,
            out = output_dir
        )
    }

    fn denylist(&self) -> &'static [DenyRule] {
        NATIVE_DENYLIST
    }
}
