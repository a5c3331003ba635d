use crate::{
    languages::{LanguageProfile, ToolCheck},
    security::{DenyRule, RiskCategory},
    types::Language,
};

pub struct CppExecutor;

/// Shared by C and C++.
pub(crate) static NATIVE_DENYLIST: &[DenyRule] = &[
    DenyRule::new(
        RiskCategory::ProcessExecution,
        r"(?i)\b(system|exec[lv]p?e?|fork|vfork|popen|kill|ptrace|dlopen|syscall)\s*\(",
    ),
    DenyRule::new(
        RiskCategory::FileIo,
        r"(?i)\b(fopen|freopen|fwrite|open|creat|unlink)\s*\(|<fstream>|\b[io]?fstream\b",
    ),
    DenyRule::new(
        RiskCategory::NetworkIo,
        r"(?i)\b(socket|connect|bind|listen|accept)\s*\(|<sys/socket\.h>|<netinet/",
    ),
    DenyRule::new(
        RiskCategory::RawMemory,
        r"(?i)\b(malloc|calloc|realloc|free|mmap|alloca)\s*\(|\bnew\b|\bdelete\b|\breinterpret_cast\b|\b(__)?asm(__)?\b",
    ),
];

impl ToolCheck for CppExecutor {
    fn required_tools(&self) -> Vec<&'static str> {
        vec!["g++"]
    }
}

impl LanguageProfile for CppExecutor {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn entry_file(&self) -> &'static str {
        "main.cpp"
    }

    fn default_image(&self) -> &'static str {
        "gcc:13"
    }

    fn command(&self, source_dir: &str, output_dir: &str) -> String {
        format!(
            "g++ -O2 -std=c++17 -o '{out}/main' '{src}/main.cpp' && '{out}/main'",
            src = source_dir,
            out = output_dir
        )
    }

    fn denylist(&self) -> &'static [DenyRule] {
        NATIVE_DENYLIST
    }
}
