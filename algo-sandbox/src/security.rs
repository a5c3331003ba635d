//! Pattern-based pre-execution screening
//!
//! This is a heuristic denylist, not an analyzer: it rejects code that
//! mentions risky APIs and can be bypassed by sufficiently creative input.
//! Isolation is the container's job; the gate only avoids spending sandbox
//! time on obviously hostile submissions. A stronger analyzer can be slotted
//! in by implementing [`CodeSecurityGate`].

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

use crate::types::Language;

/// Default cap on submission size, in characters.
pub const DEFAULT_MAX_CODE_LENGTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskCategory {
    ProcessExecution,
    Reflection,
    FileIo,
    NetworkIo,
    DynamicEvaluation,
    RawMemory,
    GlobalObjectAccess,
    DangerousImport,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskCategory::ProcessExecution => "process execution",
            RiskCategory::Reflection => "reflection",
            RiskCategory::FileIo => "file I/O",
            RiskCategory::NetworkIo => "network I/O",
            RiskCategory::DynamicEvaluation => "dynamic evaluation",
            RiskCategory::RawMemory => "raw memory access",
            RiskCategory::GlobalObjectAccess => "global object access",
            RiskCategory::DangerousImport => "dangerous import",
        };
        f.write_str(name)
    }
}

/// One denylist entry: a regex source tagged with the risk it stands for.
/// Case sensitivity is set inline in the pattern.
#[derive(Debug, Clone, Copy)]
pub struct DenyRule {
    pub category: RiskCategory,
    pub pattern: &'static str,
}

impl DenyRule {
    pub const fn new(category: RiskCategory, pattern: &'static str) -> Self {
        Self { category, pattern }
    }
}

/// Used for language tags we do not recognise.
static GENERIC_DENYLIST: &[DenyRule] = &[
    DenyRule::new(
        RiskCategory::ProcessExecution,
        r"(?i)system\.|runtime\.|processbuilder|exec\s*\(",
    ),
    DenyRule::new(RiskCategory::DynamicEvaluation, r"(?i)eval\s*\(|scriptengine"),
    DenyRule::new(RiskCategory::Reflection, r"(?i)reflection"),
    DenyRule::new(RiskCategory::RawMemory, r"(?i)unsafe|jni|native"),
];

type CompiledRules = Vec<(RiskCategory, Regex)>;

fn compile(rules: &[DenyRule]) -> CompiledRules {
    rules
        .iter()
        .map(|rule| {
            let regex = Regex::new(rule.pattern)
                .unwrap_or_else(|e| panic!("invalid denylist pattern {:?}: {}", rule.pattern, e));
            (rule.category, regex)
        })
        .collect()
}

static LANGUAGE_RULES: LazyLock<HashMap<Language, CompiledRules>> = LazyLock::new(|| {
    Language::ALL
        .iter()
        .map(|language| (*language, compile(language.profile().denylist())))
        .collect()
});

static GENERIC_RULES: LazyLock<CompiledRules> = LazyLock::new(|| compile(GENERIC_DENYLIST));

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    EmptyCode,
    TooLong { length: usize, max: usize },
    Denied { category: RiskCategory },
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityViolation::EmptyCode => write!(f, "code is empty"),
            SecurityViolation::TooLong { length, max } => {
                write!(f, "code length {} exceeds limit of {} characters", length, max)
            }
            SecurityViolation::Denied { category } => {
                write!(f, "code contains a disallowed operation ({})", category)
            }
        }
    }
}

/// Pre-execution screen. Implementations must be pure and fail closed.
pub trait CodeSecurityGate: Send + Sync {
    fn screen(&self, code: &str, language: &str) -> Result<(), SecurityViolation>;

    fn validate(&self, code: &str, language: &str) -> bool {
        self.screen(code, language).is_ok()
    }
}

/// Regex denylist per language, falling back to a generic list.
#[derive(Debug, Clone)]
pub struct PatternSecurityGate {
    max_code_length: usize,
}

impl PatternSecurityGate {
    pub fn new(max_code_length: usize) -> Self {
        Self { max_code_length }
    }

    fn rules_for(language: &str) -> &'static CompiledRules {
        match language.parse::<Language>() {
            Ok(language) => &LANGUAGE_RULES[&language],
            Err(_) => &GENERIC_RULES,
        }
    }
}

impl Default for PatternSecurityGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CODE_LENGTH)
    }
}

impl CodeSecurityGate for PatternSecurityGate {
    fn screen(&self, code: &str, language: &str) -> Result<(), SecurityViolation> {
        if code.trim().is_empty() {
            warn!("Rejected {} submission: code is empty", language);
            return Err(SecurityViolation::EmptyCode);
        }

        let length = code.chars().count();
        if length > self.max_code_length {
            warn!(
                "Rejected {} submission: {} characters exceeds {}",
                language, length, self.max_code_length
            );
            return Err(SecurityViolation::TooLong {
                length,
                max: self.max_code_length,
            });
        }

        if let Some((category, _)) = Self::rules_for(language)
            .iter()
            .find(|(_, regex)| regex.is_match(code))
        {
            warn!("Rejected {} submission: {}", language, category);
            return Err(SecurityViolation::Denied {
                category: *category,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for language in Language::ALL {
            assert_eq!(
                LANGUAGE_RULES[&language].len(),
                language.profile().denylist().len()
            );
        }
        assert_eq!(GENERIC_RULES.len(), GENERIC_DENYLIST.len());
    }

    #[test]
    fn test_empty_code_rejected() {
        let gate = PatternSecurityGate::default();
        for language in ["python", "java", "cpp", "brainfuck"] {
            assert_eq!(
                gate.screen("   \n\t", language),
                Err(SecurityViolation::EmptyCode)
            );
        }
    }

    #[test]
    fn test_oversized_code_rejected_for_every_language() {
        let gate = PatternSecurityGate::default();
        let code = "x".repeat(DEFAULT_MAX_CODE_LENGTH + 1);
        for language in ["java", "python", "javascript", "cpp", "c", "ruby"] {
            assert!(!gate.validate(&code, language));
        }
        let exact = "x".repeat(DEFAULT_MAX_CODE_LENGTH);
        assert!(gate.validate(&exact, "python"));
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let gate = PatternSecurityGate::new(4);
        assert!(gate.validate("ééé#", "python"));
        assert!(!gate.validate("ééééé", "python"));
    }

    #[test]
    fn test_reports_matched_category() {
        let gate = PatternSecurityGate::default();
        assert_eq!(
            gate.screen("import socket", "python"),
            Err(SecurityViolation::Denied {
                category: RiskCategory::DangerousImport
            })
        );
    }

    #[test]
    fn test_any_match_rejects_whole_submission() {
        let gate = PatternSecurityGate::default();
        let code = "def solve(xs):\n    return sorted(xs)\n\nprint(solve([3, 1, 2]))\neval('1')";
        assert!(!gate.validate(code, "python"));
    }

    #[test]
    fn test_generic_fallback() {
        let gate = PatternSecurityGate::default();
        assert!(gate.validate("puts 1 + 1", "ruby"));
        assert!(!gate.validate("eval(\"1\")", "ruby"));
        assert!(!gate.validate("Runtime.getRuntime()", "kotlin"));
    }

    #[test]
    fn test_language_tag_is_case_insensitive() {
        let gate = PatternSecurityGate::default();
        assert!(!gate.validate("import os", "PYTHON"));
    }
}
