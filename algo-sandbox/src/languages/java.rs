use crate::{
    languages::{LanguageProfile, ToolCheck},
    security::{DenyRule, RiskCategory},
    types::Language,
};

pub struct JavaExecutor;

static DENYLIST: &[DenyRule] = &[
    DenyRule::new(
        RiskCategory::ProcessExecution,
        r"(?i)\bruntime\s*\.|\bprocessbuilder\b|\bsystem\s*\.\s*(exit|getenv|getproperty|setproperty|load|loadlibrary|setsecuritymanager)\b",
    ),
    DenyRule::new(
        RiskCategory::Reflection,
        r"(?i)java\.lang\.reflect|\bclass\s*\.\s*forname\b|\.getdeclared(method|field|constructor)s?\b|\bsetaccessible\b|\bmethodhandles?\b|\breflection\b",
    ),
    DenyRule::new(
        RiskCategory::DynamicEvaluation,
        r"(?i)\bscriptengine|\burlclassloader\b|\bdefineclass\b",
    ),
    DenyRule::new(
        RiskCategory::RawMemory,
        r"(?i)\bunsafe\b|\bnative\b|\bjni\b",
    ),
    DenyRule::new(
        RiskCategory::FileIo,
        r"(?i)\b(fileinputstream|fileoutputstream|filewriter|filereader|randomaccessfile)\b|java\.nio\.file",
    ),
    DenyRule::new(
        RiskCategory::NetworkIo,
        r"(?i)\b(socket|serversocket|datagramsocket|urlconnection|httpurlconnection|httpclient)\b|java\.net\.",
    ),
];

impl ToolCheck for JavaExecutor {
    fn required_tools(&self) -> Vec<&'static str> {
        vec!["javac", "java"]
    }
}

impl LanguageProfile for JavaExecutor {
    fn language(&self) -> Language {
        Language::Java
    }

    fn entry_file(&self) -> &'static str {
        "Main.java"
    }

    fn default_image(&self) -> &'static str {
        "eclipse-temurin:17-jdk"
    }

    fn command(&self, source_dir: &str, output_dir: &str) -> String {
        format!(
            "javac -d '{out}' '{src}/Main.java' && java -cp '{out}' Main",
            src = source_dir,
            out = output_dir
        )
    }

    fn denylist(&self) -> &'static [DenyRule] {
        DENYLIST
    }

    fn caps_data_segment(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{CodeSecurityGate, PatternSecurityGate};

    const HELLO: &str = r#"
        public class Main {
            public static void main(String[] args) {
                System.out.println("Hello from Java!");
            }
        }
    "#;

    #[test]
    fn test_java_command() {
        assert_eq!(
            JavaExecutor.container_command(),
            "javac -d '/output' '/workspace/Main.java' && java -cp '/output' Main"
        );
    }

    #[test]
    fn test_java_denylist() {
        let gate = PatternSecurityGate::default();
        assert!(gate.validate(HELLO, "java"));
        assert!(!gate.validate("Runtime.getRuntime().exec(\"ls\");", "java"));
        assert!(!gate.validate("new ProcessBuilder(\"sh\").start();", "java"));
        assert!(!gate.validate("System.exit(1);", "java"));
        assert!(!gate.validate("Class.forName(\"x\")", "java"));
        assert!(!gate.validate("new FileReader(\"/etc/passwd\")", "java"));
        assert!(!gate.validate("new java.net.Socket(\"h\", 80)", "java"));
    }
}
