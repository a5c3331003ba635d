use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Algorithm not found: {0}")]
    AlgorithmNotFound(i64),

    #[error("Code rejected by security gate: {0}")]
    UnsafeCode(String),

    #[error("Execution queue is full ({0} pending)")]
    QueueFull(usize),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
