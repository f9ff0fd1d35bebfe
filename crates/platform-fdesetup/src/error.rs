use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("failed to launch {program}: {detail}")]
    Spawn { program: String, detail: String },
    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("property list serialization failed: {0}")]
    Plist(String),
}
