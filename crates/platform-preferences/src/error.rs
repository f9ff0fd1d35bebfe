use thiserror::Error;

use crate::backend::Scope;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("malformed preference file {path}: {detail}")]
    Malformed { path: String, detail: String },
    #[error("{0} scope is read-only")]
    ReadOnlyScope(Scope),
    #[error("{key} in {domain} is centrally managed")]
    CentrallyManaged { domain: String, key: String },
}
