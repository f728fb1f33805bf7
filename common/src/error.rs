use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Failures of the coherence protocol and its collaborators.
///
/// Every variant carries plain strings so the server can send the error back
/// to the caller unchanged inside [`crate::CacheMessage::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CacheError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("client <{identity}> does not own file <{filename}>")]
    NotOwner { identity: String, filename: String },

    #[error("file <{0}> has never been fetched")]
    UnknownFile(String),

    #[error("callback to client <{identity}> failed: {reason}")]
    RemoteFailure { identity: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("i/o failure: {0}")]
    IoFailure(String),

    #[error("editor could not be launched: {0}")]
    LaunchFailure(String),

    #[error("timed out waiting for <{identity}> to release <{filename}>")]
    Timeout { identity: String, filename: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl CacheError {
    pub fn remote(identity: impl Into<String>, reason: impl ToString) -> Self {
        CacheError::RemoteFailure {
            identity: identity.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::IoFailure(e.to_string())
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Protocol(format!("malformed message: {e}"))
    }
}
