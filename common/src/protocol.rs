use crate::buffer::TransferBuffer;
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a client wants to open a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
}

impl FromStr for AccessMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "r" | "read" => Ok(AccessMode::Read),
            "w" | "write" => Ok(AccessMode::Write),
            other => Err(CacheError::Protocol(format!(
                "invalid access mode {other:?}, expected read or write"
            ))),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CacheMessage {
    //client -> server
    Hello {
        identity: String,
    },
    Fetch {
        identity: String,
        filename: String,
        mode: AccessMode,
    },
    Commit {
        identity: String,
        filename: String,
        buffer: TransferBuffer,
    },

    //server -> client
    Invalidate,
    RequestWriteback,

    //response
    Ack,
    Contents(TransferBuffer),
    Flag(bool),
    Error(CacheError),
}

impl CacheMessage {
    /// Short name used in log lines; never includes file contents.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheMessage::Hello { .. } => "Hello",
            CacheMessage::Fetch { .. } => "Fetch",
            CacheMessage::Commit { .. } => "Commit",
            CacheMessage::Invalidate => "Invalidate",
            CacheMessage::RequestWriteback => "RequestWriteback",
            CacheMessage::Ack => "Ack",
            CacheMessage::Contents(_) => "Contents",
            CacheMessage::Flag(_) => "Flag",
            CacheMessage::Error(_) => "Error",
        }
    }

    pub fn into_contents(self) -> Result<TransferBuffer, CacheError> {
        match self {
            CacheMessage::Contents(buf) => Ok(buf),
            CacheMessage::Error(e) => Err(e),
            other => Err(unexpected(&other, "Contents")),
        }
    }

    pub fn into_flag(self) -> Result<bool, CacheError> {
        match self {
            CacheMessage::Flag(v) => Ok(v),
            CacheMessage::Error(e) => Err(e),
            other => Err(unexpected(&other, "Flag")),
        }
    }

    pub fn into_ack(self) -> Result<(), CacheError> {
        match self {
            CacheMessage::Ack => Ok(()),
            CacheMessage::Error(e) => Err(e),
            other => Err(unexpected(&other, "Ack")),
        }
    }
}

fn unexpected(msg: &CacheMessage, wanted: &str) -> CacheError {
    CacheError::Protocol(format!("expected {wanted}, got {}", msg.kind()))
}

impl From<Result<TransferBuffer, CacheError>> for CacheMessage {
    fn from(r: Result<TransferBuffer, CacheError>) -> Self {
        r.map_or_else(CacheMessage::Error, CacheMessage::Contents)
    }
}

impl From<Result<bool, CacheError>> for CacheMessage {
    fn from(r: Result<bool, CacheError>) -> Self {
        r.map_or_else(CacheMessage::Error, CacheMessage::Flag)
    }
}
