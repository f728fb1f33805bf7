use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable file contents moved between server and clients.
///
/// Backed by [`Bytes`], so cloning a buffer (e.g. handing the same content to
/// several readers) never copies the payload.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBuffer {
    bytes: Bytes,
}

impl TransferBuffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl From<Vec<u8>> for TransferBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&'static [u8]> for TransferBuffer {
    fn from(v: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(v))
    }
}

impl AsRef<[u8]> for TransferBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// Contents can be large; print the size only.
impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferBuffer({} bytes)", self.bytes.len())
    }
}
