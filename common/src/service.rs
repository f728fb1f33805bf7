use crate::buffer::TransferBuffer;
use crate::error::CacheResult;
use crate::protocol::AccessMode;
use async_trait::async_trait;

/// Requests a client sends to the file server.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Open `filename` for `mode` on behalf of `identity` and return the
    /// authoritative contents.
    async fn fetch(
        &self,
        identity: &str,
        filename: &str,
        mode: AccessMode,
    ) -> CacheResult<TransferBuffer>;

    /// Push modified contents back, ending `identity`'s ownership.
    /// `Ok(false)` means the server had no owner and nothing changed.
    async fn commit(
        &self,
        identity: &str,
        filename: &str,
        buffer: TransferBuffer,
    ) -> CacheResult<bool>;
}

/// Callbacks the file server issues to a client.
#[async_trait]
pub trait ClientCallback: Send + Sync {
    /// The client's read-only copy is stale. Returns whether the client
    /// actually dropped a copy.
    async fn invalidate(&self) -> CacheResult<bool>;

    /// The server wants the client to give up ownership. Returns whether the
    /// client acknowledged; the release itself arrives later as a commit.
    async fn request_writeback(&self) -> CacheResult<bool>;
}
