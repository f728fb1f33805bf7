//! Coherence server of the distributed file cache.
//!
//! The server keeps the authoritative copy of every file, tracks which
//! clients read it and which single client may write it, and calls clients
//! back to invalidate stale copies or to ask for a write-back.

pub mod coherence;
pub mod config;
pub mod entry;
pub mod handle;
pub mod server;
pub mod store;

pub use coherence::CoherenceServer;
pub use entry::{DEFAULT_WRITEBACK_RETRY, EntryPolicy, FileCacheEntry, Persist, UpdateOutcome};
pub use handle::{ClientConnector, ClientHandle, InProcessDirectory};
pub use server::{ConnectionRegistry, serve};
pub use store::{BackingStore, InMemoryStore, LocalFsStore};
