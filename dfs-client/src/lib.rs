//! Caching client of the distributed file cache.

pub mod cache;
pub mod editor;
pub mod remote;
pub mod state;

pub use cache::ClientCache;
pub use editor::{CommandEditor, Editor};
pub use remote::{RemoteServer, serve_callbacks};
pub use state::CacheState;
