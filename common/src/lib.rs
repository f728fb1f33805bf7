//! Shared vocabulary of the distributed file cache: the payload that crosses
//! the network, the request/response messages, the error taxonomy, the two
//! RPC seams and the QUIC plumbing both sides use to exchange them.

pub mod buffer;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;

pub use buffer::TransferBuffer;
pub use error::{CacheError, CacheResult};
pub use protocol::{AccessMode, CacheMessage};
pub use service::{ClientCallback, FileService};
