use common::{CacheError, CacheResult, ClientCallback};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// The server's reference to one remote client.
///
/// Two handles are the same client iff their identities match; the callback
/// behind them is irrelevant to equality.
#[derive(Clone)]
pub struct ClientHandle {
    identity: Arc<str>,
    callback: Arc<dyn ClientCallback>,
}

impl ClientHandle {
    pub fn new(identity: &str, callback: Arc<dyn ClientCallback>) -> Self {
        Self {
            identity: Arc::from(identity),
            callback,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn invalidate(&self) -> CacheResult<bool> {
        self.callback
            .invalidate()
            .await
            .map_err(|e| self.as_remote_failure(e))
    }

    pub async fn request_writeback(&self) -> CacheResult<bool> {
        self.callback
            .request_writeback()
            .await
            .map_err(|e| self.as_remote_failure(e))
    }

    fn as_remote_failure(&self, e: CacheError) -> CacheError {
        match e {
            e @ CacheError::RemoteFailure { .. } => e,
            other => CacheError::remote(self.identity(), other),
        }
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientHandle({})", self.identity)
    }
}

/// Turns a client identity into something the server can call back.
pub trait ClientConnector: Send + Sync {
    fn connect(&self, identity: &str) -> CacheResult<Arc<dyn ClientCallback>>;
}

/// Connector for clients living in the same process as the server.
#[derive(Default)]
pub struct InProcessDirectory {
    clients: Mutex<HashMap<String, Arc<dyn ClientCallback>>>,
}

impl InProcessDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: &str, callback: Arc<dyn ClientCallback>) {
        self.lock().insert(identity.to_string(), callback);
    }

    pub fn unregister(&self, identity: &str) {
        self.lock().remove(identity);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn ClientCallback>>> {
        // The map holds no invariant a panicking writer could break.
        self.clients.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ClientConnector for InProcessDirectory {
    fn connect(&self, identity: &str) -> CacheResult<Arc<dyn ClientCallback>> {
        self.lock()
            .get(identity)
            .cloned()
            .ok_or_else(|| CacheError::remote(identity, "client is not registered"))
    }
}
