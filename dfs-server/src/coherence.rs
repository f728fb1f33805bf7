//! Process-wide registry of coherence entries and request dispatch.

use crate::entry::{EntryPolicy, FileCacheEntry, UpdateOutcome};
use crate::handle::{ClientConnector, ClientHandle};
use crate::store::BackingStore;
use async_trait::async_trait;
use common::{AccessMode, CacheError, CacheResult, FileService, TransferBuffer};
use log::{debug, info};
use moka::future::Cache;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

/// Owns one [`FileCacheEntry`] per file name for as long as the server lives.
///
/// Entries are created lazily from the backing store on first fetch and are
/// never evicted. Requests for different files only meet at the registry
/// lookup; everything else serializes on the per-file entry.
pub struct CoherenceServer {
    store: Arc<dyn BackingStore>,
    connector: Arc<dyn ClientConnector>,
    // unbounded: entries live for the whole process
    entries: Cache<String, Arc<FileCacheEntry>>,
    handles: Mutex<HashMap<String, ClientHandle>>,
    policy: EntryPolicy,
}

impl CoherenceServer {
    pub fn new(
        store: Arc<dyn BackingStore>,
        connector: Arc<dyn ClientConnector>,
        policy: EntryPolicy,
    ) -> Self {
        Self {
            store,
            connector,
            entries: Cache::builder().build(),
            handles: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// The entry for `filename`, if some client has fetched it.
    pub async fn entry(&self, filename: &str) -> Option<Arc<FileCacheEntry>> {
        self.entries.get(filename).await
    }

    /// Number of files currently tracked.
    pub fn tracked_files(&self) -> usize {
        self.entries.iter().count()
    }

    async fn load_entry(&self, filename: &str) -> CacheResult<Arc<FileCacheEntry>> {
        let store = self.store.clone();
        let policy = self.policy;
        let name = filename.to_string();
        self.entries
            .try_get_with(filename.to_string(), async move {
                let content = store
                    .read_whole(&name)
                    .await
                    .map_err(|e| read_error(&name, e))?;
                info!("[coherence] caching <{name}> ({} bytes)", content.len());
                Ok::<_, CacheError>(Arc::new(FileCacheEntry::new(name, content, store, policy)))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    fn handle(&self, identity: &str) -> CacheResult<ClientHandle> {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(h) = handles.get(identity) {
            return Ok(h.clone());
        }
        let handle = ClientHandle::new(identity, self.connector.connect(identity)?);
        handles.insert(identity.to_string(), handle.clone());
        Ok(handle)
    }

    /// A client holds at most one open file: fetching `filename` drops its
    /// reader registrations everywhere else.
    async fn forget_other_reads(&self, identity: &str, filename: &str) {
        let others: Vec<_> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() != filename)
            .map(|(_, entry)| entry)
            .collect();
        for entry in others {
            entry.remove_reader(identity).await;
        }
    }

    /// Like [`FileService::commit`], but hands back the background persist
    /// task for callers that need durability confirmation.
    pub async fn commit_with_persist(
        &self,
        identity: &str,
        filename: &str,
        buffer: TransferBuffer,
    ) -> CacheResult<UpdateOutcome> {
        let entry = self
            .entry(filename)
            .await
            .ok_or_else(|| CacheError::UnknownFile(filename.to_string()))?;
        entry.update(identity, buffer.into_bytes()).await
    }
}

fn read_error(name: &str, e: io::Error) -> CacheError {
    match e.kind() {
        io::ErrorKind::NotFound => CacheError::FileNotFound(name.to_string()),
        io::ErrorKind::InvalidInput => CacheError::Protocol(e.to_string()),
        _ => CacheError::IoFailure(format!("reading {name}: {e}")),
    }
}

#[async_trait]
impl FileService for CoherenceServer {
    async fn fetch(
        &self,
        identity: &str,
        filename: &str,
        mode: AccessMode,
    ) -> CacheResult<TransferBuffer> {
        debug!("[coherence] fetch <{filename}> for {mode} by <{identity}>");
        self.forget_other_reads(identity, filename).await;
        let entry = self.load_entry(filename).await?;
        let client = self.handle(identity)?;
        match mode {
            AccessMode::Read => Ok(entry.fetch_for_read(client).await),
            AccessMode::Write => entry.fetch_for_write(client).await,
        }
    }

    async fn commit(
        &self,
        identity: &str,
        filename: &str,
        buffer: TransferBuffer,
    ) -> CacheResult<bool> {
        debug!(
            "[coherence] commit <{filename}> by <{identity}> ({} bytes)",
            buffer.len()
        );
        let outcome = self.commit_with_persist(identity, filename, buffer).await?;
        Ok(outcome.is_accepted())
    }
}
