//! Per-file coherence state and the ownership-transfer protocol.
//!
//! A [`FileCacheEntry`] keeps the authoritative bytes of one file together with
//! the set of clients holding a read-only copy and the single client, if any,
//! holding write ownership. All reader/owner mutations happen under the
//! entry's lock. Remote calls made while the lock is held (reader
//! invalidation) only ever touch client-local state, never this entry, so they
//! cannot wait on the lock they run under.

use crate::handle::ClientHandle;
use crate::store::BackingStore;
use bytes::Bytes;
use common::{CacheError, CacheResult, TransferBuffer};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often a waiting writer repeats its writeback request by default.
pub const DEFAULT_WRITEBACK_RETRY: Duration = Duration::from_secs(1);

/// Knobs that decide how strictly an entry enforces the protocol.
#[derive(Debug, Clone, Copy)]
pub struct EntryPolicy {
    /// Bound on how long a write fetch waits for the current owner to
    /// release. `None` waits forever.
    pub writeback_timeout: Option<Duration>,
    /// Interval at which a waiting write fetch asks the owner again. An
    /// owner whose upload failed only retries when asked.
    pub writeback_retry: Duration,
    /// Accept commits from clients other than the recorded owner.
    pub permissive_commits: bool,
}

impl Default for EntryPolicy {
    fn default() -> Self {
        Self {
            writeback_timeout: None,
            writeback_retry: DEFAULT_WRITEBACK_RETRY,
            permissive_commits: false,
        }
    }
}

struct EntryState {
    content: Bytes,
    readers: VecDeque<ClientHandle>,
    owner: Option<ClientHandle>,
    // bumped on every accepted update, orders the background disk writes
    version: u64,
}

impl EntryState {
    fn remove_reader(&mut self, identity: &str) -> bool {
        let before = self.readers.len();
        self.readers.retain(|r| r.identity() != identity);
        self.readers.len() != before
    }

    fn buffer(&self) -> TransferBuffer {
        TransferBuffer::new(self.content.clone())
    }
}

pub struct FileCacheEntry {
    name: String,
    state: Mutex<EntryState>,
    released: Notify,
    store: Arc<dyn BackingStore>,
    // last version written to the store
    persisted: Arc<Mutex<u64>>,
    policy: EntryPolicy,
}

/// Result of [`FileCacheEntry::update`].
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Nobody owned the file; nothing changed.
    Rejected,
    /// Contents replaced; the disk write runs in the background.
    Accepted(Persist),
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted(_))
    }
}

/// Handle on the background write of one accepted update.
#[derive(Debug)]
pub struct Persist(JoinHandle<CacheResult<()>>);

impl Persist {
    /// Wait for the write to reach the backing store.
    pub async fn wait(self) -> CacheResult<()> {
        self.0
            .await
            .map_err(|e| CacheError::IoFailure(format!("persist task failed: {e}")))?
    }
}

impl FileCacheEntry {
    pub fn new(
        name: impl Into<String>,
        content: Bytes,
        store: Arc<dyn BackingStore>,
        policy: EntryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(EntryState {
                content,
                readers: VecDeque::new(),
                owner: None,
                version: 0,
            }),
            released: Notify::new(),
            store,
            persisted: Arc::new(Mutex::new(0)),
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `client` as a reader and return the current contents.
    ///
    /// The owner opening its own file for read stays owner and is not added
    /// to the reader set.
    pub async fn fetch_for_read(&self, client: ClientHandle) -> TransferBuffer {
        let mut st = self.state.lock().await;
        let is_owner = st.owner.as_ref() == Some(&client);
        if !is_owner && !st.readers.contains(&client) {
            debug!("[entry {}] new reader <{}>", self.name, client.identity());
            st.readers.push_back(client);
        }
        st.buffer()
    }

    /// Make `client` the exclusive owner and return the current contents.
    ///
    /// While another client owns the file, it is asked to write back and the
    /// caller waits until a commit clears the owner, asking again every
    /// `writeback_retry`. An unreachable owner aborts the request with
    /// `RemoteFailure`. A caller that already reads the file stays registered
    /// as a reader until ownership is granted, so a failed upgrade still
    /// leaves it reachable by invalidations.
    pub async fn fetch_for_write(&self, client: ClientHandle) -> CacheResult<TransferBuffer> {
        let deadline = self
            .policy
            .writeback_timeout
            .map(|limit| Instant::now() + limit);
        loop {
            // Created before the owner check so a release between dropping the
            // lock and awaiting is not missed.
            let released = self.released.notified();
            tokio::pin!(released);

            let current = {
                let mut st = self.state.lock().await;
                match &st.owner {
                    Some(owner) if *owner == client => {
                        debug!(
                            "[entry {}] <{}> already owns the file",
                            self.name,
                            client.identity()
                        );
                        return Ok(st.buffer());
                    }
                    Some(owner) => {
                        released.as_mut().enable();
                        owner.clone()
                    }
                    None => {
                        st.remove_reader(client.identity());
                        info!("[entry {}] ownership granted to <{}>", self.name, client.identity());
                        st.owner = Some(client);
                        return Ok(st.buffer());
                    }
                }
            };

            info!(
                "[entry {}] <{}> waiting for writeback from <{}>",
                self.name,
                client.identity(),
                current.identity()
            );
            match current.request_writeback().await {
                Ok(true) => {}
                Ok(false) => warn!(
                    "[entry {}] <{}> declined the writeback request, still waiting",
                    self.name,
                    current.identity()
                ),
                Err(e) => {
                    error!(
                        "[entry {}] writeback request to <{}> failed: {e}",
                        self.name,
                        current.identity()
                    );
                    return Err(e);
                }
            }

            let wait = match deadline {
                Some(deadline) => self
                    .policy
                    .writeback_retry
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.policy.writeback_retry,
            };
            if tokio::time::timeout(wait, released).await.is_err() {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!(
                        "[entry {}] gave up on <{}> after {:?}",
                        self.name,
                        current.identity(),
                        self.policy.writeback_timeout.unwrap_or_default()
                    );
                    return Err(CacheError::Timeout {
                        identity: current.identity().to_string(),
                        filename: self.name.clone(),
                    });
                }
                debug!(
                    "[entry {}] <{}> has not released yet, asking again",
                    self.name,
                    current.identity()
                );
            }
        }
    }

    /// Accept new contents from the owner.
    ///
    /// Every reader is invalidated before the owner is cleared; the former
    /// owner becomes a reader of what it wrote. The disk write is dispatched
    /// off the lock and never rolls back the in-memory state.
    pub async fn update(&self, identity: &str, content: Bytes) -> CacheResult<UpdateOutcome> {
        let mut st = self.state.lock().await;
        let Some(owner) = st.owner.clone() else {
            warn!(
                "[entry {}] commit from <{identity}> ignored: file has no owner",
                self.name
            );
            return Ok(UpdateOutcome::Rejected);
        };
        if owner.identity() != identity {
            if !self.policy.permissive_commits {
                warn!(
                    "[entry {}] commit from <{identity}> rejected: owner is <{}>",
                    self.name,
                    owner.identity()
                );
                return Err(CacheError::NotOwner {
                    identity: identity.to_string(),
                    filename: self.name.clone(),
                });
            }
            warn!(
                "[entry {}] accepting commit from non-owner <{identity}> (owner <{}>)",
                self.name,
                owner.identity()
            );
        }

        while let Some(reader) = st.readers.pop_front() {
            info!("[entry {}] invalidating reader <{}>", self.name, reader.identity());
            if let Err(e) = reader.invalidate().await {
                error!(
                    "[entry {}] could not invalidate <{}>: {e}",
                    self.name,
                    reader.identity()
                );
                st.readers.push_front(reader);
                return Err(e);
            }
        }

        st.readers.push_back(owner);
        st.owner = None;
        st.content = content.clone();
        st.version += 1;
        let persist = self.persist(st.version, content);
        drop(st);

        info!("[entry {}] updated by <{identity}>, ownership released", self.name);
        self.released.notify_waiters();
        Ok(UpdateOutcome::Accepted(persist))
    }

    /// Forget `identity` as a reader. Returns whether it was registered.
    pub async fn remove_reader(&self, identity: &str) -> bool {
        let removed = self.state.lock().await.remove_reader(identity);
        if removed {
            debug!("[entry {}] dropped stale reader <{identity}>", self.name);
        }
        removed
    }

    pub async fn owner(&self) -> Option<String> {
        let st = self.state.lock().await;
        st.owner.as_ref().map(|o| o.identity().to_string())
    }

    pub async fn readers(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.readers.iter().map(|r| r.identity().to_string()).collect()
    }

    pub async fn contents(&self) -> TransferBuffer {
        self.state.lock().await.buffer()
    }

    fn persist(&self, version: u64, data: Bytes) -> Persist {
        let store = self.store.clone();
        let persisted = self.persisted.clone();
        let name = self.name.clone();
        Persist(tokio::spawn(async move {
            let mut last = persisted.lock().await;
            if *last >= version {
                debug!("[entry {name}] version {version} superseded on disk by {}", *last);
                return Ok(());
            }
            match store.write_whole(&name, &data).await {
                Ok(()) => {
                    *last = version;
                    Ok(())
                }
                Err(e) => {
                    error!("[entry {name}] failed to persist version {version}: {e}");
                    Err(e.into())
                }
            }
        }))
    }
}
