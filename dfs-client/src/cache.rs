//! Client-side coherence state machine.
//!
//! A client works on one file at a time: opening a different file first
//! returns ownership of the current one to the server and forgets it. The
//! cached bytes live in a single local file (`cache_path`) that the editor
//! works on directly.
//!
//! Local operations (open, session end, shutdown, deferred uploads) are
//! serialized by an operation lock that may be held across network calls.
//! Server callbacks never take that lock; they only flip state under a short
//! lock that is never held across an await point, so a callback can always
//! be answered while this client is itself waiting on the server.

use crate::editor::Editor;
use crate::state::CacheState;
use async_trait::async_trait;
use common::{AccessMode, CacheError, CacheResult, ClientCallback, FileService, TransferBuffer};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Fetch(AccessMode),
    Upload,
}

/// A network transfer in progress, with the callbacks that raced it.
#[derive(Debug)]
struct InFlight {
    transfer: Transfer,
    invalidated: bool,
    release_requested: bool,
}

#[derive(Debug, Default)]
struct Local {
    filename: Option<String>,
    state: CacheState,
    in_flight: Option<InFlight>,
    // an open has succeeded and its session has not ended yet
    session: bool,
}

struct Inner {
    identity: String,
    server: Arc<dyn FileService>,
    cache_path: PathBuf,
    ops: Mutex<()>,
    local: std::sync::Mutex<Local>,
}

/// Per-client cache of the one file currently open.
#[derive(Clone)]
pub struct ClientCache {
    inner: Arc<Inner>,
}

type OpGuard<'a> = MutexGuard<'a, ()>;

impl ClientCache {
    pub fn new(
        identity: impl Into<String>,
        server: Arc<dyn FileService>,
        cache_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity: identity.into(),
                server,
                cache_path: cache_path.into(),
                ops: Mutex::new(()),
                local: std::sync::Mutex::new(Local::default()),
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn cache_path(&self) -> &Path {
        &self.inner.cache_path
    }

    pub fn state(&self) -> CacheState {
        self.local().state
    }

    pub fn filename(&self) -> Option<String> {
        self.local().filename.clone()
    }

    /// The cached bytes, or `None` while the copy is invalid.
    pub async fn read_local(&self) -> CacheResult<Option<Vec<u8>>> {
        if self.state() == CacheState::Invalid {
            return Ok(None);
        }
        Ok(Some(fs::read(&self.inner.cache_path).await?))
    }

    fn local(&self) -> std::sync::MutexGuard<'_, Local> {
        self.inner.local.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: CacheState) {
        let mut local = self.local();
        if local.state != state {
            debug!(
                "[client {}] {} -> {state}",
                self.inner.identity, local.state
            );
            local.state = state;
        }
    }

    /// Open `filename` for `mode`, fetching from the server only when the
    /// local copy cannot serve the request. A failed fetch or upload leaves the
    /// state it started from, except for what callbacks arriving meanwhile
    /// changed: an invalidated read copy stays invalid and an acknowledged
    /// writeback stays owed in `RELEASE_PENDING`.
    pub async fn open(&self, filename: &str, mode: AccessMode) -> CacheResult<()> {
        let op = self.inner.ops.lock().await;
        self.open_locked(&op, filename, mode).await?;
        self.local().session = true;
        Ok(())
    }

    async fn open_locked(
        &self,
        op: &OpGuard<'_>,
        filename: &str,
        mode: AccessMode,
    ) -> CacheResult<()> {
        let (state, current) = {
            let local = self.local();
            (local.state, local.filename.clone())
        };
        if current.as_deref() != Some(filename) {
            if state.is_owned() {
                info!(
                    "[client {}] switching to <{filename}>, returning <{}> first",
                    self.inner.identity,
                    current.as_deref().unwrap_or("-")
                );
                self.upload(op).await?;
            }
            let mut local = self.local();
            local.state = CacheState::Invalid;
            local.filename = None;
        } else if state == CacheState::ReleasePending {
            // left over from an upload that failed at session end
            self.upload(op).await?;
        }

        match (self.state(), mode) {
            (CacheState::Invalid, mode) => self.fetch(op, filename, mode).await,
            (CacheState::ReadShared, AccessMode::Read) => {
                debug!("[client {}] <{filename}> served locally", self.inner.identity);
                Ok(())
            }
            (CacheState::ReadShared, AccessMode::Write) => {
                self.fetch(op, filename, AccessMode::Write).await
            }
            (CacheState::ModifiedOwned, _) => {
                self.set_state(CacheState::WriteOwned);
                Ok(())
            }
            (CacheState::WriteOwned, _) | (CacheState::ReleasePending, _) => Ok(()),
        }
    }

    /// The edit session on the open file has ended.
    pub async fn complete_session(&self) -> CacheResult<()> {
        let op = self.inner.ops.lock().await;
        self.local().session = false;
        match self.state() {
            CacheState::ReleasePending => self.upload(&op).await,
            CacheState::WriteOwned => {
                self.set_state(CacheState::ModifiedOwned);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Open `filename`, let the user edit it, then close the session.
    /// An editor that cannot start is logged; the session still completes.
    pub async fn session(
        &self,
        filename: &str,
        mode: AccessMode,
        editor: &dyn Editor,
    ) -> CacheResult<()> {
        self.open(filename, mode).await?;
        if let Err(e) = editor.run_interactive(&self.inner.cache_path).await {
            error!("[client {}] {e}", self.inner.identity);
        }
        self.complete_session().await
    }

    /// Return any owned copy to the server before the client goes away.
    pub async fn shutdown(&self) -> CacheResult<()> {
        let op = self.inner.ops.lock().await;
        if self.state().is_owned() {
            self.upload(&op).await?;
        }
        Ok(())
    }

    async fn fetch(&self, _op: &OpGuard<'_>, filename: &str, mode: AccessMode) -> CacheResult<()> {
        loop {
            self.begin(Transfer::Fetch(mode));
            let result = match self
                .inner
                .server
                .fetch(&self.inner.identity, filename, mode)
                .await
            {
                Ok(buf) => self.install(&buf, mode).await,
                Err(e) => Err(e),
            };
            let mut local = self.local();
            let flight = local.in_flight.take();
            if let Err(e) = result {
                warn!(
                    "[client {}] open <{filename}> for {mode} failed: {e}",
                    self.inner.identity
                );
                return Err(e);
            }
            let flight = flight.ok_or_else(|| CacheError::Protocol("lost fetch marker".into()))?;
            let next = match mode {
                AccessMode::Read if flight.invalidated => {
                    info!(
                        "[client {}] <{filename}> changed while fetching, refetching",
                        self.inner.identity
                    );
                    continue;
                }
                AccessMode::Read => CacheState::ReadShared,
                AccessMode::Write if flight.release_requested => CacheState::ReleasePending,
                AccessMode::Write => CacheState::WriteOwned,
            };
            debug!("[client {}] {} -> {next}", self.inner.identity, local.state);
            local.state = next;
            local.filename = Some(filename.to_string());
            return Ok(());
        }
    }

    /// Push the local copy to the server, giving up ownership.
    async fn upload(&self, _op: &OpGuard<'_>) -> CacheResult<()> {
        let filename = self
            .filename()
            .ok_or_else(|| CacheError::Protocol("no file to upload".into()))?;
        self.begin(Transfer::Upload);
        let result = match fs::read(&self.inner.cache_path).await {
            Ok(data) => {
                self.inner
                    .server
                    .commit(&self.inner.identity, &filename, TransferBuffer::from(data))
                    .await
            }
            Err(e) => Err(e.into()),
        };
        let mut local = self.local();
        let flight = local.in_flight.take();
        let accepted = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(
                    "[client {}] upload of <{filename}> failed: {e}",
                    self.inner.identity
                );
                // the server was promised a writeback while this upload ran
                if flight.is_some_and(|f| f.release_requested) {
                    local.state = CacheState::ReleasePending;
                }
                return Err(e);
            }
        };
        let invalidated = flight.is_some_and(|f| f.invalidated);
        let next = if !accepted {
            warn!(
                "[client {}] server did not accept <{filename}>, dropping local copy",
                self.inner.identity
            );
            CacheState::Invalid
        } else if invalidated {
            CacheState::Invalid
        } else {
            CacheState::ReadShared
        };
        info!(
            "[client {}] uploaded <{filename}>, {} -> {next}",
            self.inner.identity, local.state
        );
        local.state = next;
        Ok(())
    }

    fn begin(&self, transfer: Transfer) {
        self.local().in_flight = Some(InFlight {
            transfer,
            invalidated: false,
            release_requested: false,
        });
    }

    /// Write fetched bytes to the cached file, read-only unless opened for write.
    async fn install(&self, buf: &TransferBuffer, mode: AccessMode) -> CacheResult<()> {
        let path = &self.inner.cache_path;
        if let Ok(meta) = fs::metadata(path).await {
            let mut perms = meta.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                fs::set_permissions(path, perms).await?;
            }
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(path, buf.as_bytes()).await?;
        let mut perms = fs::metadata(path).await?.permissions();
        perms.set_readonly(mode == AccessMode::Read);
        fs::set_permissions(path, perms).await?;
        Ok(())
    }

    /// Deferred write-back requested while the session was already over.
    /// A failed upload leaves the release owed; the server's next request
    /// retries it.
    async fn release_in_background(self) {
        let op = self.inner.ops.lock().await;
        let (state, session) = {
            let local = self.local();
            (local.state, local.session)
        };
        match state {
            CacheState::ModifiedOwned | CacheState::ReleasePending if !session => {
                if let Err(e) = self.upload(&op).await {
                    error!("[client {}] writeback failed: {e}", self.inner.identity);
                    self.set_state(CacheState::ReleasePending);
                }
            }
            // a new session started before we got here
            CacheState::WriteOwned => self.set_state(CacheState::ReleasePending),
            _ => {}
        }
    }
}

#[async_trait]
impl ClientCallback for ClientCache {
    async fn invalidate(&self) -> CacheResult<bool> {
        let mut local = self.local();
        // a transfer in flight settles the bytes it brings back itself
        if let Some(flight) = local.in_flight.as_mut() {
            flight.invalidated = true;
        }
        let applied = local.state == CacheState::ReadShared;
        if applied {
            local.state = CacheState::Invalid;
        }
        info!(
            "[client {}] invalidate -> {} ({})",
            self.inner.identity,
            local.state,
            if applied { "applied" } else { "ignored" }
        );
        Ok(applied)
    }

    async fn request_writeback(&self) -> CacheResult<bool> {
        let mut local = self.local();
        if let Some(flight) = local.in_flight.as_mut() {
            match flight.transfer {
                Transfer::Fetch(AccessMode::Write) => {
                    flight.release_requested = true;
                    return Ok(true);
                }
                Transfer::Upload => {
                    flight.release_requested = true;
                    return Ok(true);
                }
                Transfer::Fetch(AccessMode::Read) => {}
            }
        }
        let acknowledged = match local.state {
            CacheState::WriteOwned => {
                local.state = CacheState::ReleasePending;
                true
            }
            CacheState::ReleasePending if local.session => true,
            CacheState::ReleasePending | CacheState::ModifiedOwned => {
                tokio::spawn(self.clone().release_in_background());
                true
            }
            CacheState::Invalid | CacheState::ReadShared => false,
        };
        info!(
            "[client {}] writeback requested in {} ({})",
            self.inner.identity,
            local.state,
            if acknowledged { "acknowledged" } else { "not owner" }
        );
        Ok(acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted server: hands out `content`, records commits.
    #[derive(Default)]
    struct FakeServer {
        content: std::sync::Mutex<Vec<u8>>,
        fetches: AtomicUsize,
        commits: std::sync::Mutex<Vec<Vec<u8>>>,
        fail_fetch: AtomicBool,
        reject_commits: AtomicBool,
        // commits that fail with a transport error before one goes through
        failing_commits: AtomicUsize,
        // called back in the middle of the first fetch
        racer: std::sync::Mutex<Option<ClientCache>>,
        racer_answer: std::sync::Mutex<Option<bool>>,
        // asked for a writeback in the middle of every commit
        commit_racer: std::sync::Mutex<Option<ClientCache>>,
    }

    impl FakeServer {
        fn with(content: &[u8]) -> Arc<Self> {
            let s = Self::default();
            *s.content.lock().unwrap() = content.to_vec();
            Arc::new(s)
        }
    }

    #[async_trait]
    impl FileService for FakeServer {
        async fn fetch(
            &self,
            _identity: &str,
            filename: &str,
            mode: AccessMode,
        ) -> CacheResult<TransferBuffer> {
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(CacheError::FileNotFound(filename.to_string()));
            }
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            let snapshot = self.content.lock().unwrap().clone();
            let racer = self.racer.lock().unwrap().clone();
            if n == 0 {
                if let Some(client) = racer {
                    let answer = match mode {
                        AccessMode::Read => client.invalidate().await.unwrap(),
                        AccessMode::Write => client.request_writeback().await.unwrap(),
                    };
                    *self.racer_answer.lock().unwrap() = Some(answer);
                    *self.content.lock().unwrap() = b"newer".to_vec();
                }
            }
            Ok(TransferBuffer::from(snapshot))
        }

        async fn commit(
            &self,
            _identity: &str,
            _filename: &str,
            buffer: TransferBuffer,
        ) -> CacheResult<bool> {
            let racer = self.commit_racer.lock().unwrap().clone();
            if let Some(client) = racer {
                assert!(client.request_writeback().await.unwrap());
            }
            if self.failing_commits.load(Ordering::SeqCst) > 0 {
                self.failing_commits.fetch_sub(1, Ordering::SeqCst);
                return Err(CacheError::Transport("link dropped".into()));
            }
            self.commits.lock().unwrap().push(buffer.as_bytes().to_vec());
            Ok(!self.reject_commits.load(Ordering::SeqCst))
        }
    }

    fn client(server: Arc<FakeServer>) -> (ClientCache, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ClientCache::new("me", server, tmp.path().join("cached.txt"));
        (cache, tmp)
    }

    #[tokio::test]
    async fn read_open_fetches_once() {
        let server = FakeServer::with(b"hello");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Read).await.unwrap();
        c.open("a.txt", AccessMode::Read).await.unwrap();
        assert_eq!(server.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(c.state(), CacheState::ReadShared);
        assert_eq!(c.read_local().await.unwrap().unwrap(), b"hello");
        let perms = std::fs::metadata(c.cache_path()).unwrap().permissions();
        assert!(perms.readonly());
    }

    #[tokio::test]
    async fn write_session_lifecycle() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Read).await.unwrap();
        c.open("a.txt", AccessMode::Write).await.unwrap();
        assert_eq!(c.state(), CacheState::WriteOwned);
        assert_eq!(server.fetches.load(Ordering::SeqCst), 2);

        std::fs::write(c.cache_path(), b"v1").unwrap();
        c.complete_session().await.unwrap();
        assert_eq!(c.state(), CacheState::ModifiedOwned);

        // reopening an owned copy needs no network
        c.open("a.txt", AccessMode::Write).await.unwrap();
        assert_eq!(c.state(), CacheState::WriteOwned);
        assert_eq!(server.fetches.load(Ordering::SeqCst), 2);
        assert!(server.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn switching_files_returns_the_owned_one() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        std::fs::write(c.cache_path(), b"edited a").unwrap();
        c.complete_session().await.unwrap();

        c.open("b.txt", AccessMode::Read).await.unwrap();
        assert_eq!(*server.commits.lock().unwrap(), vec![b"edited a".to_vec()]);
        assert_eq!(c.filename().as_deref(), Some("b.txt"));
        assert_eq!(c.state(), CacheState::ReadShared);
    }

    #[tokio::test]
    async fn switching_from_a_read_copy_refetches() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Read).await.unwrap();
        c.open("b.txt", AccessMode::Read).await.unwrap();
        assert_eq!(server.fetches.load(Ordering::SeqCst), 2);
        assert!(server.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_state_alone() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Read).await.unwrap();
        server.fail_fetch.store(true, Ordering::SeqCst);

        let err = c.open("a.txt", AccessMode::Write).await.unwrap_err();
        assert!(matches!(err, CacheError::FileNotFound(_)));
        assert_eq!(c.state(), CacheState::ReadShared);
        assert_eq!(c.filename().as_deref(), Some("a.txt"));
    }

    #[tokio::test]
    async fn invalidate_only_applies_to_read_copies() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server);
        assert!(!c.invalidate().await.unwrap());

        c.open("a.txt", AccessMode::Read).await.unwrap();
        assert!(c.invalidate().await.unwrap());
        assert_eq!(c.state(), CacheState::Invalid);
        assert_eq!(c.read_local().await.unwrap(), None);

        c.open("a.txt", AccessMode::Write).await.unwrap();
        assert!(!c.invalidate().await.unwrap());
        assert_eq!(c.state(), CacheState::WriteOwned);
    }

    #[tokio::test]
    async fn writeback_outside_ownership_is_declined() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        assert!(!c.request_writeback().await.unwrap());
        c.open("a.txt", AccessMode::Read).await.unwrap();
        assert!(!c.request_writeback().await.unwrap());
        assert_eq!(c.state(), CacheState::ReadShared);
    }

    #[tokio::test]
    async fn writeback_mid_session_waits_for_session_end() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        std::fs::write(c.cache_path(), b"half").unwrap();

        assert!(c.request_writeback().await.unwrap());
        assert_eq!(c.state(), CacheState::ReleasePending);
        assert!(server.commits.lock().unwrap().is_empty());

        std::fs::write(c.cache_path(), b"whole").unwrap();
        c.complete_session().await.unwrap();
        assert_eq!(*server.commits.lock().unwrap(), vec![b"whole".to_vec()]);
        assert_eq!(c.state(), CacheState::ReadShared);
    }

    #[tokio::test]
    async fn writeback_after_session_uploads_in_background() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        std::fs::write(c.cache_path(), b"done").unwrap();
        c.complete_session().await.unwrap();

        assert!(c.request_writeback().await.unwrap());
        for _ in 0..200 {
            if c.state() == CacheState::ReadShared {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(c.state(), CacheState::ReadShared);
        assert_eq!(*server.commits.lock().unwrap(), vec![b"done".to_vec()]);
    }

    #[tokio::test]
    async fn rejected_upload_drops_the_copy() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        c.complete_session().await.unwrap();
        server.reject_commits.store(true, Ordering::SeqCst);

        c.shutdown().await.unwrap();
        assert_eq!(c.state(), CacheState::Invalid);
    }

    #[tokio::test]
    async fn invalidation_during_read_fetch_refetches() {
        let server = FakeServer::with(b"stale");
        let (c, _tmp) = client(server.clone());
        *server.racer.lock().unwrap() = Some(c.clone());

        c.open("a.txt", AccessMode::Read).await.unwrap();
        assert_eq!(server.fetches.load(Ordering::SeqCst), 2);
        // nothing was dropped yet, the fetch itself picked up the change
        assert_eq!(*server.racer_answer.lock().unwrap(), Some(false));
        assert_eq!(c.state(), CacheState::ReadShared);
        assert_eq!(c.read_local().await.unwrap().unwrap(), b"newer");
    }

    #[tokio::test]
    async fn writeback_during_write_fetch_is_deferred() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        *server.racer.lock().unwrap() = Some(c.clone());

        c.open("a.txt", AccessMode::Write).await.unwrap();
        assert_eq!(*server.racer_answer.lock().unwrap(), Some(true));
        assert_eq!(c.state(), CacheState::ReleasePending);
        c.complete_session().await.unwrap();
        assert_eq!(server.commits.lock().unwrap().len(), 1);
        assert_eq!(c.state(), CacheState::ReadShared);
    }

    async fn wait_for_state(c: &ClientCache, state: CacheState) {
        for _ in 0..200 {
            if c.state() == state {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("client stuck in {}", c.state());
    }

    #[tokio::test]
    async fn failed_background_writeback_is_retried_when_asked_again() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        std::fs::write(c.cache_path(), b"done").unwrap();
        c.complete_session().await.unwrap();
        server.failing_commits.store(1, Ordering::SeqCst);

        assert!(c.request_writeback().await.unwrap());
        wait_for_state(&c, CacheState::ReleasePending).await;
        assert!(server.commits.lock().unwrap().is_empty());

        assert!(c.request_writeback().await.unwrap());
        wait_for_state(&c, CacheState::ReadShared).await;
        assert_eq!(*server.commits.lock().unwrap(), vec![b"done".to_vec()]);
    }

    #[tokio::test]
    async fn failed_upload_at_session_end_stays_owed() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        assert!(c.request_writeback().await.unwrap());
        std::fs::write(c.cache_path(), b"final").unwrap();
        server.failing_commits.store(1, Ordering::SeqCst);

        let err = c.complete_session().await.unwrap_err();
        assert!(matches!(err, CacheError::Transport(_)));
        assert_eq!(c.state(), CacheState::ReleasePending);

        // the session is over, so the next request uploads right away
        assert!(c.request_writeback().await.unwrap());
        wait_for_state(&c, CacheState::ReadShared).await;
        assert_eq!(*server.commits.lock().unwrap(), vec![b"final".to_vec()]);
    }

    #[tokio::test]
    async fn writeback_acknowledged_during_a_failed_upload_is_kept() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server.clone());
        c.open("a.txt", AccessMode::Write).await.unwrap();
        c.complete_session().await.unwrap();
        *server.commit_racer.lock().unwrap() = Some(c.clone());
        server.failing_commits.store(1, Ordering::SeqCst);

        assert!(c.shutdown().await.is_err());
        assert_eq!(c.state(), CacheState::ReleasePending);

        *server.commit_racer.lock().unwrap() = None;
        assert!(c.request_writeback().await.unwrap());
        wait_for_state(&c, CacheState::ReadShared).await;
        assert_eq!(server.commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_reports_only_dropped_copies() {
        let server = FakeServer::with(b"v0");
        let (c, _tmp) = client(server);
        c.open("a.txt", AccessMode::Write).await.unwrap();
        c.begin(Transfer::Upload);
        assert!(!c.invalidate().await.unwrap());
        assert_eq!(c.state(), CacheState::WriteOwned);
    }
}
