//! QUIC front end of the coherence server.

use crate::coherence::CoherenceServer;
use crate::handle::ClientConnector;
use async_trait::async_trait;
use common::transport::{call, read_message, write_message};
use common::{CacheError, CacheMessage, CacheResult, ClientCallback, FileService};
use log::{debug, error, info, warn};
use quinn::{Connection, Endpoint};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Connections = Arc<RwLock<HashMap<String, Connection>>>;

/// Live client connections, keyed by the identity each client announced.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    conns: Connections,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: &str, conn: Connection) {
        let mut conns = self.conns.write().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = conns.insert(identity.to_string(), conn) {
            info!("[server] <{identity}> reconnected, replacing previous connection");
            old.close(0u32.into(), b"superseded");
        }
    }

    /// Drop `conn` unless the client already reconnected on a newer one.
    pub fn unregister(&self, identity: &str, conn: &Connection) {
        let mut conns = self.conns.write().unwrap_or_else(|p| p.into_inner());
        if conns
            .get(identity)
            .is_some_and(|c| c.stable_id() == conn.stable_id())
        {
            conns.remove(identity);
        }
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        lookup(&self.conns, identity).is_some()
    }
}

fn lookup(conns: &Connections, identity: &str) -> Option<Connection> {
    conns
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .get(identity)
        .cloned()
}

impl ClientConnector for ConnectionRegistry {
    fn connect(&self, identity: &str) -> CacheResult<Arc<dyn ClientCallback>> {
        Ok(Arc::new(QuicClientCallback {
            identity: identity.to_string(),
            conns: self.conns.clone(),
        }))
    }
}

/// Calls back into a client over whatever connection it currently has open.
struct QuicClientCallback {
    identity: String,
    conns: Connections,
}

impl QuicClientCallback {
    async fn send(&self, msg: CacheMessage) -> CacheResult<bool> {
        let conn = lookup(&self.conns, &self.identity)
            .ok_or_else(|| CacheError::remote(&self.identity, "client is not connected"))?;
        call(&conn, &msg).await?.into_flag()
    }
}

#[async_trait]
impl ClientCallback for QuicClientCallback {
    async fn invalidate(&self) -> CacheResult<bool> {
        self.send(CacheMessage::Invalidate).await
    }

    async fn request_writeback(&self) -> CacheResult<bool> {
        self.send(CacheMessage::RequestWriteback).await
    }
}

/// Accept client connections until the endpoint is closed.
/// Each connection gets its own task.
pub async fn serve(
    endpoint: Endpoint,
    server: Arc<CoherenceServer>,
    registry: ConnectionRegistry,
) -> anyhow::Result<()> {
    while let Some(incoming) = endpoint.accept().await {
        let server = server.clone();
        let registry = registry.clone();
        match incoming.await {
            Ok(conn) => {
                info!("[server] connection accepted: addr={}", conn.remote_address());
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(conn, server, registry).await {
                        warn!("[server] handle_connection error: {e}");
                    }
                });
            }
            Err(e) => error!("[server] failed to establish connection: {e}"),
        }
    }
    Ok(())
}

/// Read the `Hello` handshake, then serve one request per stream.
async fn handle_connection(
    conn: Connection,
    server: Arc<CoherenceServer>,
    registry: ConnectionRegistry,
) -> CacheResult<()> {
    let (mut send, mut recv) = conn
        .accept_bi()
        .await
        .map_err(|e| CacheError::Transport(e.to_string()))?;
    let identity = match read_message(&mut recv).await? {
        CacheMessage::Hello { identity } => identity,
        other => {
            let err = CacheError::Protocol(format!("expected Hello, got {}", other.kind()));
            write_message(&mut send, &CacheMessage::Error(err.clone())).await?;
            conn.close(1u32.into(), b"handshake");
            return Err(err);
        }
    };
    registry.register(&identity, conn.clone());
    write_message(&mut send, &CacheMessage::Ack).await?;
    info!("[server] client <{identity}> registered");

    loop {
        match conn.accept_bi().await {
            Ok((mut send, mut recv)) => {
                let server = server.clone();
                let identity = identity.clone();
                // a write fetch may wait on another client indefinitely
                tokio::spawn(async move {
                    let response = match read_message(&mut recv).await {
                        Ok(msg) => dispatch(msg, &identity, &server).await,
                        Err(e) => CacheMessage::Error(e),
                    };
                    if let Err(e) = write_message(&mut send, &response).await {
                        warn!("[server] reply to <{identity}> failed: {e}");
                    }
                });
            }
            Err(e) => {
                info!("[server] client <{identity}> disconnected: {e}");
                registry.unregister(&identity, &conn);
                break;
            }
        }
    }
    Ok(())
}

async fn dispatch(msg: CacheMessage, peer: &str, server: &CoherenceServer) -> CacheMessage {
    debug!("[server] <{peer}> sent {}", msg.kind());
    match msg {
        CacheMessage::Fetch {
            identity,
            filename,
            mode,
        } => {
            if let Err(e) = check_identity(peer, &identity) {
                return CacheMessage::Error(e);
            }
            server.fetch(&identity, &filename, mode).await.into()
        }
        CacheMessage::Commit {
            identity,
            filename,
            buffer,
        } => {
            if let Err(e) = check_identity(peer, &identity) {
                return CacheMessage::Error(e);
            }
            server.commit(&identity, &filename, buffer).await.into()
        }
        other => CacheMessage::Error(CacheError::Protocol(format!(
            "unexpected request {}",
            other.kind()
        ))),
    }
}

fn check_identity(peer: &str, claimed: &str) -> CacheResult<()> {
    if peer == claimed {
        Ok(())
    } else {
        Err(CacheError::Protocol(format!(
            "connection belongs to <{peer}>, request claims <{claimed}>"
        )))
    }
}
