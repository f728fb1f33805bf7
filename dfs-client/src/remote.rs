//! QUIC connection to the file server.
//!
//! The client dials once, introduces itself with `Hello`, and then uses the
//! same connection both ways: it opens streams for fetch/commit and accepts
//! the streams the server opens for invalidate/writeback callbacks.

use async_trait::async_trait;
use common::transport::{call, make_client_endpoint, read_message, write_message, SERVER_NAME};
use common::{
    AccessMode, CacheError, CacheMessage, CacheResult, ClientCallback, FileService,
    TransferBuffer,
};
use log::{info, warn};
use quinn::{Connection, Endpoint};
use std::net::SocketAddr;
use std::sync::Arc;

/// [`FileService`] backed by a connection to a remote server.
pub struct RemoteServer {
    conn: Connection,
    // keeps the socket alive for as long as the connection is used
    _endpoint: Endpoint,
}

impl RemoteServer {
    /// Connect to `addr` and announce `identity`.
    pub async fn connect(addr: SocketAddr, identity: &str) -> anyhow::Result<Self> {
        let endpoint = make_client_endpoint()?;
        let conn = endpoint.connect(addr, SERVER_NAME)?.await?;
        info!("[client] connected to server at {addr}");

        call(
            &conn,
            &CacheMessage::Hello {
                identity: identity.to_string(),
            },
        )
        .await?
        .into_ack()?;
        info!("[client] registered as <{identity}>");
        Ok(Self {
            conn,
            _endpoint: endpoint,
        })
    }

    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }
}

#[async_trait]
impl FileService for RemoteServer {
    async fn fetch(
        &self,
        identity: &str,
        filename: &str,
        mode: AccessMode,
    ) -> CacheResult<TransferBuffer> {
        let msg = CacheMessage::Fetch {
            identity: identity.to_string(),
            filename: filename.to_string(),
            mode,
        };
        call(&self.conn, &msg).await?.into_contents()
    }

    async fn commit(
        &self,
        identity: &str,
        filename: &str,
        buffer: TransferBuffer,
    ) -> CacheResult<bool> {
        let msg = CacheMessage::Commit {
            identity: identity.to_string(),
            filename: filename.to_string(),
            buffer,
        };
        call(&self.conn, &msg).await?.into_flag()
    }
}

/// Answer server callbacks on `conn` until the connection closes.
pub async fn serve_callbacks(conn: Connection, callback: Arc<dyn ClientCallback>) {
    loop {
        match conn.accept_bi().await {
            Ok((mut send, mut recv)) => {
                let callback = callback.clone();
                tokio::spawn(async move {
                    let response = match read_message(&mut recv).await {
                        Ok(msg) => handle_callback(msg, callback.as_ref()).await,
                        Err(e) => CacheMessage::Error(e),
                    };
                    if let Err(e) = write_message(&mut send, &response).await {
                        warn!("[client] callback reply failed: {e}");
                    }
                });
            }
            Err(e) => {
                info!("[client] connection closed: {e}");
                break;
            }
        }
    }
}

async fn handle_callback(msg: CacheMessage, callback: &dyn ClientCallback) -> CacheMessage {
    match msg {
        CacheMessage::Invalidate => callback.invalidate().await.into(),
        CacheMessage::RequestWriteback => callback.request_writeback().await.into(),
        other => CacheMessage::Error(CacheError::Protocol(format!(
            "unexpected callback {}",
            other.kind()
        ))),
    }
}
