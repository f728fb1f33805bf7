//! QUIC plumbing shared by server and client.
//!
//! Every RPC uses its own bidirectional stream: the caller writes one
//! bincode-encoded [`CacheMessage`] and finishes its send half, the callee
//! answers with exactly one message and finishes too.

use crate::error::{CacheError, CacheResult};
use crate::protocol::CacheMessage;
use log::debug;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Connection, Endpoint, ReadToEndError, RecvStream, SendStream, ServerConfig};
use rustls::DigitallySignedStruct;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{RootCertStore, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;

/// Upper bound for one encoded message, file contents included.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Server name presented by the self-signed certificate.
pub const SERVER_NAME: &str = "localhost";

/// Installs the ring crypto provider. Safe to call more than once.
pub fn init_crypto() {
    let _ = CryptoProvider::install_default(rustls::crypto::ring::default_provider());
}

/// set up the QUIC server endpoint with TLS certificate.
pub async fn make_server_endpoint(bind_addr: SocketAddr) -> anyhow::Result<Endpoint> {
    let server_config = configure_server()?;
    let endpoint = Endpoint::server(server_config, bind_addr)?;
    Ok(endpoint)
}

/// generates a self-signed TLS certificate and constructs QUIC server config.
fn configure_server() -> anyhow::Result<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])?;
    let cert_der = CertificateDer::from(cert.serialize_der()?);
    let key = PrivatePkcs8KeyDer::from(cert.serialize_private_key_der());
    let certs = vec![cert_der];
    let server_config =
        ServerConfig::with_single_cert(certs, rustls::pki_types::PrivateKeyDer::Pkcs8(key))?;
    Ok(server_config)
}

/// Client endpoint that trusts whatever certificate the server presents.
pub fn make_client_endpoint() -> anyhow::Result<Endpoint> {
    let mut tls = rustls::ClientConfig::builder()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    tls.dangerous()
        .set_certificate_verifier(Arc::new(SkipServerVerification));

    let quic_crypto = QuicClientConfig::try_from(tls)?;
    let client_cfg = ClientConfig::new(Arc::new(quic_crypto));
    let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;
    endpoint.set_default_client_config(client_cfg);
    Ok(endpoint)
}

/// Skip certificate verification
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

fn transport(e: impl ToString) -> CacheError {
    CacheError::Transport(e.to_string())
}

/// Encode `msg`, write it and close the send half.
pub async fn write_message(send: &mut SendStream, msg: &CacheMessage) -> CacheResult<()> {
    let data = bincode::serialize(msg)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CacheError::Protocol(format!(
            "{} message of {} bytes exceeds limit",
            msg.kind(),
            data.len()
        )));
    }
    send.write_all(&data).await.map_err(transport)?;
    send.finish().map_err(transport)?;
    Ok(())
}

/// Read the peer's whole send half and decode it.
pub async fn read_message(recv: &mut RecvStream) -> CacheResult<CacheMessage> {
    let data = recv.read_to_end(MAX_MESSAGE_SIZE).await.map_err(|e| match e {
        ReadToEndError::TooLong => CacheError::Protocol("message exceeds size limit".into()),
        other => transport(other),
    })?;
    Ok(bincode::deserialize::<CacheMessage>(&data)?)
}

/// One request/response round trip on a fresh bidirectional stream.
pub async fn call(conn: &Connection, msg: &CacheMessage) -> CacheResult<CacheMessage> {
    let (mut send, mut recv) = conn.open_bi().await.map_err(transport)?;
    debug!("[transport] -> {} on stream {}", msg.kind(), send.id());
    write_message(&mut send, msg).await?;
    let resp = read_message(&mut recv).await?;
    debug!("[transport] <- {}", resp.kind());
    Ok(resp)
}
