//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::WebSocketStream;

use wss_gateway::bootstrap::{
    ConnectionDriver, ConnectionError, ConnectionHandle, PipelineAssembler,
};
use wss_gateway::config::{ListenerConfig, ListenerKind, TimeoutConfig, TlsConfig, TlsProtocol};
use wss_gateway::net::connection::ConnectionId;
use wss_gateway::net::handshake::{
    HandshakeFailure, HandshakeNegotiator, NegotiatedStream, Negotiation, NegotiatorError,
    TlsSessionInfo,
};
use wss_gateway::net::tls::{crypto_provider, TlsMaterial, TlsMaterialError, TlsMaterialProvider};
use wss_gateway::net::BoxedIo;
use wss_gateway::observability::{AuditEvent, EventLog};
use wss_gateway::WebSocketSession;

pub const LISTENER_NAME: &str = "tls-websocket-listener";

/// What a client must send for [`GreetingNegotiator`] to succeed.
pub const HELLO: &[u8; 6] = b"HELLO\n";

/// Event log that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingEventLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingEventLog {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventLog for RecordingEventLog {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Debug)]
struct NoCertificate;

impl ResolvesServerCert for NoCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

/// Material that is never used for a real handshake.
pub fn placeholder_material() -> TlsMaterial {
    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(NoCertificate));
    TlsMaterial::new(Arc::new(config))
}

pub struct StaticMaterial;

impl TlsMaterialProvider for StaticMaterial {
    fn load(&self, _config: &TlsConfig) -> Result<TlsMaterial, TlsMaterialError> {
        Ok(placeholder_material())
    }
}

pub struct MissingMaterial;

impl TlsMaterialProvider for MissingMaterial {
    fn load(&self, config: &TlsConfig) -> Result<TlsMaterial, TlsMaterialError> {
        Err(TlsMaterialError::CertificateNotFound(config.cert_path.clone()))
    }
}

fn session_info() -> TlsSessionInfo {
    TlsSessionInfo {
        protocol: Some("TLSv1_3".to_string()),
        ..TlsSessionInfo::default()
    }
}

/// Stand-in handshake: the client "negotiates" by sending [`HELLO`].
/// Anything else fails the handshake.
pub struct GreetingNegotiator;

impl HandshakeNegotiator for GreetingNegotiator {
    fn negotiate(
        &self,
        mut io: BoxedIo,
        _material: &TlsMaterial,
    ) -> Result<Negotiation, NegotiatorError> {
        Negotiation::spawn(async move {
            let mut greeting = [0u8; 6];
            match io.read_exact(&mut greeting).await {
                Ok(_) if &greeting == HELLO => Ok(NegotiatedStream {
                    io,
                    tls: Some(session_info()),
                }),
                Ok(_) => Err(HandshakeFailure::new("unexpected greeting")),
                Err(e) => Err(HandshakeFailure::new(e.to_string())),
            }
        })
    }
}

/// Handshake that succeeds after a fixed delay without reading anything.
pub struct DelayedNegotiator {
    pub delay: Duration,
}

impl HandshakeNegotiator for DelayedNegotiator {
    fn negotiate(
        &self,
        io: BoxedIo,
        _material: &TlsMaterial,
    ) -> Result<Negotiation, NegotiatorError> {
        let delay = self.delay;
        Negotiation::spawn(async move {
            tokio::time::sleep(delay).await;
            Ok(NegotiatedStream {
                io,
                tls: Some(session_info()),
            })
        })
    }
}

pub fn tls_listener(handshake_timeout_ms: u64) -> ListenerConfig {
    ListenerConfig {
        name: LISTENER_NAME.to_string(),
        bind_address: "127.0.0.1:8443".to_string(),
        kind: ListenerKind::TlsWebsocket,
        tls: Some(TlsConfig {
            cert_path: "server.pem".to_string(),
            key_path: "server.key".to_string(),
            handshake_timeout_ms,
            protocols: vec![TlsProtocol::Tls13, TlsProtocol::Tls12],
        }),
        ..ListenerConfig::default()
    }
}

pub fn idle_timeouts(idle_ms: u64) -> TimeoutConfig {
    TimeoutConfig {
        idle_ms,
        ..TimeoutConfig::default()
    }
}

/// A driven connection plus the client end of its transport.
pub struct Harness {
    pub handle: ConnectionHandle,
    pub client: DuplexStream,
    pub sessions: mpsc::Receiver<WebSocketSession>,
    pub events: Arc<RecordingEventLog>,
    pub task: JoinHandle<Result<(), ConnectionError>>,
}

pub fn spawn_connection(
    listener: ListenerConfig,
    timeouts: TimeoutConfig,
    materials: Arc<dyn TlsMaterialProvider>,
    negotiator: Arc<dyn HandshakeNegotiator>,
) -> Harness {
    let assembler = Arc::new(PipelineAssembler::new(&listener, &timeouts, materials, negotiator));
    let events = Arc::new(RecordingEventLog::default());
    let (session_tx, sessions) = mpsc::channel(8);
    let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();

    let (driver, handle) =
        ConnectionDriver::new(assembler, ConnectionId::new(), peer, events.clone(), session_tx);
    let (client, server) = tokio::io::duplex(16 * 1024);
    let task = tokio::spawn(driver.run(Box::new(server)));

    Harness {
        handle,
        client,
        sessions,
        events,
        task,
    }
}

/// Client side of the WebSocket upgrade on the default path.
pub async fn upgrade_client<S>(io: S) -> Result<WebSocketStream<S>, tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (ws, _response) = tokio_tungstenite::client_async("ws://localhost/mqtt", io).await?;
    Ok(ws)
}

static PEM_DIRS: AtomicUsize = AtomicUsize::new(0);

/// A freshly generated self-signed certificate for `localhost`, written out as
/// PEM files and referenced by a TLS listener. The files go away on drop.
pub struct SelfSignedListener {
    pub listener: ListenerConfig,
    pub certificate: CertificateDer<'static>,
    dir: PathBuf,
}

impl SelfSignedListener {
    pub fn new(handshake_timeout_ms: u64) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir().join(format!(
            "wss-gateway-it-{}-{}",
            std::process::id(),
            PEM_DIRS.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("server.pem");
        let key_path = dir.join("server.key");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

        let mut listener = tls_listener(handshake_timeout_ms);
        if let Some(tls) = listener.tls.as_mut() {
            tls.cert_path = cert_path.to_string_lossy().into_owned();
            tls.key_path = key_path.to_string_lossy().into_owned();
        }

        Self {
            listener,
            certificate: certified.cert.der().clone(),
            dir,
        }
    }
}

impl Drop for SelfSignedListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Client side of a real TLS handshake that trusts only `certificate`.
pub async fn tls_client(
    io: DuplexStream,
    certificate: CertificateDer<'static>,
) -> std::io::Result<TlsStream<DuplexStream>> {
    let mut roots = RootCertStore::empty();
    roots.add(certificate).unwrap();
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from("localhost").unwrap();
    TlsConnector::from(Arc::new(config)).connect(server_name, io).await
}
