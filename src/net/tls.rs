//! TLS material loading.
//!
//! Turns a listener's [`TlsConfig`] into a rustls [`ServerConfig`]. Material is
//! loaded synchronously so that a misconfigured listener fails bootstrap before
//! any stage is installed on the connection.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;

use crate::config::{TlsConfig, TlsProtocol};

/// Error type for TLS material loading.
#[derive(Debug, Error)]
pub enum TlsMaterialError {
    #[error("Certificate file not found: {0}")]
    CertificateNotFound(String),
    #[error("Private key file not found: {0}")]
    KeyNotFound(String),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No certificates in {0}")]
    NoCertificates(String),
    #[error("No private key in {0}")]
    NoPrivateKey(String),
    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Handshake parameters for one listener. Opaque to the bootstrap core.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    config: Arc<ServerConfig>,
}

impl TlsMaterial {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }
}

/// Source of handshake parameters for a listener.
pub trait TlsMaterialProvider: Send + Sync {
    fn load(&self, config: &TlsConfig) -> Result<TlsMaterial, TlsMaterialError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MaterialKey {
    cert_path: String,
    key_path: String,
    protocols: Vec<TlsProtocol>,
}

impl From<&TlsConfig> for MaterialKey {
    fn from(config: &TlsConfig) -> Self {
        Self {
            cert_path: config.cert_path.clone(),
            key_path: config.key_path.clone(),
            protocols: config.protocols.clone(),
        }
    }
}

/// Loads PEM certificate chains and keys from disk, caching the resulting
/// server configuration per distinct TLS section.
#[derive(Debug, Default)]
pub struct PemMaterialProvider {
    cache: DashMap<MaterialKey, TlsMaterial>,
}

impl PemMaterialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached server configurations.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl TlsMaterialProvider for PemMaterialProvider {
    fn load(&self, config: &TlsConfig) -> Result<TlsMaterial, TlsMaterialError> {
        let key = MaterialKey::from(config);
        if let Some(material) = self.cache.get(&key) {
            return Ok(material.clone());
        }

        let material = TlsMaterial::new(Arc::new(load_server_config(config)?));
        self.cache.insert(key, material.clone());
        tracing::info!(cert_path = %config.cert_path, "TLS material loaded");
        Ok(material)
    }
}

/// The rustls crypto backend used for every server configuration. Never the
/// process default, which is ambiguous when several backends are linked.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build a rustls server configuration from certificate and key files.
pub fn load_server_config(config: &TlsConfig) -> Result<ServerConfig, TlsMaterialError> {
    let cert_path = Path::new(&config.cert_path);
    let key_path = Path::new(&config.key_path);

    if !cert_path.exists() {
        return Err(TlsMaterialError::CertificateNotFound(config.cert_path.clone()));
    }
    if !key_path.exists() {
        return Err(TlsMaterialError::KeyNotFound(config.key_path.clone()));
    }

    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let versions: Vec<&'static rustls::SupportedProtocolVersion> = config
        .protocols
        .iter()
        .map(|protocol| match protocol {
            TlsProtocol::Tls12 => &rustls::version::TLS12,
            TlsProtocol::Tls13 => &rustls::version::TLS13,
        })
        .collect();

    let server_config = ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&versions)?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(server_config)
}

fn open(path: &str) -> Result<BufReader<File>, TlsMaterialError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsMaterialError::Read {
            path: path.to_string(),
            source,
        })
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsMaterialError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsMaterialError::Read {
            path: path.to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsMaterialError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsMaterialError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsMaterialError::Read {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsMaterialError::NoPrivateKey(path.to_string()))
}
