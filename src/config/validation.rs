//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//! - Check that secured listeners carry TLS material paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, ListenerConfig, ListenerKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no listeners configured")]
    NoListeners,
    #[error("listener name must not be empty")]
    EmptyListenerName,
    #[error("duplicate listener name '{0}'")]
    DuplicateListener(String),
    #[error("listener '{listener}': invalid bind address '{address}'")]
    InvalidBindAddress { listener: String, address: String },
    #[error("listener '{0}': max_connections must be greater than 0")]
    ZeroMaxConnections(String),
    #[error("listener '{0}': tls-websocket listener requires a [tls] section")]
    MissingTls(String),
    #[error("listener '{listener}': {field} must not be empty")]
    EmptyTlsPath { listener: String, field: &'static str },
    #[error("listener '{0}': at least one TLS protocol must be enabled")]
    NoTlsProtocols(String),
    #[error("listener '{listener}': websocket path '{path}' must start with '/'")]
    InvalidWebsocketPath { listener: String, path: String },
    #[error("listener '{listener}': invalid websocket subprotocol '{protocol}'")]
    InvalidSubprotocol { listener: String, protocol: String },
    #[error("timeouts.idle_ms must be greater than 0")]
    ZeroIdleTimeout,
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    let mut names = HashSet::new();
    for listener in &config.listeners {
        if !listener.name.is_empty() && !names.insert(listener.name.as_str()) {
            errors.push(ValidationError::DuplicateListener(listener.name.clone()));
        }
        validate_listener(listener, &mut errors);
    }

    if config.timeouts.idle_ms == 0 {
        errors.push(ValidationError::ZeroIdleTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_listener(listener: &ListenerConfig, errors: &mut Vec<ValidationError>) {
    let name = &listener.name;
    if name.is_empty() {
        errors.push(ValidationError::EmptyListenerName);
    }

    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            listener: name.clone(),
            address: listener.bind_address.clone(),
        });
    }

    if listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections(name.clone()));
    }

    if listener.kind == ListenerKind::TlsWebsocket {
        match &listener.tls {
            None => errors.push(ValidationError::MissingTls(name.clone())),
            Some(tls) => {
                if tls.cert_path.is_empty() {
                    errors.push(ValidationError::EmptyTlsPath {
                        listener: name.clone(),
                        field: "cert_path",
                    });
                }
                if tls.key_path.is_empty() {
                    errors.push(ValidationError::EmptyTlsPath {
                        listener: name.clone(),
                        field: "key_path",
                    });
                }
                if tls.protocols.is_empty() {
                    errors.push(ValidationError::NoTlsProtocols(name.clone()));
                }
            }
        }
    }

    if !listener.websocket.path.starts_with('/') {
        errors.push(ValidationError::InvalidWebsocketPath {
            listener: name.clone(),
            path: listener.websocket.path.clone(),
        });
    }

    for protocol in &listener.websocket.subprotocols {
        if !is_token(protocol) {
            errors.push(ValidationError::InvalidSubprotocol {
                listener: name.clone(),
                protocol: protocol.clone(),
            });
        }
    }
}

/// RFC 7230 token: the only legal shape for a `Sec-WebSocket-Protocol` entry.
fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
