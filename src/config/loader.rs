//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ListenerKind, TlsProtocol};

    #[test]
    fn parses_tls_websocket_listener() {
        let config = parse_config(
            r#"
            [[listeners]]
            name = "secure"
            bind_address = "127.0.0.1:8443"
            kind = "tls-websocket"

            [listeners.tls]
            cert_path = "server.pem"
            key_path = "server.key"
            handshake_timeout_ms = 5000
            protocols = ["TLSv1.3"]

            [listeners.websocket]
            path = "/ws"
            subprotocols = ["mqtt"]

            [timeouts]
            idle_ms = 2500
            "#,
        )
        .unwrap();

        let listener = &config.listeners[0];
        assert_eq!(listener.kind, ListenerKind::TlsWebsocket);
        assert_eq!(listener.handshake_timeout_ms(), 5000);
        assert_eq!(listener.tls.as_ref().unwrap().protocols, vec![TlsProtocol::Tls13]);
        assert_eq!(listener.websocket.path, "/ws");
        assert_eq!(listener.max_connections, 10_000);
        assert_eq!(config.timeouts.idle_ms, 2500);
        assert_eq!(config.timeouts.shutdown_grace_secs, 30);
    }

    #[test]
    fn tls_defaults_apply() {
        let config = parse_config(
            r#"
            [[listeners]]
            name = "secure"
            bind_address = "127.0.0.1:8443"
            kind = "tls-websocket"
            tls = { cert_path = "c.pem", key_path = "k.pem" }
            "#,
        )
        .unwrap();

        let tls = config.listeners[0].tls.as_ref().unwrap();
        assert_eq!(tls.handshake_timeout_ms, 10_000);
        assert_eq!(tls.protocols, vec![TlsProtocol::Tls13, TlsProtocol::Tls12]);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.listeners[0].kind, ListenerKind::Websocket);
        assert_eq!(config.listeners[0].handshake_timeout_ms(), 0);
    }

    #[test]
    fn rejects_secured_listener_without_tls() {
        let err = parse_config(
            r#"
            [[listeners]]
            name = "secure"
            bind_address = "127.0.0.1:8443"
            kind = "tls-websocket"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("secure"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/wss-gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
