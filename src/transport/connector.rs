//! Opening persistent connections.
//!
//! The coordinator never constructs sockets itself; it asks a
//! [`Connector`]. This is how callers create tracked connections and how
//! `reestablish` recreates them after a freeze.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::connection::{Transport, WsConnection};

// ============================================================================
// Connector
// ============================================================================

/// Factory for persistent connections.
///
/// The returned future resolves once the connection is either opened or
/// has errored; there is no intermediate state.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection to `endpoint`, requesting `subprotocol` if given.
    async fn connect(
        &self,
        endpoint: &str,
        subprotocol: Option<&str>,
    ) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// WsConnector
// ============================================================================

/// Opens [`WsConnection`]s with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a new connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        subprotocol: Option<&str>,
    ) -> Result<Arc<dyn Transport>> {
        validate_endpoint(endpoint)?;

        let mut request = endpoint.into_client_request()?;
        if let Some(protocol) = subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| Error::config(format!("Invalid subprotocol '{protocol}': {e}")))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (ws_stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::connection(format!("{endpoint}: {e}")))?;

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        debug!(endpoint, subprotocol = ?negotiated, "WebSocket connection opened");

        Ok(Arc::new(WsConnection::new(ws_stream, negotiated)))
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Checks that `endpoint` is an absolute `ws://` or `wss://` URL.
///
/// # Errors
///
/// Returns [`Error::InvalidEndpoint`] otherwise.
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|e| Error::invalid_endpoint(endpoint, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::invalid_endpoint(
            endpoint,
            format!("unsupported scheme '{other}'"),
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    use crate::transport::ConnectionState;

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("ws://127.0.0.1:9000/feed").is_ok());
        assert!(validate_endpoint("wss://example.com").is_ok());
        assert!(matches!(
            validate_endpoint("https://example.com"),
            Err(Error::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(Error::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_negotiates_subprotocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let echo_protocol = |request: &Request, mut response: Response| {
                if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
                }
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, echo_protocol)
                .await
                .expect("upgrade");
            while ws.next().await.is_some() {}
        });

        let connection = WsConnector::new()
            .connect(&format!("ws://{addr}/live"), Some("json.v1"))
            .await
            .expect("connect");

        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(connection.subprotocol(), Some("json.v1"));

        connection.close().await.expect("close");
        let _ = server.await;
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let result = WsConnector::new()
            .connect(&format!("ws://{addr}"), None)
            .await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_connect_rejects_http_scheme() {
        let result = WsConnector::new().connect("http://127.0.0.1:1", None).await;
        assert!(matches!(result, Err(Error::InvalidEndpoint { .. })));
    }
}
