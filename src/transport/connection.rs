//! Persistent connection abstraction and WebSocket implementation.
//!
//! [`Transport`] is the seam the registry and coordinator work against.
//! [`WsConnection`] is the production implementation: a WebSocket client
//! whose socket is owned by a spawned event loop.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming frames from the remote (delivered to the message handler)
//! - Outgoing frames and close requests from the Rust API
//! - State publication (`Open → Closing → Closed`) over a watch channel

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Lifecycle state of a persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Handshake completed, frames may flow.
    Open,
    /// Close requested, waiting for acknowledgement.
    Closing,
    /// Fully closed. Terminal.
    Closed,
}

/// A frame received from the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Callback for inbound frames.
///
/// Shared (`Arc`) so the same handler can be carried over to a
/// re-established connection.
pub type MessageHandler = Arc<dyn Fn(Inbound) + Send + Sync>;

// ============================================================================
// Transport
// ============================================================================

/// A long-lived, stateful connection managed by the registry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Subprotocol negotiated during the handshake, if any.
    fn subprotocol(&self) -> Option<&str>;

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] unless the connection is open.
    fn send_text(&self, text: &str) -> Result<()>;

    /// Installs or clears the inbound frame handler.
    fn set_message_handler(&self, handler: Option<MessageHandler>);

    /// Requests close and resolves once the close is acknowledged.
    ///
    /// Calling this on an already closed connection succeeds immediately.
    async fn close(&self) -> Result<()>;

    /// Resolves once the connection reaches [`ConnectionState::Closed`],
    /// however that happens.
    async fn closed(&self);
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a frame.
    Send(Message),
    /// Start the close handshake.
    Close,
}

// ============================================================================
// WsConnection
// ============================================================================

/// WebSocket client connection.
///
/// Cloning is cheap; all clones drive the same socket.
#[derive(Clone)]
pub struct WsConnection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// State published by the event loop.
    state_rx: watch::Receiver<ConnectionState>,
    /// Inbound frame handler (shared with event loop).
    message_handler: Arc<Mutex<Option<MessageHandler>>>,
    /// Negotiated subprotocol.
    subprotocol: Option<Arc<str>>,
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("state", &*self.state_rx.borrow())
            .field("subprotocol", &self.subprotocol)
            .finish_non_exhaustive()
    }
}

impl WsConnection {
    /// Wraps an established WebSocket stream.
    ///
    /// Spawns the event loop task internally, so this must run inside a
    /// tokio runtime.
    pub fn new<S>(ws_stream: WebSocketStream<S>, subprotocol: Option<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let message_handler: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            state_tx,
            Arc::clone(&message_handler),
        ));

        Self {
            command_tx,
            state_rx,
            message_handler,
            subprotocol: subprotocol.map(Arc::from),
        }
    }

    /// Queues a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] unless the connection is open.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send_message(Message::Binary(data.into().into()))
    }

    fn send_message(&self, message: Message) -> Result<()> {
        if *self.state_rx.borrow() != ConnectionState::Open {
            return Err(Error::ConnectionClosed);
        }

        self.command_tx
            .send(ConnectionCommand::Send(message))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Waits until the event loop publishes `Closed`.
    async fn wait_closed(&self) {
        let mut state_rx = self.state_rx.clone();
        // A dropped sender means the event loop is gone, which is closed too.
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Event loop that owns the socket.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        state_tx: watch::Sender<ConnectionState>,
        message_handler: Arc<Mutex<Option<MessageHandler>>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut closing = false;

        loop {
            tokio::select! {
                // Incoming frames from the remote
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::dispatch(&message_handler, Inbound::Text(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(data))) => {
                            Self::dispatch(&message_handler, Inbound::Binary(data.to_vec()));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            if closing {
                                debug!("Close acknowledged by remote");
                            } else {
                                debug!(?frame, "WebSocket closed by remote");
                                state_tx.send_replace(ConnectionState::Closing);
                                let _ = ws_write.close().await;
                            }
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ping/Pong are answered by tungstenite
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv(), if !closing => {
                    match command {
                        Some(ConnectionCommand::Send(message)) => {
                            if let Err(e) = ws_write.send(message).await {
                                warn!(error = %e, "Failed to send frame");
                                break;
                            }
                            trace!("Frame sent");
                        }

                        Some(ConnectionCommand::Close) | None => {
                            debug!("Starting close handshake");
                            closing = true;
                            state_tx.send_replace(ConnectionState::Closing);

                            if let Err(e) = ws_write.close().await {
                                debug!(error = %e, "Close frame could not be sent");
                                break;
                            }
                        }
                    }
                }
            }
        }

        state_tx.send_replace(ConnectionState::Closed);
        debug!("Event loop terminated");
    }

    /// Hands an inbound frame to the current handler, if any.
    fn dispatch(message_handler: &Arc<Mutex<Option<MessageHandler>>>, inbound: Inbound) {
        // Clone out of the lock so a handler may replace itself.
        let handler = message_handler.lock().clone();
        match handler {
            Some(handler) => handler(inbound),
            None => trace!("Inbound frame dropped, no handler"),
        }
    }
}

#[async_trait]
impl Transport for WsConnection {
    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.send_message(Message::Text(text.to_owned().into()))
    }

    fn set_message_handler(&self, handler: Option<MessageHandler>) {
        *self.message_handler.lock() = handler;
    }

    async fn close(&self) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        // The loop may already be gone; waiting below covers that.
        let _ = self.command_tx.send(ConnectionCommand::Close);
        self.wait_closed().await;
        Ok(())
    }

    async fn closed(&self) {
        self.wait_closed().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
