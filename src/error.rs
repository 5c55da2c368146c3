//! Error types for the connection lifecycle coordinator.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use connection_lifecycle::{Coordinator, Result};
//!
//! async fn example(coordinator: &Coordinator) -> Result<()> {
//!     let connection = coordinator
//!         .create_tracked_connection("wss://example.com/live", Some("json"))
//!         .await?;
//!     connection.send_text("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidEndpoint`] |
//! | Registry | [`Error::DuplicateId`], [`Error::CloseFailed`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Lifecycle | [`Error::Toggle`], [`Error::Reestablish`], [`Error::NotInitialized`] |
//! | External | [`Error::WebSocket`], [`Error::Json`], [`Error::ChannelClosed`] |
//!
//! Nothing here is fatal to the host process. Toggle, close and reconnect
//! failures all degrade to "networking suspended".

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RecordId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ToggleDirection
// ============================================================================

/// Which network primitive a toggle failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleDirection {
    /// `enableNetwork` on the remote layer.
    Enable,
    /// `disableNetwork` on the remote layer.
    Disable,
}

impl fmt::Display for ToggleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable => f.write_str("enable"),
            Self::Disable => f.write_str("disable"),
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when builder or options input is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Endpoint is not a usable WebSocket URL.
    #[error("Invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// A record with this id is already tracked.
    #[error("Connection {id} is already tracked")]
    DuplicateId {
        /// The duplicated logical id.
        id: RecordId,
    },

    /// One or more tracked connections did not acknowledge close in time.
    ///
    /// The records were removed from the registry regardless.
    #[error("{} connection(s) failed to close cleanly", failures.len())]
    CloseFailed {
        /// Ids of the connections that failed to close.
        failures: Vec<RecordId>,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection could not be established or failed while open.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection did not open or close within the configured bound.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Remote enable/disable call was rejected or timed out.
    #[error("Network {direction} failed: {message}")]
    Toggle {
        /// Which primitive failed.
        direction: ToggleDirection,
        /// Description of the failure.
        message: String,
    },

    /// A reconnect attempt failed and the coordinator rolled back.
    #[error("Failed to re-establish connection {id}: {message}")]
    Reestablish {
        /// Logical id of the connection that failed to reopen.
        id: RecordId,
        /// Description of the underlying failure.
        message: String,
    },

    /// Operation needs the remote handle supplied by `initialize`.
    #[error("Coordinator is not initialized")]
    NotInitialized,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a duplicate id error.
    #[inline]
    pub fn duplicate_id(id: RecordId) -> Self {
        Self::DuplicateId { id }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a connection timeout error from the elapsed bound.
    #[inline]
    pub fn connection_timeout_after(timeout: Duration) -> Self {
        Self::connection_timeout(saturating_millis(timeout))
    }

    /// Creates a toggle error.
    #[inline]
    pub fn toggle(direction: ToggleDirection, message: impl Into<String>) -> Self {
        Self::Toggle {
            direction,
            message: message.into(),
        }
    }

    /// Creates a re-establish error.
    #[inline]
    pub fn reestablish(id: RecordId, message: impl Into<String>) -> Self {
        Self::Reestablish {
            id,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error may clear up on a later lifecycle signal.
    ///
    /// Caller mistakes (bad configuration, bad endpoints, duplicate ids)
    /// are not recoverable; everything else degrades to a suspended state.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Config { .. } | Self::InvalidEndpoint { .. } | Self::DuplicateId { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
