//! Connection lifecycle - keeps networking consistent across page lifecycle signals.
//!
//! Long-running clients get hidden, cached in a back/forward cache, frozen,
//! taken offline and brought back. This library turns those environment
//! events into a single ordered stream of lifecycle signals and keeps two
//! things consistent with them: a remote network toggle and the set of
//! persistent WebSocket connections the application opened.
//!
//! # Architecture
//!
//! - **Signals**: raw [`EnvironmentEvent`]s are normalized into
//!   [`LifecycleSignal`]s and fanned out to subscribers
//! - **Coordinator**: consumes signals one at a time and drives the
//!   [`NetworkToggle`] and the [`ConnectionRegistry`]
//! - **Transport**: tracked WebSocket connections that can be torn down
//!   and re-established under the same logical id
//!
//! Key guarantees:
//!
//! - While [`Phase::Active`], every tracked connection is open
//! - Only explicit online/offline signals change network intent
//! - Re-establishing is all-or-nothing; a partial failure ends suspended
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use connection_lifecycle::{Coordinator, EnvironmentEvent, RemoteError, RemoteNetwork, Result};
//!
//! struct Remote;
//!
//! #[async_trait]
//! impl RemoteNetwork for Remote {
//!     async fn enable_network(&self) -> std::result::Result<(), RemoteError> {
//!         Ok(())
//!     }
//!
//!     async fn disable_network(&self) -> std::result::Result<(), RemoteError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let coordinator = Coordinator::builder().build()?;
//!     coordinator.initialize(Arc::new(Remote));
//!
//!     let feed = coordinator
//!         .create_tracked_connection("wss://example.com/feed", None)
//!         .await?;
//!     feed.send_text("subscribe")?;
//!
//!     // Forward host events as they happen.
//!     let environment = coordinator.normalizer().attach();
//!     environment.emit(EnvironmentEvent::Freeze)?;
//!     environment.emit(EnvironmentEvent::Resume)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`coordinator`] | Lifecycle state machine: [`Coordinator`], [`Phase`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`network`] | Remote network toggle |
//! | [`signal`] | Environment events and lifecycle signals |
//! | [`transport`] | WebSocket connections and the registry |

// ============================================================================
// Modules
// ============================================================================

/// Lifecycle state machine.
///
/// Use [`Coordinator::builder()`] to create a configured coordinator.
pub mod coordinator;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections and subscriptions.
pub mod identifiers;

/// Remote network toggle.
pub mod network;

/// Environment events and normalized lifecycle signals.
pub mod signal;

/// WebSocket transport layer.
///
/// Connections, the connector that opens them and the registry that
/// tracks them.
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Coordinator types
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorOptions, CoordinatorState, Phase};

// Error types
pub use error::{Error, Result, ToggleDirection};

// Identifier types
pub use identifiers::{RecordId, SubscriptionId};

// Network types
pub use network::{NetworkToggle, RemoteError, RemoteNetwork};

// Signal types
pub use signal::{
    EnvironmentEvent, EnvironmentHandle, LifecycleSignal, SignalClass, SignalNormalizer,
    Subscription, VisibilityState,
};

// Transport types
pub use transport::{
    ConnectionRegistry, ConnectionState, Connector, Inbound, MessageHandler, TrackedConnection,
    Transport, WsConnection, WsConnector,
};
