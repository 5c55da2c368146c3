//! Persistent connection layer.
//!
//! This module owns everything about the long-lived connections the
//! coordinator manages: how they are opened, how their state is observed,
//! and how they are tracked.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  connect()   ┌───────────────┐      WebSocket      ┌──────────┐
//! │  Coordinator  │─────────────►│  Connector    │◄───────────────────►│  Remote  │
//! │               │              └───────┬───────┘                     └──────────┘
//! │               │  track()             │ Arc<dyn Transport>
//! │               │─────────────►┌───────▼───────┐
//! └───────────────┘              │   Registry    │◄── Weak ── watcher (on close)
//!                                └───────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connector::connect` - open, resolves on "opened" or "errored"
//! 2. `ConnectionRegistry::track` - record under a logical id
//! 3. `Transport::close` or remote close - state goes `Closing → Closed`
//! 4. Watcher removes the record from the registry
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | `Transport` trait and WebSocket implementation |
//! | `connector` | `Connector` trait and WebSocket connector |
//! | `registry` | Tracked connection set |
//! | `tracked` | Caller-facing handle by logical id |

// ============================================================================
// Submodules
// ============================================================================

/// Transport trait and WebSocket connection.
pub mod connection;

/// Connection factories.
pub mod connector;

/// Connection registry.
pub mod registry;

/// Tracked connection handle.
pub mod tracked;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionState, Inbound, MessageHandler, Transport, WsConnection};
pub use connector::{Connector, WsConnector, validate_endpoint};
pub use registry::{ConnectionBlueprint, ConnectionRecord, ConnectionRegistry, DEFAULT_CLOSE_TIMEOUT};
pub use tracked::TrackedConnection;
