//! Caller-facing handle to a tracked connection.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result, saturating_millis};
use crate::identifiers::RecordId;

use super::connection::{ConnectionState, MessageHandler};
use super::registry::ConnectionRegistry;

/// Handle returned by
/// [`Coordinator::create_tracked_connection`](crate::Coordinator::create_tracked_connection).
///
/// Addresses the connection by logical id, so it keeps working after the
/// coordinator re-establishes the connection under the same id.
#[derive(Clone)]
pub struct TrackedConnection {
    id: RecordId,
    registry: Arc<ConnectionRegistry>,
    /// The coordinator's transition lock.
    transition: Arc<Mutex<()>>,
}

impl fmt::Debug for TrackedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl TrackedConnection {
    pub(crate) fn new(
        id: RecordId,
        registry: Arc<ConnectionRegistry>,
        transition: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            id,
            registry,
            transition,
        }
    }

    /// Logical id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// State of the current underlying connection.
    ///
    /// [`ConnectionState::Closed`] while untracked, e.g. during a freeze.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.registry
            .get(self.id)
            .map_or(ConnectionState::Closed, |record| record.state())
    }

    /// Sends a text frame on the current underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] while the connection is not tracked
    /// or not open.
    pub fn send_text(&self, text: &str) -> Result<()> {
        let record = self.registry.get(self.id).ok_or(Error::ConnectionClosed)?;
        record.handle.send_text(text)
    }

    /// Installs or clears the inbound frame handler.
    ///
    /// The handler follows the connection across reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the connection was closed
    /// explicitly.
    pub fn set_message_handler(&self, handler: Option<MessageHandler>) -> Result<()> {
        self.registry.set_message_handler(self.id, handler)
    }

    /// Closes the connection for good.
    ///
    /// It is untracked and will not be re-established. Waits for any
    /// transition in flight, then for the close acknowledgement up to the
    /// registry's close timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::CloseFailed`] if the close was not acknowledged in time
    /// - the close error of the underlying connection
    ///
    /// The record is removed regardless.
    pub async fn close(&self) -> Result<()> {
        let record = {
            let _transition = self.transition.lock().await;
            self.registry.release(self.id)
        };
        let Some(record) = record else {
            return Ok(());
        };

        let close_timeout = self.registry.close_timeout();
        let result = match timeout(close_timeout, record.handle.close()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    id = %self.id,
                    timeout_ms = saturating_millis(close_timeout),
                    "Close not acknowledged, connection released anyway"
                );
                Err(Error::CloseFailed {
                    failures: vec![self.id],
                })
            }
        };

        debug!(id = %self.id, "Tracked connection closed by owner");
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
