//! Connection registry.
//!
//! Tracks the persistent connections the coordinator is responsible for,
//! keyed by logical [`RecordId`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ConnectionRegistry             │
//! │  ┌─────────────────────────────────┐    │
//! │  │ conn-1 → record (gen 4) ────────┼──┐ │
//! │  │ conn-2 → record (gen 5)         │  │ │
//! │  └─────────────────────────────────┘  │ │
//! │  remembered: [conn-1, conn-2]         │ │
//! └───────────────────────────────────────┼─┘
//!                   ▲ Weak                │ closed()
//!                   └──── watcher task ◄──┘
//! ```
//!
//! Each tracked record gets a watcher task holding only a `Weak` reference
//! back to the registry. When the connection closes, for any reason, the
//! watcher removes the record if its generation still matches.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, saturating_millis};
use crate::identifiers::RecordId;

use super::connection::{ConnectionState, MessageHandler, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Default bound for a single close acknowledgement.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ConnectionRecord
// ============================================================================

/// A tracked persistent connection.
#[derive(Clone)]
pub struct ConnectionRecord {
    /// Logical id, stable across reconnects.
    pub id: RecordId,
    /// Endpoint the connection was opened against.
    pub endpoint: String,
    /// Subprotocol requested when opening.
    pub subprotocol: Option<String>,
    /// The live connection.
    pub handle: Arc<dyn Transport>,
    /// Distinguishes successive connections under the same id.
    generation: u64,
    /// Inbound handler, carried over on reconnect.
    handler: Option<MessageHandler>,
}

impl ConnectionRecord {
    /// Current state of the underlying connection.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Retained shape of this record, enough to reopen it later.
    #[must_use]
    pub fn blueprint(&self) -> ConnectionBlueprint {
        ConnectionBlueprint {
            id: self.id,
            endpoint: self.endpoint.clone(),
            subprotocol: self.subprotocol.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("subprotocol", &self.subprotocol)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionBlueprint
// ============================================================================

/// What is remembered about a record after `close_all` removed it.
#[derive(Clone)]
pub struct ConnectionBlueprint {
    /// Logical id to reuse.
    pub id: RecordId,
    /// Endpoint to reconnect to.
    pub endpoint: String,
    /// Subprotocol to request.
    pub subprotocol: Option<String>,
    /// Inbound handler to reinstall.
    handler: Option<MessageHandler>,
}

impl fmt::Debug for ConnectionBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBlueprint")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("subprotocol", &self.subprotocol)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Internally synchronized set of tracked connections.
///
/// All methods take `&self`; the registry is shared as `Arc<ConnectionRegistry>`.
pub struct ConnectionRegistry {
    /// Tracked records by logical id.
    records: RwLock<FxHashMap<RecordId, ConnectionRecord>>,
    /// Blueprints of records removed by `close_all`, in id order.
    remembered: Mutex<Vec<ConnectionBlueprint>>,
    /// Generation counter for records.
    generation: AtomicU64,
    /// Bound for each close acknowledgement.
    close_timeout: Duration,
    /// Handed to watcher tasks.
    weak_self: Weak<ConnectionRegistry>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.len())
            .field("remembered", &self.remembered.lock().len())
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionRegistry - Constructor
// ============================================================================

impl ConnectionRegistry {
    /// Creates an empty registry with the default close timeout.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_close_timeout(DEFAULT_CLOSE_TIMEOUT)
    }

    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `close_timeout` - How long `close_all` waits for each acknowledgement
    #[must_use]
    pub fn with_close_timeout(close_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            records: RwLock::new(FxHashMap::default()),
            remembered: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            close_timeout,
            weak_self: weak_self.clone(),
        })
    }
}

// ============================================================================
// ConnectionRegistry - Public API
// ============================================================================

impl ConnectionRegistry {
    /// Registers a connection under `id`.
    ///
    /// Spawns a watcher that untracks the record once the connection
    /// closes. Outside a tokio runtime no watcher is spawned and the record
    /// is only removed explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` is already tracked.
    pub fn track(
        &self,
        id: RecordId,
        endpoint: impl Into<String>,
        subprotocol: Option<String>,
        handle: Arc<dyn Transport>,
    ) -> Result<RecordId> {
        self.insert(id, endpoint.into(), subprotocol, handle, None)
    }

    /// Re-registers a remembered connection with a freshly opened handle.
    ///
    /// The blueprint's message handler is installed on the new handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if the id is already tracked.
    pub fn track_blueprint(
        &self,
        blueprint: &ConnectionBlueprint,
        handle: Arc<dyn Transport>,
    ) -> Result<RecordId> {
        if let Some(handler) = &blueprint.handler {
            handle.set_message_handler(Some(Arc::clone(handler)));
        }

        self.insert(
            blueprint.id,
            blueprint.endpoint.clone(),
            blueprint.subprotocol.clone(),
            handle,
            blueprint.handler.clone(),
        )
    }

    /// Removes a record. No-op if absent.
    pub fn untrack(&self, id: RecordId) {
        if self.records.write().remove(&id).is_some() {
            debug!(id = %id, "Connection untracked");
        }
    }

    /// Returns a copy of every tracked record.
    ///
    /// The copy is detached from the registry and safe to iterate while
    /// it changes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Returns a copy of one record.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<ConnectionRecord> {
        self.records.read().get(&id).cloned()
    }

    /// Returns `true` if `id` is tracked.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.read().contains_key(&id)
    }

    /// Returns the number of tracked records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Installs the inbound handler for a connection.
    ///
    /// The handler is kept with the record and reinstalled after a
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if `id` is neither tracked nor
    /// remembered.
    pub fn set_message_handler(&self, id: RecordId, handler: Option<MessageHandler>) -> Result<()> {
        let mut found = false;

        if let Some(record) = self.records.write().get_mut(&id) {
            record.handle.set_message_handler(handler.clone());
            record.handler = handler.clone();
            found = true;
        }

        if let Some(blueprint) = self
            .remembered
            .lock()
            .iter_mut()
            .find(|blueprint| blueprint.id == id)
        {
            blueprint.handler = handler;
            found = true;
        }

        if found {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }
}

// ============================================================================
// ConnectionRegistry - Lifecycle
// ============================================================================

impl ConnectionRegistry {
    /// Closes every tracked connection and removes it.
    ///
    /// Closes run concurrently, each bounded by the close timeout. A record
    /// is untracked whether or not its close succeeded. The shape of every
    /// closed record is remembered for [`remembered`](Self::remembered).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CloseFailed`] listing the records that did not
    /// acknowledge close in time. Teardown is complete either way.
    pub async fn close_all(&self) -> Result<()> {
        // Snapshot and remember under one read lock, so a concurrent
        // `release` is either fully before or fully after.
        let records = {
            let tracked = self.records.read();
            let mut records: Vec<_> = tracked.values().cloned().collect();
            records.sort_by_key(|record| record.id);
            self.remember(&records);
            records
        };
        if records.is_empty() {
            return Ok(());
        }

        info!(count = records.len(), "Closing all tracked connections");

        let close_timeout = self.close_timeout;
        let outcomes = join_all(records.iter().map(|record| async move {
            let outcome = timeout(close_timeout, record.handle.close()).await;
            (record.id, record.generation, outcome)
        }))
        .await;

        let mut failures = Vec::new();
        for (id, generation, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => debug!(id = %id, "Connection closed"),
                Ok(Err(e)) => {
                    warn!(id = %id, error = %e, "Connection close failed, removing anyway");
                    failures.push(id);
                }
                Err(_) => {
                    warn!(
                        id = %id,
                        timeout_ms = saturating_millis(close_timeout),
                        "Connection close not acknowledged, removing anyway"
                    );
                    failures.push(id);
                }
            }
            self.untrack_generation(id, generation);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailed { failures })
        }
    }

    /// Returns the blueprints remembered by previous `close_all` calls.
    #[must_use]
    pub fn remembered(&self) -> Vec<ConnectionBlueprint> {
        self.remembered.lock().clone()
    }

    /// Drops every remembered blueprint.
    pub fn forget_all(&self) {
        self.remembered.lock().clear();
    }

    /// Drops one remembered blueprint.
    pub fn forget(&self, id: RecordId) {
        self.remembered.lock().retain(|blueprint| blueprint.id != id);
    }

    /// Untracks `id` and forgets its blueprint in one step.
    ///
    /// Returns the record if it was tracked. The connection is not closed.
    pub fn release(&self, id: RecordId) -> Option<ConnectionRecord> {
        let mut records = self.records.write();
        let record = records.remove(&id);
        self.remembered.lock().retain(|blueprint| blueprint.id != id);
        if record.is_some() {
            debug!(id = %id, "Connection released");
        }
        record
    }

    /// Bound applied to each close acknowledgement.
    #[inline]
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Removes records whose connection is no longer open.
    ///
    /// Returns how many were removed.
    pub fn prune_closed(&self) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|id, record| {
            let open = record.state() == ConnectionState::Open;
            if !open {
                debug!(id = %id, state = ?record.state(), "Pruning non-open connection");
            }
            open
        });
        before - records.len()
    }
}

// ============================================================================
// ConnectionRegistry - Internals
// ============================================================================

impl ConnectionRegistry {
    fn insert(
        &self,
        id: RecordId,
        endpoint: String,
        subprotocol: Option<String>,
        handle: Arc<dyn Transport>,
        handler: Option<MessageHandler>,
    ) -> Result<RecordId> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut records = self.records.write();
            if records.contains_key(&id) {
                return Err(Error::duplicate_id(id));
            }

            debug!(id = %id, endpoint = %endpoint, generation, "Connection tracked");
            records.insert(
                id,
                ConnectionRecord {
                    id,
                    endpoint,
                    subprotocol,
                    handle: Arc::clone(&handle),
                    generation,
                    handler,
                },
            );
        }

        self.spawn_watcher(id, generation, handle);
        Ok(id)
    }

    /// Untracks the record once its connection closes.
    fn spawn_watcher(&self, id: RecordId, generation: u64, handle: Arc<dyn Transport>) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(id = %id, "No tokio runtime, self-removal disabled for connection");
            return;
        };

        let registry = self.weak_self.clone();
        runtime.spawn(async move {
            handle.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.untrack_generation(id, generation);
            }
        });
    }

    /// Removes `id` only if it still holds the given generation.
    fn untrack_generation(&self, id: RecordId, generation: u64) {
        let mut records = self.records.write();
        if records
            .get(&id)
            .is_some_and(|record| record.generation == generation)
        {
            records.remove(&id);
            debug!(id = %id, generation, "Connection untracked");
        }
    }

    /// Merges blueprints of `records` into the remembered list by id.
    fn remember(&self, records: &[ConnectionRecord]) {
        let mut remembered = self.remembered.lock();
        for record in records {
            let blueprint = record.blueprint();
            match remembered.iter_mut().find(|known| known.id == record.id) {
                Some(known) => *known = blueprint,
                None => remembered.push(blueprint),
            }
        }
        remembered.sort_by_key(|blueprint| blueprint.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
