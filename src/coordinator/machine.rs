//! Lifecycle coordinator.
//!
//! The [`Coordinator`] consumes lifecycle signals one at a time and keeps
//! the remote network toggle and the tracked connections consistent with
//! them.
//!
//! # Transitions
//!
//! | Signal | Actions | Phase |
//! |--------|---------|-------|
//! | `VisibilityHidden`, `PageHide { persisted: true }` | disable | Suspended |
//! | `VisibilityVisible`, `PageShow { persisted: true }` | enable if intended | Active if intended |
//! | `Online` | intent on, enable | Active |
//! | `Offline` | intent off, disable | Suspended |
//! | `Freeze` | close all, disable | Suspended |
//! | `Resume` | if intended: enable, reestablish | Active (Suspended on rollback) |
//!
//! Every action is idempotent, so redundant signals are harmless. Nothing
//! here is fatal: every failure ends in "networking suspended".

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RecordId, SubscriptionId};
use crate::network::{NetworkToggle, RemoteNetwork};
use crate::signal::{LifecycleSignal, SignalNormalizer, Subscription};
use crate::transport::{
    ConnectionBlueprint, ConnectionRegistry, Connector, TrackedConnection, Transport,
};

use super::backlog::Backlog;
use super::builder::CoordinatorBuilder;
use super::options::CoordinatorOptions;

// ============================================================================
// Types
// ============================================================================

/// Coarse lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// `initialize` not called yet.
    Uninitialized,
    /// Network enabled, connections usable.
    Active,
    /// Network disabled; connections may be closed.
    Suspended,
}

/// Snapshot of the coordinator's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorState {
    /// Last explicit online/offline intent. Only `Online`/`Offline` change it.
    pub network_intent_enabled: bool,
    /// Whether `initialize` has run.
    pub initialized: bool,
    /// Current phase.
    pub phase: Phase,
}

/// Signal worker bookkeeping.
struct Worker {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

/// Internal shared state for the coordinator.
pub(crate) struct CoordinatorInner {
    /// Timeouts and limits.
    options: CoordinatorOptions,
    /// Tracked connections.
    registry: Arc<ConnectionRegistry>,
    /// Connection factory.
    connector: Arc<dyn Connector>,
    /// Source of lifecycle signals.
    normalizer: SignalNormalizer,
    /// Intent, init flag and phase.
    state: Mutex<CoordinatorState>,
    /// Remote toggle, set once by `initialize`.
    toggle: OnceLock<NetworkToggle>,
    /// Serializes transitions; held across their awaits. Shared with
    /// tracked connections so an explicit close never races a transition.
    transition: Arc<tokio::sync::Mutex<()>>,
    /// Signal worker, present between `initialize` and `shutdown`.
    worker: Mutex<Option<Worker>>,
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            self.normalizer.unsubscribe(worker.subscription);
            worker.task.abort();
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Connection lifecycle coordinator.
///
/// Construct one per process (or per test) and pass it to whoever needs
/// it. Cloning shares the same state.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use connection_lifecycle::{Coordinator, EnvironmentEvent, RemoteNetwork};
///
/// # async fn example(remote: Arc<dyn RemoteNetwork>) -> connection_lifecycle::Result<()> {
/// let coordinator = Coordinator::builder().build()?;
/// coordinator.initialize(remote);
///
/// let feed = coordinator
///     .create_tracked_connection("wss://example.com/feed", Some("json"))
///     .await?;
///
/// // Platform glue forwards page events here.
/// let environment = coordinator.normalizer().attach();
/// environment.emit(EnvironmentEvent::Freeze)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Coordinator {
    /// Shared inner state.
    pub(crate) inner: Arc<CoordinatorInner>,
}

// ============================================================================
// Coordinator - Display
// ============================================================================

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state())
            .field("connections", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Coordinator - Constructor
// ============================================================================

impl Coordinator {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Creates a coordinator. Options are assumed valid.
    pub(crate) fn new(
        options: CoordinatorOptions,
        connector: Arc<dyn Connector>,
        normalizer: SignalNormalizer,
    ) -> Self {
        let state = CoordinatorState {
            network_intent_enabled: options.initial_network_intent,
            initialized: false,
            phase: Phase::Uninitialized,
        };

        Self {
            inner: Arc::new(CoordinatorInner {
                registry: ConnectionRegistry::with_close_timeout(options.close_timeout),
                options,
                connector,
                normalizer,
                state: Mutex::new(state),
                toggle: OnceLock::new(),
                transition: Arc::new(tokio::sync::Mutex::new(())),
                worker: Mutex::new(None),
            }),
        }
    }
}

// ============================================================================
// Coordinator - Public API
// ============================================================================

impl Coordinator {
    /// One-time setup: binds the remote layer and starts consuming signals.
    ///
    /// Idempotent; later calls, from any collaborator, do nothing. Must be
    /// called inside a tokio runtime.
    pub fn initialize(&self, remote: Arc<dyn RemoteNetwork>) {
        let mut state = self.inner.state.lock();
        if state.initialized {
            debug!("Coordinator already initialized");
            return;
        }

        let toggle = NetworkToggle::new(remote, self.inner.options.toggle_timeout);
        if self.inner.toggle.set(toggle).is_err() {
            return;
        }

        let subscription = self.inner.normalizer.subscribe();
        let subscription_id = subscription.id();
        let task = tokio::spawn(Self::run_worker(
            Arc::downgrade(&self.inner),
            subscription,
            self.inner.options.backlog_capacity,
        ));
        *self.inner.worker.lock() = Some(Worker {
            subscription: subscription_id,
            task,
        });

        state.initialized = true;
        state.phase = Phase::Active;
        info!(
            network_intent = state.network_intent_enabled,
            "Connection lifecycle coordinator initialized"
        );
    }

    /// Applies one signal and waits for its actions to settle.
    ///
    /// Transitions never interleave: this waits for any transition already
    /// in flight. Signals before `initialize` are ignored.
    ///
    /// Returns the phase after the transition.
    pub async fn apply(&self, signal: LifecycleSignal) -> Phase {
        let _transition = self.inner.transition.lock().await;

        let Some(toggle) = self.inner.toggle.get() else {
            debug!(signal = signal.name(), "Signal before initialize ignored");
            return self.current_phase();
        };

        debug!(signal = signal.name(), "Applying lifecycle signal");

        match signal {
            LifecycleSignal::VisibilityHidden | LifecycleSignal::PageHide { persisted: true } => {
                let _ = toggle.disable().await;
                self.set_phase(Phase::Suspended);
            }

            LifecycleSignal::VisibilityVisible | LifecycleSignal::PageShow { persisted: true } => {
                if self.network_intent_enabled() {
                    let _ = toggle.enable().await;
                    self.settle_active();
                } else {
                    debug!(signal = signal.name(), "Network intent off, staying suspended");
                }
            }

            LifecycleSignal::PageHide { persisted: false }
            | LifecycleSignal::PageShow { persisted: false } => {
                debug!(signal = signal.name(), "Page not cached, nothing to do");
            }

            LifecycleSignal::Online => {
                self.set_network_intent(true);
                let _ = toggle.enable().await;
                self.settle_active();
            }

            LifecycleSignal::Offline => {
                self.set_network_intent(false);
                let _ = toggle.disable().await;
                self.set_phase(Phase::Suspended);
            }

            LifecycleSignal::Freeze => {
                if let Err(e) = self.inner.registry.close_all().await {
                    warn!(error = %e, "Teardown on freeze incomplete");
                }
                let _ = toggle.disable().await;
                self.set_phase(Phase::Suspended);
            }

            LifecycleSignal::Resume => {
                if self.network_intent_enabled() {
                    let _ = toggle.enable().await;
                    if self.reestablish_locked(toggle).await.is_ok() {
                        self.settle_active();
                    }
                } else {
                    debug!("Network intent off, connections stay closed");
                }
            }
        }

        self.current_phase()
    }

    /// Registers an existing connection under a new logical id.
    ///
    /// Ids come from a process-wide counter, so this does not fail in
    /// practice. The `Result` mirrors [`ConnectionRegistry::track`].
    pub fn track(
        &self,
        endpoint: impl Into<String>,
        subprotocol: Option<String>,
        handle: Arc<dyn Transport>,
    ) -> Result<RecordId> {
        self.inner
            .registry
            .track(RecordId::next(), endpoint, subprotocol, handle)
    }

    /// Opens a connection with the configured connector and tracks it.
    ///
    /// Waits for any transition in flight, so a connection is never opened
    /// halfway through a teardown.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if the connector rejects the endpoint
    /// - [`Error::ConnectionTimeout`] if opening exceeds the open timeout
    /// - [`Error::Connection`] if opening fails
    pub async fn create_tracked_connection(
        &self,
        endpoint: &str,
        subprotocol: Option<&str>,
    ) -> Result<TrackedConnection> {
        let _transition = self.inner.transition.lock().await;

        let handle = self.open(endpoint, subprotocol).await?;
        let id = self.track(endpoint, subprotocol.map(str::to_owned), handle)?;

        debug!(id = %id, endpoint, "Tracked connection created");
        Ok(TrackedConnection::new(
            id,
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.transition),
        ))
    }

    /// Closes and untracks every connection, remembering them for
    /// [`reestablish`](Self::reestablish).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CloseFailed`] if some closes were not acknowledged.
    /// Those records are removed anyway.
    pub async fn close_all(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        self.inner.registry.close_all().await
    }

    /// Reopens every connection remembered from the last `close_all`.
    ///
    /// All-or-nothing: if any reopen fails, every connection is closed, the
    /// network is disabled and the phase becomes `Suspended`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before `initialize`
    /// - [`Error::Reestablish`] after a rollback
    pub async fn reestablish(&self) -> Result<()> {
        let _transition = self.inner.transition.lock().await;
        let toggle = self.inner.toggle.get().ok_or(Error::NotInitialized)?;
        self.reestablish_locked(toggle).await
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub fn current_phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Last explicit online/offline intent.
    #[inline]
    #[must_use]
    pub fn network_intent_enabled(&self) -> bool {
        self.inner.state.lock().network_intent_enabled
    }

    /// Full state snapshot.
    #[inline]
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.inner.state.lock()
    }

    /// The connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// The signal normalizer this coordinator listens to.
    #[inline]
    #[must_use]
    pub fn normalizer(&self) -> &SignalNormalizer {
        &self.inner.normalizer
    }

    /// Stops consuming signals. Idempotent.
    ///
    /// State and connections are left as they are; [`apply`](Self::apply)
    /// keeps working.
    pub fn shutdown(&self) {
        if let Some(worker) = self.inner.worker.lock().take() {
            self.inner.normalizer.unsubscribe(worker.subscription);
            worker.task.abort();
            info!("Connection lifecycle coordinator stopped listening");
        }
    }
}

// ============================================================================
// Coordinator - Transitions
// ============================================================================

impl Coordinator {
    /// Reopens remembered connections. Caller holds the transition lock.
    async fn reestablish_locked(&self, toggle: &NetworkToggle) -> Result<()> {
        let registry = &self.inner.registry;

        let pending: Vec<ConnectionBlueprint> = registry
            .remembered()
            .into_iter()
            .filter(|blueprint| !registry.contains(blueprint.id))
            .collect();

        if pending.is_empty() {
            registry.forget_all();
            return Ok(());
        }

        info!(count = pending.len(), "Re-establishing connections");

        // First failure drops the attempts still in flight.
        let attempts = pending.iter().map(|blueprint| self.reopen(blueprint));
        match try_join_all(attempts).await {
            Ok(ids) => {
                registry.forget_all();
                info!(count = ids.len(), "Connections re-established");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Re-establish failed, rolling back to suspended");
                if let Err(close_err) = registry.close_all().await {
                    warn!(error = %close_err, "Rollback teardown incomplete");
                }
                let _ = toggle.disable().await;
                self.set_phase(Phase::Suspended);
                Err(e)
            }
        }
    }

    /// Opens one remembered connection and tracks it under its old id.
    async fn reopen(&self, blueprint: &ConnectionBlueprint) -> Result<RecordId> {
        let handle = self
            .open(&blueprint.endpoint, blueprint.subprotocol.as_deref())
            .await
            .map_err(|e| Error::reestablish(blueprint.id, e.to_string()))?;

        match self
            .inner
            .registry
            .track_blueprint(blueprint, Arc::clone(&handle))
        {
            Ok(id) => {
                debug!(id = %id, endpoint = %blueprint.endpoint, "Connection re-established");
                Ok(id)
            }
            Err(e) => {
                let _ = handle.close().await;
                Err(Error::reestablish(blueprint.id, e.to_string()))
            }
        }
    }

    /// Opens a connection within the open timeout.
    async fn open(&self, endpoint: &str, subprotocol: Option<&str>) -> Result<Arc<dyn Transport>> {
        let open_timeout = self.inner.options.open_timeout;
        timeout(open_timeout, self.inner.connector.connect(endpoint, subprotocol))
            .await
            .map_err(|_| Error::connection_timeout_after(open_timeout))?
    }

    /// Enters `Active`, dropping records that are no longer open.
    fn settle_active(&self) {
        let pruned = self.inner.registry.prune_closed();
        if pruned > 0 {
            debug!(pruned, "Dropped non-open connections on activation");
        }
        self.set_phase(Phase::Active);
    }

    fn set_phase(&self, phase: Phase) {
        let mut state = self.inner.state.lock();
        if state.phase != phase {
            info!(from = ?state.phase, to = ?phase, "Phase transition");
            state.phase = phase;
        }
    }

    fn set_network_intent(&self, enabled: bool) {
        let mut state = self.inner.state.lock();
        if state.network_intent_enabled != enabled {
            info!(enabled, "Network intent changed");
            state.network_intent_enabled = enabled;
        }
    }
}

// ============================================================================
// Coordinator - Signal Worker
// ============================================================================

impl Coordinator {
    /// Drains the subscription into the backlog and applies signals in order.
    async fn run_worker(
        inner: Weak<CoordinatorInner>,
        mut subscription: Subscription,
        backlog_capacity: usize,
    ) {
        debug!("Signal worker started");
        let mut backlog = Backlog::new(backlog_capacity);

        loop {
            if backlog.is_empty() {
                match subscription.recv().await {
                    Some(signal) => backlog.push(signal),
                    None => break,
                }
            }

            // Everything that arrived during the last transition.
            while let Some(signal) = subscription.try_recv() {
                backlog.push(signal);
            }

            let Some(signal) = backlog.pop() else {
                continue;
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };

            Coordinator { inner }.apply(signal).await;
        }

        debug!("Signal worker terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use proptest::prelude::*;

    use crate::error::ToggleDirection;
    use crate::signal::{EnvironmentEvent, VisibilityState};
    use crate::testing::{FakeTransport, RecordingRemote, ScriptedConnector};
    use crate::transport::ConnectionState;

    struct Harness {
        coordinator: Coordinator,
        remote: Arc<RecordingRemote>,
        connector: Arc<ScriptedConnector>,
    }

    fn test_options() -> CoordinatorOptions {
        CoordinatorOptions::new()
            .with_close_timeout(Duration::from_millis(200))
            .with_open_timeout(Duration::from_millis(200))
            .with_dedup_window(Duration::ZERO)
    }

    fn harness() -> Harness {
        harness_with(test_options())
    }

    fn harness_with(options: CoordinatorOptions) -> Harness {
        let connector = ScriptedConnector::new();
        let remote = RecordingRemote::new();
        let coordinator = Coordinator::builder()
            .connector_arc(connector.clone())
            .options(options)
            .build()
            .expect("build");
        coordinator.initialize(remote.clone());

        Harness {
            coordinator,
            remote,
            connector,
        }
    }

    impl Harness {
        async fn connect(&self, endpoint: &str) -> TrackedConnection {
            self.coordinator
                .create_tracked_connection(endpoint, None)
                .await
                .expect("create tracked connection")
        }

        fn all_open(&self) -> bool {
            self.coordinator
                .registry()
                .snapshot()
                .iter()
                .all(|record| record.state() == ConnectionState::Open)
        }
    }

    /// Polls until `check` holds, letting spawned tasks run.
    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_moves_to_active() {
        let coordinator = Coordinator::builder().build().expect("build");
        assert_eq!(coordinator.current_phase(), Phase::Uninitialized);

        coordinator.initialize(RecordingRemote::new());

        let state = coordinator.state();
        assert!(state.initialized);
        assert_eq!(state.phase, Phase::Active);
        assert!(state.network_intent_enabled);
    }

    #[tokio::test]
    async fn test_initialize_twice_subscribes_once() {
        let h = harness();
        h.coordinator.initialize(h.remote.clone());
        h.coordinator.initialize(RecordingRemote::new());

        assert_eq!(h.coordinator.normalizer().subscriber_count(), 1);

        let environment = h.coordinator.normalizer().attach();
        environment
            .emit(EnvironmentEvent::VisibilityChange {
                visibility_state: VisibilityState::Hidden,
            })
            .expect("emit");

        eventually(|| h.remote.disable_calls() >= 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.remote.disable_calls(), 1);
        assert_eq!(h.coordinator.current_phase(), Phase::Suspended);
    }

    #[tokio::test]
    async fn test_signal_before_initialize_is_ignored() {
        let coordinator = Coordinator::builder().build().expect("build");

        let phase = coordinator.apply(LifecycleSignal::Offline).await;

        assert_eq!(phase, Phase::Uninitialized);
        assert!(coordinator.network_intent_enabled());
    }

    #[tokio::test]
    async fn test_reestablish_before_initialize_errors() {
        let coordinator = Coordinator::builder().build().expect("build");
        assert!(matches!(
            coordinator.reestablish().await,
            Err(Error::NotInitialized)
        ));
    }

    // ------------------------------------------------------------------------
    // Transition table
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_hidden_then_visible() {
        let h = harness();

        assert_eq!(
            h.coordinator.apply(LifecycleSignal::VisibilityHidden).await,
            Phase::Suspended
        );
        assert_eq!(
            h.coordinator.apply(LifecycleSignal::VisibilityVisible).await,
            Phase::Active
        );
        assert_eq!(
            h.remote.calls(),
            vec![ToggleDirection::Disable, ToggleDirection::Enable]
        );
    }

    #[tokio::test]
    async fn test_persisted_page_hide_and_show() {
        let h = harness();

        h.coordinator
            .apply(LifecycleSignal::PageHide { persisted: true })
            .await;
        assert_eq!(h.coordinator.current_phase(), Phase::Suspended);

        h.coordinator
            .apply(LifecycleSignal::PageShow { persisted: true })
            .await;
        assert_eq!(h.coordinator.current_phase(), Phase::Active);
        assert_eq!(h.remote.enable_calls(), 1);
        assert_eq!(h.remote.disable_calls(), 1);
    }

    #[tokio::test]
    async fn test_non_persisted_page_events_are_noops() {
        let h = harness();

        h.coordinator
            .apply(LifecycleSignal::PageHide { persisted: false })
            .await;
        h.coordinator
            .apply(LifecycleSignal::PageShow { persisted: false })
            .await;

        assert!(h.remote.calls().is_empty());
        assert_eq!(h.coordinator.current_phase(), Phase::Active);
    }

    #[tokio::test]
    async fn test_offline_then_visible_keeps_network_disabled() {
        let h = harness();

        h.coordinator.apply(LifecycleSignal::Offline).await;
        assert!(!h.coordinator.network_intent_enabled());

        h.coordinator.apply(LifecycleSignal::VisibilityVisible).await;

        assert_eq!(h.remote.enable_calls(), 0);
        assert_eq!(h.coordinator.current_phase(), Phase::Suspended);
    }

    #[tokio::test]
    async fn test_visibility_never_changes_intent() {
        let h = harness();

        h.coordinator.apply(LifecycleSignal::Offline).await;
        h.coordinator.apply(LifecycleSignal::VisibilityHidden).await;
        h.coordinator.apply(LifecycleSignal::VisibilityVisible).await;
        h.coordinator.apply(LifecycleSignal::Freeze).await;
        h.coordinator.apply(LifecycleSignal::Resume).await;
        assert!(!h.coordinator.network_intent_enabled());

        h.coordinator.apply(LifecycleSignal::Online).await;
        h.coordinator.apply(LifecycleSignal::VisibilityHidden).await;
        assert!(h.coordinator.network_intent_enabled());
    }

    #[tokio::test]
    async fn test_online_offline_online_counts() {
        let h = harness();

        h.coordinator.apply(LifecycleSignal::Online).await;
        h.coordinator.apply(LifecycleSignal::Offline).await;
        let phase = h.coordinator.apply(LifecycleSignal::Online).await;

        assert_eq!(phase, Phase::Active);
        assert_eq!(h.remote.enable_calls(), 2);
        assert_eq!(h.remote.disable_calls(), 1);
    }

    #[tokio::test]
    async fn test_toggle_failure_is_not_fatal() {
        let h = harness();
        h.remote.fail_disable(true);

        let phase = h.coordinator.apply(LifecycleSignal::VisibilityHidden).await;
        assert_eq!(phase, Phase::Suspended);

        // Next matching signal retries the same primitive.
        h.remote.fail_disable(false);
        h.coordinator.apply(LifecycleSignal::VisibilityHidden).await;
        assert_eq!(h.remote.disable_calls(), 2);
        assert!(!h.remote.network_enabled());
    }

    // ------------------------------------------------------------------------
    // Freeze / Resume
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_freeze_tears_everything_down() {
        let h = harness();
        h.connect("ws://c1").await;
        h.connect("ws://c2").await;
        assert_eq!(h.coordinator.registry().len(), 2);

        let phase = h.coordinator.apply(LifecycleSignal::Freeze).await;

        assert_eq!(phase, Phase::Suspended);
        assert!(h.coordinator.registry().is_empty());
        assert_eq!(h.remote.disable_calls(), 1);
        for (_, transport) in h.connector.opened() {
            assert_eq!(transport.state(), ConnectionState::Closed);
        }
    }

    #[tokio::test]
    async fn test_resume_recreates_under_same_ids() {
        let h = harness();
        let c1 = h.connect("ws://c1").await;
        let c2 = h.connect("ws://c2").await;

        h.coordinator.apply(LifecycleSignal::Freeze).await;
        let phase = h.coordinator.apply(LifecycleSignal::Resume).await;

        assert_eq!(phase, Phase::Active);
        let ids: Vec<_> = h
            .coordinator
            .registry()
            .snapshot()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![c1.id(), c2.id()]);
        assert!(h.all_open());
        assert_eq!(h.connector.opened().len(), 4);
        assert!(h.coordinator.registry().remembered().is_empty());

        // Caller handles follow the new connections.
        c1.send_text("after resume").expect("send");
        let fresh = h.connector.latest("ws://c1").expect("reopened");
        assert_eq!(fresh.sent(), vec!["after resume".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_while_offline_stays_closed() {
        let h = harness();
        h.connect("ws://c1").await;

        h.coordinator.apply(LifecycleSignal::Freeze).await;
        h.coordinator.apply(LifecycleSignal::Offline).await;
        let phase = h.coordinator.apply(LifecycleSignal::Resume).await;

        assert_eq!(phase, Phase::Suspended);
        assert!(h.coordinator.registry().is_empty());
        assert_eq!(h.connector.attempts("ws://c1"), 1);

        // Coming back online and resuming again restores it.
        h.coordinator.apply(LifecycleSignal::Online).await;
        h.coordinator.apply(LifecycleSignal::Resume).await;
        assert_eq!(h.coordinator.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_reestablish_failure_rolls_back_fully() {
        let h = harness();
        let c1 = h.connect("ws://c1").await;
        h.connect("ws://c2").await;

        h.coordinator.close_all().await.expect("close_all");
        h.connector.fail("ws://c2");
        let disables_before = h.remote.disable_calls();

        let result = h.coordinator.reestablish().await;

        assert!(matches!(result, Err(Error::Reestablish { .. })));
        assert!(h.coordinator.registry().is_empty());
        assert_eq!(h.coordinator.current_phase(), Phase::Suspended);
        assert_eq!(h.remote.disable_calls(), disables_before + 1);

        // c1 opened during the attempt and was closed by the rollback.
        let reopened_c1 = h.connector.latest("ws://c1").expect("c1 reopened");
        assert_eq!(reopened_c1.state(), ConnectionState::Closed);
        assert_eq!(c1.state(), ConnectionState::Closed);

        // Remembered for the next attempt.
        assert_eq!(h.coordinator.registry().remembered().len(), 2);
        h.connector.heal("ws://c2");
        h.coordinator.apply(LifecycleSignal::Resume).await;
        assert_eq!(h.coordinator.registry().len(), 2);
        assert_eq!(h.coordinator.current_phase(), Phase::Active);
    }

    #[tokio::test]
    async fn test_resume_failure_ends_suspended() {
        let h = harness();
        h.connect("ws://c1").await;

        h.coordinator.apply(LifecycleSignal::Freeze).await;
        h.connector.fail("ws://c1");
        let phase = h.coordinator.apply(LifecycleSignal::Resume).await;

        assert_eq!(phase, Phase::Suspended);
        assert!(h.coordinator.registry().is_empty());
        assert_eq!(h.remote.calls().last(), Some(&ToggleDirection::Disable));
    }

    #[tokio::test]
    async fn test_hidden_and_freeze_commute() {
        let a = harness();
        a.connect("ws://c1").await;
        a.coordinator.apply(LifecycleSignal::VisibilityHidden).await;
        a.coordinator.apply(LifecycleSignal::Freeze).await;

        let b = harness();
        b.connect("ws://c1").await;
        b.coordinator.apply(LifecycleSignal::Freeze).await;
        b.coordinator.apply(LifecycleSignal::VisibilityHidden).await;

        for h in [&a, &b] {
            assert_eq!(h.coordinator.current_phase(), Phase::Suspended);
            assert!(h.coordinator.registry().is_empty());
            assert!(!h.remote.network_enabled());
            assert_eq!(h.coordinator.registry().remembered().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_visible_prunes_dead_connections() {
        let h = harness();
        h.connect("ws://c1").await;
        h.connect("ws://c2").await;

        h.coordinator.apply(LifecycleSignal::VisibilityHidden).await;
        let c2 = h.connector.latest("ws://c2").expect("c2");
        c2.set_state(ConnectionState::Closing);
        h.coordinator.apply(LifecycleSignal::VisibilityVisible).await;

        assert_eq!(h.coordinator.registry().len(), 1);
        assert!(h.all_open());
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_track_existing_handle() {
        let h = harness();
        let fake = FakeTransport::open();

        let id = h
            .coordinator
            .track("ws://external", Some("v1".into()), fake.clone())
            .expect("track");

        let record = h.coordinator.registry().get(id).expect("tracked");
        assert_eq!(record.endpoint, "ws://external");
        assert_eq!(record.subprotocol.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_track_same_endpoint_gets_fresh_ids() {
        let h = harness();

        let first = h
            .coordinator
            .track("ws://same", None, FakeTransport::open())
            .expect("track");
        let second = h
            .coordinator
            .track("ws://same", None, FakeTransport::open())
            .expect("track");

        assert_ne!(first, second);
        assert_eq!(h.coordinator.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_create_tracked_connection_failure_tracks_nothing() {
        let h = harness();
        h.connector.fail("ws://down");

        let result = h
            .coordinator
            .create_tracked_connection("ws://down", None)
            .await;

        assert!(matches!(result, Err(Error::Connection { .. })));
        assert!(h.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_close_is_not_reestablished() {
        let h = harness();
        let c1 = h.connect("ws://c1").await;
        h.connect("ws://c2").await;

        c1.close().await.expect("close");
        h.coordinator.apply(LifecycleSignal::Freeze).await;
        h.coordinator.apply(LifecycleSignal::Resume).await;

        assert_eq!(h.coordinator.registry().len(), 1);
        assert_eq!(h.connector.attempts("ws://c1"), 1);
        assert!(c1.send_text("gone").is_err());
    }

    #[tokio::test]
    async fn test_close_during_freeze_is_not_reestablished() {
        let h = harness();
        h.connector.stall_close("ws://c1");
        let c1 = h.connect("ws://c1").await;
        h.connect("ws://c2").await;

        let closing = tokio::spawn({
            let c1 = c1.clone();
            async move { c1.close().await }
        });
        tokio::task::yield_now().await;

        h.coordinator.apply(LifecycleSignal::Freeze).await;
        h.coordinator.apply(LifecycleSignal::Resume).await;

        assert!(!h.coordinator.registry().contains(c1.id()));
        assert_eq!(h.coordinator.registry().len(), 1);
        assert_eq!(h.connector.attempts("ws://c1"), 1);

        // Unacknowledged close gives up after the close timeout.
        let result = closing.await.expect("close task");
        assert!(matches!(result, Err(Error::CloseFailed { .. })));
        assert!(!h.coordinator.registry().contains(c1.id()));
    }

    #[tokio::test]
    async fn test_message_handler_follows_reconnect() {
        let h = harness();
        let c1 = h.connect("ws://c1").await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        c1.set_message_handler(Some(Arc::new(move |inbound| {
            let _ = tx.send(inbound);
        })))
        .expect("handler");

        h.coordinator.apply(LifecycleSignal::Freeze).await;
        h.coordinator.apply(LifecycleSignal::Resume).await;

        let fresh = h.connector.latest("ws://c1").expect("reopened");
        fresh.deliver(crate::transport::Inbound::Text("hi".into()));
        assert_eq!(
            rx.recv().await,
            Some(crate::transport::Inbound::Text("hi".into()))
        );
    }

    // ------------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_environment_events_drive_transitions_in_order() {
        let h = harness();
        h.connect("ws://c1").await;
        let environment = h.coordinator.normalizer().attach();

        environment.emit(EnvironmentEvent::Freeze).expect("emit");
        environment.emit(EnvironmentEvent::Resume).expect("emit");

        eventually(|| {
            h.connector.opened().len() == 2 && h.coordinator.current_phase() == Phase::Active
        })
        .await;
        assert_eq!(h.coordinator.registry().len(), 1);
        assert!(h.all_open());
    }

    #[tokio::test]
    async fn test_backlog_overflow_keeps_explicit_offline() {
        let h = harness_with(test_options().with_backlog_capacity(2));

        // Queued before the worker first runs, so the backlog overflows.
        let normalizer = h.coordinator.normalizer();
        let _ = normalizer.dispatch(EnvironmentEvent::Offline);
        let _ = normalizer.dispatch(EnvironmentEvent::VisibilityChange {
            visibility_state: VisibilityState::Hidden,
        });
        let _ = normalizer.dispatch(EnvironmentEvent::VisibilityChange {
            visibility_state: VisibilityState::Visible,
        });

        eventually(|| h.remote.disable_calls() >= 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!h.coordinator.network_intent_enabled());
        assert_eq!(h.remote.enable_calls(), 0);
        assert!(!h.remote.network_enabled());
        assert_eq!(h.coordinator.current_phase(), Phase::Suspended);
    }

    #[tokio::test]
    async fn test_shutdown_stops_listening() {
        let h = harness();
        h.coordinator.shutdown();
        h.coordinator.shutdown();
        assert_eq!(h.coordinator.normalizer().subscriber_count(), 0);

        let _ = h.coordinator.normalizer().dispatch(EnvironmentEvent::Offline);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(h.remote.calls().is_empty());
        assert!(h.coordinator.network_intent_enabled());
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    fn signal_strategy() -> impl Strategy<Value = LifecycleSignal> {
        prop_oneof![
            Just(LifecycleSignal::VisibilityHidden),
            Just(LifecycleSignal::VisibilityVisible),
            any::<bool>().prop_map(|persisted| LifecycleSignal::PageHide { persisted }),
            any::<bool>().prop_map(|persisted| LifecycleSignal::PageShow { persisted }),
            Just(LifecycleSignal::Online),
            Just(LifecycleSignal::Offline),
            Just(LifecycleSignal::Freeze),
            Just(LifecycleSignal::Resume),
        ]
    }

    fn suspend_strategy() -> impl Strategy<Value = LifecycleSignal> {
        prop_oneof![
            Just(LifecycleSignal::VisibilityHidden),
            Just(LifecycleSignal::PageHide { persisted: true }),
            Just(LifecycleSignal::Offline),
            Just(LifecycleSignal::Freeze),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_fail_closed_for_any_n(n in 1usize..8, failing in 0usize..8) {
            let failing = failing % n;
            tokio_test::block_on(async {
                let h = harness();
                for i in 0..n {
                    h.connect(&format!("ws://c{i}")).await;
                }

                h.coordinator.close_all().await.expect("close_all");
                h.connector.fail(&format!("ws://c{failing}"));

                let result = h.coordinator.reestablish().await;

                assert!(result.is_err());
                assert!(h.coordinator.registry().is_empty());
                assert_eq!(h.coordinator.current_phase(), Phase::Suspended);
                for (_, transport) in h.connector.opened() {
                    assert_eq!(transport.state(), ConnectionState::Closed);
                }
            });
        }

        #[test]
        fn prop_active_implies_all_open(signals in proptest::collection::vec(signal_strategy(), 0..24)) {
            tokio_test::block_on(async {
                let h = harness();
                h.connect("ws://c1").await;
                h.connect("ws://c2").await;

                for signal in signals {
                    h.coordinator.apply(signal).await;
                    if h.coordinator.current_phase() == Phase::Active {
                        assert!(h.all_open());
                    }
                }
            });
        }

        #[test]
        fn prop_suspend_sequences_idempotent(signals in proptest::collection::vec(suspend_strategy(), 1..12)) {
            tokio_test::block_on(async {
                let h = harness();
                h.connect("ws://c1").await;
                h.connect("ws://c2").await;

                let observe = |h: &Harness| {
                    (
                        h.coordinator.state(),
                        h.coordinator.registry().len(),
                        h.coordinator.registry().remembered().len(),
                        h.remote.network_enabled(),
                    )
                };

                for signal in &signals {
                    h.coordinator.apply(*signal).await;
                }
                let once = observe(&h);

                for signal in &signals {
                    h.coordinator.apply(*signal).await;
                }
                assert_eq!(observe(&h), once);
            });
        }

        #[test]
        fn prop_intent_only_follows_online_offline(signals in proptest::collection::vec(signal_strategy(), 0..24)) {
            tokio_test::block_on(async {
                let h = harness();
                let mut expected = true;

                for signal in signals {
                    match signal {
                        LifecycleSignal::Online => expected = true,
                        LifecycleSignal::Offline => expected = false,
                        _ => {}
                    }
                    h.coordinator.apply(signal).await;
                    assert_eq!(h.coordinator.network_intent_enabled(), expected);
                }
            });
        }
    }
}
