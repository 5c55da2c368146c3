//! Lifecycle signal normalizer.
//!
//! The single owner of environment subscriptions. Raw events come in
//! through one [`EnvironmentHandle`], are mapped to [`LifecycleSignal`]s,
//! filtered for back-to-back redundancy, and fanned out in order to every
//! [`Subscription`].
//!
//! ```text
//! environment ──► EnvironmentHandle ──► pump task ──► dispatch
//!                                                       │ dedup
//!                                     ┌─────────────────┼────────────────┐
//!                                     ▼                 ▼                ▼
//!                               Subscription 1    Subscription 2    Subscription N
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;

use super::event::{EnvironmentEvent, LifecycleSignal, SignalClass};

// ============================================================================
// Constants
// ============================================================================

/// Default window in which a same-class signal counts as redundant.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(250);

// ============================================================================
// EnvironmentHandle
// ============================================================================

/// Entry point for raw environment events.
///
/// Obtained from [`SignalNormalizer::attach`]. Cheap to clone; every clone
/// feeds the same ordered channel.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    tx: mpsc::UnboundedSender<EnvironmentEvent>,
}

impl EnvironmentHandle {
    /// Submits a raw event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the normalizer is gone.
    pub fn emit(&self, event: EnvironmentEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::ConnectionClosed)
    }

    /// Decodes and submits a raw event in JSON form.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the event cannot be decoded
    /// - [`Error::ConnectionClosed`] if the normalizer is gone
    pub fn emit_json(&self, json: &str) -> Result<()> {
        self.emit(EnvironmentEvent::from_json(json)?)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// An ordered stream of normalized signals.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<LifecycleSignal>,
}

impl Subscription {
    /// This subscription's id, for [`SignalNormalizer::unsubscribe`].
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receives the next signal. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<LifecycleSignal> {
        self.rx.recv().await
    }

    /// Receives a signal if one is already queued.
    pub fn try_recv(&mut self) -> Option<LifecycleSignal> {
        match self.rx.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

// ============================================================================
// SignalNormalizer
// ============================================================================

/// Shared state of the normalizer.
struct NormalizerInner {
    /// Live subscribers.
    subscribers: RwLock<FxHashMap<SubscriptionId, mpsc::UnboundedSender<LifecycleSignal>>>,
    /// Class and time of the last emitted signal. Held while broadcasting
    /// so fan-out order matches dispatch order.
    last_emitted: Mutex<Option<(SignalClass, Instant)>>,
    /// Redundancy window.
    dedup_window: Duration,
    /// The one environment attachment.
    environment: Mutex<Option<EnvironmentHandle>>,
}

/// Maps raw environment events to lifecycle signals and fans them out.
///
/// Cloning shares the same subscriber list.
#[derive(Clone)]
pub struct SignalNormalizer {
    inner: Arc<NormalizerInner>,
}

impl fmt::Debug for SignalNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalNormalizer")
            .field("subscribers", &self.subscriber_count())
            .field("dedup_window", &self.inner.dedup_window)
            .field("attached", &self.inner.environment.lock().is_some())
            .finish()
    }
}

impl Default for SignalNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalNormalizer {
    /// Creates a normalizer with the default dedup window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dedup_window(DEFAULT_DEDUP_WINDOW)
    }

    /// Creates a normalizer.
    ///
    /// A zero window disables redundancy filtering.
    #[must_use]
    pub fn with_dedup_window(dedup_window: Duration) -> Self {
        Self {
            inner: Arc::new(NormalizerInner {
                subscribers: RwLock::new(FxHashMap::default()),
                last_emitted: Mutex::new(None),
                dedup_window,
                environment: Mutex::new(None),
            }),
        }
    }

    /// Returns the environment entry point, attaching on first call.
    ///
    /// The first call spawns the pump task (so it must run inside a tokio
    /// runtime). Later calls return the same handle; the environment is
    /// never subscribed twice.
    pub fn attach(&self) -> EnvironmentHandle {
        let mut environment = self.inner.environment.lock();
        if let Some(handle) = environment.as_ref() {
            return handle.clone();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<EnvironmentEvent>();
        // Weak: the inner state owns the sender, so a strong ref would never end.
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                SignalNormalizer { inner }.dispatch(event);
            }
            debug!("Environment channel closed");
        });

        debug!("Environment attached");
        let handle = EnvironmentHandle { tx };
        *environment = Some(handle.clone());
        handle
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::generate();
        self.inner.subscribers.write().insert(id, tx);
        debug!(subscription = %id, "Signal subscriber added");
        Subscription { id, rx }
    }

    /// Removes a subscriber. Its stream ends after queued signals.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.subscribers.write().remove(&id).is_some() {
            debug!(subscription = %id, "Signal subscriber removed");
        }
    }

    /// Returns the number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Normalizes one raw event and broadcasts it.
    ///
    /// Returns the emitted signal, or `None` if it was redundant with the
    /// previous one.
    pub fn dispatch(&self, event: EnvironmentEvent) -> Option<LifecycleSignal> {
        let signal = LifecycleSignal::from(event);
        let class = signal.class();
        let now = Instant::now();

        let mut last_emitted = self.inner.last_emitted.lock();
        if let Some((last_class, at)) = *last_emitted
            && last_class == class
            && now.duration_since(at) < self.inner.dedup_window
        {
            trace!(signal = signal.name(), "Redundant signal dropped");
            return None;
        }
        *last_emitted = Some((class, now));

        self.broadcast(signal);
        Some(signal)
    }

    fn broadcast(&self, signal: LifecycleSignal) {
        let mut dead = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for (id, tx) in subscribers.iter() {
                if tx.send(signal).is_err() {
                    dead.push(*id);
                }
            }
            trace!(signal = signal.name(), subscribers = subscribers.len(), "Signal broadcast");
        }

        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for id in dead {
                subscribers.remove(&id);
                debug!(subscription = %id, "Dropped closed subscriber");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
