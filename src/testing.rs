//! Test doubles shared by the unit tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::watch;

use crate::error::{Error, Result, ToggleDirection};
use crate::network::{RemoteError, RemoteNetwork};
use crate::transport::{ConnectionState, Connector, Inbound, MessageHandler, Transport};

// ============================================================================
// FakeTransport
// ============================================================================

/// In-memory connection with controllable state.
pub(crate) struct FakeTransport {
    state_tx: watch::Sender<ConnectionState>,
    acknowledges_close: bool,
    handler: Mutex<Option<MessageHandler>>,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
}

impl FakeTransport {
    fn build(acknowledges_close: bool) -> Arc<Self> {
        Arc::new(Self {
            state_tx: watch::channel(ConnectionState::Open).0,
            acknowledges_close,
            handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// Open connection that closes promptly.
    pub fn open() -> Arc<Self> {
        Self::build(true)
    }

    /// Open connection whose close is never acknowledged.
    pub fn unresponsive() -> Arc<Self> {
        Self::build(false)
    }

    /// Simulates the remote end closing.
    pub fn remote_close(&self) {
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Feeds an inbound frame to the installed handler.
    pub fn deliver(&self, inbound: Inbound) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(inbound);
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn subprotocol(&self) -> Option<&str> {
        None
    }

    fn send_text(&self, text: &str) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().push(text.to_owned());
        Ok(())
    }

    fn set_message_handler(&self, handler: Option<MessageHandler>) {
        *self.handler.lock() = handler;
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.acknowledges_close {
            self.state_tx.send_replace(ConnectionState::Closed);
            Ok(())
        } else {
            self.state_tx.send_replace(ConnectionState::Closing);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn closed(&self) {
        let mut state_rx = self.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

// ============================================================================
// RecordingRemote
// ============================================================================

/// Remote network that records every call.
#[derive(Default)]
pub(crate) struct RecordingRemote {
    calls: Mutex<Vec<ToggleDirection>>,
    enabled: AtomicBool,
    fail_enable: AtomicBool,
    fail_disable: AtomicBool,
    hang: AtomicBool,
}

impl RecordingRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disable(&self, fail: bool) {
        self.fail_disable.store(fail, Ordering::SeqCst);
    }

    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ToggleDirection> {
        self.calls.lock().clone()
    }

    pub fn enable_calls(&self) -> usize {
        self.count(ToggleDirection::Enable)
    }

    pub fn disable_calls(&self) -> usize {
        self.count(ToggleDirection::Disable)
    }

    pub fn network_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn count(&self, direction: ToggleDirection) -> usize {
        self.calls.lock().iter().filter(|&&d| d == direction).count()
    }

    async fn record(&self, direction: ToggleDirection) -> std::result::Result<(), RemoteError> {
        self.calls.lock().push(direction);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let fail = match direction {
            ToggleDirection::Enable => &self.fail_enable,
            ToggleDirection::Disable => &self.fail_disable,
        };
        if fail.load(Ordering::SeqCst) {
            return Err(format!("remote refused to {direction}").into());
        }

        self.enabled
            .store(direction == ToggleDirection::Enable, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteNetwork for RecordingRemote {
    async fn enable_network(&self) -> std::result::Result<(), RemoteError> {
        self.record(ToggleDirection::Enable).await
    }

    async fn disable_network(&self) -> std::result::Result<(), RemoteError> {
        self.record(ToggleDirection::Disable).await
    }
}

// ============================================================================
// ScriptedConnector
// ============================================================================

/// Connector that opens [`FakeTransport`]s, failing for chosen endpoints.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    failing: Mutex<FxHashSet<String>>,
    stalled: Mutex<FxHashSet<String>>,
    opened: Mutex<Vec<(String, Arc<FakeTransport>)>>,
    attempts: Mutex<FxHashMap<String, usize>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, endpoint: &str) {
        self.failing.lock().insert(endpoint.to_owned());
    }

    pub fn heal(&self, endpoint: &str) {
        self.failing.lock().remove(endpoint);
    }

    /// Transports opened for `endpoint` from now on never acknowledge close.
    pub fn stall_close(&self, endpoint: &str) {
        self.stalled.lock().insert(endpoint.to_owned());
    }

    /// Every transport opened so far, in order.
    pub fn opened(&self) -> Vec<(String, Arc<FakeTransport>)> {
        self.opened.lock().clone()
    }

    /// Most recent transport opened for `endpoint`.
    pub fn latest(&self, endpoint: &str) -> Option<Arc<FakeTransport>> {
        self.opened
            .lock()
            .iter()
            .rev()
            .find(|(opened, _)| opened == endpoint)
            .map(|(_, transport)| Arc::clone(transport))
    }

    pub fn attempts(&self, endpoint: &str) -> usize {
        self.attempts.lock().get(endpoint).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        endpoint: &str,
        _subprotocol: Option<&str>,
    ) -> Result<Arc<dyn Transport>> {
        *self.attempts.lock().entry(endpoint.to_owned()).or_default() += 1;

        if self.failing.lock().contains(endpoint) {
            return Err(Error::connection(format!("{endpoint}: refused")));
        }

        let transport = if self.stalled.lock().contains(endpoint) {
            FakeTransport::unresponsive()
        } else {
            FakeTransport::open()
        };
        self.opened
            .lock()
            .push((endpoint.to_owned(), Arc::clone(&transport)));
        Ok(transport)
    }
}
