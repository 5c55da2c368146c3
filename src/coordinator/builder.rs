//! Builder pattern for coordinator configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use connection_lifecycle::Coordinator;
//!
//! # fn example() -> connection_lifecycle::Result<()> {
//! let coordinator = Coordinator::builder()
//!     .close_timeout(Duration::from_secs(2))
//!     .open_timeout(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::signal::SignalNormalizer;
use crate::transport::{Connector, WsConnector};

use super::machine::Coordinator;
use super::options::CoordinatorOptions;

// ============================================================================
// CoordinatorBuilder
// ============================================================================

/// Builder for a [`Coordinator`].
///
/// Use [`Coordinator::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct CoordinatorBuilder {
    /// Connection factory. Defaults to [`WsConnector`].
    connector: Option<Arc<dyn Connector>>,
    /// Shared normalizer. Defaults to a fresh one.
    normalizer: Option<SignalNormalizer>,
    /// Timeouts and limits.
    options: CoordinatorOptions,
}

impl fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("custom_connector", &self.connector.is_some())
            .field("normalizer", &self.normalizer)
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// CoordinatorBuilder Implementation
// ============================================================================

impl CoordinatorBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection factory.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets a shared connection factory.
    #[inline]
    #[must_use]
    pub fn connector_arc(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses an existing normalizer, so other components can subscribe to
    /// the same signals.
    #[inline]
    #[must_use]
    pub fn normalizer(mut self, normalizer: SignalNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the close acknowledgement bound.
    #[inline]
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.options.close_timeout = timeout;
        self
    }

    /// Sets the open bound.
    #[inline]
    #[must_use]
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.options.open_timeout = timeout;
        self
    }

    /// Sets the remote toggle bound.
    #[inline]
    #[must_use]
    pub fn toggle_timeout(mut self, timeout: Duration) -> Self {
        self.options.toggle_timeout = timeout;
        self
    }

    /// Sets the backlog capacity.
    #[inline]
    #[must_use]
    pub fn backlog_capacity(mut self, capacity: usize) -> Self {
        self.options.backlog_capacity = capacity;
        self
    }

    /// Sets the network intent assumed before any online/offline signal.
    #[inline]
    #[must_use]
    pub fn initial_network_intent(mut self, enabled: bool) -> Self {
        self.options.initial_network_intent = enabled;
        self
    }

    /// Builds the coordinator with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are invalid.
    pub fn build(self) -> Result<Coordinator> {
        self.options.validate()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new()));
        let normalizer = self
            .normalizer
            .unwrap_or_else(|| SignalNormalizer::with_dedup_window(self.options.dedup_window));

        Ok(Coordinator::new(self.options, connector, normalizer))
    }
}

// ============================================================================
// Tests
// ============================================================================
