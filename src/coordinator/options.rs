//! Coordinator tuning options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use connection_lifecycle::CoordinatorOptions;
//!
//! let options = CoordinatorOptions::new()
//!     .with_close_timeout(Duration::from_secs(2))
//!     .with_initial_network_intent(false);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::DEFAULT_TOGGLE_TIMEOUT;
use crate::signal::DEFAULT_DEDUP_WINDOW;
use crate::transport::DEFAULT_CLOSE_TIMEOUT;

// ============================================================================
// Constants
// ============================================================================

/// Default bound for reopening one connection during `reestablish`.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the signal backlog.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 32;

// ============================================================================
// CoordinatorOptions
// ============================================================================

/// Timeouts and limits for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// How long `close_all` waits for each close acknowledgement.
    pub close_timeout: Duration,

    /// How long one connection may take to open.
    pub open_timeout: Duration,

    /// How long one remote enable/disable call may take.
    pub toggle_timeout: Duration,

    /// Maximum queued signals while a transition is in flight.
    pub backlog_capacity: usize,

    /// Network intent before any `Online`/`Offline` signal.
    pub initial_network_intent: bool,

    /// Redundancy window for the default signal normalizer.
    pub dedup_window: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl CoordinatorOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            toggle_timeout: DEFAULT_TOGGLE_TIMEOUT,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
            initial_network_intent: true,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl CoordinatorOptions {
    /// Sets the close acknowledgement bound.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the open bound.
    #[inline]
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the remote toggle bound.
    #[inline]
    #[must_use]
    pub fn with_toggle_timeout(mut self, timeout: Duration) -> Self {
        self.toggle_timeout = timeout;
        self
    }

    /// Sets the backlog capacity.
    #[inline]
    #[must_use]
    pub fn with_backlog_capacity(mut self, capacity: usize) -> Self {
        self.backlog_capacity = capacity;
        self
    }

    /// Sets the initial network intent.
    #[inline]
    #[must_use]
    pub fn with_initial_network_intent(mut self, enabled: bool) -> Self {
        self.initial_network_intent = enabled;
        self
    }

    /// Sets the dedup window of the default normalizer.
    #[inline]
    #[must_use]
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl CoordinatorOptions {
    /// Checks that every bound is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero timeouts or a zero backlog.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("close_timeout", self.close_timeout),
            ("open_timeout", self.open_timeout),
            ("toggle_timeout", self.toggle_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if self.backlog_capacity == 0 {
            return Err(Error::config("backlog_capacity must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
