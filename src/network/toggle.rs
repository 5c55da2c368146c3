//! Network toggle proxy.
//!
//! Wraps the remote layer's enable/disable primitives. Every call is
//! forwarded (the remote contract makes repeated calls safe), bounded by a
//! timeout, and a failure is logged and handed back as
//! [`Error::Toggle`] for the caller to ignore. The next lifecycle signal
//! calls the same primitive again, which is the only retry.

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result, ToggleDirection};

// ============================================================================
// Constants
// ============================================================================

/// Default bound for a single remote toggle call.
pub const DEFAULT_TOGGLE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// RemoteNetwork
// ============================================================================

/// Error type returned by a remote layer.
pub type RemoteError = Box<dyn StdError + Send + Sync>;

/// Network primitives of the remote sync layer.
///
/// Both methods must be safe to call when the network is already in the
/// target state.
#[async_trait]
pub trait RemoteNetwork: Send + Sync {
    /// Re-enables network use by the remote layer.
    async fn enable_network(&self) -> std::result::Result<(), RemoteError>;

    /// Disables network use by the remote layer.
    async fn disable_network(&self) -> std::result::Result<(), RemoteError>;
}

// ============================================================================
// NetworkToggle
// ============================================================================

/// Idempotent proxy around a [`RemoteNetwork`].
pub struct NetworkToggle {
    /// The remote layer.
    remote: Arc<dyn RemoteNetwork>,
    /// Bound for each call.
    timeout: Duration,
    /// Outcome of the last successful call; `None` when unknown.
    last_known: Mutex<Option<bool>>,
}

impl fmt::Debug for NetworkToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkToggle")
            .field("timeout", &self.timeout)
            .field("last_known", &*self.last_known.lock())
            .finish_non_exhaustive()
    }
}

impl NetworkToggle {
    /// Creates a proxy around `remote`.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteNetwork>, timeout: Duration) -> Self {
        Self {
            remote,
            timeout,
            last_known: Mutex::new(None),
        }
    }

    /// Enables the remote network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toggle`] if the remote rejected the call or did not
    /// answer in time. The failure has already been logged.
    pub async fn enable(&self) -> Result<()> {
        self.apply(ToggleDirection::Enable).await
    }

    /// Disables the remote network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toggle`] if the remote rejected the call or did not
    /// answer in time. The failure has already been logged.
    pub async fn disable(&self) -> Result<()> {
        self.apply(ToggleDirection::Disable).await
    }

    /// Whether the network was enabled by the last successful call.
    ///
    /// `None` before any call and after a failed one.
    #[inline]
    #[must_use]
    pub fn last_known(&self) -> Option<bool> {
        *self.last_known.lock()
    }

    async fn apply(&self, direction: ToggleDirection) -> Result<()> {
        let call = match direction {
            ToggleDirection::Enable => self.remote.enable_network(),
            ToggleDirection::Disable => self.remote.disable_network(),
        };

        let error = match timeout(self.timeout, call).await {
            Ok(Ok(())) => {
                *self.last_known.lock() = Some(direction == ToggleDirection::Enable);
                debug!(%direction, "Remote network toggled");
                return Ok(());
            }
            Ok(Err(e)) => Error::toggle(direction, e.to_string()),
            Err(_) => Error::toggle(
                direction,
                format!("no answer after {}ms", self.timeout.as_millis()),
            ),
        };

        *self.last_known.lock() = None;
        warn!(%direction, error = %error, "Remote network toggle failed, continuing");
        Err(error)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::RecordingRemote;

    #[tokio::test]
    async fn test_enable_and_disable_forwarded() {
        let remote = RecordingRemote::new();
        let toggle = NetworkToggle::new(remote.clone(), DEFAULT_TOGGLE_TIMEOUT);

        assert_eq!(toggle.last_known(), None);

        toggle.disable().await.expect("disable");
        assert_eq!(toggle.last_known(), Some(false));

        toggle.enable().await.expect("enable");
        assert_eq!(toggle.last_known(), Some(true));

        assert_eq!(remote.enable_calls(), 1);
        assert_eq!(remote.disable_calls(), 1);
    }

    #[tokio::test]
    async fn test_repeated_disable_is_not_an_error() {
        let remote = RecordingRemote::new();
        let toggle = NetworkToggle::new(remote.clone(), DEFAULT_TOGGLE_TIMEOUT);

        toggle.disable().await.expect("first");
        toggle.disable().await.expect("second");

        assert_eq!(remote.disable_calls(), 2);
        assert!(!remote.network_enabled());
    }

    #[tokio::test]
    async fn test_remote_rejection_is_toggle_error() {
        let remote = RecordingRemote::new();
        remote.fail_enable(true);
        let toggle = NetworkToggle::new(remote.clone(), DEFAULT_TOGGLE_TIMEOUT);

        let result = toggle.enable().await;

        assert!(matches!(
            result,
            Err(Error::Toggle {
                direction: ToggleDirection::Enable,
                ..
            })
        ));
        assert_eq!(toggle.last_known(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_remote_times_out() {
        let remote = RecordingRemote::new();
        remote.hang(true);
        let toggle = NetworkToggle::new(remote.clone(), Duration::from_millis(50));

        let result = toggle.disable().await;

        assert!(matches!(
            result,
            Err(Error::Toggle {
                direction: ToggleDirection::Disable,
                ..
            })
        ));
    }
}
