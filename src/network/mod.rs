//! Remote network toggling.
//!
//! The remote sync layer is a black box except for two primitives:
//! enable and disable its network. [`RemoteNetwork`] is that contract and
//! [`NetworkToggle`] is the proxy the coordinator drives it through.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RemoteNetwork`] | `enableNetwork` / `disableNetwork` of the remote layer |
//! | [`NetworkToggle`] | Timeout-bounded, failure-swallowing proxy |

// ============================================================================
// Submodules
// ============================================================================

/// Network toggle proxy and remote contract.
pub mod toggle;

// ============================================================================
// Re-exports
// ============================================================================

pub use toggle::{DEFAULT_TOGGLE_TIMEOUT, NetworkToggle, RemoteError, RemoteNetwork};
