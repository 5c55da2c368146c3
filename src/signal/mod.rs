//! Lifecycle signals.
//!
//! This module turns raw environment events into the closed set of
//! signals the coordinator acts on.
//!
//! # Signal Mapping
//!
//! | Environment event | Signal |
//! |-------------------|--------|
//! | `visibilitychange` (hidden) | `VisibilityHidden` |
//! | `visibilitychange` (visible) | `VisibilityVisible` |
//! | `pagehide` | `PageHide { persisted }` |
//! | `pageshow` | `PageShow { persisted }` |
//! | `online` / `offline` | `Online` / `Offline` |
//! | `freeze` / `resume` | `Freeze` / `Resume` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Raw events, signals, redundancy classes |
//! | `normalizer` | Dedup and fan-out to subscribers |

// ============================================================================
// Submodules
// ============================================================================

/// Raw environment events and lifecycle signals.
pub mod event;

/// Signal normalizer and subscriptions.
pub mod normalizer;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{EnvironmentEvent, LifecycleSignal, SignalClass, VisibilityState};
pub use normalizer::{DEFAULT_DEDUP_WINDOW, EnvironmentHandle, SignalNormalizer, Subscription};
