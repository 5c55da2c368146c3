//! Lifecycle coordination.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Coordinator`] | Applies lifecycle signals to network and connections |
//! | [`CoordinatorBuilder`] | Fluent construction |
//! | [`CoordinatorOptions`] | Timeouts and limits |
//! | [`CoordinatorState`] | State snapshot |
//! | [`Phase`] | Coarse lifecycle phase |

// ============================================================================
// Submodules
// ============================================================================

mod backlog;
mod builder;
mod machine;
mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::CoordinatorBuilder;
pub use machine::{Coordinator, CoordinatorState, Phase};
pub use options::{CoordinatorOptions, DEFAULT_BACKLOG_CAPACITY, DEFAULT_OPEN_TIMEOUT};
