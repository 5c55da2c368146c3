//! Raw environment events and normalized lifecycle signals.
//!
//! [`EnvironmentEvent`] mirrors what a browser page observes. It can be
//! decoded from the JSON a script shim would post:
//!
//! ```json
//! { "type": "visibilitychange", "visibilityState": "hidden" }
//! { "type": "pagehide", "persisted": true }
//! { "type": "online" }
//! ```
//!
//! [`LifecycleSignal`] is the closed set the coordinator understands.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// EnvironmentEvent
// ============================================================================

/// Document visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    /// Page is on screen.
    Visible,
    /// Tab hidden or window minimized.
    Hidden,
}

/// A raw lifecycle event from the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnvironmentEvent {
    /// Tab visibility changed.
    #[serde(rename = "visibilitychange")]
    VisibilityChange {
        /// New visibility.
        #[serde(rename = "visibilityState")]
        visibility_state: VisibilityState,
    },

    /// Page is being hidden; `persisted` when it may enter the back/forward cache.
    #[serde(rename = "pagehide")]
    PageHide {
        /// Page may be cached rather than destroyed.
        persisted: bool,
    },

    /// Page is being shown; `persisted` when restored from the back/forward cache.
    #[serde(rename = "pageshow")]
    PageShow {
        /// Page was restored from cache.
        persisted: bool,
    },

    /// Device went online.
    #[serde(rename = "online")]
    Online,

    /// Device went offline.
    #[serde(rename = "offline")]
    Offline,

    /// Page is being frozen.
    #[serde(rename = "freeze")]
    Freeze,

    /// Frozen page resumed.
    #[serde(rename = "resume")]
    Resume,
}

impl EnvironmentEvent {
    /// Decodes an event from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) on malformed or unknown events.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// LifecycleSignal
// ============================================================================

/// Normalized lifecycle signal consumed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "camelCase")]
pub enum LifecycleSignal {
    /// Tab became hidden.
    VisibilityHidden,
    /// Tab became visible.
    VisibilityVisible,
    /// Page hide.
    PageHide {
        /// Page may be cached.
        persisted: bool,
    },
    /// Page show.
    PageShow {
        /// Page was restored from cache.
        persisted: bool,
    },
    /// Explicit online.
    Online,
    /// Explicit offline.
    Offline,
    /// Page freeze.
    Freeze,
    /// Page resume after freeze.
    Resume,
}

/// Groups signals that require the same action.
///
/// Two consecutive signals of one class are redundant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalClass {
    /// Hidden tab or cacheable page hide: disable network.
    SoftSuspend,
    /// Visible tab or cache restore: enable network if intended.
    SoftResume,
    /// Non-cacheable page hide.
    Unload,
    /// Fresh page show.
    Load,
    /// Explicit online.
    Online,
    /// Explicit offline.
    Offline,
    /// Freeze.
    Freeze,
    /// Resume.
    Resume,
}

impl LifecycleSignal {
    /// Redundancy class of this signal.
    #[must_use]
    pub const fn class(&self) -> SignalClass {
        match self {
            Self::VisibilityHidden | Self::PageHide { persisted: true } => SignalClass::SoftSuspend,
            Self::VisibilityVisible | Self::PageShow { persisted: true } => SignalClass::SoftResume,
            Self::PageHide { persisted: false } => SignalClass::Unload,
            Self::PageShow { persisted: false } => SignalClass::Load,
            Self::Online => SignalClass::Online,
            Self::Offline => SignalClass::Offline,
            Self::Freeze => SignalClass::Freeze,
            Self::Resume => SignalClass::Resume,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::VisibilityHidden => "visibility_hidden",
            Self::VisibilityVisible => "visibility_visible",
            Self::PageHide { persisted: true } => "page_hide_persisted",
            Self::PageHide { persisted: false } => "page_hide",
            Self::PageShow { persisted: true } => "page_show_persisted",
            Self::PageShow { persisted: false } => "page_show",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Freeze => "freeze",
            Self::Resume => "resume",
        }
    }
}

impl From<EnvironmentEvent> for LifecycleSignal {
    fn from(event: EnvironmentEvent) -> Self {
        match event {
            EnvironmentEvent::VisibilityChange {
                visibility_state: VisibilityState::Hidden,
            } => Self::VisibilityHidden,
            EnvironmentEvent::VisibilityChange {
                visibility_state: VisibilityState::Visible,
            } => Self::VisibilityVisible,
            EnvironmentEvent::PageHide { persisted } => Self::PageHide { persisted },
            EnvironmentEvent::PageShow { persisted } => Self::PageShow { persisted },
            EnvironmentEvent::Online => Self::Online,
            EnvironmentEvent::Offline => Self::Offline,
            EnvironmentEvent::Freeze => Self::Freeze,
            EnvironmentEvent::Resume => Self::Resume,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_browser_events() {
        let hidden =
            EnvironmentEvent::from_json(r#"{"type":"visibilitychange","visibilityState":"hidden"}"#)
                .unwrap();
        assert_eq!(LifecycleSignal::from(hidden), LifecycleSignal::VisibilityHidden);

        let pagehide = EnvironmentEvent::from_json(r#"{"type":"pagehide","persisted":true}"#).unwrap();
        assert_eq!(
            LifecycleSignal::from(pagehide),
            LifecycleSignal::PageHide { persisted: true }
        );

        let online = EnvironmentEvent::from_json(r#"{"type":"online"}"#).unwrap();
        assert_eq!(LifecycleSignal::from(online), LifecycleSignal::Online);
    }

    #[test]
    fn test_decode_unknown_event_fails() {
        assert!(EnvironmentEvent::from_json(r#"{"type":"beforeunload"}"#).is_err());
        assert!(EnvironmentEvent::from_json(r#"{"type":"pageshow"}"#).is_err());
    }

    #[test]
    fn test_soft_classes_pair_visibility_with_page_cache() {
        assert_eq!(
            LifecycleSignal::VisibilityHidden.class(),
            LifecycleSignal::PageHide { persisted: true }.class()
        );
        assert_eq!(
            LifecycleSignal::VisibilityVisible.class(),
            LifecycleSignal::PageShow { persisted: true }.class()
        );
        assert_ne!(
            LifecycleSignal::VisibilityHidden.class(),
            LifecycleSignal::Freeze.class()
        );
        assert_ne!(
            LifecycleSignal::PageHide { persisted: false }.class(),
            LifecycleSignal::PageHide { persisted: true }.class()
        );
    }

    #[test]
    fn test_signal_serializes_tagged() {
        let json = serde_json::to_string(&LifecycleSignal::PageShow { persisted: true }).unwrap();
        assert_eq!(json, r#"{"signal":"pageShow","persisted":true}"#);
    }
}
