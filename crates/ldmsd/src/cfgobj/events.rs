use std::fmt;

use tracing::info;

use super::CfgObjType;

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cfgobj");

/// Activation change of a configuration object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The object was enabled.
    Enabled {
        /// Schema of the object.
        schema: CfgObjType,
        /// Object name.
        name: String,
    },
    /// The object was disabled.
    Disabled {
        /// Schema of the object.
        schema: CfgObjType,
        /// Object name.
        name: String,
    },
}

impl LifecycleEvent {
    /// Event for a transition to `enabled`.
    pub fn transition(schema: CfgObjType, name: impl Into<String>, enabled: bool) -> Self {
        let name = name.into();
        if enabled {
            Self::Enabled { schema, name }
        } else {
            Self::Disabled { schema, name }
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled { schema, name } => write!(formatter, "{schema} '{name}' enabled"),
            Self::Disabled { schema, name } => write!(formatter, "{schema} '{name}' disabled"),
        }
    }
}

/// Receiver of lifecycle events, typically the component that starts and
/// stops the object's runtime behaviour.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn post(&self, event: &LifecycleEvent);
}

/// Sink that only logs events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn post(&self, event: &LifecycleEvent) {
        info!(target: EVENTS_TARGET, event = %event, "configuration object state changed");
    }
}
