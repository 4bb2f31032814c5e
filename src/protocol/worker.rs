//! Messages exchanged with the multiplexer actor.
//!
//! These are structured values, not wire bytes. They keep the JSON shape
//! of a web-worker message so they can be logged or bridged verbatim.
//!
//! | Message | Direction | JSON |
//! |---------|-----------|------|
//! | [`WorkerCommand::Connect`] | caller → actor | `{"type":"connect","scopeId","url","kind","parameters"}` |
//! | [`WorkerCommand::Disconnect`] | caller → actor | `{"type":"disconnect","scopeId"}` |
//! | [`WorkerEvent::Data`] | actor → caller | `{"type":"data","scopeId","messages":[...]}` |
//! | [`WorkerEvent::Open`] | actor → caller | `{"type":"open","scopeId"}` |
//! | [`WorkerEvent::Error`] | actor → caller | `{"type":"error","scopeId"}` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use url::Url;

use crate::identifiers::ScopeId;

use super::message::{Handshake, ParameterDescriptor, ValueUpdate};

// ============================================================================
// WorkerCommand
// ============================================================================

/// Command sent to the multiplexer actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerCommand {
    /// Open (or replace) a scope.
    Connect {
        /// Scope to open.
        scope_id: ScopeId,
        /// Telemetry endpoint URL.
        url: Url,
        /// Widget category sent in the handshake.
        kind: String,
        /// Declared channels sent in the handshake.
        parameters: Vec<ParameterDescriptor>,
    },

    /// Tear a scope down.
    Disconnect {
        /// Scope to close.
        scope_id: ScopeId,
    },
}

impl WorkerCommand {
    /// Returns the scope this command targets.
    #[inline]
    #[must_use]
    pub fn scope_id(&self) -> &ScopeId {
        match self {
            Self::Connect { scope_id, .. } | Self::Disconnect { scope_id } => scope_id,
        }
    }

    /// Builds the handshake a `Connect` command will send.
    #[must_use]
    pub fn handshake(&self) -> Option<Handshake> {
        match self {
            Self::Connect {
                kind, parameters, ..
            } => Some(Handshake::new(kind.clone(), parameters.clone())),
            Self::Disconnect { .. } => None,
        }
    }
}

// ============================================================================
// WorkerEvent
// ============================================================================

/// Event emitted by the multiplexer actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
    /// One flush batch for a scope, in arrival order.
    Data {
        /// Source scope.
        scope_id: ScopeId,
        /// Every sample buffered since the previous flush.
        messages: Vec<ValueUpdate>,
    },

    /// The scope's connection sent its handshake.
    Open {
        /// Source scope.
        scope_id: ScopeId,
    },

    /// The scope's transport reported an error.
    Error {
        /// Source scope.
        scope_id: ScopeId,
    },
}

impl WorkerEvent {
    /// Returns the scope this event belongs to.
    #[inline]
    #[must_use]
    pub fn scope_id(&self) -> &ScopeId {
        match self {
            Self::Data { scope_id, .. } | Self::Open { scope_id } | Self::Error { scope_id } => {
                scope_id
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_connect_shape() {
        let command = WorkerCommand::Connect {
            scope_id: ScopeId::from("oscilloscope::1"),
            url: Url::parse("ws://localhost:6789/1/autoconfig").expect("url"),
            kind: "oscilloscope".into(),
            parameters: vec![ParameterDescriptor::new("data").streaming()],
        };

        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["type"], "connect");
        assert_eq!(value["scopeId"], "oscilloscope::1");
        assert_eq!(value["url"], "ws://localhost:6789/1/autoconfig");
        assert_eq!(value["parameters"][0]["stream"], true);

        let handshake = command.handshake().expect("connect has handshake");
        assert_eq!(handshake.kind, "oscilloscope");
    }

    #[test]
    fn test_disconnect_round_trip() {
        let value = json!({ "type": "disconnect", "scopeId": "oscilloscope::1" });
        let command: WorkerCommand = serde_json::from_value(value).expect("parse");
        assert_eq!(command.scope_id().as_str(), "oscilloscope::1");
        assert!(command.handshake().is_none());
    }

    #[test]
    fn test_data_event_shape() {
        let event = WorkerEvent::Data {
            scope_id: ScopeId::from("oscilloscope::1"),
            messages: vec![ValueUpdate::new("data", 1.0), ValueUpdate::new("data", 2.0)],
        };

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "data",
                "scopeId": "oscilloscope::1",
                "messages": [{ "on": "data", "value": 1.0 }, { "on": "data", "value": 2.0 }]
            })
        );
    }

    #[test]
    fn test_open_and_error_shapes() {
        let open = serde_json::to_value(WorkerEvent::Open {
            scope_id: ScopeId::from("a"),
        })
        .expect("serialize");
        assert_eq!(open, json!({ "type": "open", "scopeId": "a" }));

        let error = WorkerEvent::Error {
            scope_id: ScopeId::from("b"),
        };
        assert_eq!(error.scope_id().as_str(), "b");
    }
}
