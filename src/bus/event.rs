//! Relay lifecycle and health events

use serde::Serialize;

use crate::destination::{Destination, DestinationId};
use crate::egress::EgressState;
use crate::session::{SessionState, StreamKey};

/// Event published to dashboard and logging observers
///
/// Serializes with a `type` tag and camelCase fields, e.g.
/// `{"type":"egress_state_changed","streamKey":"cam1","destinationId":"…","state":"failed","retryCount":2,"error":"…"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayEvent {
    /// Ingest started: the media engine published a new stream
    StreamStarted {
        stream_key: StreamKey,
        /// Number of egress links created for the session
        destinations: usize,
    },

    /// Session lifecycle transition
    SessionStateChanged {
        stream_key: StreamKey,
        state: SessionState,
    },

    /// Egress link transition
    EgressStateChanged {
        stream_key: StreamKey,
        destination_id: DestinationId,
        state: EgressState,
        retry_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Session closed and removed
    StreamEnded { stream_key: StreamKey },

    DestinationAdded { destination: Destination },

    DestinationUpdated { destination: Destination },

    DestinationRemoved { destination_id: DestinationId },
}

impl RelayEvent {
    /// Event name as used on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            RelayEvent::StreamStarted { .. } => "stream_started",
            RelayEvent::SessionStateChanged { .. } => "session_state_changed",
            RelayEvent::EgressStateChanged { .. } => "egress_state_changed",
            RelayEvent::StreamEnded { .. } => "stream_ended",
            RelayEvent::DestinationAdded { .. } => "destination_added",
            RelayEvent::DestinationUpdated { .. } => "destination_updated",
            RelayEvent::DestinationRemoved { .. } => "destination_removed",
        }
    }

    /// Stream the event belongs to, if any
    pub fn stream_key(&self) -> Option<&StreamKey> {
        match self {
            RelayEvent::StreamStarted { stream_key, .. }
            | RelayEvent::SessionStateChanged { stream_key, .. }
            | RelayEvent::EgressStateChanged { stream_key, .. }
            | RelayEvent::StreamEnded { stream_key } => Some(stream_key),
            _ => None,
        }
    }

    /// JSON encoding for WebSocket/SSE transports
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_egress_event_json() {
        let id = DestinationId::new();
        let event = RelayEvent::EgressStateChanged {
            stream_key: StreamKey::new("streamA"),
            destination_id: id,
            state: EgressState::Reconnecting,
            retry_count: 2,
            error: None,
        };

        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "egress_state_changed");
        assert_eq!(json["streamKey"], "streamA");
        assert_eq!(json["destinationId"], id.to_string());
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["retryCount"], 2);
        assert!(json.get("error").is_none());
        assert_eq!(event.event_type(), "egress_state_changed");
    }

    #[test]
    fn test_stream_events_json() {
        let started = RelayEvent::StreamStarted {
            stream_key: StreamKey::new("cam"),
            destinations: 3,
        };
        let json = serde_json::to_value(&started).unwrap();
        assert_eq!(json["type"], "stream_started");
        assert_eq!(json["destinations"], 3);

        let ended = RelayEvent::StreamEnded {
            stream_key: StreamKey::new("cam"),
        };
        assert_eq!(ended.stream_key().map(StreamKey::as_str), Some("cam"));
        assert_eq!(
            serde_json::to_value(&ended).unwrap(),
            serde_json::json!({"type": "stream_ended", "streamKey": "cam"})
        );

        let removed = RelayEvent::DestinationRemoved {
            destination_id: DestinationId::new(),
        };
        assert!(removed.stream_key().is_none());
    }
}
