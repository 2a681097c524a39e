//! Point-in-time views of sessions for dashboards and APIs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::destination::{DestinationId, Protocol};
use crate::egress::EgressState;

use super::key::StreamKey;
use super::state::{PublishMetadata, SessionState};

/// A session and its egress links
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: u64,
    pub stream_key: StreamKey,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub metadata: PublishMetadata,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub destinations: Vec<LinkSnapshot>,
}

impl SessionSnapshot {
    pub fn link(&self, id: &DestinationId) -> Option<&LinkSnapshot> {
        self.destinations.iter().find(|link| &link.id == id)
    }
}

/// One egress link of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    pub id: DestinationId,
    pub name: String,
    pub protocol: Protocol,
    pub state: EgressState,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub permanent_failure: bool,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
}
