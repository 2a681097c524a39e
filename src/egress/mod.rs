//! Egress connections
//!
//! The relay does not implement destination protocols itself. A link asks an
//! [`EgressConnector`] for a connected [`EgressSink`] and then writes frames
//! into it; everything protocol specific (RTMP handshake and chunking, HLS
//! segment upload, WHIP negotiation) lives behind these two traits.

pub mod error;
pub mod tcp;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::destination::Destination;
use crate::media::MediaFrame;
use crate::session::StreamKey;

pub use error::EgressError;
pub use tcp::FlvTcpConnector;

/// State of a single egress link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressState {
    /// First connection attempt in progress
    Connecting,
    /// Connected; frames are being delivered
    Streaming,
    /// Retry attempt in progress after a failure
    Reconnecting,
    /// Last attempt failed; waiting to retry, or permanently failed
    Failed,
    /// Session ended; terminal
    Closed,
}

impl EgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EgressState::Connecting => "connecting",
            EgressState::Streaming => "streaming",
            EgressState::Reconnecting => "reconnecting",
            EgressState::Failed => "failed",
            EgressState::Closed => "closed",
        }
    }
}

impl fmt::Display for EgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a link publishes to
#[derive(Debug, Clone)]
pub struct EgressTarget {
    /// Inbound stream being relayed
    pub stream_key: StreamKey,
    /// Destination snapshot taken at session start
    pub destination: Arc<Destination>,
    /// Effective URL (stream key override applied)
    pub url: Url,
}

impl EgressTarget {
    pub fn new(stream_key: StreamKey, destination: Arc<Destination>) -> Self {
        let url = destination.target_url();
        Self {
            stream_key,
            destination,
            url,
        }
    }
}

/// Opens connections to destinations
#[async_trait]
pub trait EgressConnector: Send + Sync + 'static {
    /// Establish a connection ready to accept frames
    ///
    /// The caller bounds this with its connect timeout and may drop the
    /// future at any await point when the session stops.
    async fn connect(&self, target: &EgressTarget) -> Result<Box<dyn EgressSink>, EgressError>;
}

/// A connected destination
#[async_trait]
pub trait EgressSink: Send {
    /// Deliver one frame; frames arrive in ingest order
    async fn send(&mut self, frame: &MediaFrame) -> Result<(), EgressError>;

    /// Flush and close the connection
    async fn close(&mut self) -> Result<(), EgressError> {
        Ok(())
    }
}
