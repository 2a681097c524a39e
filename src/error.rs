//! Error types for relay operations

use thiserror::Error;

use crate::destination::DestinationId;
use crate::egress::EgressError;
use crate::session::StreamKey;

/// Errors returned by the relay core
///
/// Egress failures never reach a media engine callback: they are contained
/// in the owning link's retry loop and surface as events. The egress variants
/// exist so those events and logs carry a typed, displayable cause.
#[derive(Debug, Error)]
pub enum Error {
    /// A session for this stream key is already live (or still closing)
    #[error("stream already active: {0}")]
    AlreadyActive(StreamKey),

    /// Operation on a session that is closing or closed
    #[error("session closed: {0}")]
    SessionClosed(StreamKey),

    /// No session exists for this stream key
    #[error("no session for stream: {0}")]
    SessionNotFound(StreamKey),

    #[error("invalid stream key: {0:?}")]
    InvalidStreamKey(String),

    /// `max_sessions` reached
    #[error("session limit reached ({0})")]
    SessionLimitReached(usize),

    /// Malformed destination at registration or update time
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("destination not found: {0}")]
    DestinationNotFound(DestinationId),

    /// A single connection attempt failed; retried per policy
    #[error("egress connect to {destination} failed: {source}")]
    EgressConnectFailed {
        destination: DestinationId,
        #[source]
        source: EgressError,
    },

    /// Retry budget exhausted; the link stays failed for the session lifetime
    #[error("egress to {destination} failed permanently after {attempts} attempts: {last_error}")]
    EgressPermanentFailure {
        destination: DestinationId,
        attempts: u32,
        last_error: String,
    },
}

/// Result alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;
