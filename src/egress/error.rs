//! Egress transport errors

use std::time::Duration;

use thiserror::Error;

use crate::destination::Protocol;
use crate::media::flv::TagTooLarge;

/// Failure of a single egress connection attempt or write
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The connector cannot speak this destination's protocol
    #[error("protocol {0} not supported by this connector")]
    UnsupportedProtocol(Protocol),

    #[error("invalid egress target: {0}")]
    InvalidTarget(String),

    /// The link's queue overflowed because the destination could not keep up
    #[error("egress queue overflowed, destination fell behind ingest")]
    Backpressure,

    #[error("connection closed by destination")]
    Closed,

    /// A frame cannot be represented in the destination's wire format
    #[error(transparent)]
    TagTooLarge(#[from] TagTooLarge),

    /// Destination refused the stream (bad key, auth failure, …)
    #[error("rejected by destination: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
