//! Egress destinations
//!
//! A destination is a third-party endpoint (YouTube, Twitch, a CDN ingest,
//! a WHIP server) that live streams are relayed to. The registry owns the
//! records; sessions hold `Arc` snapshots taken when they start.

pub mod model;
pub mod registry;

pub use model::{Destination, DestinationId, DestinationUpdate, NewDestination, Protocol};
pub use registry::DestinationRegistry;
