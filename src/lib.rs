//! Live-stream relay and fan-out controller
//!
//! Accepts live streams from an external media engine (RTMP, SRT, …) and
//! relays every frame to a set of configured destinations: streaming
//! platforms, CDN ingest points, WHIP servers. Each destination connection
//! is isolated, retries with exponential backoff and reports its health as
//! events.
//!
//! # Architecture
//!
//! ```text
//!   media engine                         Arc<SessionManager>
//!   on_publish / on_frame ──────► ┌──────────────────────────────┐
//!                                 │ sessions: HashMap<Key,       │
//!                                 │   RelaySession {             │
//!                                 │     gop cache,               │
//!                                 │     fanout: links[],         │
//!                                 │   }                          │
//!                                 │ >                            │
//!                                 └──────────────┬───────────────┘
//!                                                │ try_send (never blocks)
//!                  ┌─────────────────────────────┼──────────────────────┐
//!                  ▼                             ▼                      ▼
//!            [EgressLink]                  [EgressLink]           [EgressLink]
//!            mpsc queue ─► sink            mpsc queue ─► sink     retry/backoff
//!                  │                             │                      │
//!                  └──────────────► EventBus ◄───┴──────────────────────┘
//!                                      │
//!                                      ▼
//!                               dashboards, logs
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use iorelay::{FlvTcpConnector, NewDestination, Protocol, PublishMetadata, RelayConfig, SessionManager};
//!
//! # async fn run() -> iorelay::Result<()> {
//! let manager = SessionManager::new(RelayConfig::default(), Arc::new(FlvTcpConnector::new()));
//! manager
//!     .destinations()
//!     .add(NewDestination::new("sidecar", Protocol::Rtmp, "rtmp://127.0.0.1:1935/live"))
//!     .await?;
//!
//! let session = manager.on_publish("cam1", PublishMetadata::new().app("live")).await?;
//! // engine pushes frames with session.push_frame(frame)
//! manager.on_unpublish(session.stream_key()).await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod destination;
pub mod egress;
pub mod error;
pub mod fanout;
pub mod manager;
pub mod media;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, RelayEvent, Subscription};
pub use config::{EgressConfig, RelayConfig};
pub use destination::{
    Destination, DestinationId, DestinationRegistry, DestinationUpdate, NewDestination, Protocol,
};
pub use egress::{EgressConnector, EgressError, EgressSink, EgressState, EgressTarget, FlvTcpConnector};
pub use error::{Error, Result};
pub use fanout::{LinkStatus, ReconnectPolicy};
pub use manager::SessionManager;
pub use media::{FrameType, MediaFrame};
pub use session::{
    LinkSnapshot, PublishMetadata, RelaySession, SessionSnapshot, SessionState, StreamKey,
};
pub use stats::RelayStats;
