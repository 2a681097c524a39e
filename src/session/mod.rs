//! Relay sessions
//!
//! A [`RelaySession`] exists for every live inbound stream. It owns one
//! egress link per destination that was enabled when the stream started,
//! feeds them every ingest frame, and tracks the session lifecycle.
//!
//! Sessions are created and removed by the
//! [`SessionManager`](crate::manager::SessionManager).

pub mod key;
pub mod snapshot;
pub mod state;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, RelayEvent};
use crate::config::RelayConfig;
use crate::destination::{Destination, DestinationId};
use crate::egress::{EgressConnector, EgressState};
use crate::error::{Error, Result};
use crate::fanout::{FanoutScheduler, LinkContext, LinkStatus};
use crate::media::{GopBuffer, MediaFrame};

pub use key::StreamKey;
pub use snapshot::{LinkSnapshot, SessionSnapshot};
pub use state::{PublishMetadata, SessionState};

use state::SessionShared;

/// One live inbound stream and its egress links
pub struct RelaySession {
    id: u64,
    shared: Arc<SessionShared>,
    metadata: PublishMetadata,
    started_at: DateTime<Utc>,
    started: Instant,
    fanout: Mutex<FanoutScheduler>,
    ctx: LinkContext,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    /// Millis after `started` of the last frame, 0 if none yet
    last_frame_ms: AtomicU64,
}

impl RelaySession {
    /// Create the session and spawn a link per destination
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn start(
        id: u64,
        key: StreamKey,
        metadata: PublishMetadata,
        destinations: Vec<Arc<Destination>>,
        connector: Arc<dyn EgressConnector>,
        bus: EventBus,
        config: &RelayConfig,
    ) -> Arc<Self> {
        let mut seen = HashSet::new();
        let destinations: Vec<_> = destinations
            .into_iter()
            .filter(|d| {
                let first = seen.insert(d.id);
                if !first {
                    tracing::debug!(stream = %key, destination = %d.id, "Duplicate destination skipped");
                }
                first
            })
            .collect();

        let cache = if config.gop_cache_enabled {
            GopBuffer::with_max_size(config.gop_cache_max_size)
        } else {
            GopBuffer::headers_only()
        };
        let shared = Arc::new(SessionShared::new(
            key.clone(),
            bus,
            config.history_limit,
            cache,
            destinations.len(),
        ));

        tracing::info!(
            stream = %key,
            session_id = id,
            destinations = destinations.len(),
            "Session started"
        );
        shared.emit(RelayEvent::StreamStarted {
            stream_key: key,
            destinations: destinations.len(),
        });

        let ctx = LinkContext {
            session: Arc::clone(&shared),
            connector,
            config: config.egress.clone(),
            shutdown: CancellationToken::new(),
        };

        let mut fanout = FanoutScheduler::new();
        for destination in destinations {
            let attached = fanout.attach(destination, &ctx);
            debug_assert!(attached, "destinations are deduplicated above");
        }
        if fanout.is_empty() {
            shared.promote();
        }

        Arc::new(Self {
            id,
            shared,
            metadata,
            started_at: Utc::now(),
            started: Instant::now(),
            fanout: Mutex::new(fanout),
            ctx,
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            last_frame_ms: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.shared.key
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn metadata(&self) -> &PublishMetadata {
        &self.metadata
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Relay one ingest frame to every streaming link
    ///
    /// Never waits on a destination. Fails only once the session is closing.
    pub fn push_frame(&self, frame: MediaFrame) -> Result<()> {
        if !self.state().accepts_frames() {
            return Err(Error::SessionClosed(self.stream_key().clone()));
        }

        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(frame.size() as u64, Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_frame_ms.store(elapsed.max(1), Ordering::Relaxed);

        // Cache first, then fan-out: a link switching to streaming sees
        // either the cached frame or the queued one, never both or neither.
        let mut cache = self.shared.cache.lock();
        cache.observe(&frame);
        let delivered = self.fanout.lock().dispatch(&frame);
        drop(cache);

        tracing::trace!(
            stream = %self.stream_key(),
            timestamp = frame.timestamp,
            delivered = delivered,
            "Frame dispatched"
        );
        Ok(())
    }

    /// Request the session to stop
    ///
    /// Links get the configured grace period to flush and close. Stopping a
    /// session that is already closing is a no-op.
    pub fn stop(&self) -> Result<()> {
        match self.state() {
            SessionState::Closed => Err(Error::SessionClosed(self.stream_key().clone())),
            _ => {
                self.begin_close();
                Ok(())
            }
        }
    }

    /// Wait until the session is closed and removed
    pub async fn closed(&self) {
        let mut state = self.shared.subscribe_state();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe_state()
    }

    /// Status updates of one egress link
    pub fn watch_link(&self, id: &DestinationId) -> Option<watch::Receiver<LinkStatus>> {
        self.fanout.lock().watch(id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            stream_key: self.stream_key().clone(),
            state: self.state(),
            started_at: self.started_at,
            metadata: self.metadata.clone(),
            frames_received: self.frames_received(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            destinations: self.fanout.lock().snapshots(),
        }
    }

    /// Recent events of this session, oldest first
    pub fn history(&self) -> Vec<RelayEvent> {
        self.shared.history()
    }

    /// Time since the last frame, or since start if none arrived
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_frame_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    pub fn link_count(&self) -> usize {
        self.fanout.lock().len()
    }

    pub(crate) fn links_in(&self, state: EgressState) -> usize {
        self.fanout.lock().count_in(state)
    }

    pub(crate) fn begin_close(&self) -> bool {
        self.shared.begin_close()
    }

    pub(crate) async fn wait_closing(&self) {
        let mut state = self.shared.subscribe_state();
        let _ = state.wait_for(SessionState::is_closing_or_closed).await;
    }

    /// Close every link, aborting those that exceed `grace`
    pub(crate) async fn drain(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        let tasks = self.fanout.lock().detach_all();
        self.ctx.shutdown.cancel();

        for (id, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                tracing::warn!(
                    stream = %self.stream_key(),
                    destination = %id,
                    "Egress link did not close within grace period, aborted"
                );
                self.fanout.lock().abandon(&id, &self.shared);
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.mark_closed();
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("stream_key", self.stream_key())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
