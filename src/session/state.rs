//! Session state machine
//!
//! Tracks a relay session from publish to removal:
//!
//! ```text
//! Starting ──► Streaming ──► Closing ──► Closed
//!     └───────────────────────┘
//! ```
//!
//! [`SessionShared`] is the part of a session that its egress link tasks
//! hold on to: the state, the event history and the GOP cache.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::bus::{EventBus, RelayEvent};
use crate::media::GopBuffer;

use super::key::StreamKey;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created; egress links are connecting
    Starting,
    /// Ingest is live and a link streamed, or every link failed at least once
    Streaming,
    /// Stop requested; links are flushing and closing
    Closing,
    /// Removed from the session manager; terminal
    Closed,
}

impl SessionState {
    pub fn accepts_frames(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }

    pub fn is_closing_or_closed(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publisher details supplied by the media engine on publish
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMetadata {
    /// Application name (e.g. "live")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Encoder software, when the engine detected it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<SocketAddr>,
    /// Free-form publish parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl PublishMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn encoder(mut self, encoder: impl Into<String>) -> Self {
        self.encoder = Some(encoder.into());
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Session state shared with the session's egress link tasks
pub(crate) struct SessionShared {
    pub(crate) key: StreamKey,
    state: watch::Sender<SessionState>,
    bus: EventBus,
    history: Mutex<VecDeque<RelayEvent>>,
    history_limit: usize,
    /// Links that have neither streamed nor failed yet
    untried_links: AtomicUsize,
    /// Headers and current GOP; also serializes a link's switch to
    /// `Streaming` against frame dispatch
    pub(crate) cache: Mutex<GopBuffer>,
}

impl SessionShared {
    pub(crate) fn new(
        key: StreamKey,
        bus: EventBus,
        history_limit: usize,
        cache: GopBuffer,
        links: usize,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Starting);
        Self {
            key,
            state,
            bus,
            history: Mutex::new(VecDeque::new()),
            history_limit,
            untried_links: AtomicUsize::new(links),
            cache: Mutex::new(cache),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Record an event in the session history and publish it
    pub(crate) fn emit(&self, event: RelayEvent) {
        if self.history_limit > 0 {
            let mut history = self.history.lock();
            if history.len() >= self.history_limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        self.bus.publish(event);
    }

    pub(crate) fn history(&self) -> Vec<RelayEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// `Starting → Streaming`; no-op in any other state
    pub(crate) fn promote(&self) -> bool {
        let promoted = self.state.send_if_modified(|state| {
            if *state == SessionState::Starting {
                *state = SessionState::Streaming;
                true
            } else {
                false
            }
        });

        if promoted {
            tracing::info!(stream = %self.key, "Session streaming");
            self.emit(RelayEvent::SessionStateChanged {
                stream_key: self.key.clone(),
                state: SessionState::Streaming,
            });
        }
        promoted
    }

    /// A link failed for the first time. Once every link has failed at
    /// least once the session is promoted anyway: ingest health is reported
    /// independently of egress.
    pub(crate) fn link_failed_once(&self) {
        let previous = self
            .untried_links
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            self.promote();
        }
    }

    /// `Starting | Streaming → Closing`; returns false if already closing
    pub(crate) fn begin_close(&self) -> bool {
        let started = self.state.send_if_modified(|state| {
            if state.accepts_frames() {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });

        if started {
            tracing::info!(stream = %self.key, "Session closing");
            self.emit(RelayEvent::SessionStateChanged {
                stream_key: self.key.clone(),
                state: SessionState::Closing,
            });
        }
        started
    }

    /// Terminal transition, after the session left the manager
    pub(crate) fn mark_closed(&self) {
        let previous = self.state.send_replace(SessionState::Closed);
        if previous == SessionState::Closed {
            return;
        }

        tracing::info!(stream = %self.key, "Session closed");
        self.emit(RelayEvent::SessionStateChanged {
            stream_key: self.key.clone(),
            state: SessionState::Closed,
        });
        self.emit(RelayEvent::StreamEnded {
            stream_key: self.key.clone(),
        });
    }
}
