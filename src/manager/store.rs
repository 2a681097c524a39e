//! Session manager implementation
//!
//! Owns the stream key → session map and is the entry point for media
//! engine callbacks and the control plane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::bus::{EventBus, Subscription};
use crate::config::{RelayConfig, MIN_CLEANUP_INTERVAL};
use crate::destination::{Destination, DestinationId, DestinationRegistry};
use crate::egress::{EgressConnector, EgressState};
use crate::error::{Error, Result};
use crate::media::MediaFrame;
use crate::session::{PublishMetadata, RelaySession, SessionSnapshot, SessionState, StreamKey};
use crate::stats::RelayStats;

type SessionMap = HashMap<StreamKey, Arc<RelaySession>>;

/// Tracks every live relay session
///
/// At most one session exists per stream key. A session stays in the map
/// while it is closing, so a new publish on the same key is rejected until
/// the previous one is fully gone.
pub struct SessionManager {
    sessions: Arc<RwLock<SessionMap>>,
    destinations: Arc<DestinationRegistry>,
    connector: Arc<dyn EgressConnector>,
    bus: EventBus,
    config: RelayConfig,
    next_session_id: AtomicU64,
    started: Instant,
}

impl SessionManager {
    /// Create a manager with its own event bus and destination registry
    pub fn new(config: RelayConfig, connector: Arc<dyn EgressConnector>) -> Self {
        let bus = EventBus::new(config.event_capacity);
        let destinations = Arc::new(DestinationRegistry::new(bus.clone()));
        Self::with_registry(config, destinations, bus, connector)
    }

    /// Create a manager around an existing registry and bus
    pub fn with_registry(
        config: RelayConfig,
        destinations: Arc<DestinationRegistry>,
        bus: EventBus,
        connector: Arc<dyn EgressConnector>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            destinations,
            connector,
            bus,
            config,
            next_session_id: AtomicU64::new(1),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn destinations(&self) -> &Arc<DestinationRegistry> {
        &self.destinations
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Media engine callback: a publisher started streaming `key`
    ///
    /// Starts a session relaying to every destination enabled right now.
    /// Later registry changes do not affect the returned session.
    pub async fn on_publish(
        &self,
        key: impl Into<StreamKey>,
        metadata: PublishMetadata,
    ) -> Result<Arc<RelaySession>> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidStreamKey(key.to_string()));
        }

        let destinations = self.destinations.enabled_snapshot().await;

        let session = {
            let mut sessions = self.sessions.write().await;

            if let Some(existing) = sessions.get(&key) {
                tracing::warn!(
                    stream = %key,
                    existing_session = existing.id(),
                    state = %existing.state(),
                    "Publish rejected, stream already active"
                );
                return Err(Error::AlreadyActive(key));
            }

            let max = self.config.max_sessions;
            if max > 0 && sessions.len() >= max {
                tracing::warn!(stream = %key, max_sessions = max, "Publish rejected, session limit reached");
                return Err(Error::SessionLimitReached(max));
            }

            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            let session = RelaySession::start(
                id,
                key.clone(),
                metadata,
                destinations,
                Arc::clone(&self.connector),
                self.bus.clone(),
                &self.config,
            );
            sessions.insert(key, Arc::clone(&session));
            session
        };

        self.spawn_reaper(Arc::clone(&session));
        Ok(session)
    }

    /// Media engine callback: the publisher of `key` went away
    ///
    /// Idempotent; unknown keys and sessions already closing are ignored.
    pub async fn on_unpublish(&self, key: &StreamKey) {
        match self.get(key).await {
            Some(session) => {
                if session.begin_close() {
                    tracing::info!(stream = %key, session_id = session.id(), "Publisher unpublished");
                }
            }
            None => tracing::debug!(stream = %key, "Unpublish for unknown stream ignored"),
        }
    }

    /// Media engine callback: one ingest frame for `key`
    ///
    /// Engines that keep the session from [`on_publish`](Self::on_publish)
    /// can call [`RelaySession::push_frame`] directly and skip the lookup.
    pub async fn on_frame(&self, key: &StreamKey, frame: MediaFrame) -> Result<()> {
        let session = self
            .get(key)
            .await
            .ok_or_else(|| Error::SessionNotFound(key.clone()))?;
        session.push_frame(frame)
    }

    pub async fn get(&self, key: &StreamKey) -> Option<Arc<RelaySession>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshots of all sessions, ordered by stream key
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<RelaySession>> = self.sessions.read().await.values().cloned().collect();
        let mut snapshots: Vec<SessionSnapshot> = sessions.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.stream_key.cmp(&b.stream_key));
        snapshots
    }

    pub async fn get_destinations(&self) -> Vec<Arc<Destination>> {
        self.destinations.list().await
    }

    /// Operator stop: close the session as if the publisher left
    pub async fn stop_session(&self, key: &StreamKey) -> Result<()> {
        let session = self
            .get(key)
            .await
            .ok_or_else(|| Error::SessionNotFound(key.clone()))?;

        tracing::info!(stream = %key, session_id = session.id(), "Session stop requested");
        session.stop()
    }

    /// Include the destination in sessions started from now on
    pub async fn enable_destination(&self, id: DestinationId) -> Result<Arc<Destination>> {
        self.destinations.enable(id).await
    }

    /// Exclude the destination from sessions started from now on
    ///
    /// Live sessions keep relaying to it until they end.
    pub async fn disable_destination(&self, id: DestinationId) -> Result<Arc<Destination>> {
        self.destinations.disable(id).await
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub async fn stats(&self) -> RelayStats {
        let sessions: Vec<Arc<RelaySession>> = self.sessions.read().await.values().cloned().collect();
        let destinations = self.destinations.list().await;

        let mut stats = RelayStats {
            active_sessions: sessions.len(),
            destinations: destinations.len(),
            enabled_destinations: destinations.iter().filter(|d| d.enabled).count(),
            uptime_secs: self.started.elapsed().as_secs(),
            ..RelayStats::default()
        };

        for session in &sessions {
            let snapshot = session.snapshot();
            if snapshot.state == SessionState::Streaming {
                stats.streaming_sessions += 1;
            }
            stats.frames_received += snapshot.frames_received;
            stats.bytes_received += snapshot.bytes_received;
            stats.links += snapshot.destinations.len();
            stats.streaming_links += session.links_in(EgressState::Streaming);
            stats.failed_links += session.links_in(EgressState::Failed);
        }

        stats
    }

    /// Stop sessions that received no frame for `idle_timeout`
    ///
    /// Returns the number of sessions stopped.
    pub async fn cleanup(&self) -> usize {
        let idle: Vec<Arc<RelaySession>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.state().accepts_frames() && s.idle_for() > self.config.idle_timeout)
            .cloned()
            .collect();

        let mut stopped = 0;
        for session in idle {
            if session.begin_close() {
                tracing::info!(
                    stream = %session.stream_key(),
                    idle_secs = session.idle_for().as_secs(),
                    "Idle session stopped by cleanup"
                );
                stopped += 1;
            }
        }
        stopped
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        // tokio::time::interval panics on zero
        let interval = manager.config.cleanup_interval.max(MIN_CLEANUP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.cleanup().await;
            }
        })
    }

    /// Stop every session and wait for them to close
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<RelaySession>> = self.sessions.read().await.values().cloned().collect();
        tracing::info!(sessions = sessions.len(), "Shutting down relay");

        for session in &sessions {
            session.begin_close();
        }

        let deadline = Instant::now() + self.config.close_grace_period + std::time::Duration::from_secs(1);
        for session in sessions {
            if tokio::time::timeout_at(deadline, session.closed()).await.is_err() {
                tracing::warn!(stream = %session.stream_key(), "Session did not close during shutdown");
            }
        }
    }

    /// Finish a session once it starts closing: drain its links, remove it
    /// from the map, then mark it closed.
    fn spawn_reaper(&self, session: Arc<RelaySession>) {
        let sessions = Arc::clone(&self.sessions);
        let grace = self.config.close_grace_period;

        tokio::spawn(async move {
            session.wait_closing().await;
            session.drain(grace).await;

            {
                let mut sessions = sessions.write().await;
                let key = session.stream_key();
                if sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, &session)) {
                    sessions.remove(key);
                }
            }

            session.mark_closed();
        });
    }
}
