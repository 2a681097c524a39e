//! Egress link: one destination within one session
//!
//! Each link runs as its own task. The task owns the connection and the
//! receiving end of the link's frame queue; the session keeps a
//! [`LinkHandle`] with the sending end, the status channel and counters.
//!
//! ```text
//! Connecting ──► Streaming ──► Failed ──► Reconnecting ──► Streaming …
//!      │              │           │
//!      └──► Failed    └──► Closed └──► Failed (permanent, retry budget spent)
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::RelayEvent;
use crate::config::EgressConfig;
use crate::destination::Destination;
use crate::egress::{EgressConnector, EgressError, EgressSink, EgressState, EgressTarget};
use crate::error::Error;
use crate::media::MediaFrame;
use crate::session::state::SessionShared;
use crate::session::LinkSnapshot;

/// Observable status of a link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub state: EgressState,
    /// Reconnect attempts over the session lifetime
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Retry budget exhausted; the link is out of the fan-out for good
    pub permanent_failure: bool,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: EgressState::Connecting,
            retry_count: 0,
            last_error: None,
            permanent_failure: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    /// Unix millis of the last successful write, 0 if none
    last_activity_ms: AtomicI64,
    /// Set by dispatch when the queue was full
    overflowed: AtomicBool,
}

impl LinkCounters {
    fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        match self.last_activity_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

/// Everything a link task needs from its session
#[derive(Clone)]
pub(crate) struct LinkContext {
    pub(crate) session: Arc<SessionShared>,
    pub(crate) connector: Arc<dyn EgressConnector>,
    pub(crate) config: EgressConfig,
    /// Cancelled when the session closes
    pub(crate) shutdown: CancellationToken,
}

/// Session-side handle to a running link
pub(crate) struct LinkHandle {
    pub(crate) destination: Arc<Destination>,
    tx: Option<mpsc::Sender<MediaFrame>>,
    status: Arc<watch::Sender<LinkStatus>>,
    counters: Arc<LinkCounters>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    /// Start the link task; the link begins in `Connecting`
    pub(crate) fn spawn(target: EgressTarget, ctx: &LinkContext) -> Self {
        let (tx, rx) = mpsc::channel(ctx.config.queue_capacity);
        let (status, _) = watch::channel(LinkStatus::default());
        let status = Arc::new(status);
        let counters = Arc::new(LinkCounters::default());
        let destination = Arc::clone(&target.destination);

        ctx.session.emit(RelayEvent::EgressStateChanged {
            stream_key: target.stream_key.clone(),
            destination_id: destination.id,
            state: EgressState::Connecting,
            retry_count: 0,
            error: None,
        });

        let link = EgressLink {
            target,
            ctx: ctx.clone(),
            rx,
            status: Arc::clone(&status),
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(link.run());

        Self {
            destination,
            tx: Some(tx),
            status,
            counters,
            task: Some(task),
        }
    }

    pub(crate) fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn state(&self) -> EgressState {
        self.status.borrow().state
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.status.borrow().permanent_failure
    }

    pub(crate) fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    /// Queue a frame without waiting; returns whether it was queued
    ///
    /// Frames are dropped while the link is not streaming. A full queue
    /// flags the link, which then fails and reconnects.
    pub(crate) fn offer(&self, frame: &MediaFrame) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        if self.state() != EgressState::Streaming {
            self.counters.record_dropped();
            return false;
        }

        match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.record_dropped();
                if !self.counters.overflowed.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        destination = %self.destination.id,
                        name = %self.destination.name,
                        "Egress queue full, dropping frames"
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the queue and hand over the task for joining
    pub(crate) fn detach(&mut self) -> Option<JoinHandle<()>> {
        self.tx = None;
        self.task.take()
    }

    /// Mark a link whose task was aborted as closed
    pub(crate) fn abandon(&self, session: &SessionShared) {
        let mut retry_count = 0;
        let changed = self.status.send_if_modified(|status| {
            retry_count = status.retry_count;
            if status.state == EgressState::Closed || status.permanent_failure {
                return false;
            }
            status.state = EgressState::Closed;
            true
        });

        if changed {
            session.emit(RelayEvent::EgressStateChanged {
                stream_key: session.key.clone(),
                destination_id: self.destination.id,
                state: EgressState::Closed,
                retry_count,
                error: None,
            });
        }
    }

    pub(crate) fn snapshot(&self) -> LinkSnapshot {
        let status = self.status();
        LinkSnapshot {
            id: self.destination.id,
            name: self.destination.name.clone(),
            protocol: self.destination.protocol,
            state: status.state,
            retry_count: status.retry_count,
            last_error: status.last_error,
            permanent_failure: status.permanent_failure,
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            last_activity_at: self.counters.last_activity(),
        }
    }
}

enum StreamEnd {
    /// Queue closed by the session; sink closed cleanly
    Drained,
    Failed(EgressError),
}

struct EgressLink {
    target: EgressTarget,
    ctx: LinkContext,
    rx: mpsc::Receiver<MediaFrame>,
    status: Arc<watch::Sender<LinkStatus>>,
    counters: Arc<LinkCounters>,
}

impl EgressLink {
    async fn run(mut self) {
        // Failures since the last successful connect
        let mut consecutive: u32 = 0;
        let mut failed_before = false;

        loop {
            let connect_timeout = self.ctx.config.connect_timeout;
            let attempt = tokio::time::timeout(
                connect_timeout,
                self.ctx.connector.connect(&self.target),
            );
            let connected = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                result = attempt => result,
            };

            let message = match connected {
                Ok(Ok(sink)) => {
                    consecutive = 0;
                    match self.stream(sink).await {
                        StreamEnd::Drained => break,
                        StreamEnd::Failed(e) => e.to_string(),
                    }
                }
                Ok(Err(e)) => self.connect_failed(e),
                Err(_) => self.connect_failed(EgressError::ConnectTimeout(connect_timeout)),
            };

            if self.ctx.shutdown.is_cancelled() {
                break;
            }
            self.drain_queue();

            let policy = &self.ctx.config.reconnect;
            if !policy.allows_retry(consecutive) {
                self.retire(consecutive + 1, message);
                if !failed_before {
                    self.ctx.session.link_failed_once();
                }
                return;
            }

            let delay = policy.delay_for(consecutive);
            consecutive += 1;
            tracing::warn!(
                stream = %self.target.stream_key,
                destination = %self.target.destination.id,
                error = %message,
                retry_in_ms = delay.as_millis() as u64,
                "Egress failed"
            );
            self.transition(EgressState::Failed, Some(message));
            if !failed_before {
                failed_before = true;
                self.ctx.session.link_failed_once();
            }

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.transition(EgressState::Reconnecting, None);
        }

        self.transition(EgressState::Closed, None);
    }

    fn connect_failed(&self, source: EgressError) -> String {
        Error::EgressConnectFailed {
            destination: self.target.destination.id,
            source,
        }
        .to_string()
    }

    async fn stream(&mut self, mut sink: Box<dyn EgressSink>) -> StreamEnd {
        // Anything queued belongs to an earlier connection
        self.drain_queue();
        self.counters.overflowed.store(false, Ordering::Release);

        // Under the cache lock no frame can be dispatched, so the catch-up
        // ends exactly where the queue begins.
        let catchup = {
            let cache = self.ctx.session.cache.lock();
            self.transition(EgressState::Streaming, None);
            cache.catchup()
        };
        self.ctx.session.promote();

        for frame in &catchup {
            if let Err(e) = self.write(sink.as_mut(), frame).await {
                return StreamEnd::Failed(e);
            }
        }

        loop {
            if self.counters.overflowed.swap(false, Ordering::AcqRel) {
                return StreamEnd::Failed(EgressError::Backpressure);
            }

            match self.rx.recv().await {
                Some(frame) => {
                    if let Err(e) = self.write(sink.as_mut(), &frame).await {
                        return StreamEnd::Failed(e);
                    }
                }
                None => {
                    let write_timeout = self.ctx.config.write_timeout;
                    match tokio::time::timeout(write_timeout, sink.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!(
                            destination = %self.target.destination.id,
                            error = %e,
                            "Egress close failed"
                        ),
                        Err(_) => tracing::debug!(
                            destination = %self.target.destination.id,
                            "Egress close timed out"
                        ),
                    }
                    return StreamEnd::Drained;
                }
            }
        }
    }

    async fn write(&self, sink: &mut dyn EgressSink, frame: &MediaFrame) -> Result<(), EgressError> {
        let write_timeout = self.ctx.config.write_timeout;
        match tokio::time::timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {
                self.counters.record_sent(frame.size());
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EgressError::WriteTimeout(write_timeout)),
        }
    }

    fn drain_queue(&mut self) {
        while self.rx.try_recv().is_ok() {
            self.counters.record_dropped();
        }
    }

    fn transition(&self, state: EgressState, error: Option<String>) {
        let mut retry_count = 0;
        self.status.send_modify(|status| {
            if state == EgressState::Reconnecting {
                status.retry_count += 1;
            }
            status.state = state;
            if error.is_some() {
                status.last_error = error.clone();
            }
            retry_count = status.retry_count;
        });

        match state {
            EgressState::Streaming => tracing::info!(
                stream = %self.target.stream_key,
                destination = %self.target.destination.id,
                name = %self.target.destination.name,
                retry_count = retry_count,
                "Egress streaming"
            ),
            _ => tracing::debug!(
                stream = %self.target.stream_key,
                destination = %self.target.destination.id,
                state = %state,
                retry_count = retry_count,
                "Egress state changed"
            ),
        }

        self.ctx.session.emit(RelayEvent::EgressStateChanged {
            stream_key: self.target.stream_key.clone(),
            destination_id: self.target.destination.id,
            state,
            retry_count,
            error,
        });
    }

    /// Retry budget spent: fail for the rest of the session
    fn retire(&self, attempts: u32, last_error: String) {
        let message = Error::EgressPermanentFailure {
            destination: self.target.destination.id,
            attempts,
            last_error,
        }
        .to_string();

        tracing::error!(
            stream = %self.target.stream_key,
            destination = %self.target.destination.id,
            attempts = attempts,
            "Egress failed permanently"
        );

        let mut retry_count = 0;
        self.status.send_modify(|status| {
            status.state = EgressState::Failed;
            status.permanent_failure = true;
            status.last_error = Some(message.clone());
            retry_count = status.retry_count;
        });

        self.ctx.session.emit(RelayEvent::EgressStateChanged {
            stream_key: self.target.stream_key.clone(),
            destination_id: self.target.destination.id,
            state: EgressState::Failed,
            retry_count,
            error: Some(message),
        });
    }
}
