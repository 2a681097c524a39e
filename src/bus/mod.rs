//! Event bus for relay observers
//!
//! Lifecycle and health events are published once and delivered to every
//! subscriber (dashboard sockets, loggers, tests) through a
//! `tokio::sync::broadcast` channel:
//!
//! ```text
//!   DestinationRegistry ─┐
//!   SessionManager ──────┼──► EventBus::publish() ──► Subscription::recv()
//!   EgressLink tasks ────┘                        ──► Subscription::recv()
//! ```
//!
//! Each subscriber sees events in emission order. A subscriber that falls
//! more than `capacity` events behind skips the oldest ones and is told how
//! many it missed; publishers are never slowed down by observers.

pub mod event;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

pub use event::RelayEvent;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Publish/subscribe hub for [`RelayEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: RelayEvent) -> usize {
        tracing::trace!(event = event.event_type(), "Publishing relay event");
        // Err only means nobody is listening
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Some(self.tx.subscribe()),
            missed: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A cancellable event subscription
///
/// Dropping the subscription also cancels it.
#[derive(Debug)]
pub struct Subscription {
    rx: Option<broadcast::Receiver<RelayEvent>>,
    missed: u64,
}

impl Subscription {
    /// Next event, or `None` once cancelled or the bus is gone
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    tracing::warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<RelayEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stop receiving; queued events are discarded
    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_none()
    }

    /// Events skipped because this subscriber fell behind
    pub fn missed(&self) -> u64 {
        self.missed
    }
}
