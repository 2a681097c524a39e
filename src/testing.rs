//! Scripted egress connector for tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::destination::{DestinationId, NewDestination, Protocol};
use crate::egress::{EgressConnector, EgressError, EgressSink, EgressTarget};
use crate::manager::SessionManager;
use crate::media::MediaFrame;

/// How a scripted destination behaves, keyed by destination name
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    /// Refuse the first `n` connection attempts
    FailTimes(u32),
    AlwaysFail,
    /// Connect, then never complete a write
    HangOnSend,
    /// Every write takes this long
    SlowSend(Duration),
    /// Connect, then fail the write after `n` frames were accepted
    DropAfter(usize),
}

#[derive(Default)]
struct Log {
    attempts: HashMap<String, Vec<Instant>>,
    frames: HashMap<String, Vec<MediaFrame>>,
    closes: HashMap<String, usize>,
}

#[derive(Default)]
pub struct ScriptedConnector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    log: Arc<Mutex<Log>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, name: &str, behavior: Behavior) {
        self.behaviors.lock().insert(name.to_string(), behavior);
    }

    pub fn attempts(&self, name: &str) -> Vec<Instant> {
        self.log.lock().attempts.get(name).cloned().unwrap_or_default()
    }

    pub fn frames(&self, name: &str) -> Vec<MediaFrame> {
        self.log.lock().frames.get(name).cloned().unwrap_or_default()
    }

    pub fn timestamps(&self, name: &str) -> Vec<u32> {
        self.frames(name).iter().map(|f| f.timestamp).collect()
    }

    pub fn closes(&self, name: &str) -> usize {
        self.log.lock().closes.get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EgressConnector for ScriptedConnector {
    async fn connect(&self, target: &EgressTarget) -> Result<Box<dyn EgressSink>, EgressError> {
        let name = target.destination.name.clone();
        let behavior = self
            .behaviors
            .lock()
            .get(&name)
            .copied()
            .unwrap_or(Behavior::Succeed);

        let attempt = {
            let mut log = self.log.lock();
            let attempts = log.attempts.entry(name.clone()).or_default();
            attempts.push(Instant::now());
            attempts.len() - 1
        };

        match behavior {
            Behavior::FailTimes(n) if attempt < n as usize => {
                Err(EgressError::Rejected(format!("scripted failure {attempt}")))
            }
            Behavior::AlwaysFail => Err(EgressError::Rejected("scripted failure".into())),
            _ => Ok(Box::new(ScriptedSink {
                name,
                behavior,
                accepted: 0,
                log: Arc::clone(&self.log),
            })),
        }
    }
}

struct ScriptedSink {
    name: String,
    behavior: Behavior,
    accepted: usize,
    log: Arc<Mutex<Log>>,
}

#[async_trait]
impl EgressSink for ScriptedSink {
    async fn send(&mut self, frame: &MediaFrame) -> Result<(), EgressError> {
        match self.behavior {
            Behavior::HangOnSend => std::future::pending::<()>().await,
            Behavior::SlowSend(delay) => tokio::time::sleep(delay).await,
            Behavior::DropAfter(n) if self.accepted >= n => return Err(EgressError::Closed),
            _ => {}
        }

        self.accepted += 1;
        self.log
            .lock()
            .frames
            .entry(self.name.clone())
            .or_default()
            .push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EgressError> {
        *self.log.lock().closes.entry(self.name.clone()).or_default() += 1;
        Ok(())
    }
}

/// Register an enabled RTMP destination named `name`
pub async fn add_destination(manager: &SessionManager, name: &str) -> DestinationId {
    manager
        .destinations()
        .add(NewDestination::new(
            name,
            Protocol::Rtmp,
            format!("rtmp://{}.example.com/live", name.to_lowercase()),
        ))
        .await
        .unwrap()
        .id
}
