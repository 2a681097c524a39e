//! Fan-out of one ingest stream to its egress links
//!
//! Dispatch never waits on a destination: frames are offered to each link's
//! bounded queue and dropped when a link is not streaming or cannot keep up.
//! Links that exhausted their retry budget are moved out of the dispatch set
//! but stay visible in snapshots.

pub mod link;
pub mod policy;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::destination::{Destination, DestinationId};
use crate::egress::{EgressState, EgressTarget};
use crate::media::MediaFrame;
use crate::session::state::SessionShared;
use crate::session::LinkSnapshot;

pub use link::LinkStatus;
pub(crate) use link::{LinkContext, LinkHandle};
pub use policy::ReconnectPolicy;

/// Egress links of a single session
#[derive(Default)]
pub(crate) struct FanoutScheduler {
    links: HashMap<DestinationId, LinkHandle>,
    retired: HashMap<DestinationId, LinkHandle>,
}

impl FanoutScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn a link for `destination`; false if one already exists
    pub(crate) fn attach(&mut self, destination: Arc<Destination>, ctx: &LinkContext) -> bool {
        let id = destination.id;
        if self.links.contains_key(&id) || self.retired.contains_key(&id) {
            return false;
        }

        let target = EgressTarget::new(ctx.session.key.clone(), destination);
        self.links.insert(id, LinkHandle::spawn(target, ctx));
        true
    }

    /// Offer a frame to every live link; returns how many queued it
    pub(crate) fn dispatch(&mut self, frame: &MediaFrame) -> usize {
        let mut delivered = 0;
        let mut newly_retired = Vec::new();

        for (id, link) in &self.links {
            if link.is_retired() {
                newly_retired.push(*id);
                continue;
            }
            if link.offer(frame) {
                delivered += 1;
            }
        }

        for id in newly_retired {
            if let Some(link) = self.links.remove(&id) {
                tracing::debug!(destination = %id, "Link removed from fan-out");
                self.retired.insert(id, link);
            }
        }

        delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.links.len() + self.retired.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn count_in(&self, state: EgressState) -> usize {
        self.all().filter(|link| link.state() == state).count()
    }

    pub(crate) fn watch(&self, id: &DestinationId) -> Option<watch::Receiver<LinkStatus>> {
        self.links
            .get(id)
            .or_else(|| self.retired.get(id))
            .map(LinkHandle::watch)
    }

    /// Link snapshots ordered by destination name
    pub(crate) fn snapshots(&self) -> Vec<LinkSnapshot> {
        let mut snapshots: Vec<LinkSnapshot> = self.all().map(LinkHandle::snapshot).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    /// Close every queue and collect the tasks still to be joined
    pub(crate) fn detach_all(&mut self) -> Vec<(DestinationId, JoinHandle<()>)> {
        self.links
            .iter_mut()
            .chain(self.retired.iter_mut())
            .filter_map(|(id, link)| link.detach().map(|task| (*id, task)))
            .collect()
    }

    /// Mark a link whose task was aborted as closed
    pub(crate) fn abandon(&self, id: &DestinationId, session: &SessionShared) {
        if let Some(link) = self.links.get(id).or_else(|| self.retired.get(id)) {
            link.abandon(session);
        }
    }

    fn all(&self) -> impl Iterator<Item = &LinkHandle> {
        self.links.values().chain(self.retired.values())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::bus::EventBus;
    use crate::config::EgressConfig;
    use crate::destination::{NewDestination, Protocol};
    use crate::egress::EgressConnector;
    use crate::media::GopBuffer;
    use crate::session::StreamKey;
    use crate::testing::ScriptedConnector;

    #[tokio::test(start_paused = true)]
    async fn test_attach_same_destination_twice() {
        let connector = ScriptedConnector::new();
        let session = Arc::new(SessionShared::new(
            StreamKey::new("cam1"),
            EventBus::new(64),
            16,
            GopBuffer::new(),
            1,
        ));
        let ctx = LinkContext {
            session,
            connector: Arc::clone(&connector) as Arc<dyn EgressConnector>,
            config: EgressConfig::default(),
            shutdown: CancellationToken::new(),
        };
        let destination = Arc::new(
            NewDestination::new("D", Protocol::Rtmp, "rtmp://d.example.com/live")
                .into_destination()
                .unwrap(),
        );

        let mut fanout = FanoutScheduler::new();
        assert!(fanout.attach(Arc::clone(&destination), &ctx));
        assert!(!fanout.attach(Arc::clone(&destination), &ctx));
        assert_eq!(fanout.len(), 1);

        let mut rx = fanout.watch(&destination.id).unwrap();
        rx.wait_for(|s| s.state == EgressState::Streaming).await.unwrap();
        assert_eq!(connector.attempts("D").len(), 1);

        ctx.shutdown.cancel();
        for (_, task) in fanout.detach_all() {
            task.await.unwrap();
        }
    }
}
