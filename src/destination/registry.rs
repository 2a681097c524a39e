//! Destination registry
//!
//! Holds the configured egress targets. Written rarely (control API CRUD),
//! read by every new session, so reads hand out `Arc` snapshots under a
//! shared lock and never observe a half-applied update.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::bus::{EventBus, RelayEvent};
use crate::error::{Error, Result};

use super::model::{Destination, DestinationId, DestinationUpdate, NewDestination};

/// Registry of configured egress destinations
pub struct DestinationRegistry {
    destinations: RwLock<HashMap<DestinationId, Arc<Destination>>>,
    bus: EventBus,
}

impl DestinationRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            destinations: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Validate and register a destination
    pub async fn add(&self, input: NewDestination) -> Result<Arc<Destination>> {
        let destination = Arc::new(input.into_destination()?);

        self.destinations
            .write()
            .await
            .insert(destination.id, Arc::clone(&destination));

        tracing::info!(
            destination = %destination.id,
            name = %destination.name,
            protocol = %destination.protocol,
            enabled = destination.enabled,
            "Destination added"
        );
        self.bus.publish(RelayEvent::DestinationAdded {
            destination: (*destination).clone(),
        });

        Ok(destination)
    }

    /// Apply a partial update
    ///
    /// The previous record is replaced, not mutated; sessions already
    /// relaying to it keep their copy.
    pub async fn update(&self, id: DestinationId, update: DestinationUpdate) -> Result<Arc<Destination>> {
        let updated = {
            let mut destinations = self.destinations.write().await;
            let current = destinations
                .get(&id)
                .ok_or(Error::DestinationNotFound(id))?;

            let updated = Arc::new(update.apply(current)?);
            destinations.insert(id, Arc::clone(&updated));
            updated
        };

        tracing::info!(
            destination = %id,
            name = %updated.name,
            enabled = updated.enabled,
            "Destination updated"
        );
        self.bus.publish(RelayEvent::DestinationUpdated {
            destination: (*updated).clone(),
        });

        Ok(updated)
    }

    pub async fn remove(&self, id: DestinationId) -> Result<Arc<Destination>> {
        let removed = self
            .destinations
            .write()
            .await
            .remove(&id)
            .ok_or(Error::DestinationNotFound(id))?;

        tracing::info!(destination = %id, name = %removed.name, "Destination removed");
        self.bus
            .publish(RelayEvent::DestinationRemoved { destination_id: id });

        Ok(removed)
    }

    /// Enable or disable a destination
    ///
    /// Only sessions started afterwards see the change.
    pub async fn set_enabled(&self, id: DestinationId, enabled: bool) -> Result<Arc<Destination>> {
        {
            let destinations = self.destinations.read().await;
            let current = destinations
                .get(&id)
                .ok_or(Error::DestinationNotFound(id))?;
            if current.enabled == enabled {
                return Ok(Arc::clone(current));
            }
        }

        self.update(id, DestinationUpdate::default().enabled(enabled))
            .await
    }

    pub async fn enable(&self, id: DestinationId) -> Result<Arc<Destination>> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: DestinationId) -> Result<Arc<Destination>> {
        self.set_enabled(id, false).await
    }

    pub async fn get(&self, id: DestinationId) -> Option<Arc<Destination>> {
        self.destinations.read().await.get(&id).cloned()
    }

    /// All destinations, oldest first
    pub async fn list(&self) -> Vec<Arc<Destination>> {
        let mut list: Vec<_> = self.destinations.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Destinations a new session should relay to
    pub async fn enabled_snapshot(&self) -> Vec<Arc<Destination>> {
        let mut list = self.list().await;
        list.retain(|d| d.enabled);
        list
    }

    pub async fn len(&self) -> usize {
        self.destinations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
