//! In-process implementation of the `EventStore` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::event::CommittedEvent;
use chronicle_core::repository::EventStore;
use chronicle_core::snapshot::Snapshot;
use chronicle_core::stream::EventStream;

/// Event store keeping every stream and the latest snapshot per aggregate in
/// memory.
///
/// Appends are checked against the stream's current version, so two writers
/// starting from the same version cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<Uuid, Vec<CommittedEvent>>>,
    snapshots: RwLock<HashMap<Uuid, Snapshot>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of an aggregate's stream, or 0 if it has none.
    pub async fn current_version(&self, source_id: Uuid) -> i64 {
        self.streams
            .read()
            .await
            .get(&source_id)
            .and_then(|events| events.last())
            .map_or(0, |event| event.sequence)
    }

    /// Version of the stored snapshot of an aggregate, if any.
    pub async fn snapshot_version(&self, source_id: Uuid) -> Option<i64> {
        self.snapshots
            .read()
            .await
            .get(&source_id)
            .map(|snapshot| snapshot.version)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load_snapshot(&self, source_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(self.snapshots.read().await.get(&source_id).cloned())
    }

    async fn load_events(
        &self,
        source_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        let streams = self.streams.read().await;
        let events: Vec<CommittedEvent> = streams
            .get(&source_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|event| event.sequence > after_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(%source_id, after_version, count = events.len(), "loaded events");
        Ok(events)
    }

    async fn append_events(
        &self,
        source_id: Uuid,
        expected_version: i64,
        events: &[CommittedEvent],
    ) -> Result<(), DomainError> {
        let batch = EventStream::new(source_id, events.to_vec())?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut streams = self.streams.write().await;
        let stream = streams.entry(source_id).or_default();
        let actual = stream.last().map_or(0, |event| event.sequence);
        if actual != expected_version {
            tracing::debug!(
                %source_id,
                expected_version,
                actual,
                "rejected append on stale version"
            );
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: source_id,
                expected: expected_version,
                actual,
            });
        }

        if batch.from_version() != actual + 1 {
            return Err(DomainError::InvalidEventSequence {
                position: 0,
                expected: actual + 1,
                actual: batch.from_version(),
            });
        }

        stream.extend(batch.iter().cloned());
        tracing::debug!(
            %source_id,
            count = batch.len(),
            version = batch.to_version(),
            "appended events"
        );
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.write().await;
        let source_id = snapshot.source_id;
        if snapshots
            .get(&source_id)
            .is_some_and(|existing| existing.version > snapshot.version)
        {
            tracing::debug!(%source_id, version = snapshot.version, "kept newer snapshot");
            return Ok(());
        }

        tracing::debug!(%source_id, version = snapshot.version, "saved snapshot");
        snapshots.insert(source_id, snapshot);
        Ok(())
    }
}
