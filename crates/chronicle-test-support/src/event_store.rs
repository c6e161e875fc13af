//! Test event stores — mock `EventStore` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::CommittedEvent;
use chronicle_core::repository::EventStore;
use chronicle_core::snapshot::Snapshot;
use uuid::Uuid;

/// An event store that records every append and saved snapshot. Returns the
/// configured events (filtered by `after_version`) and snapshot from every
/// load, and always succeeds on writes.
#[derive(Debug)]
pub struct RecordingEventStore {
    events: Vec<CommittedEvent>,
    snapshot: Option<Snapshot>,
    appended: Mutex<Vec<(Uuid, i64, Vec<CommittedEvent>)>>,
    saved_snapshots: Mutex<Vec<Snapshot>>,
    loads: Mutex<Vec<(Uuid, i64)>>,
}

impl RecordingEventStore {
    /// Create a recording store that serves `events` from `load_events`.
    #[must_use]
    pub fn new(events: Vec<CommittedEvent>) -> Self {
        Self {
            events,
            snapshot: None,
            appended: Mutex::new(Vec::new()),
            saved_snapshots: Mutex::new(Vec::new()),
            loads: Mutex::new(Vec::new()),
        }
    }

    /// Serve `snapshot` from every `load_snapshot` call.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Returns a copy of all appends as `(source_id, expected_version, events)`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<(Uuid, i64, Vec<CommittedEvent>)> {
        self.appended.lock().unwrap().clone()
    }

    /// Returns a copy of all saved snapshots.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_snapshots(&self) -> Vec<Snapshot> {
        self.saved_snapshots.lock().unwrap().clone()
    }

    /// Returns the `(source_id, after_version)` of every `load_events` call.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn event_loads(&self) -> Vec<(Uuid, i64)> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn load_snapshot(&self, _source_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(self.snapshot.clone())
    }

    async fn load_events(
        &self,
        source_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        self.loads.lock().unwrap().push((source_id, after_version));
        Ok(self
            .events
            .iter()
            .filter(|event| event.sequence > after_version)
            .cloned()
            .collect())
    }

    async fn append_events(
        &self,
        source_id: Uuid,
        expected_version: i64,
        events: &[CommittedEvent],
    ) -> Result<(), DomainError> {
        self.appended
            .lock()
            .unwrap()
            .push((source_id, expected_version, events.to_vec()));
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        self.saved_snapshots.lock().unwrap().push(snapshot);
        Ok(())
    }
}

/// An event store with no history that silently accepts writes. Useful for
/// testing "aggregate not found" scenarios and creation commands.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn load_snapshot(&self, _source_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(None)
    }

    async fn load_events(
        &self,
        _source_id: Uuid,
        _after_version: i64,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        Ok(vec![])
    }

    async fn append_events(
        &self,
        _source_id: Uuid,
        _expected_version: i64,
        _events: &[CommittedEvent],
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn save_snapshot(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Ok(())
    }
}

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn load_snapshot(&self, _source_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn load_events(
        &self,
        _source_id: Uuid,
        _after_version: i64,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn append_events(
        &self,
        _source_id: Uuid,
        _expected_version: i64,
        _events: &[CommittedEvent],
    ) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn save_snapshot(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
