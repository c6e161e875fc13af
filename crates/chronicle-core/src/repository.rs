//! Persistence abstraction and the repository facade over it.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::dispatcher::EventDispatcher;
use crate::error::DomainError;
use crate::event::CommittedEvent;
use crate::reconstructor::AggregateReconstructor;
use crate::snapshot::{Snapshot, SnapshottingPolicy};
use crate::stream::EventStream;

/// Storage for event streams and snapshots.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Load the latest snapshot of an aggregate, if any.
    async fn load_snapshot(&self, source_id: Uuid) -> Result<Option<Snapshot>, DomainError>;

    /// Load the events of an aggregate with a sequence greater than
    /// `after_version`, ordered by sequence.
    async fn load_events(
        &self,
        source_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<CommittedEvent>, DomainError>;

    /// Append new events to an aggregate stream with optimistic concurrency.
    /// `expected_version` is the last known sequence number.
    async fn append_events(
        &self,
        source_id: Uuid,
        expected_version: i64,
        events: &[CommittedEvent],
    ) -> Result<(), DomainError>;

    /// Store a snapshot, replacing any previous one of the same aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn load_snapshot(&self, source_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        (**self).load_snapshot(source_id).await
    }

    async fn load_events(
        &self,
        source_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        (**self).load_events(source_id, after_version).await
    }

    async fn append_events(
        &self,
        source_id: Uuid,
        expected_version: i64,
        events: &[CommittedEvent],
    ) -> Result<(), DomainError> {
        (**self)
            .append_events(source_id, expected_version, events)
            .await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        (**self).save_snapshot(snapshot).await
    }
}

/// Loads and saves aggregates through an [`EventStore`].
///
/// Saving appends the new events, takes a snapshot when the policy asks for
/// one and finally publishes the events.
#[derive(Debug)]
pub struct Repository<S, P> {
    store: S,
    reconstructor: AggregateReconstructor,
    policy: P,
    dispatcher: Arc<EventDispatcher>,
}

impl<S: EventStore, P: SnapshottingPolicy> Repository<S, P> {
    /// Creates a repository.
    pub fn new(
        store: S,
        reconstructor: AggregateReconstructor,
        policy: P,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            store,
            reconstructor,
            policy,
            dispatcher,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The dispatcher committed events are published to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Creates a brand-new, empty aggregate.
    #[must_use]
    pub fn create<A: AggregateRoot>(&self, source_id: Uuid) -> A {
        self.reconstructor.create(source_id)
    }

    /// Loads an aggregate, or `None` if it has no history.
    ///
    /// Uses the stored snapshot when the aggregate accepts it and replays the
    /// full history otherwise.
    ///
    /// # Errors
    ///
    /// Propagates store failures and the errors of
    /// [`AggregateReconstructor::load`].
    pub async fn load<A: AggregateRoot>(&self, source_id: Uuid) -> Result<Option<A>, DomainError> {
        let snapshot = self
            .store
            .load_snapshot(source_id)
            .await?
            .filter(|snapshot| self.reconstructor.accepts_snapshot::<A>(snapshot));
        let after_version = snapshot.as_ref().map_or(0, |snapshot| snapshot.version);

        let events = self.store.load_events(source_id, after_version).await?;
        let stream = EventStream::new(source_id, events)?;

        self.reconstructor.load(source_id, snapshot.as_ref(), &stream)
    }

    /// Loads an aggregate that must exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if it has no history, and
    /// otherwise the errors of [`Repository::load`].
    pub async fn get<A: AggregateRoot>(&self, source_id: Uuid) -> Result<A, DomainError> {
        self.load(source_id)
            .await?
            .ok_or(DomainError::AggregateNotFound(source_id))
    }

    /// Persists `events`, which must be the latest events applied to
    /// `aggregate`, then snapshots and publishes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidEventSequence` if `events` does not end at
    /// the aggregate's version, `DomainError::ConcurrencyConflict` from the
    /// store if the stream moved on, and dispatch failures.
    pub async fn save<A: AggregateRoot>(
        &self,
        aggregate: &A,
        events: Vec<CommittedEvent>,
    ) -> Result<(), DomainError> {
        let committed = self.persist(aggregate, events).await?;
        self.dispatcher.publish_all(&committed)
    }

    /// Saves the aggregate's uncommitted events and clears them.
    ///
    /// Returns the events that were committed.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Repository::save`]. The uncommitted events are
    /// kept only when they could not be appended; once the store holds them
    /// they are cleared even if publishing fails afterwards.
    pub async fn commit<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        let events = aggregate.uncommitted_events().to_vec();
        let committed = self.persist(&*aggregate, events).await?;
        aggregate.clear_uncommitted_events();

        if let Err(e) = self.dispatcher.publish_all(&committed) {
            tracing::warn!(
                source_id = %aggregate.source_id(),
                version = aggregate.version(),
                error = %e,
                "events stored but not published"
            );
            return Err(e);
        }
        Ok(committed)
    }

    /// Appends `events` and takes a snapshot when the policy asks for one.
    async fn persist<A: AggregateRoot>(
        &self,
        aggregate: &A,
        events: Vec<CommittedEvent>,
    ) -> Result<Vec<CommittedEvent>, DomainError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let source_id = aggregate.source_id();
        let stream = EventStream::new(source_id, events)?;
        if stream.to_version() != aggregate.version() {
            return Err(DomainError::InvalidEventSequence {
                position: stream.len() - 1,
                expected: aggregate.version(),
                actual: stream.to_version(),
            });
        }

        let committed: Vec<CommittedEvent> = stream.iter().cloned().collect();
        let expected_version = stream.from_version() - 1;
        self.store
            .append_events(source_id, expected_version, &committed)
            .await?;

        if self.policy.should_snapshot(aggregate) {
            if let Some(snapshot) = self.reconstructor.extract_snapshot(aggregate) {
                let version = snapshot.version;
                match self.store.save_snapshot(snapshot).await {
                    Ok(()) => tracing::debug!(%source_id, version, "saved snapshot"),
                    Err(e) => tracing::warn!(%source_id, version, error = %e, "failed to save snapshot"),
                }
            }
        }

        Ok(committed)
    }
}
