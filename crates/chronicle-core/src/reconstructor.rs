//! Rebuilds aggregates from snapshots and event streams.

use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{AggregateRoot, AggregateState, apply_event};
use crate::error::DomainError;
use crate::mapping::short_type_name;
use crate::registry::HandlerRegistry;
use crate::snapshot::Snapshot;
use crate::stream::EventStream;

/// Progress of a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPhase {
    Start,
    SnapshotAttempted,
    Replaying,
    Ready,
}

/// Creates aggregates and reconstitutes them from persisted history.
#[derive(Debug, Clone)]
pub struct AggregateReconstructor {
    registry: Arc<HandlerRegistry>,
}

impl AggregateReconstructor {
    /// Creates a reconstructor resolving handlers through `registry`.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// The registry shared with every aggregate this reconstructor builds.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Creates a brand-new, empty aggregate at version 0.
    #[must_use]
    pub fn create<A: AggregateRoot>(&self, source_id: Uuid) -> A {
        A::create_empty(AggregateState::new(source_id, Arc::clone(&self.registry)))
    }

    /// Returns `true` if `A` can be restored from `snapshot`.
    ///
    /// The snapshot payload type must equal the declared capability's payload
    /// type exactly.
    #[must_use]
    pub fn accepts_snapshot<A: AggregateRoot>(&self, snapshot: &Snapshot) -> bool {
        self.registry
            .snapshot_capability::<A>()
            .is_some_and(|capability| capability.accepts(snapshot))
    }

    /// Captures `aggregate`, or `None` if its type cannot be snapshotted.
    #[must_use]
    pub fn extract_snapshot<A: AggregateRoot>(&self, aggregate: &A) -> Option<Snapshot> {
        self.registry
            .snapshot_capability::<A>()
            .map(|capability| capability.create(aggregate))
    }

    /// Reconstitutes an aggregate from an optional snapshot and the events
    /// that follow it.
    ///
    /// Returns `Ok(None)` when there is neither a usable snapshot nor any
    /// event. A snapshot whose payload type the aggregate does not accept is
    /// ignored, in which case `events` must hold the full history.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidEventSource` if `events` belongs to
    /// another source, `DomainError::InvalidEventSequence` if the events do
    /// not continue the snapshot, `DomainError::HandlerInvocation` if a
    /// handler fails during replay, and the failure of restoring an accepted
    /// snapshot.
    pub fn load<A: AggregateRoot>(
        &self,
        source_id: Uuid,
        snapshot: Option<&Snapshot>,
        events: &EventStream,
    ) -> Result<Option<A>, DomainError> {
        let aggregate_type = short_type_name::<A>();
        let mut phase = LoadPhase::Start;
        tracing::debug!(aggregate = aggregate_type, %source_id, ?phase, "loading aggregate");

        if events.source_id() != source_id {
            return Err(DomainError::InvalidEventSource {
                position: 0,
                expected: source_id,
                actual: events.source_id(),
            });
        }

        let restored = match snapshot {
            Some(snapshot) => self.restore::<A>(source_id, snapshot)?,
            None => None,
        };
        phase = LoadPhase::SnapshotAttempted;
        tracing::debug!(
            aggregate = aggregate_type,
            %source_id,
            ?phase,
            from_snapshot = restored.is_some(),
            "snapshot attempted"
        );

        let mut aggregate = match restored {
            Some(aggregate) => {
                let expected = aggregate.version() + 1;
                if !events.is_empty() && events.from_version() != expected {
                    return Err(DomainError::InvalidEventSequence {
                        position: 0,
                        expected,
                        actual: events.from_version(),
                    });
                }
                aggregate
            }
            None if events.is_empty() => {
                tracing::debug!(aggregate = aggregate_type, %source_id, "no history found");
                return Ok(None);
            }
            None => self.create::<A>(source_id),
        };

        phase = LoadPhase::Replaying;
        tracing::debug!(
            aggregate = aggregate_type,
            %source_id,
            ?phase,
            events = events.len(),
            "replaying events"
        );
        for event in events {
            apply_event(&mut aggregate, event)?;
        }
        if !events.is_empty() {
            aggregate.state_mut().set_version(events.to_version());
        }

        phase = LoadPhase::Ready;
        tracing::debug!(
            aggregate = aggregate_type,
            %source_id,
            ?phase,
            version = aggregate.version(),
            "aggregate loaded"
        );
        Ok(Some(aggregate))
    }

    fn restore<A: AggregateRoot>(
        &self,
        source_id: Uuid,
        snapshot: &Snapshot,
    ) -> Result<Option<A>, DomainError> {
        let Some(capability) = self.registry.snapshot_capability::<A>() else {
            return Ok(None);
        };
        if !capability.accepts(snapshot) {
            tracing::debug!(
                aggregate = short_type_name::<A>(),
                snapshot_type = snapshot.payload_type_name(),
                "snapshot payload not accepted, replaying full history"
            );
            return Ok(None);
        }

        let mut aggregate = self.create::<A>(source_id);
        if !capability.restore(&mut aggregate, snapshot)? {
            return Ok(None);
        }
        aggregate.state_mut().mark_restored(snapshot.version);
        Ok(Some(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::event::{CommittedEvent, EventPayload};
    use crate::mapping::{ConventionBased, EventSourced, HandlerMethod};
    use crate::snapshot::{SnapshotCapability, Snapshotable};
    use chrono::Utc;

    #[derive(Debug)]
    struct Deposited(i64);

    impl EventPayload for Deposited {
        fn event_name(&self) -> &'static str {
            "wallet.deposited"
        }
    }

    #[derive(Debug)]
    struct Frozen;

    impl EventPayload for Frozen {
        fn event_name(&self) -> &'static str {
            "wallet.frozen"
        }
    }

    #[derive(Debug, Clone)]
    struct WalletMemento {
        balance: i64,
    }

    #[derive(Debug, Clone)]
    struct OldWalletMemento;

    #[derive(Debug)]
    struct Wallet {
        state: AggregateState<Self>,
        balance: i64,
    }

    impl EventSourced for Wallet {
        type Mapping = ConventionBased;

        fn handler_methods() -> Vec<HandlerMethod<Self>> {
            vec![
                HandlerMethod::new("on_deposited", |w: &mut Self, e: &Deposited| {
                    w.balance += e.0;
                    Ok(())
                }),
                HandlerMethod::new("on_frozen", |_: &mut Self, _: &Frozen| {
                    Err(HandlerError::msg("wallet frozen"))
                }),
            ]
        }
    }

    impl AggregateRoot for Wallet {
        fn create_empty(state: AggregateState<Self>) -> Self {
            Self { state, balance: 0 }
        }

        fn state(&self) -> &AggregateState<Self> {
            &self.state
        }

        fn state_mut(&mut self) -> &mut AggregateState<Self> {
            &mut self.state
        }

        fn snapshot_capabilities() -> Vec<SnapshotCapability<Self>> {
            vec![SnapshotCapability::of::<WalletMemento>()]
        }
    }

    impl Snapshotable<WalletMemento> for Wallet {
        fn create_snapshot(&self) -> WalletMemento {
            WalletMemento {
                balance: self.balance,
            }
        }

        fn restore_from_snapshot(&mut self, payload: WalletMemento) -> Result<(), DomainError> {
            if payload.balance < 0 {
                return Err(DomainError::Validation("overdrawn wallet memento".into()));
            }
            self.balance = payload.balance;
            Ok(())
        }
    }

    fn deposits(source_id: Uuid, sequences: std::ops::RangeInclusive<i64>) -> EventStream {
        let events = sequences
            .map(|seq| CommittedEvent::new(source_id, seq, Deposited(seq * 10), Utc::now()))
            .collect();
        EventStream::new(source_id, events).unwrap()
    }

    fn reconstructor() -> AggregateReconstructor {
        AggregateReconstructor::new(Arc::new(HandlerRegistry::new()))
    }

    #[test]
    fn test_full_replay_rebuilds_state_and_version() {
        // Arrange
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let stream = deposits(source_id, 1..=4);

        // Act
        let wallet: Wallet = reconstructor
            .load(source_id, None, &stream)
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(wallet.balance, 100);
        assert_eq!(wallet.version(), 4);
        assert_eq!(wallet.state().initial_version(), 0);
        assert!(!wallet.state().restored_from_snapshot());
        assert!(wallet.uncommitted_events().is_empty());
    }

    #[test]
    fn test_independent_full_replays_are_deterministic() {
        let source_id = Uuid::new_v4();
        let stream = deposits(source_id, 1..=5);

        let first: Wallet = reconstructor()
            .load(source_id, None, &stream)
            .unwrap()
            .unwrap();
        let second: Wallet = reconstructor()
            .load(source_id, None, &stream)
            .unwrap()
            .unwrap();

        assert_eq!(first.balance, second.balance);
        assert_eq!(first.version(), second.version());
        assert_eq!(
            first.state().source_information(),
            second.state().source_information()
        );
    }

    #[test]
    fn test_no_snapshot_and_no_events_yields_none() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();

        let loaded = reconstructor
            .load::<Wallet>(source_id, None, &EventStream::empty(source_id))
            .unwrap();

        assert!(loaded.is_none());
    }

    #[test]
    fn test_snapshot_path_matches_full_replay() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let replayed: Wallet = reconstructor
            .load(source_id, None, &deposits(source_id, 1..=3))
            .unwrap()
            .unwrap();
        let snapshot = reconstructor.extract_snapshot(&replayed).unwrap();

        let from_snapshot: Wallet = reconstructor
            .load(source_id, Some(&snapshot), &deposits(source_id, 4..=6))
            .unwrap()
            .unwrap();
        let full: Wallet = reconstructor
            .load(source_id, None, &deposits(source_id, 1..=6))
            .unwrap()
            .unwrap();

        assert_eq!(from_snapshot.balance, full.balance);
        assert_eq!(from_snapshot.version(), full.version());
        assert_eq!(from_snapshot.state().initial_version(), 3);
        assert!(from_snapshot.state().restored_from_snapshot());
    }

    #[test]
    fn test_snapshot_without_newer_events_is_loaded_at_snapshot_version() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let snapshot = Snapshot::new(source_id, 7, WalletMemento { balance: 70 });

        let wallet: Wallet = reconstructor
            .load(source_id, Some(&snapshot), &EventStream::empty(source_id))
            .unwrap()
            .unwrap();

        assert_eq!(wallet.balance, 70);
        assert_eq!(wallet.version(), 7);
        assert_eq!(wallet.state().initial_version(), 7);
    }

    #[test]
    fn test_incompatible_snapshot_is_ignored() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let snapshot = Snapshot::new(source_id, 2, OldWalletMemento);

        assert!(!reconstructor.accepts_snapshot::<Wallet>(&snapshot));
        let wallet: Wallet = reconstructor
            .load(source_id, Some(&snapshot), &deposits(source_id, 1..=2))
            .unwrap()
            .unwrap();

        assert_eq!(wallet.balance, 30);
        assert!(!wallet.state().restored_from_snapshot());
    }

    #[test]
    fn test_failed_snapshot_restore_aborts_load() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let snapshot = Snapshot::new(source_id, 2, WalletMemento { balance: -5 });

        let result =
            reconstructor.load::<Wallet>(source_id, Some(&snapshot), &deposits(source_id, 3..=3));

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_stream_not_continuing_snapshot_is_rejected() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let snapshot = Snapshot::new(source_id, 3, WalletMemento { balance: 60 });

        let result =
            reconstructor.load::<Wallet>(source_id, Some(&snapshot), &deposits(source_id, 6..=7));

        assert!(matches!(
            result,
            Err(DomainError::InvalidEventSequence {
                expected: 4,
                actual: 6,
                ..
            })
        ));
    }

    #[test]
    fn test_stream_of_another_source_is_rejected() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let result = reconstructor.load::<Wallet>(source_id, None, &deposits(other, 1..=2));

        assert!(matches!(
            result,
            Err(DomainError::InvalidEventSource { actual, .. }) if actual == other
        ));
    }

    #[test]
    fn test_handler_failure_aborts_load() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();
        let events = vec![
            CommittedEvent::new(source_id, 1, Deposited(5), Utc::now()),
            CommittedEvent::new(source_id, 2, Frozen, Utc::now()),
        ];
        let stream = EventStream::new(source_id, events).unwrap();

        let result = reconstructor.load::<Wallet>(source_id, None, &stream);

        assert!(matches!(
            result,
            Err(DomainError::HandlerInvocation { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_create_starts_at_version_zero() {
        let reconstructor = reconstructor();
        let source_id = Uuid::new_v4();

        let wallet: Wallet = reconstructor.create(source_id);

        assert_eq!(wallet.source_id(), source_id);
        assert_eq!(wallet.version(), 0);
        assert!(Arc::ptr_eq(wallet.state().registry(), reconstructor.registry()));
    }
}
