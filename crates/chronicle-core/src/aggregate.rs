//! Aggregate root abstraction.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{CommittedEvent, EventPayload};
use crate::mapping::{EntityAccessor, EventSourced, HandlerBinding, entity, short_type_name};
use crate::registry::HandlerRegistry;
use crate::snapshot::SnapshotCapability;

/// Trait for aggregate roots that reconstitute from event history.
///
/// Implementors embed an [`AggregateState`] and describe their handlers
/// through [`EventSourced`]; state changes happen only inside handlers, so
/// live application and replay follow the same path.
pub trait AggregateRoot: EventSourced {
    /// Creates an empty aggregate around `state`. Must not have side effects
    /// beyond allocation.
    fn create_empty(state: AggregateState<Self>) -> Self;

    /// Returns the embedded aggregate state.
    fn state(&self) -> &AggregateState<Self>;

    /// Returns the embedded aggregate state mutably.
    fn state_mut(&mut self) -> &mut AggregateState<Self>;

    /// Declares the snapshot capabilities of this aggregate type.
    fn snapshot_capabilities() -> Vec<SnapshotCapability<Self>> {
        Vec::new()
    }

    /// Returns the aggregate identifier.
    fn source_id(&self) -> Uuid {
        self.state().source_id()
    }

    /// Returns the current version (sequence of the last applied event).
    fn version(&self) -> i64 {
        self.state().version()
    }

    /// Returns events applied live and not yet persisted.
    fn uncommitted_events(&self) -> &[CommittedEvent] {
        self.state().uncommitted_events()
    }

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self) {
        self.state_mut().uncommitted.clear();
    }

    /// Applies a new event to the aggregate and records it as uncommitted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerInvocation` if a handler fails, or
    /// `DomainError::InvalidMapping` if the aggregate's handlers cannot be
    /// mapped. The event is not recorded in either case.
    fn apply_change<P: EventPayload>(
        &mut self,
        payload: P,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let event = CommittedEvent::new(self.source_id(), self.version() + 1, payload, clock.now());
        apply_event(self, &event)?;
        self.state_mut().uncommitted.push(event);
        Ok(())
    }
}

/// Identity and versioning data about an event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSourceInformation {
    /// The source id.
    pub id: Uuid,
    /// The source's type name.
    pub type_name: &'static str,
    /// Version at which the current instance was restored, or 0.
    pub initial_version: i64,
    /// Current version.
    pub current_version: i64,
}

/// The bookkeeping every aggregate root carries.
pub struct AggregateState<A> {
    source_id: Uuid,
    version: i64,
    initial_version: i64,
    restored_from_snapshot: bool,
    uncommitted: Vec<CommittedEvent>,
    entity_bindings: Arc<Vec<HandlerBinding<A>>>,
    registry: Arc<HandlerRegistry>,
}

impl<A: AggregateRoot> AggregateState<A> {
    /// Creates the state of an empty aggregate at version 0.
    #[must_use]
    pub fn new(source_id: Uuid, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            source_id,
            version: 0,
            initial_version: 0,
            restored_from_snapshot: false,
            uncommitted: Vec::new(),
            entity_bindings: Arc::new(Vec::new()),
            registry,
        }
    }

    /// The aggregate identifier.
    #[must_use]
    pub fn source_id(&self) -> Uuid {
        self.source_id
    }

    /// Sequence of the last applied event.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Version at the last snapshot restore, or 0.
    #[must_use]
    pub fn initial_version(&self) -> i64 {
        self.initial_version
    }

    /// Whether the aggregate was restored from a snapshot.
    #[must_use]
    pub fn restored_from_snapshot(&self) -> bool {
        self.restored_from_snapshot
    }

    /// Events applied live and not yet persisted.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[CommittedEvent] {
        &self.uncommitted
    }

    /// The registry this aggregate resolves handlers through.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Summary of identity and versions.
    #[must_use]
    pub fn source_information(&self) -> EventSourceInformation {
        EventSourceInformation {
            id: self.source_id,
            type_name: short_type_name::<A>(),
            initial_version: self.initial_version,
            current_version: self.version,
        }
    }

    /// Registers the handlers of an owned entity on this root.
    ///
    /// The entity's handlers only fire for events whose payload carries
    /// `entity_id`; `accessor` locates the entity when such an event arrives.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidMapping` if the entity's handlers cannot
    /// be mapped.
    pub fn attach_entity<E: EventSourced>(
        &mut self,
        entity_id: Uuid,
        accessor: EntityAccessor<A, E>,
    ) -> Result<(), DomainError> {
        let bindings = self.registry.resolve::<E>()?;
        Arc::make_mut(&mut self.entity_bindings)
            .extend(entity::threshold(entity_id, &bindings, accessor));
        tracing::debug!(
            aggregate = short_type_name::<A>(),
            entity = short_type_name::<E>(),
            %entity_id,
            "attached entity handlers"
        );
        Ok(())
    }

    pub(crate) fn mark_restored(&mut self, version: i64) {
        self.version = version;
        self.initial_version = version;
        self.restored_from_snapshot = true;
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl<A> fmt::Debug for AggregateState<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateState")
            .field("source_id", &self.source_id)
            .field("version", &self.version)
            .field("initial_version", &self.initial_version)
            .field("restored_from_snapshot", &self.restored_from_snapshot)
            .field("uncommitted", &self.uncommitted.len())
            .field("entity_bindings", &self.entity_bindings.len())
            .finish_non_exhaustive()
    }
}

/// Applies one event to an aggregate through every matching binding: the
/// type's own handlers first, then the handlers of attached entities.
///
/// A single event may be consumed by several bindings.
pub(crate) fn apply_event<A: AggregateRoot>(
    aggregate: &mut A,
    event: &CommittedEvent,
) -> Result<(), DomainError> {
    let type_bindings = aggregate.state().registry.resolve::<A>()?;
    let entity_bindings = Arc::clone(&aggregate.state().entity_bindings);

    let mut applied = 0_usize;
    for binding in type_bindings.iter().chain(entity_bindings.iter()) {
        let handled = binding
            .handle(aggregate, event)
            .map_err(|source| DomainError::HandlerInvocation {
                handler: binding.name().to_owned(),
                event_name: event.event_name.clone(),
                sequence: event.sequence,
                source,
            })?;
        if handled {
            applied += 1;
        }
    }

    if applied == 0 {
        tracing::debug!(
            aggregate = short_type_name::<A>(),
            event_name = %event.event_name,
            sequence = event.sequence,
            "no handler applied event"
        );
    }

    aggregate.state_mut().set_version(event.sequence);
    Ok(())
}
