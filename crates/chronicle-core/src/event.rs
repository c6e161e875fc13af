//! Domain event abstractions.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access to a value as `&dyn Any`, implemented for every `'static` type.
pub trait AsAny {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Trait that all event payloads implement.
///
/// Payloads are opaque to the runtime: they are stored type-erased and
/// recovered by their concrete type when a handler is invoked.
pub trait EventPayload: AsAny + Send + Sync + fmt::Debug + 'static {
    /// Returns the event name (used for logging and storage routing).
    fn event_name(&self) -> &'static str;

    /// Returns the id of the entity this event targets, if it is entity-scoped.
    fn entity_id(&self) -> Option<Uuid> {
        None
    }
}

/// Metadata attached to every committed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Name for deserialization routing.
    pub event_name: String,
    /// Event source this event belongs to.
    pub source_id: Uuid,
    /// Monotonically increasing version within the source's stream.
    pub sequence: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// An event that has been (or is about to be) durably stored with an
/// assigned sequence number.
#[derive(Clone)]
pub struct CommittedEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event source (aggregate) identity.
    pub source_id: Uuid,
    /// Version of the source after this event.
    pub sequence: i64,
    /// Name of the event, taken from the payload.
    pub event_name: String,
    /// Opaque domain data.
    pub payload: Arc<dyn EventPayload>,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl CommittedEvent {
    /// Creates a committed event with a fresh event id.
    pub fn new<P: EventPayload>(
        source_id: Uuid,
        sequence: i64,
        payload: P,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            source_id,
            sequence,
            event_name: payload.event_name().to_owned(),
            payload: Arc::new(payload),
            occurred_at,
        }
    }

    /// Returns the payload as a trait object.
    pub fn payload(&self) -> &dyn EventPayload {
        &*self.payload
    }

    /// Returns the runtime type of the payload.
    pub fn payload_type_id(&self) -> TypeId {
        self.payload().as_any().type_id()
    }

    /// Downcasts the payload to `P`.
    pub fn payload_as<P: Any>(&self) -> Option<&P> {
        self.payload().as_any().downcast_ref::<P>()
    }

    /// Returns `true` if the payload is a `P`.
    pub fn is<P: Any>(&self) -> bool {
        self.payload_type_id() == TypeId::of::<P>()
    }

    /// Returns the entity id carried by the payload, if any.
    pub fn entity_id(&self) -> Option<Uuid> {
        self.payload.entity_id()
    }

    /// Returns the serializable metadata of this event.
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            event_id: self.event_id,
            event_name: self.event_name.clone(),
            source_id: self.source_id,
            sequence: self.sequence,
            occurred_at: self.occurred_at,
        }
    }
}

impl fmt::Debug for CommittedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedEvent")
            .field("event_id", &self.event_id)
            .field("source_id", &self.source_id)
            .field("sequence", &self.sequence)
            .field("event_name", &self.event_name)
            .field("payload", &self.payload)
            .field("occurred_at", &self.occurred_at)
            .finish()
    }
}
