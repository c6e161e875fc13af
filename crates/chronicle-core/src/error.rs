//! Domain error types.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A handler method has a shape that cannot be mapped to an event.
    #[error("invalid event handler mapping {type_name}::{method}: {reason}")]
    InvalidMapping {
        /// The type declaring the method.
        type_name: &'static str,
        /// The offending method.
        method: &'static str,
        /// Why the method cannot be mapped.
        reason: String,
    },

    /// A committed event carries a sequence that breaks the stream's contiguity.
    #[error("illegal sequence at position {position}: expected {expected}, but actual was {actual}")]
    InvalidEventSequence {
        /// Position of the event within the supplied list.
        position: usize,
        /// The sequence the stream required.
        expected: i64,
        /// The sequence the event carried.
        actual: i64,
    },

    /// A committed event belongs to another event source.
    #[error("event at position {position} belongs to source {actual}, expected {expected}")]
    InvalidEventSource {
        /// Position of the event within the supplied list.
        position: usize,
        /// The stream's source id.
        expected: Uuid,
        /// The source id the event carried.
        actual: Uuid,
    },

    /// The supplied event list has a hole.
    #[error("event stream contains no event at position {position}")]
    MissingEvent {
        /// Position of the hole.
        position: usize,
    },

    /// A resolved handler failed while applying or dispatching an event.
    #[error("handler {handler} failed on {event_name} (sequence {sequence}): {source}")]
    HandlerInvocation {
        /// Display name of the failing handler.
        handler: String,
        /// Name of the event being handled.
        event_name: String,
        /// Sequence of the event being handled.
        sequence: i64,
        /// The handler's own error.
        #[source]
        source: HandlerError,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

/// Error raised from inside an event handler.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct HandlerError(#[from] Box<dyn StdError + Send + Sync>);

impl HandlerError {
    /// Builds a handler error from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(message.to_string().into())
    }

    /// Wraps any concrete error type.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Box::new(error))
    }
}

impl From<DomainError> for HandlerError {
    fn from(error: DomainError) -> Self {
        Self::new(error)
    }
}

/// Outcome of a single handler invocation.
pub type HandlerResult = Result<(), HandlerError>;
