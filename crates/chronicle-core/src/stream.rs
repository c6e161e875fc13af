//! Validated, immutable streams of committed events.

use std::slice;

use uuid::Uuid;

use crate::error::DomainError;
use crate::event::CommittedEvent;

/// An ordered, contiguous run of committed events belonging to one event
/// source.
///
/// Validation happens once, at construction. A stream is either entirely
/// valid or never built.
#[derive(Debug, Clone)]
pub struct EventStream {
    source_id: Uuid,
    from_version: i64,
    to_version: i64,
    events: Vec<CommittedEvent>,
}

impl EventStream {
    /// Creates an empty stream for `source_id`.
    #[must_use]
    pub fn empty(source_id: Uuid) -> Self {
        Self {
            source_id,
            from_version: 0,
            to_version: 0,
            events: Vec::new(),
        }
    }

    /// Builds a stream from committed events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidEventSource` if an event belongs to another
    /// source, or `DomainError::InvalidEventSequence` if the sequences are not
    /// contiguous starting from the first event's sequence.
    pub fn new(source_id: Uuid, events: Vec<CommittedEvent>) -> Result<Self, DomainError> {
        Self::from_slots(source_id, events.into_iter().map(Some))
    }

    /// Builds a stream from a list that may contain holes, as produced by a
    /// store that failed to materialize some rows.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MissingEvent` for the first hole, otherwise the
    /// same errors as [`EventStream::new`].
    pub fn from_slots<I>(source_id: Uuid, slots: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = Option<CommittedEvent>>,
    {
        let mut events = Vec::new();
        let mut start_sequence = 0;

        for (position, slot) in slots.into_iter().enumerate() {
            let event = slot.ok_or(DomainError::MissingEvent { position })?;

            if event.source_id != source_id {
                return Err(DomainError::InvalidEventSource {
                    position,
                    expected: source_id,
                    actual: event.source_id,
                });
            }

            if position == 0 {
                start_sequence = event.sequence;
            }

            #[allow(clippy::cast_possible_wrap)]
            let expected = start_sequence + position as i64;
            if event.sequence != expected {
                return Err(DomainError::InvalidEventSequence {
                    position,
                    expected,
                    actual: event.sequence,
                });
            }

            events.push(event);
        }

        let (from_version, to_version) = match (events.first(), events.last()) {
            (Some(first), Some(last)) => (first.sequence, last.sequence),
            _ => (0, 0),
        };

        Ok(Self {
            source_id,
            from_version,
            to_version,
            events,
        })
    }

    /// The event source this stream belongs to.
    #[must_use]
    pub fn source_id(&self) -> Uuid {
        self.source_id
    }

    /// Sequence of the first event, or 0 when empty.
    #[must_use]
    pub fn from_version(&self) -> i64 {
        self.from_version
    }

    /// Sequence of the last event, or 0 when empty.
    #[must_use]
    pub fn to_version(&self) -> i64 {
        self.to_version
    }

    /// The source's version after applying this stream.
    #[must_use]
    pub fn current_source_version(&self) -> i64 {
        self.to_version
    }

    /// Returns `true` if the stream holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Iterates the events in sequence order.
    pub fn iter(&self) -> slice::Iter<'_, CommittedEvent> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a EventStream {
    type Item = &'a CommittedEvent;
    type IntoIter = slice::Iter<'a, CommittedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
