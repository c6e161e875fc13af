//! Chronicle Event Store — storage implementations of `EventStore`.

pub mod in_memory_event_store;

pub use in_memory_event_store::InMemoryEventStore;
