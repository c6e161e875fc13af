//! Shared test doubles and utilities for the Chronicle runtime.

mod clock;
mod event_store;
mod trace;
mod transaction;

pub use clock::FixedClock;
pub use event_store::{EmptyEventStore, FailingEventStore, RecordingEventStore};
pub use trace::init_test_tracing;
pub use transaction::{FakeTransaction, FakeTransactionalResource};
