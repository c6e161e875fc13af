//! Chronicle Core — event-sourced aggregate reconstruction and dispatch.
//!
//! This crate rebuilds aggregates from validated event streams and
//! snapshots, maps handler methods to event types, and publishes committed
//! events to in-process subscribers. Storage is reached only through the
//! [`repository::EventStore`] trait; it contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod mapping;
pub mod reconstructor;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod stream;
