//! Snapshots and the policy deciding when to take them.

use std::any::{Any, TypeId};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;
use crate::mapping::short_type_name;
use crate::registry::HandlerRegistry;

/// Interval used by [`SimpleSnapshotPolicy::new`].
pub const DEFAULT_SNAPSHOT_INTERVAL: NonZeroU32 = NonZeroU32::MIN.saturating_add(2);

/// A captured aggregate state at a given version.
#[derive(Clone)]
pub struct Snapshot {
    /// The aggregate the snapshot belongs to.
    pub source_id: Uuid,
    /// Version of the aggregate when the snapshot was taken.
    pub version: i64,
    payload: Arc<dyn Any + Send + Sync>,
    payload_type_name: &'static str,
}

impl Snapshot {
    /// Creates a snapshot holding `payload`.
    pub fn new<P: Any + Send + Sync>(source_id: Uuid, version: i64, payload: P) -> Self {
        Self {
            source_id,
            version,
            payload: Arc::new(payload),
            payload_type_name: short_type_name::<P>(),
        }
    }

    /// Runtime type of the payload.
    #[must_use]
    pub fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }

    /// Name of the payload type.
    #[must_use]
    pub fn payload_type_name(&self) -> &'static str {
        self.payload_type_name
    }

    /// Downcasts the payload to `P`.
    #[must_use]
    pub fn payload_as<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("source_id", &self.source_id)
            .field("version", &self.version)
            .field("payload_type", &self.payload_type_name)
            .finish_non_exhaustive()
    }
}

/// An aggregate able to capture and restore its state as `P`.
pub trait Snapshotable<P>: AggregateRoot {
    /// Captures the current state.
    fn create_snapshot(&self) -> P;

    /// Replaces the current state with `payload`.
    ///
    /// # Errors
    ///
    /// Returns the failure of rebuilding derived state, such as
    /// `DomainError::InvalidMapping` when re-attaching owned entities.
    fn restore_from_snapshot(&mut self, payload: P) -> Result<(), DomainError>;
}

/// Type-erased [`Snapshotable`] implementation of an aggregate for one
/// payload type.
pub struct SnapshotCapability<A> {
    payload_type: TypeId,
    payload_type_name: &'static str,
    create: fn(&A) -> Snapshot,
    restore: fn(&mut A, &Snapshot) -> Result<bool, DomainError>,
}

impl<A: AggregateRoot> SnapshotCapability<A> {
    /// The capability of `A` to snapshot itself as `P`.
    #[must_use]
    pub fn of<P>() -> Self
    where
        A: Snapshotable<P>,
        P: Any + Send + Sync + Clone,
    {
        Self {
            payload_type: TypeId::of::<P>(),
            payload_type_name: short_type_name::<P>(),
            create: create_erased::<A, P>,
            restore: restore_erased::<A, P>,
        }
    }

    /// The payload type this capability produces and accepts.
    #[must_use]
    pub fn payload_type(&self) -> TypeId {
        self.payload_type
    }

    /// Name of the payload type.
    #[must_use]
    pub fn payload_type_name(&self) -> &'static str {
        self.payload_type_name
    }

    /// Returns `true` if `snapshot` carries exactly this capability's payload type.
    #[must_use]
    pub fn accepts(&self, snapshot: &Snapshot) -> bool {
        snapshot.payload_type_id() == self.payload_type
    }

    /// Captures `aggregate` at its current version.
    #[must_use]
    pub fn create(&self, aggregate: &A) -> Snapshot {
        (self.create)(aggregate)
    }

    /// Restores `aggregate` from `snapshot`. Returns `Ok(false)` on a payload
    /// type mismatch, leaving the aggregate untouched.
    ///
    /// # Errors
    ///
    /// Propagates the failure of [`Snapshotable::restore_from_snapshot`].
    pub fn restore(&self, aggregate: &mut A, snapshot: &Snapshot) -> Result<bool, DomainError> {
        (self.restore)(aggregate, snapshot)
    }
}

impl<A> Clone for SnapshotCapability<A> {
    fn clone(&self) -> Self {
        Self {
            payload_type: self.payload_type,
            payload_type_name: self.payload_type_name,
            create: self.create,
            restore: self.restore,
        }
    }
}

impl<A> fmt::Debug for SnapshotCapability<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCapability")
            .field("payload_type", &self.payload_type_name)
            .finish_non_exhaustive()
    }
}

fn create_erased<A, P>(aggregate: &A) -> Snapshot
where
    A: Snapshotable<P>,
    P: Any + Send + Sync,
{
    Snapshot::new(
        aggregate.source_id(),
        aggregate.version(),
        aggregate.create_snapshot(),
    )
}

fn restore_erased<A, P>(aggregate: &mut A, snapshot: &Snapshot) -> Result<bool, DomainError>
where
    A: Snapshotable<P>,
    P: Any + Clone,
{
    match snapshot.payload_as::<P>() {
        Some(payload) => {
            aggregate.restore_from_snapshot(payload.clone())?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Decides when an aggregate should be snapshotted.
pub trait SnapshottingPolicy: Send + Sync {
    /// Returns `true` if a snapshot of `aggregate` should be taken now.
    fn should_snapshot<A: AggregateRoot>(&self, aggregate: &A) -> bool;

    /// Returns `true` if `A` can be snapshotted at all.
    fn supports_snapshot<A: AggregateRoot>(&self) -> bool;
}

/// Snapshots every `interval` versions.
///
/// An aggregate that was not restored from a snapshot is snapshotted as soon
/// as it has any history. A restored one is snapshotted once its version
/// crosses a multiple of the interval since the restore.
#[derive(Debug, Clone)]
pub struct SimpleSnapshotPolicy {
    interval: NonZeroU32,
    registry: Arc<HandlerRegistry>,
}

impl SimpleSnapshotPolicy {
    /// Creates a policy with the default interval.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::with_interval(registry, DEFAULT_SNAPSHOT_INTERVAL)
    }

    /// Creates a policy with a custom interval.
    #[must_use]
    pub fn with_interval(registry: Arc<HandlerRegistry>, interval: NonZeroU32) -> Self {
        Self { interval, registry }
    }

    /// The snapshot interval.
    #[must_use]
    pub fn interval(&self) -> NonZeroU32 {
        self.interval
    }
}

impl SnapshottingPolicy for SimpleSnapshotPolicy {
    fn should_snapshot<A: AggregateRoot>(&self, aggregate: &A) -> bool {
        if !self.supports_snapshot::<A>() {
            return false;
        }

        let state = aggregate.state();
        if !state.restored_from_snapshot() {
            return state.version() >= 1;
        }

        let interval = i64::from(self.interval.get());
        (state.initial_version() + 1..=state.version()).any(|v| v % interval == 0)
    }

    fn supports_snapshot<A: AggregateRoot>(&self) -> bool {
        self.registry.snapshot_capability::<A>().is_some()
    }
}

/// Never snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshotPolicy;

impl SnapshottingPolicy for NoSnapshotPolicy {
    fn should_snapshot<A: AggregateRoot>(&self, _aggregate: &A) -> bool {
        false
    }

    fn supports_snapshot<A: AggregateRoot>(&self) -> bool {
        false
    }
}
