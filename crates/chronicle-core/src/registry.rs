//! Process-scoped cache of handler bindings and snapshot capabilities.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;
use crate::mapping::{EventSourced, HandlerBinding, MappingStrategy, short_type_name};
use crate::snapshot::SnapshotCapability;

type Cache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

/// Resolves and caches, per concrete type, the handler bindings produced by
/// the type's mapping strategy and its snapshot capability.
///
/// Create one registry at startup and share it by `Arc`. Entries are
/// installed once and never invalidated. When several threads resolve the
/// same type concurrently, each computes the (deterministic) bindings and the
/// first to install wins; every caller then receives the installed entry.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: Cache,
    snapshot_capabilities: Cache,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handler bindings of `T`, mapping them on first use.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidMapping` if `T` declares a handler that
    /// cannot be mapped. Failed resolutions are not cached.
    pub fn resolve<T: EventSourced>(&self) -> Result<Arc<[HandlerBinding<T>]>, DomainError> {
        let key = TypeId::of::<T>();
        if let Some(cached) = lookup::<Arc<[HandlerBinding<T>]>>(&self.bindings, key) {
            return Ok(cached);
        }

        let resolved: Arc<[HandlerBinding<T>]> =
            T::Mapping::map_handlers(T::handler_methods())?.into();
        tracing::debug!(
            target_type = short_type_name::<T>(),
            handlers = resolved.len(),
            "resolved event handlers"
        );

        Ok(install(&self.bindings, key, resolved))
    }

    /// Returns the snapshot capability of `A`, or `None` if it declares none.
    ///
    /// Declaring more than one capability is a configuration mistake: it is
    /// logged and no capability is selected.
    pub fn snapshot_capability<A: AggregateRoot>(&self) -> Option<Arc<SnapshotCapability<A>>> {
        let key = TypeId::of::<A>();
        if let Some(cached) =
            lookup::<Option<Arc<SnapshotCapability<A>>>>(&self.snapshot_capabilities, key)
        {
            return cached;
        }

        let mut declared = A::snapshot_capabilities();
        let selected = match declared.len() {
            0 => None,
            1 => declared.pop().map(Arc::new),
            count => {
                tracing::warn!(
                    aggregate = short_type_name::<A>(),
                    count,
                    "aggregate root declares multiple snapshot capabilities while only one is allowed"
                );
                None
            }
        };

        install(&self.snapshot_capabilities, key, selected)
    }

    /// Returns `true` if bindings for `T` are cached.
    #[must_use]
    pub fn is_resolved<T: EventSourced>(&self) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    /// Number of types with cached bindings.
    #[must_use]
    pub fn resolved_types(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("resolved_types", &self.resolved_types())
            .finish_non_exhaustive()
    }
}

fn lookup<V: Clone + 'static>(cache: &Cache, key: TypeId) -> Option<V> {
    cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .and_then(|entry| entry.downcast_ref::<V>())
        .cloned()
}

fn install<V: Clone + Send + Sync + 'static>(cache: &Cache, key: TypeId, value: V) -> V {
    let mut entries = cache.write().unwrap_or_else(PoisonError::into_inner);
    let entry = entries
        .entry(key)
        .or_insert_with(|| Arc::new(value.clone()) as Arc<dyn Any + Send + Sync>);
    entry.downcast_ref::<V>().cloned().unwrap_or(value)
}
