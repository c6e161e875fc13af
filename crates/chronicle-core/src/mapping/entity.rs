//! Entity-scoped handler bindings.
//!
//! An entity's handlers are registered on its aggregate root, wrapped so that
//! they only fire for events carrying the entity's id.

use std::sync::Arc;

use uuid::Uuid;

use super::{HandlerBinding, short_type_name};
use crate::event::CommittedEvent;

/// Finds an owned entity on its root by id.
pub type EntityAccessor<R, E> = fn(&mut R, Uuid) -> Option<&mut E>;

/// Wraps each of an entity's bindings into a root binding gated on `entity_id`.
pub(crate) fn threshold<R, E>(
    entity_id: Uuid,
    bindings: &[HandlerBinding<E>],
    accessor: EntityAccessor<R, E>,
) -> Vec<HandlerBinding<R>>
where
    R: 'static,
    E: 'static,
{
    bindings
        .iter()
        .map(|binding| {
            let wrapped = binding.clone();
            HandlerBinding::from_parts(
                format!("{}.{}", short_type_name::<E>(), binding.method_name()),
                binding.method_name(),
                binding.event_type(),
                Arc::new(move |root: &mut R, event: &CommittedEvent| {
                    if event.entity_id() != Some(entity_id) {
                        return Ok(false);
                    }
                    match accessor(root, entity_id) {
                        Some(entity) => wrapped.handle(entity, event),
                        None => Ok(false),
                    }
                }),
            )
        })
        .collect()
}
