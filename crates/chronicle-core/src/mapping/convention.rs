//! Handler discovery by method name.

use super::{
    EventSourced, HandlerBinding, HandlerMethod, MappingStrategy, Receiver, short_type_name,
};
use crate::error::DomainError;

/// Maps every instance method whose name starts with `on` (in any case) and
/// that takes exactly one parameter, unless it is explicitly excluded.
///
/// The parameter type is not restricted: a handler may accept any payload
/// type, not only domain events.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConventionBased;

impl ConventionBased {
    fn qualifies<T>(method: &HandlerMethod<T>) -> bool {
        method.receiver == Receiver::Instance
            && method.params.len() == 1
            && !method.excluded
            && has_handler_prefix(method.name)
    }
}

impl MappingStrategy for ConventionBased {
    fn map_handlers<T: EventSourced>(
        methods: Vec<HandlerMethod<T>>,
    ) -> Result<Vec<HandlerBinding<T>>, DomainError> {
        tracing::debug!(
            target_type = short_type_name::<T>(),
            "mapping event handlers by convention"
        );

        let mut bindings = Vec::new();
        for method in methods {
            if !Self::qualifies(&method) {
                continue;
            }
            let binding = method.into_binding()?;
            tracing::debug!(handler = binding.name(), "created event handler based on convention");
            bindings.push(binding);
        }
        Ok(bindings)
    }
}

fn has_handler_prefix(name: &str) -> bool {
    name.get(..2)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("on"))
}
