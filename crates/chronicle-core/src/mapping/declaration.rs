//! Handler discovery by explicit declaration.

use super::{
    EventSourced, HandlerBinding, HandlerMethod, MappingStrategy, ParamKind, Receiver,
    short_type_name,
};
use crate::error::DomainError;

/// Maps only methods declared as event handlers, whatever their name.
///
/// A declared method must be an instance method taking exactly one parameter,
/// and that parameter must be a domain event or the event supertype. Any
/// other shape is a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationBased;

impl DeclarationBased {
    fn check<T>(method: &HandlerMethod<T>) -> Result<(), DomainError> {
        let invalid = |reason: String| DomainError::InvalidMapping {
            type_name: short_type_name::<T>(),
            method: method.name,
            reason,
        };

        if method.receiver == Receiver::Static {
            return Err(invalid(
                "event handler methods must be instance methods".to_owned(),
            ));
        }

        let [param] = method.params.as_slice() else {
            return Err(invalid(format!(
                "event handler methods take exactly one parameter, found {}",
                method.params.len()
            )));
        };

        if param.kind == ParamKind::Other {
            return Err(invalid(format!(
                "parameter type {} is not a domain event",
                param.type_name
            )));
        }

        Ok(())
    }
}

impl MappingStrategy for DeclarationBased {
    fn map_handlers<T: EventSourced>(
        methods: Vec<HandlerMethod<T>>,
    ) -> Result<Vec<HandlerBinding<T>>, DomainError> {
        let mut bindings = Vec::new();
        for method in methods.into_iter().filter(|m| m.declared) {
            Self::check(&method)?;
            let binding = method.into_binding()?;
            tracing::debug!(handler = binding.name(), "mapped declared event handler");
            bindings.push(binding);
        }
        Ok(bindings)
    }
}
