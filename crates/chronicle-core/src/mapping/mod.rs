//! Event handler mapping.
//!
//! A type that consumes events describes its handler methods once, through
//! [`EventSourced::handler_methods`]. A [`MappingStrategy`] decides which of
//! those methods become [`HandlerBinding`]s, and the
//! [`HandlerRegistry`](crate::registry::HandlerRegistry) caches the result per
//! concrete type.

mod convention;
mod declaration;
pub(crate) mod entity;

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

pub use convention::ConventionBased;
pub use declaration::DeclarationBased;
pub use entity::EntityAccessor;

use crate::error::{DomainError, HandlerError, HandlerResult};
use crate::event::{CommittedEvent, EventPayload};

/// Erased handler body: returns whether it applied to the event.
pub(crate) type Invoker<T> =
    Arc<dyn Fn(&mut T, &CommittedEvent) -> Result<bool, HandlerError> + Send + Sync>;

/// A type whose state is driven by events.
pub trait EventSourced: Sized + Send + Sync + 'static {
    /// How [`handler_methods`](EventSourced::handler_methods) is turned into bindings.
    type Mapping: MappingStrategy;

    /// Describes every method of the type that could take part in event handling.
    fn handler_methods() -> Vec<HandlerMethod<Self>>;
}

/// Turns handler method descriptions into bindings.
pub trait MappingStrategy {
    /// Selects and validates the handler methods of `T`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidMapping` when a selected method cannot be
    /// bound to an event type.
    fn map_handlers<T: EventSourced>(
        methods: Vec<HandlerMethod<T>>,
    ) -> Result<Vec<HandlerBinding<T>>, DomainError>;
}

/// How a method is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Called on an instance.
    Instance,
    /// Associated function without a receiver.
    Static,
}

/// What a handler parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A concrete domain event payload.
    DomainEvent,
    /// The event supertype: every committed event.
    AnyEvent,
    /// Any other type.
    Other,
}

/// The declared type of a handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    type_id: TypeId,
    type_name: &'static str,
    kind: ParamKind,
}

impl ParamType {
    /// A domain event parameter.
    #[must_use]
    pub fn event<E: EventPayload>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: short_type_name::<E>(),
            kind: ParamKind::DomainEvent,
        }
    }

    /// A parameter of the event supertype.
    #[must_use]
    pub fn any_event() -> Self {
        Self {
            type_id: TypeId::of::<CommittedEvent>(),
            type_name: short_type_name::<CommittedEvent>(),
            kind: ParamKind::AnyEvent,
        }
    }

    /// A parameter of an arbitrary type.
    #[must_use]
    pub fn of<P: Any>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: short_type_name::<P>(),
            kind: ParamKind::Other,
        }
    }

    /// The parameter's kind.
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// The parameter's type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn filter(&self) -> EventTypeFilter {
        match self.kind {
            ParamKind::AnyEvent => EventTypeFilter::AnyEvent,
            ParamKind::DomainEvent | ParamKind::Other => EventTypeFilter::Exact {
                type_id: self.type_id,
                type_name: self.type_name,
            },
        }
    }
}

/// Metadata describing one method of an event-sourced type.
pub struct HandlerMethod<T> {
    name: &'static str,
    receiver: Receiver,
    params: Vec<ParamType>,
    declared: bool,
    excluded: bool,
    invoke: Option<Invoker<T>>,
}

impl<T: 'static> HandlerMethod<T> {
    /// An instance method taking one domain event.
    pub fn new<E, F>(name: &'static str, handler: F) -> Self
    where
        E: EventPayload,
        F: Fn(&mut T, &E) -> HandlerResult + Send + Sync + 'static,
    {
        Self::typed(name, ParamType::event::<E>(), handler)
    }

    /// An instance method taking one value of an arbitrary payload type.
    pub fn for_type<P, F>(name: &'static str, handler: F) -> Self
    where
        P: Any,
        F: Fn(&mut T, &P) -> HandlerResult + Send + Sync + 'static,
    {
        Self::typed(name, ParamType::of::<P>(), handler)
    }

    /// An instance method taking the event supertype.
    pub fn catch_all<F>(name: &'static str, handler: F) -> Self
    where
        F: Fn(&mut T, &CommittedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name,
            receiver: Receiver::Instance,
            params: vec![ParamType::any_event()],
            declared: false,
            excluded: false,
            invoke: Some(Arc::new(move |target: &mut T, event: &CommittedEvent| {
                handler(target, event).map(|()| true)
            })),
        }
    }

    /// A method known only by its shape, with no invocable body.
    #[must_use]
    pub fn signature(name: &'static str, receiver: Receiver, params: Vec<ParamType>) -> Self {
        Self {
            name,
            receiver,
            params,
            declared: false,
            excluded: false,
            invoke: None,
        }
    }

    fn typed<P, F>(name: &'static str, param: ParamType, handler: F) -> Self
    where
        P: Any,
        F: Fn(&mut T, &P) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name,
            receiver: Receiver::Instance,
            params: vec![param],
            declared: false,
            excluded: false,
            invoke: Some(Arc::new(move |target: &mut T, event: &CommittedEvent| {
                match event.payload_as::<P>() {
                    Some(payload) => handler(target, payload).map(|()| true),
                    None => Ok(false),
                }
            })),
        }
    }

    /// Marks the method as an explicitly declared event handler.
    #[must_use]
    pub fn declared(mut self) -> Self {
        self.declared = true;
        self
    }

    /// Marks the method as explicitly not an event handler.
    #[must_use]
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The method's receiver.
    #[must_use]
    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    /// The method's parameters.
    #[must_use]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Whether the method is declared as an event handler.
    #[must_use]
    pub fn is_declared(&self) -> bool {
        self.declared
    }

    /// Whether the method is excluded from handler discovery.
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    /// Binds the method to its single parameter's event type.
    fn into_binding(self) -> Result<HandlerBinding<T>, DomainError> {
        let invalid = |reason: String| DomainError::InvalidMapping {
            type_name: short_type_name::<T>(),
            method: self.name,
            reason,
        };

        let [param] = self.params.as_slice() else {
            return Err(invalid(format!(
                "expected exactly one parameter, found {}",
                self.params.len()
            )));
        };
        let event_type = param.filter();

        let Some(invoke) = self.invoke.clone() else {
            return Err(invalid("method has no invocable body".to_owned()));
        };

        Ok(HandlerBinding {
            name: format!("{}.{}", short_type_name::<T>(), self.name).into(),
            method_name: self.name,
            event_type,
            invoke,
        })
    }
}

impl<T> fmt::Debug for HandlerMethod<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("receiver", &self.receiver)
            .field("params", &self.params)
            .field("declared", &self.declared)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

/// The event types a binding accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTypeFilter {
    /// Payloads of exactly this type.
    Exact {
        /// Payload type.
        type_id: TypeId,
        /// Payload type name.
        type_name: &'static str,
    },
    /// Every event.
    AnyEvent,
}

impl EventTypeFilter {
    /// Returns `true` if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &CommittedEvent) -> bool {
        match self {
            Self::Exact { type_id, .. } => event.payload_type_id() == *type_id,
            Self::AnyEvent => true,
        }
    }
}

/// A resolved handler: an event type plus the method that handles it.
pub struct HandlerBinding<T> {
    name: Arc<str>,
    method_name: &'static str,
    event_type: EventTypeFilter,
    invoke: Invoker<T>,
}

impl<T> HandlerBinding<T> {
    pub(crate) fn from_parts(
        name: String,
        method_name: &'static str,
        event_type: EventTypeFilter,
        invoke: Invoker<T>,
    ) -> Self {
        Self {
            name: name.into(),
            method_name,
            event_type,
            invoke,
        }
    }

    /// Display name, `Type.method`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound method's name.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        self.method_name
    }

    /// The event types this binding accepts.
    #[must_use]
    pub fn event_type(&self) -> EventTypeFilter {
        self.event_type
    }

    /// Invokes the handler if the event matches.
    ///
    /// Returns `Ok(false)` when the binding does not apply to `event`.
    ///
    /// # Errors
    ///
    /// Propagates the handler's own failure.
    pub fn handle(&self, target: &mut T, event: &CommittedEvent) -> Result<bool, HandlerError> {
        if !self.event_type.matches(event) {
            return Ok(false);
        }
        (self.invoke)(target, event)
    }
}

impl<T> Clone for HandlerBinding<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            method_name: self.method_name,
            event_type: self.event_type,
            invoke: Arc::clone(&self.invoke),
        }
    }
}

impl<T> fmt::Debug for HandlerBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// The last path segment of a type name.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
