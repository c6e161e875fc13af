//! In-process delivery of committed events to subscribed handlers.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{DomainError, HandlerError, HandlerResult};
use crate::event::{AsAny, CommittedEvent, EventPayload};
use crate::mapping::short_type_name;

/// A unit of work opened around the handlers of one published event.
///
/// Handlers registered with [`EventDispatcher::register_transactional_handler`]
/// receive the open transaction and stage their work on it.
pub trait Transaction: AsAny + Send {
    /// Makes the work of every handler durable.
    ///
    /// # Errors
    ///
    /// Returns the resource's own failure; the work is then discarded.
    fn commit(self: Box<Self>) -> Result<(), HandlerError>;

    /// Discards the work of every handler.
    fn rollback(self: Box<Self>);
}

/// Opens transactions on a resource shared by event handlers.
///
/// Every call to `begin` yields an independent transaction, so several
/// events may be published through one unit at the same time.
pub trait TransactionalUnit: Send + Sync {
    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns the resource's own failure.
    fn begin(&self) -> Result<Box<dyn Transaction>, HandlerError>;
}

/// How the handlers of one event are grouped when no unit is passed to
/// [`EventDispatcher::publish_in`].
#[derive(Clone, Default)]
pub enum DispatchMode {
    /// Handlers run one after the other; work done before a failure stays.
    #[default]
    BestEffort,
    /// Handlers run inside one transaction; a failure rolls back all of them.
    Atomic(Arc<dyn TransactionalUnit>),
}

impl fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestEffort => f.write_str("BestEffort"),
            Self::Atomic(_) => f.write_str("Atomic"),
        }
    }
}

/// A begun transaction that rolls back when dropped unfinished, including
/// while unwinding from a panicking handler.
struct OpenTransaction(Option<Box<dyn Transaction>>);

impl OpenTransaction {
    fn get(&self) -> Option<&dyn Transaction> {
        self.0.as_deref()
    }

    fn commit(mut self) -> Result<(), HandlerError> {
        match self.0.take() {
            Some(transaction) => transaction.commit(),
            None => Ok(()),
        }
    }

    fn rollback(mut self) {
        if let Some(transaction) = self.0.take() {
            transaction.rollback();
        }
    }
}

impl Drop for OpenTransaction {
    fn drop(&mut self) {
        if let Some(transaction) = self.0.take() {
            tracing::warn!("rolling back unfinished transaction");
            transaction.rollback();
        }
    }
}

type ErasedHandler =
    Arc<dyn Fn(&CommittedEvent, Option<&dyn Transaction>) -> HandlerResult + Send + Sync>;

#[derive(Clone)]
struct RegisteredHandler {
    name: String,
    invoke: ErasedHandler,
}

/// Publishes committed events to the handlers registered for their payload type.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<TypeId, Vec<RegisteredHandler>>>,
    mode: DispatchMode,
}

impl EventDispatcher {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            mode,
        }
    }

    /// The dispatch mode used by [`EventDispatcher::publish`].
    #[must_use]
    pub fn mode(&self) -> &DispatchMode {
        &self.mode
    }

    /// Subscribes `handler` to events whose payload is a `P`.
    ///
    /// Handlers for one payload type run in registration order.
    pub fn register_handler<P, F>(&self, handler: F)
    where
        P: EventPayload,
        F: Fn(&CommittedEvent, &P) -> HandlerResult + Send + Sync + 'static,
    {
        let invoke: ErasedHandler = Arc::new(
            move |event: &CommittedEvent, _: Option<&dyn Transaction>| match event
                .payload_as::<P>()
            {
                Some(payload) => handler(event, payload),
                None => Ok(()),
            },
        );
        self.insert::<P>(invoke);
    }

    /// Subscribes `handler` to events whose payload is a `P`, handing it the
    /// open transaction of type `T`.
    ///
    /// Publishing outside a transaction, or inside one of another type,
    /// fails this handler.
    pub fn register_transactional_handler<P, T, F>(&self, handler: F)
    where
        P: EventPayload,
        T: Transaction + 'static,
        F: Fn(&CommittedEvent, &P, &T) -> HandlerResult + Send + Sync + 'static,
    {
        let invoke: ErasedHandler = Arc::new(
            move |event: &CommittedEvent, transaction: Option<&dyn Transaction>| {
                let Some(payload) = event.payload_as::<P>() else {
                    return Ok(());
                };
                let transaction = transaction
                    .and_then(|transaction| transaction.as_any().downcast_ref::<T>())
                    .ok_or_else(|| {
                        HandlerError::msg(format!(
                            "no open {} transaction",
                            short_type_name::<T>()
                        ))
                    })?;
                handler(event, payload, transaction)
            },
        );
        self.insert::<P>(invoke);
    }

    fn insert<P: EventPayload>(&self, invoke: ErasedHandler) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let registered = handlers.entry(TypeId::of::<P>()).or_default();
        let name = format!(
            "handler #{} for {}",
            registered.len() + 1,
            short_type_name::<P>()
        );
        tracing::debug!(handler = %name, "registered event handler");
        registered.push(RegisteredHandler { name, invoke });
    }

    /// Number of handlers subscribed to `P`.
    #[must_use]
    pub fn handler_count<P: EventPayload>(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<P>())
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler subscribed to its payload type,
    /// grouped as the dispatcher's [`DispatchMode`] says.
    ///
    /// An event without subscribers is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerInvocation` for the first failing
    /// handler; later handlers are not run. In atomic mode the transaction is
    /// rolled back first. A transaction that cannot begin or commit yields
    /// `DomainError::Infrastructure`.
    pub fn publish(&self, event: &CommittedEvent) -> Result<(), DomainError> {
        match &self.mode {
            DispatchMode::BestEffort => self.dispatch(event, None),
            DispatchMode::Atomic(unit) => self.dispatch(event, Some(&**unit)),
        }
    }

    /// Delivers `event` inside a transaction begun on `unit`, whatever the
    /// dispatcher's own mode.
    ///
    /// # Errors
    ///
    /// The errors of [`EventDispatcher::publish`] in atomic mode.
    pub fn publish_in(
        &self,
        event: &CommittedEvent,
        unit: &dyn TransactionalUnit,
    ) -> Result<(), DomainError> {
        self.dispatch(event, Some(unit))
    }

    /// Publishes `events` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`EventDispatcher::publish`].
    pub fn publish_all(&self, events: &[CommittedEvent]) -> Result<(), DomainError> {
        events.iter().try_for_each(|event| self.publish(event))
    }

    /// Publishes `events` in order, each inside its own transaction begun on
    /// `unit`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`EventDispatcher::publish_in`].
    pub fn publish_all_in(
        &self,
        events: &[CommittedEvent],
        unit: &dyn TransactionalUnit,
    ) -> Result<(), DomainError> {
        events.iter().try_for_each(|event| self.publish_in(event, unit))
    }

    fn dispatch(
        &self,
        event: &CommittedEvent,
        unit: Option<&dyn TransactionalUnit>,
    ) -> Result<(), DomainError> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.payload_type_id())
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::warn!(
                event_name = %event.event_name,
                sequence = event.sequence,
                "no handlers registered for event"
            );
            return Ok(());
        }

        tracing::info!(
            event_name = %event.event_name,
            source_id = %event.source_id,
            sequence = event.sequence,
            handlers = handlers.len(),
            atomic = unit.is_some(),
            "publishing event"
        );

        let Some(unit) = unit else {
            return run_handlers(&handlers, event, None);
        };

        let transaction = OpenTransaction(Some(unit.begin().map_err(|e| {
            DomainError::Infrastructure(format!("failed to begin transaction: {e}"))
        })?));

        if let Err(err) = run_handlers(&handlers, event, transaction.get()) {
            tracing::warn!(
                event_name = %event.event_name,
                sequence = event.sequence,
                error = %err,
                "rolling back event handlers"
            );
            transaction.rollback();
            return Err(err);
        }

        transaction.commit().map_err(|e| {
            DomainError::Infrastructure(format!("failed to commit transaction: {e}"))
        })
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchMode::default())
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload_types = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventDispatcher")
            .field("mode", &self.mode)
            .field("payload_types", &payload_types)
            .finish()
    }
}

fn run_handlers(
    handlers: &[RegisteredHandler],
    event: &CommittedEvent,
    transaction: Option<&dyn Transaction>,
) -> Result<(), DomainError> {
    for handler in handlers {
        tracing::debug!(
            handler = %handler.name,
            event_name = %event.event_name,
            sequence = event.sequence,
            "invoking event handler"
        );
        (handler.invoke)(event, transaction).map_err(|source| DomainError::HandlerInvocation {
            handler: handler.name.clone(),
            event_name: event.event_name.clone(),
            sequence: event.sequence,
            source,
        })?;
    }
    Ok(())
}
