//! Shopping cart aggregate used by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chronicle_core::aggregate::{AggregateRoot, AggregateState};
use chronicle_core::clock::Clock;
use chronicle_core::dispatcher::EventDispatcher;
use chronicle_core::error::DomainError;
use chronicle_core::event::EventPayload;
use chronicle_core::mapping::{ConventionBased, DeclarationBased, EventSourced, HandlerMethod};
use chronicle_core::reconstructor::AggregateReconstructor;
use chronicle_core::registry::HandlerRegistry;
use chronicle_core::repository::{EventStore, Repository};
use chronicle_core::snapshot::{SimpleSnapshotPolicy, SnapshotCapability, Snapshotable};
use uuid::Uuid;

#[derive(Debug)]
pub struct CartOpened {
    pub customer: String,
}

impl EventPayload for CartOpened {
    fn event_name(&self) -> &'static str {
        "cart.opened"
    }
}

#[derive(Debug)]
pub struct ItemAdded {
    pub item_id: Uuid,
    pub sku: String,
    pub quantity: u32,
}

impl EventPayload for ItemAdded {
    fn event_name(&self) -> &'static str {
        "cart.item_added"
    }
}

#[derive(Debug)]
pub struct QuantityChanged {
    pub item_id: Uuid,
    pub quantity: u32,
}

impl EventPayload for QuantityChanged {
    fn event_name(&self) -> &'static str {
        "cart.quantity_changed"
    }

    fn entity_id(&self) -> Option<Uuid> {
        Some(self.item_id)
    }
}

#[derive(Debug)]
pub struct CartCheckedOut;

impl EventPayload for CartCheckedOut {
    fn event_name(&self) -> &'static str {
        "cart.checked_out"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub id: Uuid,
    pub sku: String,
    pub quantity: u32,
}

impl EventSourced for LineItem {
    type Mapping = ConventionBased;

    fn handler_methods() -> Vec<HandlerMethod<Self>> {
        vec![HandlerMethod::new(
            "on_quantity_changed",
            |item: &mut Self, e: &QuantityChanged| {
                item.quantity = e.quantity;
                Ok(())
            },
        )]
    }
}

#[derive(Debug)]
pub struct Cart {
    state: AggregateState<Self>,
    pub customer: Option<String>,
    pub items: Vec<LineItem>,
    pub checked_out: bool,
    pub events_seen: u32,
}

/// Comparable view of a cart's domain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub customer: Option<String>,
    pub items: Vec<LineItem>,
    pub checked_out: bool,
    pub events_seen: u32,
    pub version: i64,
}

impl Cart {
    pub fn open(&mut self, customer: &str, clock: &dyn Clock) -> Result<(), DomainError> {
        if self.customer.is_some() {
            return Err(DomainError::Validation("cart already open".into()));
        }
        self.apply_change(
            CartOpened {
                customer: customer.to_owned(),
            },
            clock,
        )
    }

    pub fn add_item(&mut self, sku: &str, quantity: u32, clock: &dyn Clock) -> Result<Uuid, DomainError> {
        let item_id = Uuid::new_v4();
        self.apply_change(
            ItemAdded {
                item_id,
                sku: sku.to_owned(),
                quantity,
            },
            clock,
        )?;
        Ok(item_id)
    }

    pub fn change_quantity(
        &mut self,
        item_id: Uuid,
        quantity: u32,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if !self.items.iter().any(|item| item.id == item_id) {
            return Err(DomainError::Validation(format!("no line item {item_id}")));
        }
        self.apply_change(QuantityChanged { item_id, quantity }, clock)
    }

    pub fn check_out(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        self.apply_change(CartCheckedOut, clock)
    }

    pub fn view(&self) -> CartView {
        CartView {
            customer: self.customer.clone(),
            items: self.items.clone(),
            checked_out: self.checked_out,
            events_seen: self.events_seen,
            version: self.version(),
        }
    }

    fn item(&mut self, id: Uuid) -> Option<&mut LineItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }
}

impl EventSourced for Cart {
    type Mapping = DeclarationBased;

    fn handler_methods() -> Vec<HandlerMethod<Self>> {
        vec![
            HandlerMethod::new("opened", |cart: &mut Self, e: &CartOpened| {
                cart.customer = Some(e.customer.clone());
                Ok(())
            })
            .declared(),
            HandlerMethod::new("item_added", |cart: &mut Self, e: &ItemAdded| {
                cart.items.push(LineItem {
                    id: e.item_id,
                    sku: e.sku.clone(),
                    quantity: e.quantity,
                });
                cart.state.attach_entity(e.item_id, Self::item)?;
                Ok(())
            })
            .declared(),
            HandlerMethod::new("checked_out", |cart: &mut Self, _: &CartCheckedOut| {
                cart.checked_out = true;
                Ok(())
            })
            .declared(),
            HandlerMethod::catch_all("audit", |cart: &mut Self, _| {
                cart.events_seen += 1;
                Ok(())
            })
            .declared(),
            HandlerMethod::new("on_ignored", |_: &mut Self, _: &CartCheckedOut| Ok(())),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct CartMemento {
    pub customer: Option<String>,
    pub items: Vec<LineItem>,
    pub checked_out: bool,
    pub events_seen: u32,
}

impl AggregateRoot for Cart {
    fn create_empty(state: AggregateState<Self>) -> Self {
        Self {
            state,
            customer: None,
            items: Vec::new(),
            checked_out: false,
            events_seen: 0,
        }
    }

    fn state(&self) -> &AggregateState<Self> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AggregateState<Self> {
        &mut self.state
    }

    fn snapshot_capabilities() -> Vec<SnapshotCapability<Self>> {
        vec![SnapshotCapability::of::<CartMemento>()]
    }
}

impl Snapshotable<CartMemento> for Cart {
    fn create_snapshot(&self) -> CartMemento {
        CartMemento {
            customer: self.customer.clone(),
            items: self.items.clone(),
            checked_out: self.checked_out,
            events_seen: self.events_seen,
        }
    }

    fn restore_from_snapshot(&mut self, memento: CartMemento) -> Result<(), DomainError> {
        for item in &memento.items {
            self.state.attach_entity(item.id, Self::item)?;
        }
        self.customer = memento.customer;
        self.items = memento.items;
        self.checked_out = memento.checked_out;
        self.events_seen = memento.events_seen;
        Ok(())
    }
}

/// Builds a repository with the default snapshot policy and a best-effort
/// dispatcher.
pub fn repository<S: EventStore>(store: S) -> Repository<S, SimpleSnapshotPolicy> {
    repository_with(store, Arc::new(EventDispatcher::default()))
}

/// Builds a repository with the default snapshot policy around `dispatcher`.
pub fn repository_with<S: EventStore>(
    store: S,
    dispatcher: Arc<EventDispatcher>,
) -> Repository<S, SimpleSnapshotPolicy> {
    let registry = Arc::new(HandlerRegistry::new());
    Repository::new(
        store,
        AggregateReconstructor::new(Arc::clone(&registry)),
        SimpleSnapshotPolicy::new(registry),
        dispatcher,
    )
}
