use std::any::{Any, TypeId};
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::{Meta, StoredEvent};
use crate::id::EventId;

/// An event bound to an aggregate instance, either replayed from storage
/// or freshly produced by a domain method.
pub struct RaisedEvent {
    pub id: EventId,
    pub payload: Box<dyn Any + Send>,
    pub occurred_on: DateTime<Utc>,
    pub meta: Option<Meta>,
    pub causation_id: Option<EventId>,
    pub correlation_id: Option<EventId>,
}

impl RaisedEvent {
    fn from_stored(event: StoredEvent) -> Self {
        Self {
            id: event.id,
            payload: event.payload,
            occurred_on: event.occurred_on,
            meta: event.meta,
            causation_id: event.causation_id,
            correlation_id: event.correlation_id,
        }
    }

    fn fresh(id: EventId, payload: Box<dyn Any + Send>) -> Self {
        Self {
            id,
            payload,
            occurred_on: Utc::now(),
            meta: None,
            causation_id: None,
            correlation_id: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no handler registered for this event type")]
    MissingHandler,
    #[error("apply called before the aggregate was rehydrated")]
    NotRehydrated,
}

type DynHandler<A> = Box<dyn Fn(&mut A, &RaisedEvent) + Send + Sync>;

/// A compile-time dispatch table mapping an event's Rust type to the
/// closure that mutates `A` in response to it.
///
/// Built once per aggregate type via `Reducer::handlers`, registering
/// one closure per event type with `on` or `on_with_meta`. This replaces
/// the `"On" + TypeName` reflective lookup of a dynamically-typed origin
/// with an explicit, statically-checked table.
pub struct HandlerTable<A> {
    handlers: HashMap<TypeId, DynHandler<A>>,
}

impl<A: 'static> HandlerTable<A> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler for payload type `T`, ignoring event metadata.
    pub fn on<T, F>(mut self, handler: F) -> Self
    where
        T: 'static,
        F: Fn(&mut A, &T) + Send + Sync + 'static,
    {
        self.handlers.insert(
            TypeId::of::<T>(),
            Box::new(move |aggregate, raised| {
                let payload = raised
                    .payload
                    .downcast_ref::<T>()
                    .expect("dispatch table keyed by TypeId always matches its payload type");
                handler(aggregate, payload);
            }),
        );
        self
    }

    /// Registers a handler for payload type `T` that also needs the
    /// event's id, timestamp, or metadata.
    pub fn on_with_meta<T, F>(mut self, handler: F) -> Self
    where
        T: 'static,
        F: Fn(&mut A, &T, &RaisedEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(
            TypeId::of::<T>(),
            Box::new(move |aggregate, raised| {
                let payload = raised
                    .payload
                    .downcast_ref::<T>()
                    .expect("dispatch table keyed by TypeId always matches its payload type");
                handler(aggregate, payload, raised);
            }),
        );
        self
    }

    fn dispatch(&self, aggregate: &mut A, raised: &RaisedEvent) -> Result<(), DispatchError> {
        let handler = self
            .handlers
            .get(&raised.payload.as_ref().type_id())
            .ok_or(DispatchError::MissingHandler)?;
        handler(aggregate, raised);
        Ok(())
    }
}

impl<A: 'static> Default for HandlerTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// The business-state half of an aggregate: the fields domain methods
/// mutate, plus the dispatch table binding event types to mutations.
///
/// `AggregateRoot<A>` supplies everything else — id, version tracking,
/// the uncommitted event list, rehydrate/apply bookkeeping — so a
/// concrete aggregate only ever implements this trait and its own
/// domain methods.
pub trait Reducer: Default + Send + 'static {
    fn handlers() -> HandlerTable<Self>
    where
        Self: Sized;
}

/// Request-scoped values attached to newly-raised events when an
/// aggregate is saved: correlation id, causation id, and free-form
/// metadata.
///
/// A typed parameter in place of the ambient, key-addressed request
/// context of an origin built around dynamic context values.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    pub meta: Option<Meta>,
    pub correlation_id: Option<EventId>,
    pub causation_id: Option<EventId>,
}

impl WriteContext {
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_correlation_id(mut self, id: EventId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_causation_id(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }
}

/// Reusable event-sourcing scaffolding wrapped around a `Reducer`: holds
/// the aggregate's identity, version, and uncommitted events, and owns
/// the rehydrate/apply control flow.
pub struct AggregateRoot<A: Reducer> {
    id: String,
    version: u64,
    uncommitted: Vec<RaisedEvent>,
    state: A,
    handlers: HandlerTable<A>,
    rehydrated: bool,
}

impl<A: Reducer> AggregateRoot<A> {
    /// Creates a fresh, empty aggregate bound to `id`. Must be passed
    /// through `rehydrate` (even with zero events, for a brand-new
    /// aggregate) before `apply` will accept anything.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            uncommitted: Vec::new(),
            state: A::default(),
            handlers: A::handlers(),
            rehydrated: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn uncommitted(&self) -> &[RaisedEvent] {
        &self.uncommitted
    }

    /// Replays `events` onto the aggregate's state, advancing `version`
    /// by one per event. Does not touch the uncommitted list.
    pub fn rehydrate(
        &mut self,
        events: impl IntoIterator<Item = StoredEvent>,
    ) -> Result<(), DispatchError> {
        for event in events {
            let raised = RaisedEvent::from_stored(event);
            self.handlers.dispatch(&mut self.state, &raised)?;
            self.version += 1;
        }
        self.rehydrated = true;
        Ok(())
    }

    /// Mutates the aggregate via its handler for `T` and records the
    /// event as uncommitted. Does not change `version`.
    pub fn apply<T>(&mut self, payload: T) -> Result<(), DispatchError>
    where
        T: Send + 'static,
    {
        self.apply_with_id(EventId::new(), payload)
    }

    /// Same as `apply`, but with a caller-supplied event id (for
    /// idempotent retries or correlation-key reuse).
    pub fn apply_with_id<T>(&mut self, id: EventId, payload: T) -> Result<(), DispatchError>
    where
        T: Send + 'static,
    {
        if !self.rehydrated {
            return Err(DispatchError::NotRehydrated);
        }
        let raised = RaisedEvent::fresh(id, Box::new(payload));
        self.handlers.dispatch(&mut self.state, &raised)?;
        self.uncommitted.push(raised);
        Ok(())
    }

    /// Marks all uncommitted events as committed, typically called by
    /// `AggregateStore::save` after a successful append.
    pub fn clear_uncommitted(&mut self) {
        self.uncommitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        value: i64,
    }

    struct Incremented(i64);
    struct Reset;

    impl Reducer for Counter {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new()
                .on::<Incremented, _>(|state, Incremented(by)| state.value += by)
                .on::<Reset, _>(|state, _| state.value = 0)
        }
    }

    #[test]
    fn rehydrate_advances_version_without_uncommitted_events() {
        let mut root: AggregateRoot<Counter> = AggregateRoot::new("c1");
        let stored = vec![stored_event(Incremented(3)), stored_event(Incremented(4))];
        root.rehydrate(stored).unwrap();

        assert_eq!(root.version(), 2);
        assert!(root.uncommitted().is_empty());
        assert_eq!(root.state().value, 7);
    }

    #[test]
    fn apply_records_uncommitted_without_bumping_version() {
        let mut root: AggregateRoot<Counter> = AggregateRoot::new("c1");
        root.rehydrate(std::iter::empty()).unwrap();

        root.apply(Incremented(5)).unwrap();
        root.apply(Incremented(2)).unwrap();

        assert_eq!(root.version(), 0);
        assert_eq!(root.uncommitted().len(), 2);
        assert_eq!(root.state().value, 7);
    }

    #[test]
    fn apply_before_rehydrate_fails() {
        let mut root: AggregateRoot<Counter> = AggregateRoot::new("c1");
        let err = root.apply(Incremented(1)).unwrap_err();
        assert_eq!(err, DispatchError::NotRehydrated);
        assert_eq!(root.state().value, 0);
    }

    #[test]
    fn missing_handler_leaves_state_untouched() {
        struct Unhandled;

        let mut root: AggregateRoot<Counter> = AggregateRoot::new("c1");
        root.rehydrate(std::iter::empty()).unwrap();
        root.apply(Incremented(9)).unwrap();

        let err = root.apply(Unhandled).unwrap_err();

        assert_eq!(err, DispatchError::MissingHandler);
        assert_eq!(root.uncommitted().len(), 1, "failed apply must not be recorded");
        assert_eq!(root.version(), 0);
        assert_eq!(root.state().value, 9, "failed dispatch must not mutate state");
    }

    fn stored_event<T: Send + 'static>(payload: T) -> StoredEvent {
        StoredEvent {
            id: EventId::new(),
            sequence: 1,
            stream_id: "c1".into(),
            stream_version: 1,
            type_name: std::any::type_name::<T>().into(),
            payload: Box::new(payload),
            meta: None,
            causation_id: None,
            correlation_id: None,
            occurred_on: Utc::now(),
        }
    }
}
