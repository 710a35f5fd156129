use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::id::EventId;

/// Free-form key/value metadata carried alongside an event, e.g. the
/// actor that caused it or a trace id.
pub type Meta = HashMap<String, String>;

/// An event produced by application code, not yet persisted.
///
/// Built by `AggregateStore::save`, which already ran it through the
/// `Encoder`; an `EventLog` implementation never sees the original
/// domain type, only this already-encoded record.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: EventId,
    pub type_name: String,
    pub data: String,
    pub meta: Option<Meta>,
    pub causation_id: Option<EventId>,
    pub correlation_id: Option<EventId>,
    pub occurred_on: DateTime<Utc>,
}

impl NewEvent {
    pub fn new(type_name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            type_name: type_name.into(),
            data: data.into(),
            meta: None,
            causation_id: None,
            correlation_id: None,
            occurred_on: Utc::now(),
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_causation_id(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    pub fn with_correlation_id(mut self, id: EventId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// A durably persisted event, decoded back into its original domain type.
///
/// `payload` is type-erased because a stream, or the global log, mixes
/// events of many unrelated Rust types. Use `downcast_ref`/`downcast` to
/// recover the concrete type once you know (or have matched on)
/// `type_name`.
pub struct StoredEvent {
    pub id: EventId,
    pub sequence: u64,
    pub stream_id: String,
    pub stream_version: u64,
    pub type_name: String,
    pub payload: Box<dyn Any + Send>,
    pub meta: Option<Meta>,
    pub causation_id: Option<EventId>,
    pub correlation_id: Option<EventId>,
    pub occurred_on: DateTime<Utc>,
}

impl StoredEvent {
    pub fn is<T: 'static>(&self) -> bool {
        self.payload.is::<T>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        match self.payload.downcast::<T>() {
            Ok(payload) => Ok(*payload),
            Err(payload) => Err(Self { payload, ..self }),
        }
    }
}

impl fmt::Debug for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredEvent")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("stream_id", &self.stream_id)
            .field("stream_version", &self.stream_version)
            .field("type_name", &self.type_name)
            .field("meta", &self.meta)
            .field("causation_id", &self.causation_id)
            .field("correlation_id", &self.correlation_id)
            .field("occurred_on", &self.occurred_on)
            .finish_non_exhaustive()
    }
}
