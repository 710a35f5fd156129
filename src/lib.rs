#![doc = include_str!("../README.md")]

mod aggregate;
mod aggregate_store;
mod encoder;
mod event;
mod event_log;
mod id;
mod projector;
mod subscription;
pub mod testing;
pub mod webhook;

#[doc(inline)]
pub use crate::aggregate::{
    AggregateRoot, DispatchError, HandlerTable, RaisedEvent, Reducer, WriteContext,
};
#[doc(inline)]
pub use crate::aggregate_store::{AggregateStore, LoadError, SaveError};
#[doc(inline)]
pub use crate::encoder::{DecodeError, EncodeError, Encoder, Named};
#[doc(inline)]
pub use crate::event::{Meta, NewEvent, StoredEvent};
#[doc(inline)]
pub use crate::event_log::{
    read_all_via_subscription, AppendError, EventLog, ReadError, SubscribeOptions,
};
#[doc(inline)]
pub use crate::id::EventId;
#[doc(inline)]
pub use crate::projector::{flush_after, FlushAfter, Projection, ProjectionError, Projector};
#[doc(inline)]
pub use crate::subscription::{
    spawn_subscription, BoxFuture, PagedReader, Subscription, SubscriptionFatalError,
    SubscriptionItem, SubscriptionSignal,
};

pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[cfg(feature = "macros")]
pub use chronicle_macros::DomainEvent;
