use thiserror::Error;

use crate::aggregate::{AggregateRoot, DispatchError, Reducer, WriteContext};
use crate::encoder::{DecodeError, EncodeError, Encoder};
use crate::event::{NewEvent, StoredEvent};
use crate::event_log::{AppendError, EventLog, ReadError};

#[derive(Debug, Error)]
pub enum LoadError<E> {
    #[error("aggregate not found")]
    AggregateNotFound,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Transport(E),
}

impl<E> From<ReadError<E>> for LoadError<E> {
    fn from(err: ReadError<E>) -> Self {
        match err {
            ReadError::StreamNotFound => LoadError::AggregateNotFound,
            ReadError::Decode(err) => LoadError::Decode(err),
            ReadError::Transport(err) => LoadError::Transport(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError<E> {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("stream id must not be empty")]
    EmptyStreamId,
    #[error("optimistic concurrency check failed: stream version already taken")]
    ConcurrencyCheckFailed,
    #[error(transparent)]
    Transport(E),
}

impl<E> From<AppendError<E>> for SaveError<E> {
    fn from(err: AppendError<E>) -> Self {
        match err {
            AppendError::EmptyStreamId => SaveError::EmptyStreamId,
            AppendError::ConcurrencyCheckFailed => SaveError::ConcurrencyCheckFailed,
            AppendError::Transport(err) => SaveError::Transport(err),
        }
    }
}

/// Bridges `AggregateRoot<A>` to an `EventLog`: load-by-id replays stored
/// events onto a fresh aggregate; save encodes uncommitted events and
/// appends them under the aggregate's current version.
pub struct AggregateStore<L, E> {
    event_log: L,
    encoder: E,
}

impl<L, E> Clone for AggregateStore<L, E>
where
    L: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            event_log: self.event_log.clone(),
            encoder: self.encoder.clone(),
        }
    }
}

impl<L, E> AggregateStore<L, E>
where
    L: EventLog,
    E: Encoder,
{
    pub fn new(event_log: L, encoder: E) -> Self {
        Self { event_log, encoder }
    }

    /// Loads `id`, replaying its stream onto a fresh `AggregateRoot<A>`.
    /// Fails with `AggregateNotFound` if the stream has no events.
    pub async fn by_id<A>(&self, id: &str) -> Result<AggregateRoot<A>, LoadError<L::Error>>
    where
        A: Reducer,
    {
        let events = self.event_log.read_stream(id).await?;
        let mut root = AggregateRoot::new(id);
        root.rehydrate(events)?;
        Ok(root)
    }

    /// Encodes `root`'s uncommitted events under `context` and appends
    /// them guarded by the aggregate's current version. Returns the
    /// durably assigned `StoredEvent`s on success.
    ///
    /// The aggregate itself is left untouched: call
    /// `AggregateRoot::clear_uncommitted` once the caller is satisfied
    /// the append succeeded, if the same in-memory instance will be
    /// reused afterwards.
    pub async fn save<A>(
        &self,
        root: &AggregateRoot<A>,
        context: WriteContext,
    ) -> Result<Vec<StoredEvent>, SaveError<L::Error>>
    where
        A: Reducer,
    {
        let mut records = Vec::with_capacity(root.uncommitted().len());
        for raised in root.uncommitted() {
            let (type_name, data) = self.encoder.encode(raised.payload.as_ref())?;
            records.push(NewEvent {
                id: raised.id,
                type_name,
                data,
                meta: context.meta.clone(),
                causation_id: context.causation_id,
                correlation_id: context.correlation_id,
                occurred_on: raised.occurred_on,
            });
        }

        let stored = self
            .event_log
            .append_stream(root.id(), root.version(), records)
            .await?;
        Ok(stored)
    }

    /// Loads `id`, runs `mutate` against the rehydrated aggregate, then
    /// saves it: the canonical load-mutate-save control flow. On success
    /// the aggregate's uncommitted events are cleared for the caller.
    pub async fn exec<A, F, R>(
        &self,
        id: &str,
        context: WriteContext,
        mutate: F,
    ) -> Result<R, ExecError<L::Error>>
    where
        A: Reducer,
        F: FnOnce(&mut AggregateRoot<A>) -> Result<R, DispatchError>,
    {
        let mut root = self.by_id(id).await?;
        let outcome = mutate(&mut root)?;
        self.save(&root, context).await?;
        root.clear_uncommitted();
        Ok(outcome)
    }
}

#[derive(Debug, Error)]
pub enum ExecError<E> {
    #[error(transparent)]
    Load(#[from] LoadError<E>),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Save(#[from] SaveError<E>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{HandlerTable, Reducer};
    use crate::encoder::Named;
    use crate::testing::InMemoryEventLog;
    use chronicle_serde::json::JsonEncoderBuilder;
    use serde::{Deserialize, Serialize};

    #[derive(Default)]
    struct Account {
        balance: i64,
    }

    #[derive(Serialize, Deserialize)]
    struct Opened {
        balance: i64,
    }
    impl Named for Opened {
        const NAME: &'static str = "Opened";
    }

    #[derive(Serialize, Deserialize)]
    struct Deposited {
        amount: i64,
    }
    impl Named for Deposited {
        const NAME: &'static str = "Deposited";
    }

    impl Reducer for Account {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new()
                .on::<Opened, _>(|a, e| a.balance = e.balance)
                .on::<Deposited, _>(|a, e| a.balance += e.amount)
        }
    }

    fn store(
    ) -> AggregateStore<InMemoryEventLog<chronicle_serde::json::JsonEncoder>, chronicle_serde::json::JsonEncoder>
    {
        let encoder = JsonEncoderBuilder::new()
            .register::<Opened>()
            .register::<Deposited>()
            .build();
        AggregateStore::new(InMemoryEventLog::new(encoder.clone()), encoder)
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let store = store();

        // A brand-new aggregate has no stream yet, so it is constructed
        // directly rather than loaded via `by_id`.
        let mut root: AggregateRoot<Account> = AggregateRoot::new("acc-1");
        root.rehydrate(std::iter::empty()).unwrap();
        root.apply(Opened { balance: 100 }).unwrap();
        store.save(&root, WriteContext::default()).await.unwrap();
        root.clear_uncommitted();

        let outcome = store
            .exec::<Account, _, ()>("acc-1", WriteContext::default(), |root| {
                root.apply(Deposited { amount: 50 })
            })
            .await;
        assert!(outcome.is_ok());

        let reloaded: AggregateRoot<Account> = store.by_id("acc-1").await.unwrap();
        assert_eq!(reloaded.version(), 2);
        assert_eq!(reloaded.state().balance, 150);
    }

    #[tokio::test]
    async fn missing_stream_maps_to_aggregate_not_found() {
        let store = store();
        let err = store.by_id::<Account>("missing").await.unwrap_err();
        assert!(matches!(err, LoadError::AggregateNotFound));
    }

    mockall::mock! {
        FailingEncoder {}

        impl Encoder for FailingEncoder {
            fn encode(&self, payload: &dyn std::any::Any) -> Result<(String, String), EncodeError>;
            fn decode(&self, type_name: &str, data: &str) -> Result<Box<dyn std::any::Any + Send>, DecodeError>;
        }
    }

    #[tokio::test]
    async fn save_surfaces_an_encode_failure_without_appending() {
        let mut encoder = MockFailingEncoder::new();
        encoder
            .expect_encode()
            .once()
            .returning(|_| Err(EncodeError::EventNotRegistered));

        let store = AggregateStore::new(InMemoryEventLog::new(JsonEncoderBuilder::new().build()), encoder);

        let mut root: AggregateRoot<Account> = AggregateRoot::new("acc-1");
        root.rehydrate(std::iter::empty()).unwrap();
        root.apply(Opened { balance: 100 }).unwrap();

        let err = store.save(&root, WriteContext::default()).await.unwrap_err();
        assert!(matches!(err, SaveError::Encode(EncodeError::EventNotRegistered)));

        assert!(matches!(
            store.by_id::<Account>("acc-1").await.unwrap_err(),
            LoadError::AggregateNotFound
        ), "a failed encode must not have appended anything");
    }
}
