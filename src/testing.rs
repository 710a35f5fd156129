//! An in-memory `EventLog` for exercising aggregates, projections and
//! subscriptions without a database.
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::encoder::Encoder;
use crate::event::{Meta, NewEvent, StoredEvent};
use crate::event_log::{AppendError, EventLog, ReadError, SubscribeOptions};
use crate::id::EventId;
use crate::subscription::{spawn_subscription, BoxFuture, PagedReader, Subscription};

#[derive(Clone)]
struct Record {
    id: EventId,
    sequence: u64,
    stream_id: String,
    stream_version: u64,
    type_name: String,
    data: String,
    meta: Option<Meta>,
    causation_id: Option<EventId>,
    correlation_id: Option<EventId>,
    occurred_on: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct State {
    records: Vec<Record>,
    stream_versions: HashMap<String, u64>,
}

struct Reader<E> {
    encoder: E,
    state: Arc<Mutex<State>>,
}

impl<E: Encoder> PagedReader for Reader<E> {
    type Error = Infallible;

    fn fetch_page<'a>(
        &'a self,
        after_sequence: u64,
        batch_size: usize,
    ) -> BoxFuture<'a, Result<Vec<StoredEvent>, Self::Error>> {
        let page: Vec<Record> = {
            let state = self.state.lock().unwrap();
            state
                .records
                .iter()
                .filter(|r| r.sequence > after_sequence)
                .take(batch_size)
                .cloned()
                .collect()
        };
        Box::pin(async move {
            Ok(page
                .into_iter()
                .map(|record| self.decode(record))
                .collect())
        })
    }
}

impl<E: Encoder> Reader<E> {
    fn decode(&self, record: Record) -> StoredEvent {
        let payload = self
            .encoder
            .decode(&record.type_name, &record.data)
            .unwrap_or_else(|err| {
                panic!(
                    "in-memory event log holds an undecodable record `{}`: {err}",
                    record.type_name
                )
            });
        StoredEvent {
            id: record.id,
            sequence: record.sequence,
            stream_id: record.stream_id,
            stream_version: record.stream_version,
            type_name: record.type_name,
            payload,
            meta: record.meta,
            causation_id: record.causation_id,
            correlation_id: record.correlation_id,
            occurred_on: record.occurred_on,
        }
    }
}

/// A single-process `EventLog` backed by a `Vec` behind a mutex.
///
/// Round-trips events through the supplied `Encoder` exactly as a real
/// backend would, so decode errors and registry gaps surface the same
/// way they would against Postgres or SQLite.
pub struct InMemoryEventLog<E> {
    reader: Arc<Reader<E>>,
}

impl<E> Clone for InMemoryEventLog<E> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
        }
    }
}

impl<E: Encoder> InMemoryEventLog<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            reader: Arc::new(Reader {
                encoder,
                state: Arc::new(Mutex::new(State::default())),
            }),
        }
    }
}

#[async_trait]
impl<E: Encoder + 'static> EventLog for InMemoryEventLog<E> {
    type Error = Infallible;

    async fn append_stream(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, AppendError<Self::Error>> {
        if stream_id.is_empty() {
            return Err(AppendError::EmptyStreamId);
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.reader.state.lock().unwrap();
        let current = state.stream_versions.get(stream_id).copied().unwrap_or(0);
        if current != expected_version {
            return Err(AppendError::ConcurrencyCheckFailed);
        }

        let mut stored = Vec::with_capacity(events.len());
        for (i, event) in events.into_iter().enumerate() {
            let stream_version = expected_version + i as u64 + 1;
            let sequence = state.records.len() as u64 + 1;
            let record = Record {
                id: event.id,
                sequence,
                stream_id: stream_id.to_string(),
                stream_version,
                type_name: event.type_name,
                data: event.data,
                meta: event.meta,
                causation_id: event.causation_id,
                correlation_id: event.correlation_id,
                occurred_on: event.occurred_on,
            };
            state.records.push(record.clone());
            stored.push(self.reader.decode(record));
        }
        state
            .stream_versions
            .insert(stream_id.to_string(), expected_version + stored.len() as u64);

        Ok(stored)
    }

    async fn read_stream(&self, stream_id: &str) -> Result<Vec<StoredEvent>, ReadError<Self::Error>> {
        let records: Vec<Record> = {
            let state = self.reader.state.lock().unwrap();
            state
                .records
                .iter()
                .filter(|r| r.stream_id == stream_id)
                .cloned()
                .collect()
        };
        if records.is_empty() {
            return Err(ReadError::StreamNotFound);
        }
        Ok(records.into_iter().map(|r| self.reader.decode(r)).collect())
    }

    fn subscribe_all(&self, options: SubscribeOptions, cancel: CancellationToken) -> Subscription<Self::Error> {
        spawn_subscription(self.reader.clone(), options, cancel)
    }

    async fn read_all(
        &self,
        options: SubscribeOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<StoredEvent>, crate::subscription::SubscriptionFatalError<Self::Error>> {
        crate::event_log::read_all_via_subscription(self, options, cancel).await
    }
}
