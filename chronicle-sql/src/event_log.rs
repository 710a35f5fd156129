use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use chronicle::{
    spawn_subscription, AppendError, BoxFuture, Encoder, EventId, EventLog, Meta, NewEvent,
    PagedReader, ReadError, StoredEvent, SubscribeOptions, Subscription,
};

use crate::config::Config;
use crate::error::{is_unique_violation, Error};
use crate::migrator::{self, Kind};

const SELECT_COLUMNS: &str = "sequence, id, stream_id, stream_version, type, data, meta, \
     causation_event_id, correlation_event_id, occurred_on";

/// A `chronicle::EventLog` backed by `sqlx`, supporting Postgres and
/// SQLite through the portable `sqlx::Any` driver.
///
/// Every query in this type is written against the subset of SQL and
/// bind types `Any` understands (integers, strings, nothing exotic), so
/// the same code path serves both backends; `Kind` exists only to pick
/// the right `CREATE TABLE` dialect at migration time.
pub struct SqlEventLog<E> {
    pool: AnyPool,
    encoder: E,
    kind: Kind,
}

impl<E> Clone for SqlEventLog<E>
where
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            encoder: self.encoder.clone(),
            kind: self.kind,
        }
    }
}

impl<E> SqlEventLog<E>
where
    E: Encoder,
{
    /// Connects to the backend named by `config`, creating the `event`
    /// table if it does not already exist.
    pub async fn connect(config: Config, encoder: E) -> Result<Self, Error> {
        sqlx::any::install_default_drivers();

        let kind = Kind::of(&config);
        // A single connection for sqlite keeps an in-memory database (which
        // otherwise exists per-connection) coherent across queries; it also
        // makes the `:memory:` pool trivially safe to share across tasks.
        let mut options = AnyPoolOptions::new();
        if kind == Kind::Sqlite {
            options = options.max_connections(1);
        }
        let pool = options.connect(&config.connect_url()).await?;

        migrator::run(&pool, kind).await?;

        Ok(Self {
            pool,
            encoder,
            kind,
        })
    }

    fn reader(&self) -> Reader<E>
    where
        E: Clone,
    {
        Reader {
            pool: self.pool.clone(),
            encoder: self.encoder.clone(),
        }
    }

    fn decode_row(&self, row: AnyRow) -> Result<StoredEvent, chronicle::DecodeError> {
        decode_row(&self.encoder, row)
    }
}

fn decode_row<E: Encoder>(encoder: &E, row: AnyRow) -> Result<StoredEvent, chronicle::DecodeError> {
    let sequence: i64 = row.get(0);
    let id: String = row.get(1);
    let stream_id: String = row.get(2);
    let stream_version: i64 = row.get(3);
    let type_name: String = row.get(4);
    let data: String = row.get(5);
    let meta: Option<String> = row.get(6);
    let causation_event_id: Option<String> = row.get(7);
    let correlation_event_id: Option<String> = row.get(8);
    let occurred_on: String = row.get(9);

    let payload = encoder.decode(&type_name, &data)?;

    Ok(StoredEvent {
        id: parse_id(&id),
        sequence: sequence as u64,
        stream_id,
        stream_version: stream_version as u64,
        type_name,
        payload,
        meta: meta.map(|m| parse_meta(&m)),
        causation_id: causation_event_id.as_deref().map(parse_id),
        correlation_id: correlation_event_id.as_deref().map(parse_id),
        occurred_on: parse_timestamp(&occurred_on),
    })
}

fn parse_id(raw: &str) -> EventId {
    EventId::from_str(raw).unwrap_or_else(|_| {
        panic!("event table holds a malformed event id `{raw}`; the row is corrupt")
    })
}

fn parse_meta(raw: &str) -> Meta {
    serde_json::from_str(raw)
        .unwrap_or_else(|_| panic!("event table holds malformed meta JSON `{raw}`; the row is corrupt"))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .unwrap_or_else(|_| panic!("event table holds a malformed timestamp `{raw}`; the row is corrupt"))
        .with_timezone(&Utc)
}

#[async_trait]
impl<E> EventLog for SqlEventLog<E>
where
    E: Encoder + Clone + 'static,
{
    type Error = Error;

    #[instrument(skip(self, events), fields(stream_id, count = events.len()))]
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

        let mut sql = String::from(
            "INSERT INTO event (id, stream_id, stream_version, type, data, meta, \
             causation_event_id, correlation_event_id, occurred_on) VALUES ",
        );
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?)"; events.len()].join(", ");
        sql.push_str(&placeholders);
        sql.push_str(" RETURNING sequence");

        let mut query = sqlx::query(&sql);
        for (i, event) in events.iter().enumerate() {
            let stream_version = (expected_version + i as u64 + 1) as i64;
            let meta = event
                .meta
                .as_ref()
                .map(|meta| serde_json::to_string(meta).expect("a string map always serializes"));
            query = query
                .bind(event.id.to_string())
                .bind(stream_id.to_string())
                .bind(stream_version)
                .bind(event.type_name.clone())
                .bind(event.data.clone())
                .bind(meta)
                .bind(event.causation_id.map(|id| id.to_string()))
                .bind(event.correlation_id.map(|id| id.to_string()))
                .bind(event.occurred_on.to_rfc3339());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| AppendError::Transport(Error::Database(err)))?;

        let rows = match query.fetch_all(&mut *tx).await {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => return Err(AppendError::ConcurrencyCheckFailed),
            Err(err) => return Err(AppendError::Transport(Error::Database(err))),
        };

        tx.commit()
            .await
            .map_err(|err| AppendError::Transport(Error::Database(err)))?;

        let sequences: Vec<i64> = rows.iter().map(|row| row.get(0)).collect();
        let mut stored = Vec::with_capacity(events.len());
        for (sequence, event) in sequences.into_iter().zip(events.into_iter()) {
            let stream_version = stored.len() as u64 + expected_version + 1;
            let payload = self
                .encoder
                .decode(&event.type_name, &event.data)
                .map_err(|err| AppendError::Transport(Error::Decode(err)))?;
            stored.push(StoredEvent {
                id: event.id,
                sequence: sequence as u64,
                stream_id: stream_id.to_string(),
                stream_version,
                type_name: event.type_name,
                payload,
                meta: event.meta,
                causation_id: event.causation_id,
                correlation_id: event.correlation_id,
                occurred_on: event.occurred_on,
            });
        }

        Ok(stored)
    }

    #[instrument(skip(self), fields(stream_id))]
    async fn read_stream(&self, stream_id: &str) -> Result<Vec<StoredEvent>, ReadError<Self::Error>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM event WHERE stream_id = ? ORDER BY sequence ASC");
        let rows = sqlx::query(&sql)
            .bind(stream_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| ReadError::Transport(Error::Database(err)))?;

        if rows.is_empty() {
            return Err(ReadError::StreamNotFound);
        }

        rows.into_iter()
            .map(|row| self.decode_row(row).map_err(ReadError::Decode))
            .collect()
    }

    fn subscribe_all(&self, options: SubscribeOptions, cancel: CancellationToken) -> Subscription<Self::Error> {
        spawn_subscription(std::sync::Arc::new(self.reader()), options, cancel)
    }

    async fn read_all(
        &self,
        options: SubscribeOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<StoredEvent>, chronicle::SubscriptionFatalError<Self::Error>> {
        chronicle::read_all_via_subscription(self, options, cancel).await
    }
}

/// The page-fetching half of `SqlEventLog`'s subscription support; the
/// poll loop, backpressure, and `EndOfStream` marker all live in
/// `chronicle::spawn_subscription` and are shared with every other
/// backend.
struct Reader<E> {
    pool: AnyPool,
    encoder: E,
}

impl<E> PagedReader for Reader<E>
where
    E: Encoder + Clone + 'static,
{
    type Error = Error;

    fn fetch_page<'a>(
        &'a self,
        after_sequence: u64,
        batch_size: usize,
    ) -> BoxFuture<'a, Result<Vec<StoredEvent>, Self::Error>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM event WHERE sequence > ? ORDER BY sequence ASC LIMIT ?"
            );
            let rows = sqlx::query(&sql)
                .bind(after_sequence as i64)
                .bind(batch_size as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

            rows.into_iter()
                .map(|row| decode_row(&self.encoder, row).map_err(Error::Decode))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use chronicle::{AppendError, NewEvent, ReadError};
    use chronicle_serde::json::{JsonEncoder, JsonEncoderBuilder};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct AccountOpened {
        balance: i64,
    }
    impl chronicle::Named for AccountOpened {
        const NAME: &'static str = "AccountOpened";
    }

    fn encoder() -> JsonEncoder {
        JsonEncoderBuilder::new().register::<AccountOpened>().build()
    }

    fn new_event(balance: i64) -> NewEvent {
        let (type_name, data) = chronicle::Encoder::encode(&encoder(), &AccountOpened { balance }).unwrap();
        NewEvent::new(type_name, data)
    }

    async fn connect() -> SqlEventLog<JsonEncoder> {
        SqlEventLog::connect(Config::sqlite(":memory:"), encoder())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn appends_and_reads_a_stream_in_order() {
        let log = connect().await;

        log.append_stream("account-1", 0, vec![new_event(100), new_event(150)])
            .await
            .unwrap();

        let events = log.read_stream("account-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream_version, 1);
        assert_eq!(events[1].stream_version, 2);
        assert_eq!(events[0].downcast_ref::<AccountOpened>().unwrap().balance, 100);
        assert!(events[0].sequence < events[1].sequence);
    }

    #[tokio::test]
    async fn reading_an_unknown_stream_fails() {
        let log = connect().await;
        let err = log.read_stream("missing").await.unwrap_err();
        assert!(matches!(err, ReadError::StreamNotFound));
    }

    #[tokio::test]
    async fn concurrent_append_at_a_stale_version_is_rejected() {
        let log = connect().await;
        log.append_stream("account-1", 0, vec![new_event(100)])
            .await
            .unwrap();

        let err = log
            .append_stream("account-1", 0, vec![new_event(200)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppendError::ConcurrencyCheckFailed));
    }

    #[tokio::test]
    async fn appending_an_empty_batch_is_a_noop() {
        let log = connect().await;
        let stored = log.append_stream("account-1", 0, Vec::new()).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn appending_with_an_empty_stream_id_is_rejected() {
        let log = connect().await;
        let err = log
            .append_stream("", 0, vec![new_event(100)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppendError::EmptyStreamId));
    }

    #[tokio::test]
    async fn read_all_sees_every_stream_in_sequence_order() {
        let log = connect().await;
        log.append_stream("account-1", 0, vec![new_event(100)])
            .await
            .unwrap();
        log.append_stream("account-2", 0, vec![new_event(200)])
            .await
            .unwrap();

        let events = log
            .read_all(SubscribeOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream_id, "account-1");
        assert_eq!(events[1].stream_id, "account-2");
    }
}
