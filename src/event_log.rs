use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::encoder::DecodeError;
use crate::event::{NewEvent, StoredEvent};
use crate::subscription::{
    Subscription, SubscriptionFatalError, SubscriptionItem, SubscriptionSignal,
};

/// Tuning knobs for `EventLog::subscribe_all` and `EventLog::read_all`.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Only events with `sequence > offset` are returned.
    pub offset: u64,
    /// Page size per poll. Must be at least 1.
    pub batch_size: usize,
    /// Delay between polls once the store is caught up.
    pub poll_interval: Duration,
}

impl SubscribeOptions {
    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            batch_size: 100,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppendError<E> {
    #[error("stream id must not be empty")]
    EmptyStreamId,
    #[error("optimistic concurrency check failed: stream version already taken")]
    ConcurrencyCheckFailed,
    #[error(transparent)]
    Transport(#[from] E),
}

#[derive(Debug, Error)]
pub enum ReadError<E> {
    #[error("stream not found")]
    StreamNotFound,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] E),
}

/// A durable, append-only log of events partitioned into per-entity streams.
///
/// Implementations own both the optimistic-concurrency check on append and
/// the decode step on every read path: callers of `read_stream`, `read_all`
/// and `subscribe_all` always get back decoded `StoredEvent`s, never raw
/// payload strings.
#[async_trait]
pub trait EventLog: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Appends `events` to `stream_id`, guarded by `expected_version`.
    ///
    /// An empty `events` batch is a successful no-op. Every event is
    /// assigned a contiguous run of `stream_version`s starting at
    /// `expected_version + 1`, in one atomic insert.
    async fn append_stream(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, AppendError<Self::Error>>;

    /// Returns every event of `stream_id` in ascending `stream_version`
    /// order. Fails with `StreamNotFound` if the stream has no events.
    async fn read_stream(&self, stream_id: &str) -> Result<Vec<StoredEvent>, ReadError<Self::Error>>;

    /// Opens a long-lived, cancellable catch-up subscription over the
    /// global event stream starting just after `options.offset`.
    ///
    /// `cancel` is the caller's cancellation context: firing it terminates
    /// the poller within one `poll_interval`, surfacing
    /// `SubscriptionSignal::Cancelled`, independently of
    /// `Subscription::close`.
    fn subscribe_all(&self, options: SubscribeOptions, cancel: CancellationToken) -> Subscription<Self::Error>;

    /// Drains a subscription until the first `EndOfStream` marker and
    /// returns everything observed up to that point.
    async fn read_all(
        &self,
        options: SubscribeOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<StoredEvent>, SubscriptionFatalError<Self::Error>>;
}

/// Shared `read_all` behavior: open a subscription and drain it until the
/// first `EndOfStream` marker. Every `EventLog` implementation in this
/// workspace delegates its `read_all` to this helper.
pub async fn read_all_via_subscription<L>(
    log: &L,
    options: SubscribeOptions,
    cancel: CancellationToken,
) -> Result<Vec<StoredEvent>, SubscriptionFatalError<L::Error>>
where
    L: EventLog + ?Sized,
{
    let mut sub = log.subscribe_all(options, cancel);
    let mut events = Vec::new();
    loop {
        match sub.recv().await {
            Some(SubscriptionItem::Event(event)) => events.push(event),
            Some(SubscriptionItem::Signal(SubscriptionSignal::EndOfStream)) => break,
            Some(SubscriptionItem::Signal(SubscriptionSignal::Fatal(err))) => return Err(err),
            Some(SubscriptionItem::Signal(_)) => continue,
            None => break,
        }
    }
    sub.close();
    Ok(events)
}
