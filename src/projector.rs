//! Fans the global event stream out to independent projection handlers,
//! restarting each on error and never letting one projection's failure
//! take down another.
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event::StoredEvent;
use crate::event_log::{EventLog, SubscribeOptions};
use crate::subscription::{BoxFuture, SubscriptionItem, SubscriptionSignal};

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ProjectionError(#[from] crate::BoxDynError);

impl ProjectionError {
    pub fn new(err: impl Into<crate::BoxDynError>) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Error)]
#[error("flush worker is no longer running")]
struct FlushWorkerStopped;

/// A side-effectful function over the global event stream.
///
/// Takes the event by value rather than by reference: `flush_after`
/// needs to hand events off to a background worker across a channel,
/// and every call site already owns the `StoredEvent` it is projecting.
pub trait Projection: Send + Sync + 'static {
    fn call(&self, event: StoredEvent) -> BoxFuture<'static, Result<(), ProjectionError>>;
}

impl<F, Fut> Projection for F
where
    F: Fn(StoredEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProjectionError>> + Send + 'static,
{
    fn call(&self, event: StoredEvent) -> BoxFuture<'static, Result<(), ProjectionError>> {
        Box::pin(self(event))
    }
}

enum DriveOutcome {
    Retry,
    Done,
}

/// Supervises a set of independent projections, each running over its
/// own catch-up subscription of the global event stream.
///
/// Registered projections share no state and are not ordered relative
/// to each other: a crash or restart in one never affects the others.
/// `run` returns once every registered projection has terminated, which
/// happens only via `SubscriptionClosedByClient`/cancellation — a
/// projection that errors on an event is restarted, not removed.
pub struct Projector<L> {
    event_log: L,
    projections: Vec<(String, Box<dyn Projection>)>,
}

impl<L> Projector<L>
where
    L: EventLog + Clone + 'static,
{
    pub fn new(event_log: L) -> Self {
        Self {
            event_log,
            projections: Vec::new(),
        }
    }

    /// Registers a projection under `name`, used only for log lines.
    pub fn register(mut self, name: impl Into<String>, projection: impl Projection) -> Self {
        self.projections.push((name.into(), Box::new(projection)));
        self
    }

    /// Runs every registered projection to completion, restarting each
    /// independently on error. Returns once all have terminated, which
    /// in practice means `cancel` fired or every projection closed its
    /// own subscription.
    pub async fn run(self, cancel: CancellationToken) {
        let tasks = self.projections.into_iter().map(|(name, projection)| {
            let event_log = self.event_log.clone();
            let cancel = cancel.clone();
            tokio::spawn(supervise(name, event_log, projection, cancel))
        });
        join_all(tasks).await;
    }
}

async fn supervise<L>(
    name: String,
    event_log: L,
    projection: Box<dyn Projection>,
    cancel: CancellationToken,
) where
    L: EventLog,
{
    loop {
        if cancel.is_cancelled() {
            return;
        }

        // Restart semantics are deliberately simple: every (re)subscribe
        // starts from the default offset. Durable per-projection offset
        // tracking is out of scope; projections must be idempotent.
        let mut sub = event_log.subscribe_all(SubscribeOptions::default(), cancel.clone());

        let outcome = drive(&name, &mut sub, projection.as_ref(), &cancel).await;
        sub.close();

        match outcome {
            DriveOutcome::Retry => continue,
            DriveOutcome::Done => return,
        }
    }
}

async fn drive<E>(
    name: &str,
    sub: &mut crate::subscription::Subscription<E>,
    projection: &dyn Projection,
    cancel: &CancellationToken,
) -> DriveOutcome
where
    E: std::error::Error + Send + Sync + 'static,
{
    loop {
        let item = tokio::select! {
            item = sub.recv() => item,
            _ = cancel.cancelled() => {
                sub.close();
                return DriveOutcome::Done;
            }
        };

        match item {
            Some(SubscriptionItem::Event(event)) => {
                if let Err(err) = projection.call(event).await {
                    warn!(projection = name, error = %err, "projection failed; restarting from the default offset");
                    return DriveOutcome::Retry;
                }
            }
            Some(SubscriptionItem::Signal(SubscriptionSignal::EndOfStream)) => continue,
            Some(SubscriptionItem::Signal(SubscriptionSignal::ClosedByClient)) => {
                return DriveOutcome::Done
            }
            Some(SubscriptionItem::Signal(SubscriptionSignal::Cancelled)) => {
                return DriveOutcome::Done
            }
            Some(SubscriptionItem::Signal(SubscriptionSignal::Fatal(err))) => {
                warn!(projection = name, error = %err, "subscription failed; restarting");
                return DriveOutcome::Retry;
            }
            None => return DriveOutcome::Done,
        }
    }
}

/// Wraps `projection` so that, alongside being invoked per-event, `flush`
/// runs on its own every `interval`.
///
/// A single background task multiplexes incoming events and the flush
/// timer, so `projection` and `flush` never run concurrently and ordering
/// between an event and a flush is whichever trigger fires first. `flush`
/// has no caller of its own to report errors to; an error from it is
/// captured and returned from the *next* call to the wrapped projection
/// instead, rather than dropped or logged out-of-band.
pub fn flush_after<P, F, Fut>(projection: P, flush: F, interval: Duration) -> FlushAfter
where
    P: Projection,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProjectionError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run_flush_worker(projection, flush, interval, rx));
    FlushAfter { tx }
}

type FlushReply = oneshot::Sender<Result<(), ProjectionError>>;

/// The `Projection` returned by `flush_after`.
pub struct FlushAfter {
    tx: mpsc::Sender<(StoredEvent, FlushReply)>,
}

impl Projection for FlushAfter {
    fn call(&self, event: StoredEvent) -> BoxFuture<'static, Result<(), ProjectionError>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send((event, reply_tx))
                .await
                .map_err(|_| ProjectionError::new(FlushWorkerStopped))?;
            reply_rx.await.map_err(|_| ProjectionError::new(FlushWorkerStopped))?
        })
    }
}

async fn run_flush_worker<P, F, Fut>(
    projection: P,
    flush: F,
    interval: Duration,
    mut rx: mpsc::Receiver<(StoredEvent, FlushReply)>,
) where
    P: Projection,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProjectionError>> + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately; skip it

    let mut pending_error: Option<ProjectionError> = None;
    loop {
        tokio::select! {
            item = rx.recv() => {
                let Some((event, reply)) = item else { return };
                let result = match pending_error.take() {
                    Some(err) => Err(err),
                    None => projection.call(event).await,
                };
                let _ = reply.send(result);
            }
            _ = ticker.tick() => {
                if let Err(err) = flush().await {
                    warn!(error = %err, "flush failed; surfacing on the next projected event");
                    pending_error = Some(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chronicle_serde::json::JsonEncoderBuilder;
    use serde::{Deserialize, Serialize};

    use crate::encoder::Named;
    use crate::event::NewEvent;
    use crate::testing::InMemoryEventLog;

    #[derive(Serialize, Deserialize, Clone)]
    struct SomeEvent {
        user_id: String,
    }
    impl Named for SomeEvent {
        const NAME: &'static str = "SomeEvent";
    }

    fn log() -> InMemoryEventLog<chronicle_serde::json::JsonEncoder> {
        let encoder = JsonEncoderBuilder::new().register::<SomeEvent>().build();
        InMemoryEventLog::new(encoder)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_and_eventually_succeeds() {
        let log = log();
        let encoder = JsonEncoderBuilder::new().register::<SomeEvent>().build();
        let (type_name, data) = crate::encoder::Encoder::encode(
            &encoder,
            &SomeEvent {
                user_id: "user-1".into(),
            },
        )
        .unwrap();
        log.append_stream("u1", 0, vec![NewEvent::new(type_name, data)])
            .await
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let attempts2 = attempts.clone();
        let seen2 = seen.clone();

        let projector = Projector::new(log).register("flaky", move |event: StoredEvent| {
            let attempts = attempts2.clone();
            let seen = seen2.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    return Err(ProjectionError::new(std::io::Error::other("transient")));
                }
                seen.lock().unwrap().push(event.stream_id);
                Ok(())
            }
        });

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel2.cancel();
        });
        projector.run(cancel).await;

        assert_eq!(seen.lock().unwrap().as_slice(), ["u1"]);
        assert!(attempts.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_supervisor() {
        let log = log();
        let projector = Projector::new(log).register("noop", |_event: StoredEvent| async { Ok(()) });

        let cancel = CancellationToken::new();
        cancel.cancel();
        projector.run(cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_after_interleaves_events_and_flushes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(AtomicUsize::new(0));

        let seen2 = seen.clone();
        let projection = move |event: StoredEvent| {
            let seen = seen2.clone();
            async move {
                seen.lock().unwrap().push(event.stream_id);
                Ok(())
            }
        };

        let flushes2 = flushes.clone();
        let flush = move || {
            let flushes = flushes2.clone();
            async move {
                flushes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let decorated = flush_after(projection, flush, Duration::from_millis(200));

        for i in 0..3 {
            let event = test_event(i, "a");
            decorated.call(event).await.unwrap();
            tokio::time::sleep(Duration::from_millis(170)).await;
        }

        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(flushes.load(Ordering::SeqCst) >= 2, "flush should have fired at least twice over 510ms at a 200ms interval");
    }

    fn test_event(sequence: u64, stream_id: &str) -> StoredEvent {
        StoredEvent {
            id: crate::id::EventId::new(),
            sequence,
            stream_id: stream_id.into(),
            stream_version: sequence,
            type_name: "SomeEvent".into(),
            payload: Box::new(SomeEvent {
                user_id: stream_id.into(),
            }),
            meta: None,
            causation_id: None,
            correlation_id: None,
            occurred_on: chrono::Utc::now(),
        }
    }
}
