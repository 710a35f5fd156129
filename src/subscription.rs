use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::encoder::DecodeError;
use crate::event::StoredEvent;
use crate::event_log::SubscribeOptions;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The page-fetching half of a subscription poller.
///
/// `EventLog` implementations provide this; the poll loop itself —
/// backpressure, the `EndOfStream` marker, cancellation — lives in this
/// crate and is shared by every backend.
pub trait PagedReader: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns up to `batch_size` events with `sequence > after_sequence`,
    /// ordered ascending by `sequence`.
    fn fetch_page<'a>(
        &'a self,
        after_sequence: u64,
        batch_size: usize,
    ) -> BoxFuture<'a, Result<Vec<StoredEvent>, Self::Error>>;
}

#[derive(Debug, Error)]
pub enum SubscriptionFatalError<E> {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(E),
}

/// Recoverable markers and fatal errors carried on a subscription's error
/// channel, alongside the event channel.
#[derive(Debug)]
pub enum SubscriptionSignal<E> {
    /// The poller drained every currently-available row; the subscriber
    /// is caught up with the store.
    EndOfStream,
    /// `Subscription::close` was called.
    ClosedByClient,
    /// The cancellation token passed to `subscribe_all` fired.
    Cancelled,
    /// The poller hit an unrecoverable error and has stopped.
    Fatal(SubscriptionFatalError<E>),
}

/// One item observed on a subscription: either a new event, or a signal
/// on its companion error channel.
#[derive(Debug)]
pub enum SubscriptionItem<E> {
    Event(StoredEvent),
    Signal(SubscriptionSignal<E>),
}

/// A long-lived, cancellable catch-up subscription over the global event
/// stream.
///
/// Not `Clone`, and reading from two tasks concurrently is not
/// meaningful — exactly one consumer should drive `recv` to completion.
pub struct Subscription<E> {
    events_rx: mpsc::Receiver<StoredEvent>,
    signal_rx: mpsc::Receiver<SubscriptionSignal<E>>,
    close_token: CancellationToken,
    task: JoinHandle<()>,
}

impl<E: Send + 'static> Subscription<E> {
    /// Requests cancellation. The poller observes this on its next tick
    /// and terminates within `poll_interval`.
    pub fn close(&self) {
        self.close_token.cancel();
    }

    /// Waits for the next event or signal. Returns `None` once the
    /// poller has shut down and both channels are drained.
    ///
    /// Always drains `events_rx` before considering `signal_rx`: the
    /// poller only ever sends a signal (`EndOfStream`, `Fatal`, ...) after
    /// every event it precedes has already been queued, so a buffered
    /// event must never lose a race against a later signal.
    pub async fn recv(&mut self) -> Option<SubscriptionItem<E>> {
        tokio::select! {
            biased;
            event = self.events_rx.recv() => {
                match event {
                    Some(event) => Some(SubscriptionItem::Event(event)),
                    None => self.signal_rx.recv().await.map(SubscriptionItem::Signal),
                }
            }
            signal = self.signal_rx.recv() => signal.map(SubscriptionItem::Signal),
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.close_token.cancel();
        self.task.abort();
    }
}

/// Drives the shared poll loop over `reader`, wiring it into a fresh
/// `Subscription`. `external` lets a caller-supplied cancellation context
/// terminate the poller independently of `Subscription::close`.
pub fn spawn_subscription<R>(
    reader: Arc<R>,
    options: SubscribeOptions,
    external: CancellationToken,
) -> Subscription<R::Error>
where
    R: PagedReader,
{
    assert!(options.batch_size >= 1, "batch_size must be at least 1");

    let (events_tx, events_rx) = mpsc::channel(options.batch_size);
    let (signal_tx, signal_rx) = mpsc::channel(8);
    let close_token = CancellationToken::new();
    let poller_token = close_token.clone();

    let task = tokio::spawn(async move {
        let mut offset = options.offset;
        loop {
            if poller_token.is_cancelled() {
                let _ = signal_tx.send(SubscriptionSignal::ClosedByClient).await;
                return;
            }
            if external.is_cancelled() {
                let _ = signal_tx.send(SubscriptionSignal::Cancelled).await;
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(options.poll_interval) => {}
                _ = poller_token.cancelled() => {
                    let _ = signal_tx.send(SubscriptionSignal::ClosedByClient).await;
                    return;
                }
                _ = external.cancelled() => {
                    let _ = signal_tx.send(SubscriptionSignal::Cancelled).await;
                    return;
                }
            }

            let page = match reader.fetch_page(offset, options.batch_size).await {
                Ok(page) => page,
                Err(err) => {
                    let _ = signal_tx
                        .send(SubscriptionSignal::Fatal(SubscriptionFatalError::Transport(err)))
                        .await;
                    return;
                }
            };

            if page.is_empty() {
                let _ = signal_tx.send(SubscriptionSignal::EndOfStream).await;
                continue;
            }

            for event in page {
                offset = event.sequence;
                if events_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    });

    Subscription {
        events_rx,
        signal_rx,
        close_token,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use crate::id::EventId;

    struct FixedPages {
        pages: Mutex<Vec<Vec<StoredEvent>>>,
        calls: AtomicU64,
    }

    fn event(sequence: u64) -> StoredEvent {
        StoredEvent {
            id: EventId::new(),
            sequence,
            stream_id: "s".into(),
            stream_version: sequence,
            type_name: "Noop".into(),
            payload: Box::new(()),
            meta: None,
            causation_id: None,
            correlation_id: None,
            occurred_on: chrono::Utc::now(),
        }
    }

    impl PagedReader for FixedPages {
        type Error = std::convert::Infallible;

        fn fetch_page<'a>(
            &'a self,
            _after_sequence: u64,
            _batch_size: usize,
        ) -> BoxFuture<'a, Result<Vec<StoredEvent>, Self::Error>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            let page = if pages.is_empty() {
                Vec::new()
            } else {
                pages.remove(0)
            };
            Box::pin(async move { Ok(page) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_events_then_end_of_stream() {
        let reader = Arc::new(FixedPages {
            pages: Mutex::new(vec![vec![event(1), event(2)]]),
            calls: AtomicU64::new(0),
        });
        let options = SubscribeOptions::default().poll_interval(Duration::from_millis(1));
        let mut sub = spawn_subscription(reader, options, CancellationToken::new());

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, SubscriptionItem::Event(e) if e.sequence == 1));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second, SubscriptionItem::Event(e) if e.sequence == 2));

        let third = sub.recv().await.unwrap();
        assert!(matches!(
            third,
            SubscriptionItem::Signal(SubscriptionSignal::EndOfStream)
        ));
    }

    struct PageThenFail {
        pages: Mutex<Vec<Vec<StoredEvent>>>,
    }

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    impl PagedReader for PageThenFail {
        type Error = Boom;

        fn fetch_page<'a>(
            &'a self,
            _after_sequence: u64,
            _batch_size: usize,
        ) -> BoxFuture<'a, Result<Vec<StoredEvent>, Self::Error>> {
            let mut pages = self.pages.lock().unwrap();
            let result = if pages.is_empty() { Err(Boom) } else { Ok(pages.remove(0)) };
            Box::pin(async move { result })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_events_drain_before_a_later_fatal_signal() {
        let reader = Arc::new(PageThenFail {
            pages: Mutex::new(vec![vec![event(1), event(2)]]),
        });
        let options = SubscribeOptions::default().poll_interval(Duration::from_millis(1));
        let mut sub = spawn_subscription(reader, options, CancellationToken::new());

        // Let the poller run to completion — both events and the fatal
        // signal land in their channels — before `recv` is ever called,
        // so a non-biased select would be free to hand back the fatal
        // signal first.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, SubscriptionItem::Event(e) if e.sequence == 1));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second, SubscriptionItem::Event(e) if e.sequence == 2));

        let third = sub.recv().await.unwrap();
        assert!(matches!(
            third,
            SubscriptionItem::Signal(SubscriptionSignal::Fatal(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_terminates_poller() {
        let reader = Arc::new(FixedPages {
            pages: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        });
        let options = SubscribeOptions::default().poll_interval(Duration::from_millis(1));
        let mut sub = spawn_subscription(reader, options, CancellationToken::new());
        sub.close();

        let item = sub.recv().await.unwrap();
        assert!(matches!(
            item,
            SubscriptionItem::Signal(SubscriptionSignal::ClosedByClient)
        ));
    }
}
