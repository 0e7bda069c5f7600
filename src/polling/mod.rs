// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Continuous and single-shot update streams over an async fetch function.
//!
//! `poll` fetches immediately, then once per interval, restarting its timer when the
//! interval source changes value. `once` fetches exactly once. Neither retries: the
//! first error is yielded and ends the stream.

pub mod shared;

use crate::error::Result;
use crate::settings::Settings;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use shared::{Outcome, SharedPoller, Subscription};

const POLL_CHANNEL_CAPACITY: usize = 16;

/// Shortest period a poll will ever wait between fetches.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A cancellable background task. Dropping the handle cancels the task.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        PollHandle {
            task: tokio::spawn(fut),
        }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Something that supplies the current poll interval and signals when it may have
/// changed.
pub trait IntervalSource: Send + 'static {
    fn current(&self) -> Duration;

    /// Resolves once the source may hold a new value. `false` means the source is
    /// gone and will never change again.
    fn changed(&mut self) -> impl Future<Output = bool> + Send;
}

impl IntervalSource for Duration {
    fn current(&self) -> Duration {
        *self
    }

    async fn changed(&mut self) -> bool {
        false
    }
}

impl IntervalSource for watch::Receiver<Duration> {
    fn current(&self) -> Duration {
        *self.borrow()
    }

    async fn changed(&mut self) -> bool {
        watch::Receiver::changed(self).await.is_ok()
    }
}

impl IntervalSource for watch::Receiver<Settings> {
    fn current(&self) -> Duration {
        self.borrow().poll_interval
    }

    async fn changed(&mut self) -> bool {
        watch::Receiver::changed(self).await.is_ok()
    }
}

/// Results of a running poll, in completion order. Dropping the stream cancels the
/// poll.
pub struct PollStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    handle: PollHandle,
}

impl<T> PollStream<T> {
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T> Stream for PollStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub fn poll<T, S, F, Fut>(interval: S, fetch: F) -> PollStream<T>
where
    T: Send + 'static,
    S: IntervalSource,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(POLL_CHANNEL_CAPACITY);
    let handle = PollHandle::spawn(run_poll(interval, fetch, tx));
    PollStream { rx, handle }
}

pub fn once<T, F, Fut>(fetch: F) -> PollStream<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let handle = PollHandle::spawn(async move {
        let result = fetch().await;
        let _ = tx.send(result).await;
    });
    PollStream { rx, handle }
}

async fn run_poll<T, S, F, Fut>(mut interval: S, mut fetch: F, tx: mpsc::Sender<Result<T>>)
where
    T: Send + 'static,
    S: IntervalSource,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut period = interval.current().max(MIN_POLL_INTERVAL);
    let mut tick: u64 = 0;
    let mut source_open = true;
    let mut in_flight = FuturesUnordered::new();

    tracing::debug!(interval_ms = period.as_millis() as u64, "Poll started");
    in_flight.push(fetch());

    let sleep = tokio::time::sleep(period);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => {
                tick += 1;
                tracing::trace!(tick, "Poll tick");
                in_flight.push(fetch());
                sleep.as_mut().reset(tokio::time::Instant::now() + period);
            }
            changed = interval.changed(), if source_open => {
                if !changed {
                    source_open = false;
                    continue;
                }
                let next = interval.current().max(MIN_POLL_INTERVAL);
                if next != period {
                    tracing::debug!(
                        from_ms = period.as_millis() as u64,
                        to_ms = next.as_millis() as u64,
                        "Poll interval changed, restarting timer"
                    );
                    period = next;
                    sleep.as_mut().reset(tokio::time::Instant::now() + period);
                }
            }
            Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                let failed = result.is_err();
                if tx.send(result).await.is_err() {
                    break;
                }
                if failed {
                    tracing::debug!(tick, "Poll stopped after failed fetch");
                    break;
                }
            }
            _ = tx.closed() => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn counting_fetch(
        counter: Arc<AtomicUsize>,
    ) -> impl FnMut() -> futures::future::Ready<Result<usize>> + Send + 'static {
        move || futures::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_fetches_immediately_then_every_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let mut stream = poll(Duration::from_secs(10), counting_fetch(counter.clone()));

        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_restarts_timer_without_extra_fetch() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (interval_tx, interval_rx) = watch::channel(Duration::from_secs(10));
        let start = Instant::now();
        let mut stream = poll(interval_rx, counting_fetch(counter.clone()));

        assert_eq!(stream.next().await.unwrap().unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        interval_tx.send(Duration::from_secs(2)).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_floored() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (interval_tx, interval_rx) = watch::channel(Duration::from_secs(10));
        let mut stream = poll(interval_rx, counting_fetch(counter.clone()));

        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        interval_tx.send(Duration::ZERO).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let fetches = counter.load(Ordering::SeqCst);
        assert!((2..=4).contains(&fetches), "fetches: {fetches}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_interval_value_keeps_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (interval_tx, interval_rx) = watch::channel(Duration::from_secs(10));
        let start = Instant::now();
        let mut stream = poll(interval_rx, counting_fetch(counter.clone()));

        stream.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        interval_tx.send(Duration::from_secs(10)).unwrap();

        stream.next().await.unwrap().unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_once_fetches_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut stream = once(move || async move { Ok(c.fetch_add(1, Ordering::SeqCst)) });

        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        assert!(stream.next().await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_poll() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut stream = poll(Duration::from_secs(1), move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Ok(n),
                    _ => Err(TrackerError::Status {
                        status: 503,
                        url: "http://relay/graphql".to_string(),
                    }),
                }
            }
        });

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_cancels_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut stream = poll(Duration::from_secs(1), counting_fetch(counter.clone()));
        stream.next().await.unwrap().unwrap();
        drop(stream);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
