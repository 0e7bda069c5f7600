// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Per-key sharing of poll streams.
//!
//! The first subscriber for a key starts the poll. Every later subscriber attaches
//! to the same execution and immediately receives the latest resolved outcome, so
//! observers of one trip never trigger duplicate requests. The poll is cancelled
//! when the last subscription for the key is dropped.

use super::{PollHandle, PollStream};
use crate::error::TrackerError;
use ahash::AHashMap;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// What every observer of a key receives: the value, or the error that ended the
/// poll.
pub type Outcome<T> = Result<Arc<T>, Arc<TrackerError>>;

struct SharedEntry<T> {
    latest: watch::Receiver<Option<Outcome<T>>>,
    observers: usize,
    _forwarder: PollHandle,
}

type EntryMap<K, T> = Mutex<AHashMap<K, SharedEntry<T>>>;

pub struct SharedPoller<K, T> {
    entries: Arc<EntryMap<K, T>>,
}

impl<K, T> Default for SharedPoller<K, T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(AHashMap::new())),
        }
    }
}

impl<K, T> Clone for SharedPoller<K, T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, T> SharedPoller<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches to the poll for `key`, calling `start` only when no poll for the
    /// key is running yet.
    pub fn subscribe<F>(&self, key: K, start: F) -> Subscription<K, T>
    where
        F: FnOnce() -> PollStream<T>,
    {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let latest = match entries.get_mut(&key) {
            Some(entry) => {
                entry.observers += 1;
                tracing::debug!(key = ?key, observers = entry.observers, "Joining shared poll");
                entry.latest.clone()
            }
            None => {
                let (tx, rx) = watch::channel::<Option<Outcome<T>>>(None);
                let mut stream = start();

                let forwarder = PollHandle::spawn(async move {
                    while let Some(result) = stream.next().await {
                        let outcome = result.map(Arc::new).map_err(Arc::new);
                        if tx.send(Some(outcome)).is_err() {
                            break;
                        }
                    }
                });

                tracing::debug!(key = ?key, "Starting shared poll");
                entries.insert(
                    key.clone(),
                    SharedEntry {
                        latest: rx.clone(),
                        observers: 1,
                        _forwarder: forwarder,
                    },
                );
                rx
            }
        };

        let inner = WatchStream::new(latest)
            .filter_map(|outcome| async move { outcome })
            .boxed();

        Subscription {
            key,
            entries: Arc::downgrade(&self.entries),
            inner,
        }
    }

    pub fn observer_count(&self, key: &K) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.get(key).map_or(0, |entry| entry.observers))
            .unwrap_or(0)
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.observer_count(key) > 0
    }

    /// Latest resolved outcome for `key`, if a poll is running and has resolved.
    pub fn latest(&self, key: &K) -> Option<Outcome<T>> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).and_then(|entry| entry.latest.borrow().clone())
    }
}

/// One observer of a shared poll. Yields every outcome for the key, starting with
/// the most recent one if the poll already resolved before subscribing.
pub struct Subscription<K, T>
where
    K: Eq + Hash,
{
    key: K,
    entries: Weak<EntryMap<K, T>>,
    inner: BoxStream<'static, Outcome<T>>,
}

impl<K: Eq + Hash, T> Subscription<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Unpin, T> Stream for Subscription<K, T> {
    type Item = Outcome<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<K: Eq + Hash, T> Drop for Subscription<K, T> {
    fn drop(&mut self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let remove = match entries.get_mut(&self.key) {
            Some(entry) => {
                entry.observers = entry.observers.saturating_sub(1);
                entry.observers == 0
            }
            None => false,
        };

        if remove {
            // dropping the entry aborts the forwarder, which drops the poll stream
            entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polling::{once, poll};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_cached_value_without_refetch() {
        let poller: SharedPoller<String, usize> = SharedPoller::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(AtomicUsize::new(0));

        let start = |fetches: Arc<AtomicUsize>, starts: Arc<AtomicUsize>| {
            move || {
                starts.fetch_add(1, Ordering::SeqCst);
                poll(Duration::from_secs(30), move || {
                    let n = fetches.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<usize, TrackerError>(n) }
                })
            }
        };

        let mut first = poller.subscribe(
            "HSL:1001".to_string(),
            start(fetches.clone(), starts.clone()),
        );
        assert_eq!(*first.next().await.unwrap().unwrap(), 0);

        let mut late = poller.subscribe(
            "HSL:1001".to_string(),
            start(fetches.clone(), starts.clone()),
        );
        assert_eq!(*late.next().await.unwrap().unwrap(), 0);

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(poller.observer_count(&"HSL:1001".to_string()), 2);

        // both observers see the next tick
        assert_eq!(*first.next().await.unwrap().unwrap(), 1);
        assert_eq!(*late.next().await.unwrap().unwrap(), 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_reach_every_observer() {
        let poller: SharedPoller<&'static str, usize> = SharedPoller::new();

        let mut a = poller.subscribe("trip", || {
            once(|| async {
                Err::<usize, TrackerError>(TrackerError::Status {
                    status: 503,
                    url: "http://relay/graphql".to_string(),
                })
            })
        });
        let mut b = poller.subscribe("trip", || unreachable!("already running"));

        assert!(a.next().await.unwrap().is_err());
        assert!(b.next().await.unwrap().is_err());
        assert!(a.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_drop_cancels_poll() {
        let poller: SharedPoller<u32, usize> = SharedPoller::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let f = fetches.clone();

        let mut sub = poller.subscribe(7, move || {
            poll(Duration::from_secs(1), move || {
                let n = f.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<usize, TrackerError>(n) }
            })
        });
        sub.next().await.unwrap().unwrap();
        drop(sub);

        assert!(!poller.is_active(&7));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_poll_independently() {
        let poller: SharedPoller<&'static str, &'static str> = SharedPoller::new();
        let mut a = poller.subscribe("a", || once(|| async { Ok("A") }));
        let mut b = poller.subscribe("b", || once(|| async { Ok("B") }));

        assert_eq!(*a.next().await.unwrap().unwrap(), "A");
        assert_eq!(*b.next().await.unwrap().unwrap(), "B");
        assert_eq!(poller.latest(&"a").unwrap().unwrap().as_ref(), &"A");
    }
}
