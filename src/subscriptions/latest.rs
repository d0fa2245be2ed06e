//! Latest-value stream: a value holder that replays its current value to new
//! subscribers and pushes every later value to all of them in order.

use super::types::{Subscription, SubscriptionConfig, SubscriptionHandle, SubscriptionId};
use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{trace, warn};

/// A callback plus the newest version it has been handed. Versions only move
/// forward, so a listener never sees an older value after a newer one.
struct Listener<T> {
    seen: AtomicU64,
    callback: Box<dyn Fn(&T) + Send + Sync>,
}

impl<T> Listener<T> {
    fn new(seen: u64, callback: Box<dyn Fn(&T) + Send + Sync>) -> Self {
        Self {
            seen: AtomicU64::new(seen),
            callback,
        }
    }

    fn notify(&self, version: u64, value: &T) {
        if self.seen.fetch_max(version, Ordering::SeqCst) < version {
            (self.callback)(value);
        }
    }
}

enum Subscriber<T> {
    /// `since` is the version replayed at registration.
    Channel { sender: Sender<T>, since: u64 },
    Listener(Arc<Listener<T>>),
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        match self {
            Subscriber::Channel { sender, since } => Subscriber::Channel {
                sender: sender.clone(),
                since: *since,
            },
            Subscriber::Listener(listener) => Subscriber::Listener(Arc::clone(listener)),
        }
    }
}

struct Entry<T> {
    id: SubscriptionId,
    subscriber: Subscriber<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            subscriber: self.subscriber.clone(),
        }
    }
}

/// Work waiting for the delivering thread.
enum Pending<T> {
    Push(u64, T),
    Replay(Arc<Listener<T>>, u64, T),
}

/// Current value plus subscribers in registration order.
struct Shared<T> {
    value: T,
    /// Bumped on every push; the initial value is version 1.
    version: u64,
    subscribers: Vec<Entry<T>>,
    pending: VecDeque<Pending<T>>,
    /// The thread currently draining `pending`. Callbacks only ever run there.
    deliverer: Option<ThreadId>,
}

struct Inner<T> {
    shared: Mutex<Shared<T>>,
    next_id: AtomicU64,
    config: SubscriptionConfig,
}

/// Releases the stream if a callback panics mid-delivery.
struct DeliveryReset<'a, T>(&'a Inner<T>);

impl<T> Drop for DeliveryReset<'_, T> {
    fn drop(&mut self) {
        let mut shared = self.0.shared.lock();
        if shared.deliverer == Some(thread::current().id()) {
            shared.pending.clear();
            shared.deliverer = None;
        }
    }
}

/// A subscribable holder of a current value.
///
/// Cloning yields another handle to the same stream. Reads and subscriptions
/// are public; only the owning collection pushes new values.
///
/// Delivery is synchronous: by the time a push returns, every channel
/// subscriber has the value queued and every callback has run. Two cases
/// defer a push instead of blocking on it. A push made from inside a callback
/// of the same stream is delivered right after the value being delivered. A
/// push that races a callback replay on another thread is delivered by that
/// thread once the replay returns. Either way each subscriber sees values in
/// push order. No lock is held while callbacks run, so a callback may read,
/// subscribe to, or cause pushes on any stream, including this one.
pub struct LatestValue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for LatestValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LatestValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a stream holding `value`.
    pub fn new(value: T) -> Self {
        Self::with_config(value, SubscriptionConfig::default())
    }

    /// Create a stream whose channel subscribers default to `config`.
    pub fn with_config(value: T, config: SubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    value,
                    version: 1,
                    subscribers: Vec::new(),
                    pending: VecDeque::new(),
                    deliverer: None,
                }),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.shared.lock().value.clone()
    }

    /// Borrow the current value. `f` must not touch this stream.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.shared.lock().value)
    }

    /// Subscribe through a channel using the stream's default config.
    pub fn subscribe(&self) -> SubscriptionHandle<T> {
        let config = self.inner.config.clone();
        self.subscribe_with_config(&config)
    }

    /// Subscribe through a channel. The current value is queued first.
    pub fn subscribe_with_config(&self, config: &SubscriptionConfig) -> SubscriptionHandle<T> {
        let id = self.next_id();
        let (sender, receiver) = if config.buffer_size == 0 {
            unbounded()
        } else {
            bounded(config.buffer_size)
        };

        // Replay under the lock; queued pushes up to `since` are skipped.
        let mut shared = self.inner.shared.lock();
        let _ = sender.try_send(shared.value.clone());
        let since = shared.version;
        shared.subscribers.push(Entry {
            id,
            subscriber: Subscriber::Channel { sender, since },
        });

        SubscriptionHandle { id, receiver }
    }

    /// Subscribe with a callback, invoked now with the current value and then
    /// on every push until the returned guard is dropped.
    ///
    /// While another thread is delivering, the replay is handed to that thread
    /// so it cannot overtake a newer push.
    pub fn subscribe_with<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let me = thread::current().id();

        let mut shared = self.inner.shared.lock();
        let version = shared.version;
        let listener = Arc::new(Listener::new(version - 1, Box::new(f)));
        shared.subscribers.push(Entry {
            id,
            subscriber: Subscriber::Listener(Arc::clone(&listener)),
        });
        let current = shared.value.clone();
        let deliverer = shared.deliverer;

        match deliverer {
            Some(thread) if thread == me => {
                // Subscribed from a callback of this stream.
                drop(shared);
                listener.notify(version, &current);
            }
            Some(_) => {
                shared
                    .pending
                    .push_back(Pending::Replay(listener, version, current));
            }
            None => {
                shared.deliverer = Some(me);
                shared
                    .pending
                    .push_back(Pending::Replay(listener, version, current));
                drop(shared);
                self.drain();
            }
        }

        self.guard(id)
    }

    /// Like `subscribe_with`, without replaying the current value.
    pub(crate) fn on_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id();
        {
            let mut shared = self.inner.shared.lock();
            let listener = Listener::new(shared.version, Box::new(f));
            shared.subscribers.push(Entry {
                id,
                subscriber: Subscriber::Listener(Arc::new(listener)),
            });
        }
        self.guard(id)
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut shared = self.inner.shared.lock();
        let before = shared.subscribers.len();
        shared.subscribers.retain(|entry| entry.id != id);
        shared.subscribers.len() != before
    }

    /// Number of registered subscribers (channels and callbacks).
    pub fn subscriber_count(&self) -> usize {
        self.inner.shared.lock().subscribers.len()
    }

    /// Replace the value and deliver it to every subscriber.
    pub(crate) fn set(&self, value: T) {
        self.set_with(move || value);
    }

    /// Like `set`, computing the value under the stream lock so concurrent
    /// computations are pushed in the order they were made. `compute` must
    /// not touch this stream.
    pub(crate) fn set_with(&self, compute: impl FnOnce() -> T) {
        let mut shared = self.inner.shared.lock();
        let value = compute();
        shared.version += 1;
        let version = shared.version;
        shared.value = value.clone();
        shared.pending.push_back(Pending::Push(version, value));

        if shared.deliverer.is_some() {
            return;
        }
        shared.deliverer = Some(thread::current().id());
        drop(shared);
        self.drain();
    }

    /// Deliver queued work until the queue is empty, then give up the stream.
    fn drain(&self) {
        let _reset = DeliveryReset(&self.inner);
        loop {
            let (next, subscribers) = {
                let mut shared = self.inner.shared.lock();
                match shared.pending.pop_front() {
                    Some(next) => {
                        let subscribers = match next {
                            Pending::Push(..) => shared.subscribers.clone(),
                            Pending::Replay(..) => Vec::new(),
                        };
                        (next, subscribers)
                    }
                    None => {
                        shared.deliverer = None;
                        return;
                    }
                }
            };

            match next {
                Pending::Push(version, value) => self.deliver(version, &value, &subscribers),
                Pending::Replay(listener, version, value) => listener.notify(version, &value),
            }
        }
    }

    fn deliver(&self, version: u64, value: &T, subscribers: &[Entry<T>]) {
        trace!(subscribers = subscribers.len(), version, "pushing value");

        let mut to_remove = Vec::new();
        for entry in subscribers {
            match &entry.subscriber {
                Subscriber::Channel { sender, since } => {
                    if version <= *since {
                        continue;
                    }
                    match sender.try_send(value.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(subscription = entry.id.0, "dropping slow subscriber");
                            to_remove.push(entry.id);
                        }
                        Err(TrySendError::Disconnected(_)) => to_remove.push(entry.id),
                    }
                }
                Subscriber::Listener(listener) => listener.notify(version, value),
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            self.inner
                .shared
                .lock()
                .subscribers
                .retain(|entry| !to_remove.contains(&entry.id));
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn guard(&self, id: SubscriptionId) -> Subscription {
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.shared.lock().subscribers.retain(|entry| entry.id != id);
            }
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for LatestValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("LatestValue")
            .field("value", &shared.value)
            .field("subscribers", &shared.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_replays_current() {
        let stream = LatestValue::new(1);
        let handle = stream.subscribe();
        assert_eq!(handle.drain(), vec![1]);
    }

    #[test]
    fn test_push_order() {
        let stream = LatestValue::new(0);
        let handle = stream.subscribe();
        stream.set(1);
        stream.set(2);
        stream.set(3);
        assert_eq!(handle.drain(), vec![0, 1, 2, 3]);
        assert_eq!(stream.get(), 3);
    }

    #[test]
    fn test_late_subscriber_sees_latest_only() {
        let stream = LatestValue::new("a".to_string());
        stream.set("b".to_string());
        let handle = stream.subscribe();
        assert_eq!(handle.drain(), vec!["b".to_string()]);
    }

    #[test]
    fn test_callback_subscription() {
        let stream = LatestValue::new(10);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let sub = stream.subscribe_with(move |v: &i32| sink.lock().push(*v));
        stream.set(11);
        assert_eq!(*seen.lock(), vec![10, 11]);

        drop(sub);
        stream.set(12);
        assert_eq!(*seen.lock(), vec![10, 11]);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_on_change_skips_replay() {
        let stream = LatestValue::new(0);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let _sub = stream.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        stream.set(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_read_stream() {
        let stream = LatestValue::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reader = stream.clone();
        let sink = Arc::clone(&seen);
        let _sub = stream.subscribe_with(move |_| sink.lock().push(reader.get()));
        stream.set(5);
        assert_eq!(*seen.lock(), vec![0, 5]);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let stream = LatestValue::new(0);
        let handle = stream.subscribe_with_config(&SubscriptionConfig { buffer_size: 2 });

        for i in 1..10 {
            stream.set(i);
        }

        assert_eq!(stream.subscriber_count(), 0);
        // Buffered values are still readable, then the channel disconnects
        assert_eq!(handle.drain(), vec![0, 1]);
        assert!(handle.recv().is_err());
    }

    #[test]
    fn test_default_subscriber_keeps_everything() {
        let stream = LatestValue::new(0);
        let handle = stream.subscribe();
        for i in 1..=2000 {
            stream.set(i);
        }

        let values = handle.drain();
        assert_eq!(values.len(), 2001);
        assert_eq!(values.last(), Some(&stream.get()));
        assert_eq!(stream.subscriber_count(), 1);
    }

    #[test]
    fn test_push_from_callback_keeps_order() {
        let stream = LatestValue::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        // The first subscriber pushes again when it sees 1
        let writer = stream.clone();
        let _first = stream.subscribe_with(move |v: &i32| {
            if *v == 1 {
                writer.set(2);
            }
        });
        let sink = Arc::clone(&seen);
        let _second = stream.subscribe_with(move |v: &i32| sink.lock().push(*v));
        let handle = stream.subscribe();

        stream.set(1);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(handle.drain(), vec![0, 1, 2]);
        assert_eq!(stream.get(), 2);
    }

    #[test]
    fn test_subscribe_inside_callback_skips_stale_values() {
        let stream = LatestValue::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner_sub = Arc::new(Mutex::new(None));

        let writer = stream.clone();
        let sink = Arc::clone(&seen);
        let slot = Arc::clone(&inner_sub);
        let _outer = stream.subscribe_with(move |v: &i32| {
            if *v == 1 {
                writer.set(2);
                writer.set(3);
                let sink = Arc::clone(&sink);
                *slot.lock() = Some(writer.subscribe_with(move |v: &i32| sink.lock().push(*v)));
            }
        });

        stream.set(1);
        // Only the replayed latest value; the queued 2 and 3 are not repeated
        assert_eq!(*seen.lock(), vec![3]);

        stream.set(4);
        assert_eq!(*seen.lock(), vec![3, 4]);
    }

    #[test]
    fn test_replay_never_overtakes_concurrent_push() {
        let stream = LatestValue::new(0);
        let writer = stream.clone();
        let pusher = std::thread::spawn(move || {
            for i in 1..=2000 {
                writer.set(i);
            }
        });

        let mut sinks = Vec::new();
        let mut subs = Vec::new();
        for _ in 0..50 {
            let sink = Arc::new(Mutex::new(Vec::new()));
            let recorder = Arc::clone(&sink);
            subs.push(stream.subscribe_with(move |v: &i32| recorder.lock().push(*v)));
            sinks.push(sink);
        }
        pusher.join().unwrap();

        for sink in sinks {
            let values = sink.lock();
            assert!(values.windows(2).all(|w| w[0] < w[1]), "{:?}", *values);
            assert_eq!(values.last(), Some(&2000));
        }
        drop(subs);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let stream = LatestValue::new(0);
        let handle = stream.subscribe();
        assert_eq!(stream.subscriber_count(), 1);

        drop(handle);
        stream.set(1);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let stream = LatestValue::new(0);
        let handle = stream.subscribe();
        assert!(stream.unsubscribe(handle.id));
        assert!(!stream.unsubscribe(handle.id));

        stream.set(1);
        assert_eq!(handle.drain(), vec![0]);
    }
}
