//! Multi-subscriber broadcast of events coming from "foreign" callbacks.

use std::pin::Pin;
use std::task;

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use async_lock::Mutex;
use futures_core::Stream;

/// Re-publishes values pushed from a native callback to any number of subscribers.
///
/// Publishing never blocks: a subscriber that falls more than `capacity` values behind
/// loses the oldest ones. With replay enabled, the latest published value is handed
/// to every new subscriber before anything else, even after the stream is closed.
pub struct EventStream<T: Send + Clone> {
    sender: Sender<T>,
    #[allow(unused)]
    sender_keeper: InactiveReceiver<T>,
    latest: Mutex<Latest<T>>,
    replay: bool,
}

struct Latest<T> {
    value: Option<T>,
    closed: bool,
}

/// A subscription to an [EventStream]; ends once the stream is closed and drained.
pub struct EventReceiver<T: Send + Clone> {
    replayed: Option<T>,
    receiver: Receiver<T>,
}

impl<T: Send + Clone> EventStream<T> {
    /// Creates a stream that only forwards values published after subscription.
    pub fn new(capacity: usize) -> Self {
        Self::with_replay(capacity, false)
    }

    /// Creates a stream that also replays its latest value to new subscribers.
    pub fn replaying(capacity: usize) -> Self {
        Self::with_replay(capacity, true)
    }

    fn with_replay(capacity: usize, replay: bool) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        Self {
            sender,
            sender_keeper: receiver.deactivate(),
            latest: Mutex::new(Latest {
                value: None,
                closed: false,
            }),
            replay,
        }
    }

    /// Creates a replaying stream holding `initial` as its latest value.
    pub fn with_initial(capacity: usize, initial: T) -> Self {
        let stream = Self::replaying(capacity);
        stream.latest.lock_blocking().value = Some(initial);
        stream
    }

    /// Publishes a value. Returns `false` if the stream is already closed.
    pub fn publish(&self, value: T) -> bool {
        let mut latest = self.latest.lock_blocking();
        if latest.closed {
            return false;
        }
        if self.replay {
            latest.value = Some(value.clone());
        }
        // `Inactive` just means nobody is listening right now.
        let _ = self.sender.try_broadcast(value);
        true
    }

    /// Subscribes to values published from now on (preceded by the replayed value).
    pub fn subscribe(&self) -> EventReceiver<T> {
        // holding the lock keeps `publish` from slipping in between the replayed
        // value and the new receiver
        let latest = self.latest.lock_blocking();
        EventReceiver {
            replayed: if self.replay {
                latest.value.clone()
            } else {
                None
            },
            receiver: self.sender.new_receiver(),
        }
    }

    /// The latest published value, if this stream replays.
    pub fn latest(&self) -> Option<T> {
        self.latest.lock_blocking().value.clone()
    }

    /// Closes the stream. Subscribers receive what was already published, then end.
    pub fn close(&self) {
        let mut latest = self.latest.lock_blocking();
        latest.closed = true;
        self.sender.close();
    }

    pub fn is_closed(&self) -> bool {
        self.latest.lock_blocking().closed
    }
}

impl<T: Send + Clone> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.sender.close();
    }
}

// the replayed value is never pinned
impl<T: Send + Clone> Unpin for EventReceiver<T> {}

impl<T: Send + Clone> Stream for EventReceiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<T>> {
        if let Some(value) = self.replayed.take() {
            return task::Poll::Ready(Some(value));
        }
        Pin::new(&mut self.receiver).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (low, high) = self.receiver.size_hint();
        let extra = usize::from(self.replayed.is_some());
        (low + extra, high.map(|h| h + extra))
    }
}
