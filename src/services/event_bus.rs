//! Event channels for component notifications.
//!
//! Provides a broadcast-based channel with sequence numbering and a strict
//! split between the capability to publish ([`Emitter`]) and the capability to
//! listen ([`Subscriber`]). Components keep their emitter private and hand out
//! subscribers only, so nobody outside the owner can force-fire an event.
//!
//! Delivery is buffered: publishing never runs subscriber code on the
//! publisher's stack. A subscriber observes an event only once it is polled
//! again, which on the single-threaded runtime the simulation uses is strictly
//! after the publishing call has returned to its caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default buffer size of a channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Monotonically increasing sequence number assigned per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The sequence number before any event.
    pub fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event envelope carrying channel metadata around a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<E> {
    /// Position of the event on its channel.
    pub sequence: SequenceNumber,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    pub payload: E,
}

/// Create a channel, returning its publishing and subscribing halves.
pub fn channel<E: Clone>(capacity: usize) -> (Emitter<E>, Subscriber<E>) {
    let (sender, _) = broadcast::channel(capacity.max(1));
    let emitter = Emitter {
        sender: sender.clone(),
        sequence: Arc::new(AtomicU64::new(0)),
    };
    (emitter, Subscriber { sender })
}

/// Publishing capability of a channel.
#[derive(Debug)]
pub struct Emitter<E> {
    sender: broadcast::Sender<Envelope<E>>,
    sequence: Arc<AtomicU64>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }
}

impl<E: Clone> Emitter<E> {
    /// Publish an event to every current subscription.
    ///
    /// Publishing with no subscribers is not an error; the event is dropped.
    pub fn emit(&self, payload: E) -> SequenceNumber {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let envelope = Envelope {
            sequence,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.sender.send(envelope);
        sequence
    }

    /// Sequence number the next event will receive.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Subscribing half for the same channel.
    pub fn subscriber(&self) -> Subscriber<E> {
        Subscriber {
            sender: self.sender.clone(),
        }
    }
}

/// Subscribing capability of a channel.
#[derive(Debug)]
pub struct Subscriber<E> {
    sender: broadcast::Sender<Envelope<E>>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Subscriber<E> {
    /// Persistent subscription receiving every event published from now on.
    pub fn subscribe(&self) -> Subscription<E> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Wait for the first event matching `filter`.
    ///
    /// The subscription is registered when this is called, not when the
    /// returned future is first polled, so an event published in between is
    /// not missed. Resolves to `None` if the channel closes first.
    pub fn once<F>(&self, filter: F) -> impl Future<Output = Option<Envelope<E>>> + Send + 'static
    where
        F: Fn(&E) -> bool + Send + 'static,
    {
        let mut subscription = self.subscribe();
        async move {
            loop {
                let envelope = subscription.recv().await?;
                if filter(&envelope.payload) {
                    return Some(envelope);
                }
            }
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live subscription. Dropping it (or calling [`unsubscribe`]) detaches it.
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[derive(Debug)]
pub struct Subscription<E> {
    receiver: broadcast::Receiver<Envelope<E>>,
}

impl<E: Clone> Subscription<E> {
    /// Receive the next event, or `None` once the channel is closed.
    ///
    /// A subscription that fell behind the channel buffer skips the events it
    /// missed and carries on with the oldest one still buffered.
    pub async fn recv(&mut self) -> Option<Envelope<E>> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "subscription lagged, skipping missed events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an already buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope<E>> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "subscription lagged, skipping missed events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Detach from the channel.
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
        Pong,
    }

    #[tokio::test]
    async fn test_sequence_assignment() {
        let (emitter, subscriber) = channel(16);
        assert_eq!(emitter.current_sequence().0, 0);

        let mut subscription = subscriber.subscribe();
        emitter.emit(TestEvent::Ping(1));
        emitter.emit(TestEvent::Pong);

        let first = subscription.recv().await.unwrap();
        assert_eq!(first.sequence.0, 0);
        assert_eq!(first.payload, TestEvent::Ping(1));

        let second = subscription.recv().await.unwrap();
        assert_eq!(second.sequence.0, 1);
        assert_eq!(emitter.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let (emitter, subscriber) = channel::<TestEvent>(4);
        assert_eq!(subscriber.subscriber_count(), 0);
        assert_eq!(emitter.emit(TestEvent::Pong).0, 0);
    }

    #[tokio::test]
    async fn test_once_filters_and_registers_eagerly() {
        let (emitter, subscriber) = channel(16);
        let waiting = subscriber.once(|event| matches!(event, TestEvent::Pong));

        // Published before the future is polled, still observed.
        emitter.emit(TestEvent::Ping(7));
        emitter.emit(TestEvent::Pong);

        let envelope = waiting.await.unwrap();
        assert_eq!(envelope.payload, TestEvent::Pong);
        assert_eq!(envelope.sequence.0, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches() {
        let (_emitter, subscriber) = channel::<TestEvent>(4);
        let subscription = subscriber.subscribe();
        assert_eq!(subscriber.subscriber_count(), 1);
        subscription.unsubscribe();
        assert_eq!(subscriber.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let (emitter, subscriber) = channel(4);
        let mut subscription = subscriber.subscribe();
        assert!(subscription.try_recv().is_none());
        emitter.emit(TestEvent::Ping(1));
        assert_eq!(subscription.try_recv().unwrap().payload, TestEvent::Ping(1));
    }

    #[tokio::test]
    async fn test_lagged_subscription_skips_ahead() {
        let (emitter, subscriber) = channel(2);
        let mut subscription = subscriber.subscribe();
        for n in 0..5 {
            emitter.emit(TestEvent::Ping(n));
        }
        let envelope = subscription.recv().await.unwrap();
        assert_eq!(envelope.payload, TestEvent::Ping(3));
    }

    #[tokio::test]
    async fn test_closed_channel_ends_subscription() {
        let (emitter, subscriber) = channel::<TestEvent>(4);
        let mut subscription = subscriber.subscribe();
        drop(emitter);
        drop(subscriber);
        assert!(subscription.recv().await.is_none());
    }
}
