//! Component A: the bounded in-process event queue (spec §4.A).
//!
//! Models "at-least-once handoff between the ingestion API and the
//! processor" with a bounded `tokio::mpsc` channel: `enqueue` blocks when the
//! channel is full (backpressure onto the ingestion caller), `dequeue` blocks
//! until an item is available or cancellation fires. Durability beyond this
//! in-process buffer is explicitly the Event Store's job (spec §4.B) plus
//! whatever broker a deployment layers underneath; this type does not
//! persist anything itself.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{DomainError, Result};
use crate::event::Event;

/// FIFO handoff queue. Insertion order is preserved per producer; ordering
/// across producers is undefined (spec §5).
pub struct EventQueue {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<mpsc::Receiver<Event>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
        }
    }

    /// Appends `event`, blocking the caller while the queue is at capacity.
    pub async fn enqueue(&self, event: Event) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DomainError::StorageError("event queue is closed".into()))
    }

    /// Blocks until an event is available or `cancellation` fires, returning
    /// the oldest enqueued event (or `None` on cancellation/closed queue).
    pub async fn dequeue(&self, cancellation: &CancellationToken) -> Option<Event> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            event = receiver.recv() => event,
        }
    }

    /// Approximate size: number of items currently buffered. Exact for a
    /// single-consumer queue with no concurrent dequeue in flight.
    pub fn size(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample_event(id: &str) -> Event {
        Event::new(Some(id.into()), "USER_LOGIN", "u1", Utc::now(), HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn preserves_fifo_order_per_producer() {
        let queue = EventQueue::new(8);
        queue.enqueue(sample_event("e1")).await.unwrap();
        queue.enqueue(sample_event("e2")).await.unwrap();

        let token = CancellationToken::new();
        let first = queue.dequeue(&token).await.unwrap();
        let second = queue.dequeue(&token).await.unwrap();
        assert_eq!(first.event_id, "e1");
        assert_eq!(second.event_id, "e2");
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_cancellation() {
        let queue = EventQueue::new(8);
        let token = CancellationToken::new();
        token.cancel();
        assert!(queue.dequeue(&token).await.is_none());
    }

    #[tokio::test]
    async fn size_reflects_buffered_events() {
        let queue = EventQueue::new(4);
        assert!(queue.empty());
        queue.enqueue(sample_event("e1")).await.unwrap();
        assert_eq!(queue.size(), 1);
    }
}
