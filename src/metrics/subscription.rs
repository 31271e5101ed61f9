//! Bounded, filtered event subscriptions.

use super::event::{MetricEvent, MetricFilter};
use crate::utils::sync;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};

pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 100;

/// Hub-side half of a subscription.
#[derive(Debug)]
pub(crate) struct Subscriber {
    sender: mpsc::Sender<MetricEvent>,
    filter: Option<MetricFilter>,
    overflow: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

pub(crate) type SubscriberMap = RwLock<HashMap<u64, Arc<Subscriber>>>;

pub(crate) fn new_subscription(
    id: u64,
    buffer: usize,
    filter: Option<MetricFilter>,
    registry: &Arc<SubscriberMap>,
) -> Subscription {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let overflow = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    sync::write(registry).insert(
        id,
        Arc::new(Subscriber {
            sender,
            filter,
            overflow: Arc::clone(&overflow),
            closed: Arc::clone(&closed),
        }),
    );
    Subscription {
        id,
        receiver,
        overflow,
        registry: Arc::downgrade(registry),
        closed,
    }
}

/// Detaches every subscriber and marks its subscription closed. Returns how many there were.
pub(crate) fn close_all(registry: &SubscriberMap) -> usize {
    let drained: Vec<Arc<Subscriber>> = sync::write(registry).drain().map(|(_, s)| s).collect();
    for sub in &drained {
        sub.closed.store(true, Ordering::Release);
    }
    drained.len()
}

/// Offers `event` to every matching subscriber without waiting. Full buffers drop the event
/// and bump that subscriber's overflow counter.
pub(crate) fn publish(registry: &SubscriberMap, event: &MetricEvent) {
    let subscribers: Vec<Arc<Subscriber>> = sync::read(registry).values().cloned().collect();
    for sub in subscribers {
        if let Some(filter) = &sub.filter {
            if !filter.matches(event) {
                continue;
            }
        }
        match sub.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                sub.overflow.fetch_add(1, Ordering::Relaxed);
            }
            // Receiver already gone; its Drop removes the handle.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Consumer half of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<MetricEvent>,
    overflow: Arc<AtomicU64>,
    registry: Weak<SubscriberMap>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the subscription (or the hub) is closed and the buffer
    /// is drained.
    pub async fn recv(&mut self) -> Option<MetricEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MetricEvent> {
        self.receiver.try_recv().ok()
    }

    /// Events dropped because the buffer was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// True after [`unsubscribe`](Self::unsubscribe) or once the hub is closed. Events
    /// already buffered can still be received.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detaches from the hub and closes the channel. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(registry) = self.registry.upgrade() {
                sync::write(&registry).remove(&self.id);
            }
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricEventType;

    fn registry() -> Arc<SubscriberMap> {
        Arc::new(RwLock::new(HashMap::new()))
    }

    #[test]
    fn test_full_buffer_counts_overflow() {
        let reg = registry();
        let mut sub = new_subscription(1, 2, None, &reg);
        for _ in 0..5 {
            publish(&reg, &MetricEvent::request("p"));
        }
        assert_eq!(sub.overflow_count(), 3);
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_zero_buffer_is_clamped() {
        let reg = registry();
        let mut sub = new_subscription(1, 0, None, &reg);
        publish(&reg, &MetricEvent::request("p"));
        assert!(sub.try_recv().is_some());
    }

    #[test]
    fn test_filter_applied_before_send() {
        let reg = registry();
        let filter = MetricFilter::new().with_event_types([MetricEventType::Error]);
        let mut sub = new_subscription(1, 8, Some(filter), &reg);
        publish(&reg, &MetricEvent::request("p"));
        publish(&reg, &MetricEvent::error("p", "x"));
        let got = sub.try_recv().unwrap();
        assert_eq!(got.event_type, MetricEventType::Error);
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.overflow_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_removes_handle() {
        let reg = registry();
        let mut sub = new_subscription(7, 4, None, &reg);
        assert_eq!(sync::read(&reg).len(), 1);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(sub.is_closed());
        assert!(sync::read(&reg).is_empty());
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.overflow_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let reg = registry();
        {
            let _sub = new_subscription(1, 4, None, &reg);
            assert_eq!(sync::read(&reg).len(), 1);
        }
        assert!(sync::read(&reg).is_empty());
    }
}
