use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 64;

/// In-process publish/subscribe channel for change notifications.
///
/// Each subscriber owns its [`Subscription`]; dropping it unsubscribes.
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Delivers `event` to every live subscriber and returns how many received it.
    pub fn publish(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription<E> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct Subscription<E> {
    receiver: broadcast::Receiver<E>,
}

impl<E: Clone> Subscription<E> {
    /// Waits for the next event. Returns `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, skipping missed events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, skipping missed events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tally_core::{LedgerEvent, LedgerEventKind};
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::<LedgerEvent>::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let event = LedgerEvent::CostCenterChanged {
            id: Uuid::new_v4(),
            kind: LedgerEventKind::Updated,
        };
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(first.recv().await, Some(event.clone()));
        assert_eq!(second.recv().await, Some(event));
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let bus = EventBus::<u32>::new(4);
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(7), 0);
    }

    #[test]
    fn lagging_subscriber_skips_to_retained_events() {
        let bus = EventBus::<u32>::new(2);
        let mut subscription = bus.subscribe();
        for value in 0..5 {
            bus.publish(value);
        }

        assert_eq!(subscription.try_recv(), Some(3));
        assert_eq!(subscription.try_recv(), Some(4));
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn recv_ends_when_bus_is_dropped() {
        let bus = EventBus::<u32>::new(2);
        let mut subscription = bus.subscribe();
        drop(bus);
        assert_eq!(subscription.recv().await, None);
    }
}
