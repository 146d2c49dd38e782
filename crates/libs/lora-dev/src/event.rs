//! Interface lifecycle fan-out.
//!
//! The registry publishes every lifecycle transition through one
//! notifier; subscribers (sockets) filter by hardware kind and bound
//! ifindex themselves, which keeps the notifier hardware-agnostic.
//! Delivery is synchronous and in subscription order, on the thread
//! performing the registry operation. Callbacks therefore must stay
//! short, must not block on hardware I/O, and must not subscribe or
//! unsubscribe from within the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::registry::HardwareKind;

/// What happened to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Added,
    Removed,
    LinkUp,
    LinkDown,
}

/// A lifecycle transition of one interface. Ephemeral; carries the
/// stable index rather than a reference, the interface may already be
/// on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub change: LinkChange,
    pub ifindex: u32,
    pub kind: HardwareKind,
}

/// Handle returned by [`LifecycleNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// Synchronous publish/subscribe for [`LifecycleEvent`]s.
///
/// `emit` delivers under the subscriber list's read lock;
/// `unsubscribe` takes the write lock and so blocks until every
/// in-flight delivery to the removed subscriber has returned. That is
/// the ordering socket teardown relies on: after `unsubscribe`
/// returns, no callback can touch the socket again.
#[derive(Default)]
pub struct LifecycleNotifier {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.write().expect("notifier lock poisoned");
        subscribers.push(Subscriber { id, callback: Box::new(callback) });
        SubscriptionId(id)
    }

    /// Removes a subscriber, waiting out any delivery currently running
    /// against it.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().expect("notifier lock poisoned");
        subscribers.retain(|subscriber| subscriber.id != id.0);
    }

    /// Delivers `event` to all subscribers, in subscription order.
    pub fn emit(&self, event: LifecycleEvent) {
        log::trace!("dev: lifecycle {:?} ifindex={}", event.change, event.ifindex);
        let subscribers = self.subscribers.read().expect("notifier lock poisoned");
        for subscriber in subscribers.iter() {
            (subscriber.callback)(&event);
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("notifier lock poisoned").len()
    }
}
