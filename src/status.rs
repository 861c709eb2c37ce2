use std::sync::{mpsc, Arc, Mutex};

/// A status change published by a polling session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub status: String,
}
impl StatusEvent {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

struct Registry {
    next_id: u64,
    observers: Vec<(SubscriptionId, Observer)>,
}

/// Registry of status observers.
///
/// Cloning yields another handle onto the same registry, so observers can be
/// (un)subscribed from any thread while a session publishes into it.
/// Delivery is synchronous: `publish` returns after every observer ran.
/// Observers may (un)subscribe from within their callback, such changes take
/// effect from the next `publish` on.
#[derive(Clone)]
pub struct StatusBus {
    registry: Arc<Mutex<Registry>>,
}
impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
impl StatusBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.observers.push((id, Arc::new(observer)));
        id
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let before = registry.observers.len();
        registry.observers.retain(|(sub, _)| *sub != id);
        registry.observers.len() != before
    }

    /// Subscribe an observer that forwards every event into a channel.
    /// Sends into a closed channel are ignored.
    pub fn channel(&self) -> (SubscriptionId, mpsc::Receiver<StatusEvent>) {
        let (sender, receiver) = mpsc::channel();
        let sender = Mutex::new(sender);
        let id = self.subscribe(move |event| {
            if let Ok(sender) = sender.lock() {
                let _ = sender.send(event.clone());
            }
        });
        (id, receiver)
    }

    pub fn publish(&self, event: StatusEvent) {
        let observers: Vec<Observer> = self
            .lock()
            .observers
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(&event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // a panicking observer must not take the whole bus down with it
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
