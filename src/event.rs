use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener<T>)>>,
}

/// A list of callbacks notified synchronously when an event fires.
///
/// Cloning an `Emitter` yields another handle on the same listener list.
pub struct Emitter<T> {
    listeners: Arc<Listeners<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Emitter<T> {
    /// Creates an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(0),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Calls every registered listener with `value`.
    ///
    /// The listener list is snapshotted before the calls, so listeners may
    /// subscribe or unsubscribe while being notified.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.listeners.entries.lock().unwrap().len()
    }

    /// Returns `true` if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Emitter<T> {
    /// Registers a listener. It stays registered until the returned
    /// [`Subscription`] is disposed or dropped.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entries
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));

        let weak = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners
                    .entries
                    .lock()
                    .unwrap()
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }
}

/// Handle on a registered cleanup action, run once on [`dispose`](Self::dispose)
/// or drop.
#[must_use = "dropping the subscription runs its cleanup immediately"]
pub struct Subscription {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps `cleanup` so it runs when the subscription ends.
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Ends the subscription now.
    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cleanup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fire_reaches_every_listener_until_disposed() {
        let emitter = Emitter::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = total.clone();
        let first = emitter.subscribe(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t = total.clone();
        let second = emitter.subscribe(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });

        emitter.fire(&2);
        assert_eq!(total.load(Ordering::SeqCst), 4);

        first.dispose();
        emitter.fire(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);

        drop(second);
        assert!(emitter.is_empty());
    }

    #[test]
    fn listener_can_subscribe_while_firing() {
        let emitter = Emitter::<()>::new();
        let inner = emitter.clone();
        let held = Arc::new(Mutex::new(Vec::new()));
        let h = held.clone();
        let _sub = emitter.subscribe(move |_| {
            h.lock().unwrap().push(inner.subscribe(|_| {}));
        });

        emitter.fire(&());
        assert_eq!(emitter.len(), 2);
    }
}
