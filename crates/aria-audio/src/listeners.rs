//! Listener registration and synchronous event fan-out.

use std::sync::Arc;

use aria_core::AudioEvent;
use parking_lot::RwLock;
use uuid::Uuid;

/// Receives playback events.
///
/// Dispatch is synchronous on whichever thread triggered the transition
/// (control thread or worker thread); listeners must return promptly.
pub trait AudioListener: Send + Sync {
    /// Called for every event on the handle the listener is registered on.
    fn on_event(&self, event: &AudioEvent);
}

impl<F> AudioListener for F
where
    F: Fn(&AudioEvent) + Send + Sync,
{
    fn on_event(&self, event: &AudioEvent) {
        self(event);
    }
}

struct Entry {
    id: Uuid,
    listener: Arc<dyn AudioListener>,
}

/// An ordered, copy-on-write collection of listeners.
///
/// Dispatch clones the current snapshot and iterates it without holding
/// any lock, so add/remove from another thread (or from a listener being
/// dispatched) can never corrupt an in-progress iteration. Removal
/// replaces the vector with a filtered copy, never mutates in place.
#[derive(Default)]
pub struct ListenerSet {
    inner: RwLock<Arc<Vec<Entry>>>,
}

impl ListenerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning a token usable with [`Self::remove`].
    pub fn add(&self, listener: Arc<dyn AudioListener>) -> Uuid {
        let id = Uuid::new_v4();
        let mut guard = self.inner.write();
        let mut next: Vec<Entry> = guard
            .iter()
            .map(|entry| Entry {
                id: entry.id,
                listener: Arc::clone(&entry.listener),
            })
            .collect();
        next.push(Entry { id, listener });
        *guard = Arc::new(next);
        id
    }

    /// Remove a previously registered listener. Unknown ids are ignored.
    pub fn remove(&self, id: Uuid) {
        let mut guard = self.inner.write();
        let next: Vec<Entry> = guard
            .iter()
            .filter(|entry| entry.id != id)
            .map(|entry| Entry {
                id: entry.id,
                listener: Arc::clone(&entry.listener),
            })
            .collect();
        *guard = Arc::new(next);
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener, in registration order, on the caller's thread.
    pub fn dispatch(&self, event: &AudioEvent) {
        let snapshot = Arc::clone(&self.inner.read());
        for entry in snapshot.iter() {
            entry.listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use aria_core::AudioEventKind;
    use parking_lot::Mutex;

    fn started() -> AudioEvent {
        AudioEvent::new(Uuid::nil(), AudioEventKind::Started)
    }

    #[test]
    fn test_add_dispatch_remove() {
        let set = ListenerSet::new();
        let hits = Arc::new(Mutex::new(0u32));

        let hits_clone = Arc::clone(&hits);
        let id = set.add(Arc::new(move |_: &AudioEvent| {
            *hits_clone.lock() += 1;
        }));
        assert_eq!(set.len(), 1);

        set.dispatch(&started());
        assert_eq!(*hits.lock(), 1);

        set.remove(id);
        assert!(set.is_empty());
        set.dispatch(&started());
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_remove_during_dispatch_does_not_corrupt_iteration() {
        let set = Arc::new(ListenerSet::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // First listener removes itself mid-dispatch; the second must
        // still run from the same snapshot.
        let id_cell = Arc::new(Mutex::new(None::<Uuid>));
        let set_clone = Arc::clone(&set);
        let id_cell_clone = Arc::clone(&id_cell);
        let order_a = Arc::clone(&order);
        let id = set.add(Arc::new(move |_: &AudioEvent| {
            order_a.lock().push("a");
            if let Some(id) = *id_cell_clone.lock() {
                set_clone.remove(id);
            }
        }));
        *id_cell.lock() = Some(id);

        let order_b = Arc::clone(&order);
        set.add(Arc::new(move |_: &AudioEvent| {
            order_b.lock().push("b");
        }));

        set.dispatch(&started());
        assert_eq!(*order.lock(), vec!["a", "b"]);
        assert_eq!(set.len(), 1);

        set.dispatch(&started());
        assert_eq!(*order.lock(), vec!["a", "b", "b"]);
    }

    #[test]
    fn test_dispatch_order_is_registration_order() {
        let set = ListenerSet::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for index in 0..4 {
            let order = Arc::clone(&order);
            set.add(Arc::new(move |_: &AudioEvent| {
                order.lock().push(index);
            }));
        }
        set.dispatch(&started());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }
}
