//! Typed listener registry.
//!
//! A minimal observable used for process-wide notifications such as token
//! changes. Callbacks run outside the registry lock, so a listener may
//! unsubscribe itself (or any other listener) from inside its own callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct RegistryState<T> {
    next_id: u64,
    listeners: Vec<(u64, Callback<T>)>,
}

impl<T> RegistryState<T> {
    fn contains(&self, id: u64) -> bool {
        self.listeners.iter().any(|(listener_id, _)| *listener_id == id)
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }
}

fn lock<T>(state: &Mutex<RegistryState<T>>) -> MutexGuard<'_, RegistryState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of callbacks that receive a `&T` payload on every notification.
pub struct ListenerRegistry<T> {
    state: Arc<Mutex<RegistryState<T>>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Registers a listener and returns the handle that removes it.
    pub fn register<F>(&self, listener: F) -> ListenerHandle<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));

        ListenerHandle {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Delivers `payload` to every listener registered at call time.
    ///
    /// A listener removed while this notification is in progress is skipped if
    /// it has not been called yet. Returns the number of listeners invoked.
    pub fn notify(&self, payload: &T) -> usize {
        let snapshot: Vec<(u64, Callback<T>)> = lock(&self.state)
            .listeners
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            if !lock(&self.state).contains(id) {
                continue;
            }
            callback(payload);
            delivered += 1;
        }
        delivered
    }

    pub fn len(&self) -> usize {
        lock(&self.state).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every registered listener.
    pub fn clear(&self) {
        lock(&self.state).listeners.clear();
    }
}

/// Removes its listener when [`ListenerHandle::unsubscribe`] is called.
///
/// Dropping the handle does not unsubscribe; release is explicit.
pub struct ListenerHandle<T> {
    id: u64,
    state: Weak<Mutex<RegistryState<T>>>,
}

impl<T> ListenerHandle<T> {
    /// Removes the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.state.upgrade() {
            Some(state) => lock(&state).remove(self.id),
            None => false,
        }
    }
}

impl<T> std::fmt::Debug for ListenerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_reaches_all_listeners() {
        let registry: ListenerRegistry<String> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            registry.register(move |_payload: &String| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(registry.notify(&"token".to_string()), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handle = registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&1);
        assert!(handle.unsubscribe());
        registry.notify(&2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_listener_can_remove_itself_during_notify() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let slot: Arc<Mutex<Option<ListenerHandle<u32>>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let own_slot = Arc::clone(&slot);
        let counter = Arc::clone(&hits);
        let handle = registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = own_slot.lock().unwrap().take() {
                handle.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(handle);

        registry.notify(&1);
        registry.notify(&2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_listener_removed_mid_notify_is_skipped() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let later: Arc<Mutex<Option<ListenerHandle<u32>>>> = Arc::new(Mutex::new(None));
        let later_hits = Arc::new(AtomicUsize::new(0));

        let remover_slot = Arc::clone(&later);
        registry.register(move |_| {
            if let Some(handle) = remover_slot.lock().unwrap().take() {
                handle.unsubscribe();
            }
        });

        let counter = Arc::clone(&later_hits);
        let handle = registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *later.lock().unwrap() = Some(handle);

        assert_eq!(registry.notify(&7), 1);
        assert_eq!(later_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handle_outliving_registry() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let handle = registry.register(|_| {});
        drop(registry);
        assert!(!handle.unsubscribe());
    }
}
