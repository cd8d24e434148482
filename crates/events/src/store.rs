//! Generic state container with change detection.
//!
//! UI layers read the current value with [`ExternalStore::get_snapshot`] and
//! re-render from a [`ExternalStore::subscribe`] callback. Listeners only
//! fire when a write actually changes the value.

use std::sync::{PoisonError, RwLock};

use crate::evented::{Evented, Subscription};

pub struct ExternalStore<T> {
    state: RwLock<T>,
    changes: Evented<T>,
}

impl<T> ExternalStore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            state: RwLock::new(initial),
            changes: Evented::new(),
        }
    }

    pub fn get_snapshot(&self) -> T {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Listen for changes. The listener receives the new snapshot.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.changes.subscribe(listener)
    }

    /// Replace the value. Returns `true` (and notifies) only when it changed.
    pub fn set(&self, next: T) -> bool {
        self.update(|_| next)
    }

    /// Derive the next value from the current one.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let next = f(&state);
            if next == *state {
                return false;
            }
            *state = next;
            state.clone()
        };
        self.changes.emit(&snapshot);
        true
    }
}

impl<T> Default for ExternalStore<T>
where
    T: Clone + PartialEq + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn notifies_only_on_change() {
        let store = ExternalStore::new(vec![1, 2]);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _sub = store.subscribe(move |v: &Vec<i32>| {
            assert_eq!(v.len(), 3);
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.update(|v| {
            let mut next = v.clone();
            next.push(3);
            next
        }));
        assert!(!store.set(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn listener_may_read_snapshot_reentrantly() {
        let store = Arc::new(ExternalStore::<u32>::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let (s, inner) = (Arc::clone(&seen), Arc::clone(&store));
        let _sub = store.subscribe(move |_| {
            s.store(inner.get_snapshot() as usize, Ordering::SeqCst);
        });
        store.set(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
