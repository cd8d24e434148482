//! Typed listener registry.
//!
//! [`Evented<E>`] is parameterised by a closed event type (normally an enum
//! owned by the emitting component), so listeners match exhaustively on
//! payloads instead of string event names. Subscribing returns a
//! [`Subscription`] that removes the listener when dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    // A panicking listener never runs with the lock held, so the data is
    // still consistent after poisoning.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A set of listeners for events of type `E`.
pub struct Evented<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> Evented<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register `listener`. It stays registered until the returned
    /// [`Subscription`] is dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            dispose: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener registered at the time of the
    /// call, in registration order. Returns the number of listeners invoked.
    pub fn emit(&self, event: &E) -> usize {
        let listeners: Vec<Listener<E>> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

impl<E: 'static> Default for Evented<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer returned by [`Evented::subscribe`].
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    /// Keep the listener registered for the lifetime of the emitter.
    pub fn detach(mut self) {
        self.dispose = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    enum Signal {
        Found(u32),
        Timeout,
    }

    #[test]
    fn listeners_receive_typed_events() {
        let evented = Evented::<Signal>::new();
        let found = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));

        let (f, t) = (Arc::clone(&found), Arc::clone(&timeouts));
        let _sub = evented.subscribe(move |signal| match signal {
            Signal::Found(n) => {
                f.fetch_add(*n as usize, Ordering::SeqCst);
            }
            Signal::Timeout => {
                t.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(evented.emit(&Signal::Found(3)), 1);
        evented.emit(&Signal::Timeout);
        assert_eq!(found.load(Ordering::SeqCst), 3);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let evented = Evented::<Signal>::new();
        let sub = evented.subscribe(|_| {});
        let other = evented.subscribe(|_| {});
        assert_eq!(evented.listener_count(), 2);

        drop(sub);
        assert_eq!(evented.listener_count(), 1);

        other.unsubscribe();
        assert_eq!(evented.emit(&Signal::Timeout), 0);
    }

    #[test]
    fn detached_listener_outlives_handle() {
        let evented = Evented::<Signal>::new();
        evented.subscribe(|_| {}).detach();
        assert_eq!(evented.listener_count(), 1);
    }

    #[test]
    fn subscription_outliving_emitter_is_harmless() {
        let evented = Evented::<Signal>::new();
        let sub = evented.subscribe(|_| {});
        drop(evented);
        sub.unsubscribe();
    }
}
