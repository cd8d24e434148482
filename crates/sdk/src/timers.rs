//! Wait-timer registry.
//!
//! One [`WaitTimerManager`] exists per SDK instance and holds only the
//! timers the gateway starts with `StartConditionWaitTimer`, so a timer id
//! can only ever be pending once. Fired ids are delivered on the channel
//! returned by [`WaitTimerManager::new`].
//!
//! Wait leaves in conditions the SDK evaluates locally are never scheduled
//! here. The gateway owns every wait: it starts the timer, and once the fire
//! report comes back it resolves the leaf from its own fired set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    timers: HashMap<String, PendingTimer>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WaitTimerManager {
    registry: Arc<Mutex<Registry>>,
    fired: mpsc::UnboundedSender<String>,
}

impl WaitTimerManager {
    /// Returns the manager and the receiver of fired timer ids.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let manager = Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            fired,
        };
        (manager, rx)
    }

    /// Schedule `timer_id` to fire after `delay`. A timer already pending
    /// under the same id is cancelled and replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, timer_id: &str, delay: Duration) {
        let mut registry = lock(&self.registry);
        let generation = registry.next_generation;
        registry.next_generation += 1;

        if let Some(previous) = registry.timers.remove(timer_id) {
            previous.handle.abort();
        }

        let id = timer_id.to_string();
        let shared = Arc::clone(&self.registry);
        let fired = self.fired.clone();
        // The task needs the registry lock to fire, and we hold it until the
        // entry is inserted, so even a zero delay cannot fire early.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut registry = lock(&shared);
                match registry.timers.get(&id) {
                    Some(t) if t.generation == generation => {
                        registry.timers.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                tracing::debug!(timer_id = %id, "Wait timer fired");
                let _ = fired.send(id);
            }
        });

        registry
            .timers
            .insert(timer_id.to_string(), PendingTimer { generation, handle });
    }

    /// Cancel a pending timer. Unknown ids are ignored. Returns `true` when
    /// a timer was cancelled.
    pub fn cancel(&self, timer_id: &str) -> bool {
        match lock(&self.registry).timers.remove(timer_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut registry = lock(&self.registry);
        for (_, timer) in registry.timers.drain() {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, timer_id: &str) -> bool {
        lock(&self.registry).timers.contains_key(timer_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.registry).timers.len()
    }
}

impl Drop for WaitTimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
