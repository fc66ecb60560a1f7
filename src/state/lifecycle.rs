use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;
use tokio::task::AbortHandle;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a room as seen by the closure logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Owner present, or absent with no closure scheduled.
    Active,
    /// Owner disconnected; a deferred closure is armed.
    OwnerAbsentGrace,
    /// Room deleted (terminal).
    Closed,
}

struct OwnerTimer {
    generation: u64,
    handle: AbortHandle,
}

/// Deferred owner-absence closures, at most one per room.
#[derive(Default)]
pub struct OwnerTimers {
    timers: DashMap<Uuid, OwnerTimer>,
    generation: AtomicU64,
}

impl OwnerTimers {
    /// Create an empty timer table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `delay`, replacing (and aborting) any timer already
    /// armed for the room. `on_fire` receives the timer generation so it can
    /// [`finish`](Self::finish) exactly its own entry.
    pub fn schedule<F, Fut>(&self, room_id: Uuid, delay: Duration, on_fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // Holding the entry lock while spawning makes cancel-then-reschedule atomic.
        let entry = self.timers.entry(room_id);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation).await;
        });
        let timer = OwnerTimer {
            generation,
            handle: task.abort_handle(),
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
    }

    /// Abort the room's timer, returning whether one was armed.
    pub fn cancel(&self, room_id: Uuid) -> bool {
        match self.timers.remove(&room_id) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the entry of a timer that fired. Returns `false` when the timer
    /// was superseded or cancelled meanwhile, in which case it must not act.
    pub fn finish(&self, room_id: Uuid, generation: u64) -> bool {
        self.timers
            .remove_if(&room_id, |_, timer| timer.generation == generation)
            .is_some()
    }

    /// Whether a closure is armed for the room.
    pub fn is_armed(&self, room_id: Uuid) -> bool {
        self.timers.contains_key(&room_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn rescheduling_aborts_previous_timer() {
        let timers = Arc::new(OwnerTimers::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let room = Uuid::new_v4();

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            let table = Arc::clone(&timers);
            timers.schedule(room, Duration::from_millis(30), move |generation| async move {
                fired.fetch_add(1, Ordering::SeqCst);
                table.finish(room, generation);
            });
        }
        assert!(timers.is_armed(room));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(room));
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let timers = OwnerTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let room = Uuid::new_v4();
        let counter = Arc::clone(&fired);
        timers.schedule(room, Duration::from_millis(20), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timers.cancel(room));
        assert!(!timers.cancel(room));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
