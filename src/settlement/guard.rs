// In-flight execution guard
//
// At most one settlement per pool may run at a time. The per-plan timer and
// the sweep can both decide the same plan is due, so every execution path
// must hold a permit for the pool first. The permit is released on drop,
// whether the execution succeeded, failed or panicked.
//
// Plan writes are serialized separately by `PlanLocks`: every
// read-modify-write of a stored plan (recording an execution, stop, resume,
// amount change) holds the pool's write lock, so no writer saves a copy that
// misses another writer's change.
//
// Process-local only. A multi-instance deployment needs a persisted lease.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` if an execution for `pool_id` is already running
    pub fn try_acquire(&self, pool_id: &str) -> Option<InFlightPermit> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(pool_id.to_string()) {
            return None;
        }
        Some(InFlightPermit {
            pool_id: pool_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, pool_id: &str) -> bool {
        self.in_flight.lock().contains(pool_id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

#[derive(Debug)]
pub struct InFlightPermit {
    pool_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl InFlightPermit {
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.pool_id);
    }
}

/// Per-pool async write locks around load, transition and save
#[derive(Debug, Clone, Default)]
pub struct PlanLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PlanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to the plan bound to `pool_id`
    pub async fn lock(&self, pool_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(pool_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on
    pub fn prune(&self) {
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
