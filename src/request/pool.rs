//! Fixed-size session slot pools.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// Concurrent command sessions per process.
pub const COMMAND_SESSIONS: usize = 4;

/// Concurrent password-reset sessions per process.
pub const PASSWORD_RESET_SESSIONS: usize = 2;

/// Concurrent configuration requests per device.
pub const CONFIG_SESSIONS: usize = 3;

/// A fixed number of reusable session slots.
///
/// Acquisition never blocks: an exhausted pool answers `None` straight away.
#[derive(Debug)]
pub struct SessionPool {
    name: &'static str,
    slots: Mutex<Vec<bool>>,
}

impl SessionPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            slots: Mutex::new(vec![false; capacity]),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        self.lock().iter().filter(|used| **used).count()
    }

    /// Reserve the first free slot.
    pub fn get_free_session(&self) -> Option<usize> {
        let mut slots = self.lock();
        let index = slots.iter().position(|used| !used)?;
        slots[index] = true;
        debug!("{} session {index} reserved", self.name);
        Some(index)
    }

    /// Free a slot. Releasing an already free slot is a no-op.
    pub fn release_session(&self, index: usize) {
        let mut slots = self.lock();
        match slots.get_mut(index) {
            Some(used) => {
                *used = false;
                debug!("{} session {index} released", self.name);
            }
            None => warn!("{} session {index} out of range", self.name),
        }
    }

    /// Mark every slot free.
    pub fn reset(&self) {
        self.lock().iter_mut().for_each(|used| *used = false);
    }

    /// Reserve a slot that is released when the lease is dropped.
    pub fn lease(self: &Arc<Self>) -> Option<SessionLease> {
        self.get_free_session().map(|index| SessionLease {
            pool: Arc::clone(self),
            index,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<bool>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved slot; dropping it frees the slot exactly once.
#[derive(Debug)]
pub struct SessionLease {
    pool: Arc<SessionPool>,
    index: usize,
}

impl SessionLease {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.pool.release_session(self.index);
    }
}
