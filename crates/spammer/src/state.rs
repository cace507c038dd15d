//! Per-participant state shared by a generator and its submission worker.

use crate::allocator::SpendChainAllocator;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use stressnet_types::{Salt, SpendUnit};

/// Mutable state owned by one participant.
///
/// One instance exists per participant and is handed to that participant's
/// generator loop and worker by `Arc`. Participants never share one.
#[derive(Debug)]
pub struct ParticipantState {
    id: u32,
    active: AtomicBool,
    stopped: AtomicBool,
    allocator: Mutex<SpendChainAllocator>,
}

impl ParticipantState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            allocator: Mutex::new(SpendChainAllocator::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Mark the participant active once its deposit has been merged.
    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Request the generator loop to exit at its next iteration.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.is_stopped()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// First candidate not yet consumed, cloned out of the lock.
    pub fn select_input(&self, candidates: &[SpendUnit]) -> Option<SpendUnit> {
        self.allocator.lock().select_input(candidates).cloned()
    }

    pub fn mark_used(&self, salt: Salt) -> bool {
        self.allocator.lock().mark_used(salt)
    }

    pub fn unlock(&self, salts: &[Salt]) -> usize {
        self.allocator.lock().unlock(salts)
    }

    pub fn is_used(&self, salt: &Salt) -> bool {
        self.allocator.lock().is_used(salt)
    }

    pub fn used_count(&self) -> usize {
        self.allocator.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_overrides_activation() {
        let state = ParticipantState::new(1);
        assert!(!state.is_active());

        state.activate();
        assert!(state.is_active());

        state.stop();
        assert!(!state.is_active());
        state.activate();
        assert!(!state.is_active());
        assert!(state.is_stopped());
    }

    #[test]
    fn test_mark_and_unlock() {
        let state = ParticipantState::new(1);
        assert!(state.mark_used(Salt::from(2)));
        assert!(state.is_used(&Salt::from(2)));
        assert_eq!(state.unlock(&[Salt::from(2)]), 1);
        assert_eq!(state.used_count(), 0);
    }
}
