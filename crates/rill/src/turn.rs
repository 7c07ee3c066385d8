//! Turn object
//!
//! A turn is one serialized unit of change within a domain: an
//! immutable id, admission flags, the observers queued for detach, and
//! the continuations recorded for dispatch after the turn closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::domain::{Domain, Transaction};
use crate::observer::ObserverRegistry;
use crate::types::{ObserverId, TurnFlags};

/// A closure staged as turn input
pub type InputFn = Box<dyn FnOnce(&mut Transaction<'_>) + Send>;

/// A deferred message to another domain, dispatched after the
/// recording turn has ended
pub struct Continuation {
    pub target: Arc<Domain>,
    pub input: InputFn,
}

/// Turn lifecycle states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TurnState {
    /// Inputs are being staged; merges are only legal here
    Admitted = 0,
    /// Propagating
    Executing = 1,
    /// Detaching observers, draining continuations
    Finalizing = 2,
    Ended = 3,
}

/// One transactional unit of change
pub struct Turn {
    id: u64,
    flags: TurnFlags,
    state: AtomicU8,
    detach_queue: Mutex<Vec<ObserverId>>,
    continuations: Mutex<Vec<Continuation>>,
}

impl Turn {
    pub(crate) fn new(id: u64, flags: TurnFlags) -> Self {
        Self {
            id,
            flags,
            state: AtomicU8::new(TurnState::Admitted as u8),
            detach_queue: Mutex::new(Vec::new()),
            continuations: Mutex::new(Vec::new()),
        }
    }

    /// Monotonic within the owning domain
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn flags(&self) -> TurnFlags {
        self.flags
    }

    pub fn state(&self) -> TurnState {
        match self.state.load(Ordering::Acquire) {
            0 => TurnState::Admitted,
            1 => TurnState::Executing,
            2 => TurnState::Finalizing,
            _ => TurnState::Ended,
        }
    }

    pub(crate) fn advance_state(&self, next: TurnState) {
        let prev = self.state.swap(next as u8, Ordering::AcqRel);
        debug_assert!(prev <= next as u8, "turn state moved backwards");
    }

    /// Queue an observer for detach when the turn finalizes. Thread-safe.
    pub fn queue_observer_detach(&self, observer: ObserverId) {
        trace!(turn = self.id, observer = %observer, "observer detach queued");
        self.detach_queue.lock().push(observer);
    }

    /// Record a continuation targeting `domain`, to run as a later turn
    /// there once this turn has ended. Thread-safe; dispatch preserves
    /// record order.
    pub fn record_continuation(
        &self,
        domain: &Arc<Domain>,
        input: impl FnOnce(&mut Transaction<'_>) + Send + 'static,
    ) {
        trace!(turn = self.id, "continuation recorded");
        self.continuations.lock().push(Continuation {
            target: domain.clone(),
            input: Box::new(input),
        });
    }

    /// Unregister queued observers and hand the recorded continuations
    /// to the caller for dispatch after the turn has fully ended.
    pub(crate) fn finalize(&self, registry: &ObserverRegistry) -> Vec<Continuation> {
        self.advance_state(TurnState::Finalizing);
        for observer in self.detach_queue.lock().drain(..) {
            registry.unregister(observer);
        }
        std::mem::take(&mut *self.continuations.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_queue_unregisters_once() {
        let registry = ObserverRegistry::default();
        let turn = Turn::new(1, TurnFlags::default());
        let id = ObserverId(9);

        turn.queue_observer_detach(id);
        // Queueing twice is fine; unregister is idempotent.
        turn.queue_observer_detach(id);
        let continuations = turn.finalize(&registry);
        assert!(continuations.is_empty());
        assert_eq!(turn.state(), TurnState::Finalizing);
    }

    #[test]
    fn states_advance_in_order() {
        let turn = Turn::new(1, TurnFlags::default());
        assert_eq!(turn.state(), TurnState::Admitted);
        turn.advance_state(TurnState::Executing);
        turn.advance_state(TurnState::Ended);
        assert_eq!(turn.state(), TurnState::Ended);
    }
}
