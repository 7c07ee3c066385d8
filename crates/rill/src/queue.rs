//! Exclusive turn queue
//!
//! Serializes turns per domain: at most one turn executes, newly
//! submitted turns block behind the tail. While a turn is still blocked
//! (admitted but not executing), compatible inputs can merge into it;
//! the merged closures run on the thread that owns the turn and the
//! submitting threads block until that turn ends. `end` wakes the
//! merged callers first, then the successor turn.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::turn::InputFn;

/// A flag a thread can block on until another thread clears it
pub(crate) struct BlockingCondition {
    blocked: Mutex<bool>,
    unblocked: Condvar,
}

impl BlockingCondition {
    pub(crate) fn new() -> Self {
        Self {
            blocked: Mutex::new(false),
            unblocked: Condvar::new(),
        }
    }

    pub(crate) fn block(&self) {
        *self.blocked.lock() = true;
    }

    pub(crate) fn unblock(&self) {
        let mut blocked = self.blocked.lock();
        *blocked = false;
        self.unblocked.notify_all();
    }

    pub(crate) fn wait_for_unblock(&self) {
        let mut blocked = self.blocked.lock();
        while *blocked {
            self.unblocked.wait(&mut blocked);
        }
    }

}

/// Queue-side state of one turn
pub(crate) struct TurnGate {
    mergeable: bool,
    blocked: BlockingCondition,
    merged_inputs: Mutex<Vec<InputFn>>,
    merged_callers: Mutex<Vec<Arc<BlockingCondition>>>,
    successor: Mutex<Option<Arc<TurnGate>>>,
}

impl TurnGate {
    pub(crate) fn new(mergeable: bool) -> Arc<Self> {
        Arc::new(Self {
            mergeable,
            blocked: BlockingCondition::new(),
            merged_inputs: Mutex::new(Vec::new()),
            merged_callers: Mutex::new(Vec::new()),
            successor: Mutex::new(None),
        })
    }

    /// Append `succ` behind this turn; `succ` blocks until this turn ends.
    fn append(&self, succ: &Arc<TurnGate>) {
        succ.blocked.block();
        *self.successor.lock() = Some(succ.clone());
    }

    /// Merge an input closure into this turn if it is still blocked and
    /// its flags allow merging. The caller's condition is blocked under
    /// the same critical section so the wake-up cannot be missed. On
    /// refusal the closure is handed back.
    fn try_merge(
        &self,
        input: InputFn,
        caller: &Arc<BlockingCondition>,
    ) -> std::result::Result<(), InputFn> {
        if !self.mergeable {
            return Err(input);
        }
        let still_blocked = self.blocked.blocked.lock();
        if *still_blocked {
            caller.block();
            self.merged_inputs.lock().push(input);
            self.merged_callers.lock().push(caller.clone());
            Ok(())
        } else {
            Err(input)
        }
    }

    /// Take the merged input closures, in merge order
    pub(crate) fn take_merged_inputs(&self) -> Vec<InputFn> {
        std::mem::take(&mut *self.merged_inputs.lock())
    }

    /// Wake merged callers first, then the successor turn
    fn unblock_followers(&self) {
        for caller in self.merged_callers.lock().drain(..) {
            caller.unblock();
        }
        if let Some(succ) = self.successor.lock().take() {
            succ.blocked.unblock();
        }
    }
}

/// FIFO of turns with at most one executing
pub(crate) struct TurnQueue {
    tail: Mutex<Option<Arc<TurnGate>>>,
}

impl TurnQueue {
    pub(crate) fn new() -> Self {
        Self {
            tail: Mutex::new(None),
        }
    }

    /// Admit a turn. Blocks until every earlier turn has ended.
    pub(crate) fn start(&self, gate: &Arc<TurnGate>) {
        {
            let mut tail = self.tail.lock();
            if let Some(prev) = tail.as_ref() {
                prev.append(gate);
            }
            *tail = Some(gate.clone());
        }
        gate.blocked.wait_for_unblock();
    }

    /// Try to merge `input` into the tail turn. On success the calling
    /// thread blocks until that turn ends; on refusal the closure is
    /// handed back.
    pub(crate) fn try_merge(&self, input: InputFn) -> std::result::Result<(), InputFn> {
        let caller = Arc::new(BlockingCondition::new());
        let merged = {
            let tail = self.tail.lock();
            match tail.as_ref() {
                Some(gate) => gate.try_merge(input, &caller),
                None => Err(input),
            }
        };
        match merged {
            Ok(()) => {
                trace!("input merged into blocked turn");
                caller.wait_for_unblock();
                Ok(())
            }
            Err(input) => Err(input),
        }
    }

    /// End a turn: wake its merged callers, then its successor.
    pub(crate) fn end(&self, gate: &Arc<TurnGate>) {
        let mut tail = self.tail.lock();
        gate.unblock_followers();
        if tail.as_ref().is_some_and(|t| Arc::ptr_eq(t, gate)) {
            *tail = None;
        }
    }
}
