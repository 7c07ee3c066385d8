//! Pulse-count engine
//!
//! A turn-stamped mark phase walks every path out of the changed
//! inputs, incrementing each traversed successor's pending count once
//! per in-edge; recursion fans out on the worker pool, and only the
//! first marker of a node descends past it. After the mark phase,
//! `pending(n)` is exactly the number of predecessors that will report
//! to `n` this turn, so the wavefront needs no level information and is
//! insensitive to level mis-assignment.

use parking_lot::Mutex;
use tracing::instrument;

use crate::error::Result;
use crate::graph::NodeRef;
use crate::turn::Turn;

use super::{PropagationEngine, wavefront};

/// Mark phase + parallel wavefront over pending-predecessor counters
pub struct PulsecountEngine {
    dirty_inputs: Mutex<Vec<NodeRef>>,
}

impl PulsecountEngine {
    pub fn new() -> Self {
        Self {
            dirty_inputs: Mutex::new(Vec::new()),
        }
    }
}

impl Default for PulsecountEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn mark<'a>(scope: &rayon::Scope<'a>, node: NodeRef, turn_id: u64) {
    // One in-edge from the dirty region; re-initializes on turn change.
    node.state.pending.increment(turn_id);
    if node.state.mark(turn_id) {
        scope.spawn(move |scope| {
            for succ in node.successors() {
                mark(scope, succ, turn_id);
            }
        });
    }
}

impl PropagationEngine for PulsecountEngine {
    fn on_turn_input_change(&self, node: &NodeRef, _turn: &Turn) {
        self.dirty_inputs.lock().push(node.clone());
    }

    #[instrument(skip_all, fields(turn = turn.id()))]
    fn propagate(&self, turn: &Turn) -> Result<()> {
        let roots = std::mem::take(&mut *self.dirty_inputs.lock());
        if roots.is_empty() {
            return Ok(());
        }

        rayon::scope(|scope| {
            for root in &roots {
                for succ in root.successors() {
                    mark(scope, succ, turn.id());
                }
            }
        });

        wavefront::run(self, &roots, turn)
    }
}
