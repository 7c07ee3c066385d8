//! Subtree engine
//!
//! For wide graphs with locally confined changes: before propagating,
//! a sequential pass computes the dirty subtree reachable from the
//! changed inputs and initializes each member's pending count from its
//! dirty predecessors only. The wavefront then runs over that
//! restricted subgraph; clean subtrees are never scheduled, not even to
//! be skipped.

use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::error::Result;
use crate::graph::NodeRef;
use crate::turn::Turn;

use super::{PropagationEngine, wavefront};

/// Parallel propagation restricted to the dirty subtree
pub struct SubtreeEngine {
    dirty_inputs: Mutex<Vec<NodeRef>>,
}

impl SubtreeEngine {
    pub fn new() -> Self {
        Self {
            dirty_inputs: Mutex::new(Vec::new()),
        }
    }
}

impl Default for SubtreeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PropagationEngine for SubtreeEngine {
    fn on_turn_input_change(&self, node: &NodeRef, _turn: &Turn) {
        self.dirty_inputs.lock().push(node.clone());
    }

    #[instrument(skip_all, fields(turn = turn.id()))]
    fn propagate(&self, turn: &Turn) -> Result<()> {
        let roots = std::mem::take(&mut *self.dirty_inputs.lock());
        if roots.is_empty() {
            return Ok(());
        }
        let turn_id = turn.id();

        // Collect the dirty subtree. Roots are part of it: a dynamic
        // attach must see them as dirty-but-resolved, not clean.
        let mut dirty: Vec<NodeRef> = Vec::new();
        let mut stack: Vec<NodeRef> = Vec::new();
        for root in &roots {
            root.state.mark(turn_id);
            stack.push(root.clone());
        }
        while let Some(node) = stack.pop() {
            for succ in node.successors() {
                if succ.state.mark(turn_id) {
                    dirty.push(succ.clone());
                    stack.push(succ);
                }
            }
        }

        // Unresolved-predecessor counts, restricted to the dirty subset.
        for node in &dirty {
            let count = node
                .predecessors()
                .iter()
                .filter(|pred| pred.state.is_marked(turn_id))
                .count();
            node.state.pending.set(turn_id, count as u32);
        }
        trace!(roots = roots.len(), dirty = dirty.len(), "dirty subtree");

        wavefront::run(self, &roots, turn)
    }
}
