//! Topological-sort engine
//!
//! Nodes are ticked in non-decreasing level order out of a level-keyed
//! queue, FIFO within a level for deterministic replay. The parallel
//! variant evaluates each minimum-level batch on the worker pool and
//! applies the results sequentially; nodes at the same level are
//! independent by the level invariant.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{instrument, trace};

use crate::error::Result;
use crate::graph::{self, NodeRef};
use crate::turn::Turn;
use crate::types::TickResult;

use super::PropagationEngine;

#[derive(Default)]
struct LevelQueue {
    levels: BTreeMap<u32, Vec<NodeRef>>,
}

impl LevelQueue {
    fn push(&mut self, node: NodeRef) {
        self.levels.entry(node.level()).or_default().push(node);
    }

    fn pop_batch(&mut self) -> Option<(u32, Vec<NodeRef>)> {
        self.levels.pop_first()
    }

    fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Level-ordered propagation, sequential or batch-parallel
pub struct ToposortEngine {
    parallel: bool,
    queue: Mutex<LevelQueue>,
    dirty_inputs: Mutex<Vec<NodeRef>>,
}

impl ToposortEngine {
    pub fn sequential() -> Self {
        Self::with_parallelism(false)
    }

    pub fn parallel() -> Self {
        Self::with_parallelism(true)
    }

    fn with_parallelism(parallel: bool) -> Self {
        Self {
            parallel,
            queue: Mutex::new(LevelQueue::default()),
            dirty_inputs: Mutex::new(Vec::new()),
        }
    }

    fn schedule(&self, node: NodeRef, turn: &Turn) {
        if node.state.try_queue(turn.id()) {
            trace!(node = %node.id(), level = node.level(), "scheduled");
            self.queue.lock().push(node);
        }
    }
}

impl PropagationEngine for ToposortEngine {
    fn on_turn_input_change(&self, node: &NodeRef, _turn: &Turn) {
        self.dirty_inputs.lock().push(node.clone());
    }

    fn on_node_pulse(&self, node: &NodeRef, turn: &Turn) {
        for succ in node.successors() {
            self.schedule(succ, turn);
        }
    }

    #[instrument(skip_all, fields(turn = turn.id()))]
    fn propagate(&self, turn: &Turn) -> Result<()> {
        // A failed turn may have left entries behind; they are stale now.
        self.queue.lock().clear();

        let roots = std::mem::take(&mut *self.dirty_inputs.lock());
        for root in &roots {
            root.complete_tick(turn.id());
            self.on_node_pulse(root, turn);
        }

        loop {
            let Some((level, batch)) = self.queue.lock().pop_batch() else {
                break;
            };

            // A rewire may have raised a queued node past this batch;
            // push it back at its new level instead of ticking early.
            let mut run = Vec::with_capacity(batch.len());
            for node in batch {
                node.state.clear_queued();
                if node.level() > level {
                    self.schedule(node, turn);
                } else {
                    run.push(node);
                }
            }

            let results: Vec<(NodeRef, TickResult)> = if self.parallel && run.len() > 1 {
                run.par_iter()
                    .map(|node| (node.clone(), node.tick(turn)))
                    .collect()
            } else {
                run.iter()
                    .map(|node| (node.clone(), node.tick(turn)))
                    .collect()
            };

            // Apply sequentially for deterministic scheduling order.
            for (node, result) in results {
                match result {
                    TickResult::Pulsed => {
                        node.complete_tick(turn.id());
                        self.on_node_pulse(&node, turn);
                    }
                    TickResult::IdlePulsed => {
                        node.complete_tick(turn.id());
                        self.on_node_idle_pulse(&node, turn);
                    }
                    TickResult::Rewired { detach, attach } => {
                        graph::apply_rewire(&node, &detach, &attach, turn, self)?;
                        self.schedule(node, turn);
                    }
                }
            }
        }
        Ok(())
    }
}
