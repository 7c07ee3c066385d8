//! Shared counting wavefront
//!
//! The pulse-count and subtree engines both propagate by discharging
//! per-node pending-predecessor counts: when a node has heard from
//! every dirty predecessor, it is dispatched into the worker scope.
//! The engines differ only in how the counts are established.
//!
//! A node whose count drains without any predecessor actually pulsing
//! is not evaluated; it forwards idleness so nodes further downstream
//! still hear from it. This is what keeps evaluation at most once per
//! input set and makes idle pulses free of downstream effects.

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::graph::{self, NodeRef};
use crate::turn::Turn;
use crate::types::TickResult;

use super::PropagationEngine;

struct WaveCtx<'e> {
    engine: &'e dyn PropagationEngine,
    error: Mutex<Option<Error>>,
}

/// Run the wavefront from the given dirty input roots.
///
/// Root successor snapshots are taken under the resolved handshake
/// before any task runs, so a dynamic attach landing on a root mid-turn
/// can never be discharged twice or not at all.
pub(super) fn run(
    engine: &dyn PropagationEngine,
    roots: &[NodeRef],
    turn: &Turn,
) -> Result<()> {
    let ctx = WaveCtx {
        engine,
        error: Mutex::new(None),
    };

    let root_succs: Vec<Vec<NodeRef>> = roots
        .iter()
        .map(|root| root.complete_tick(turn.id()))
        .collect();

    rayon::scope(|scope| {
        for succs in root_succs {
            nudge(&ctx, scope, succs, true, turn);
        }
    });

    match ctx.error.into_inner() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Discharge one report into each successor, dispatching any that have
/// now heard from every dirty predecessor.
fn nudge<'a>(
    ctx: &'a WaveCtx<'a>,
    scope: &rayon::Scope<'a>,
    succs: Vec<NodeRef>,
    pulsed: bool,
    turn: &'a Turn,
) {
    for succ in succs {
        if !succ.state.is_marked(turn.id()) {
            continue;
        }
        if pulsed {
            succ.state.set_should_tick(turn.id());
        }
        if succ.state.pending.decrement(turn.id()) == 0 {
            scope.spawn(move |scope| process(ctx, scope, succ, turn));
        }
    }
}

fn process<'a>(ctx: &'a WaveCtx<'a>, scope: &rayon::Scope<'a>, node: NodeRef, turn: &'a Turn) {
    if ctx.error.lock().is_some() {
        return;
    }

    if !node.state.should_tick(turn.id()) {
        // Every dirty predecessor reported idle: forward the idleness
        // without evaluating.
        let succs = node.complete_tick(turn.id());
        ctx.engine.on_node_idle_pulse(&node, turn);
        nudge(ctx, scope, succs, false, turn);
        return;
    }

    match node.tick(turn) {
        TickResult::Pulsed => {
            let succs = node.complete_tick(turn.id());
            ctx.engine.on_node_pulse(&node, turn);
            nudge(ctx, scope, succs, true, turn);
        }
        TickResult::IdlePulsed => {
            let succs = node.complete_tick(turn.id());
            ctx.engine.on_node_idle_pulse(&node, turn);
            nudge(ctx, scope, succs, false, turn);
        }
        TickResult::Rewired { detach, attach } => {
            // Hold the node while its edges move: a dirty new
            // predecessor adds to the count as it attaches, and an
            // early completion must not re-dispatch us mid-rewire.
            node.state.pending.increment(turn.id());
            match graph::apply_rewire(&node, &detach, &attach, turn, ctx.engine) {
                Ok(owing) => {
                    trace!(node = %node.id(), owing = owing.len(), "rewired");
                    if node.state.pending.decrement(turn.id()) == 0 {
                        process(ctx, scope, node, turn);
                    }
                }
                Err(err) => {
                    ctx.error.lock().get_or_insert(err);
                }
            }
        }
    }
}
