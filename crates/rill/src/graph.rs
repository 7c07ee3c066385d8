//! Node core
//!
//! Every reactive value is a [`Node`]: a stable identity, engine-visible
//! scratch state, bidirectional dependency links, and a boxed behavior
//! ([`NodeOps`]) that the engines drive through `tick`.
//!
//! Ownership follows the edge direction: predecessors are held strongly,
//! successors as weak back-references. A node is destroyed when the last
//! strong reference to it drops, so the graph tears down leaves-first.
//!
//! The scratch fields are turn-stamped rather than cleared: `marked`,
//! `resolved`, `queued` and `should_tick` hold the id of the turn that
//! set them, and the pending-predecessor counter packs its turn stamp
//! next to the count. A stale stamp never equals a fresh turn id, so an
//! aborted turn leaves nothing to sweep.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::domain::Domain;
use crate::engine::PropagationEngine;
use crate::error::{Error, Result};
use crate::turn::Turn;
use crate::types::{NodeId, TickResult};

/// Shared handle to a node
pub type NodeRef = Arc<Node>;

/// Behavior supplied by a node kind
///
/// This is the extension point for the combinator layer: the engines
/// only ever see nodes through this interface.
pub trait NodeOps: Send + Sync {
    /// Evaluate the node for the given turn.
    ///
    /// Must not block. May read predecessor outputs and update the
    /// node's own output.
    fn tick(&self, turn: &Turn) -> TickResult;

    /// Publish staged values. Only meaningful for input nodes; returns
    /// whether the published state differs from the committed state.
    fn apply_input(&self, _turn: &Turn) -> bool {
        false
    }

    /// Whether this node is an input (no predecessors, staged by the host)
    fn is_input(&self) -> bool {
        false
    }

    /// Whether this node may rewire its predecessors during its own tick
    fn is_dynamic(&self) -> bool {
        false
    }

    /// Number of declared dependencies
    fn dependency_count(&self) -> usize;
}

const COUNT_BITS: u32 = 16;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;
const STAMP_MASK: u64 = (1 << (64 - COUNT_BITS)) - 1;

/// Pending-predecessor counter packed with the turn that owns it.
///
/// An increment for a new turn atomically re-initializes the count, so
/// residue from an aborted turn cannot leak into the next one. The
/// count field is 16 bits; a node with more than 65k dirty predecessors
/// is outside this core's design envelope.
pub(crate) struct StampedCounter(AtomicU64);

impl StampedCounter {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn stamp(turn_id: u64) -> u64 {
        turn_id & STAMP_MASK
    }

    fn pack(stamp: u64, count: u64) -> u64 {
        debug_assert!(count <= COUNT_MASK);
        (stamp << COUNT_BITS) | count
    }

    /// Add `n` for the given turn, re-initializing on a stamp change.
    /// Returns the new count.
    pub(crate) fn add(&self, turn_id: u64, n: u32) -> u32 {
        let stamp = Self::stamp(turn_id);
        let mut cur = self.0.load(Ordering::Acquire);
        loop {
            let next = if cur >> COUNT_BITS == stamp {
                Self::pack(stamp, (cur & COUNT_MASK) + n as u64)
            } else {
                Self::pack(stamp, n as u64)
            };
            match self
                .0
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return (next & COUNT_MASK) as u32,
                Err(seen) => cur = seen,
            }
        }
    }

    pub(crate) fn increment(&self, turn_id: u64) -> u32 {
        self.add(turn_id, 1)
    }

    /// Decrement for the given turn; returns the new count.
    ///
    /// Only valid on a counter initialized for this turn. A stamp
    /// mismatch returns `u32::MAX` so the caller never dispatches on it.
    pub(crate) fn decrement(&self, turn_id: u64) -> u32 {
        let stamp = Self::stamp(turn_id);
        let mut cur = self.0.load(Ordering::Acquire);
        loop {
            if cur >> COUNT_BITS != stamp {
                debug_assert!(false, "decrement on foreign turn stamp");
                return u32::MAX;
            }
            let count = cur & COUNT_MASK;
            debug_assert!(count > 0, "pending count underflow");
            let next = Self::pack(stamp, count.saturating_sub(1));
            match self
                .0
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return (next & COUNT_MASK) as u32,
                Err(seen) => cur = seen,
            }
        }
    }

    /// Overwrite the count for the given turn (sequential mark phases).
    pub(crate) fn set(&self, turn_id: u64, n: u32) {
        self.0
            .store(Self::pack(Self::stamp(turn_id), n as u64), Ordering::Release);
    }

    pub(crate) fn get(&self, turn_id: u64) -> u32 {
        let cur = self.0.load(Ordering::Acquire);
        if cur >> COUNT_BITS == Self::stamp(turn_id) {
            (cur & COUNT_MASK) as u32
        } else {
            0
        }
    }
}

/// Engine-visible scratch state. Mutated only by the engines' schedulers.
pub(crate) struct NodeState {
    level: AtomicU32,
    new_level: AtomicU32,
    pub(crate) pending: StampedCounter,
    /// Stamp of the turn that queued the node (toposort coalescing)
    queued: AtomicU64,
    /// Stamp of the turn whose mark phase reached the node
    marked: AtomicU64,
    /// Stamp of the turn in which the node finished reporting
    resolved: AtomicU64,
    /// Stamp of the turn in which some predecessor actually pulsed
    should_tick: AtomicU64,
}

impl NodeState {
    fn new(level: u32) -> Self {
        Self {
            level: AtomicU32::new(level),
            new_level: AtomicU32::new(level),
            pending: StampedCounter::new(),
            queued: AtomicU64::new(0),
            marked: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            should_tick: AtomicU64::new(0),
        }
    }

    pub(crate) fn level(&self) -> u32 {
        self.level.load(Ordering::Acquire)
    }

    fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Release);
    }

    /// Stamp the node as marked for this turn; true if newly marked.
    pub(crate) fn mark(&self, turn_id: u64) -> bool {
        self.marked.swap(turn_id, Ordering::AcqRel) != turn_id
    }

    pub(crate) fn is_marked(&self, turn_id: u64) -> bool {
        self.marked.load(Ordering::Acquire) == turn_id
    }

    fn is_resolved(&self, turn_id: u64) -> bool {
        self.resolved.load(Ordering::Acquire) == turn_id
    }

    pub(crate) fn set_should_tick(&self, turn_id: u64) {
        self.should_tick.store(turn_id, Ordering::Release);
    }

    pub(crate) fn should_tick(&self, turn_id: u64) -> bool {
        self.should_tick.load(Ordering::Acquire) == turn_id
    }

    /// Stamp the node as queued for this turn; true if it was not already.
    pub(crate) fn try_queue(&self, turn_id: u64) -> bool {
        self.queued.swap(turn_id, Ordering::AcqRel) != turn_id
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(0, Ordering::Release);
    }
}

struct Edges {
    preds: Vec<NodeRef>,
    succs: Vec<Weak<Node>>,
}

/// A reactive graph node
pub struct Node {
    id: NodeId,
    domain: Weak<Domain>,
    pub(crate) state: NodeState,
    edges: Mutex<Edges>,
    ops: Arc<dyn NodeOps>,
}

impl Node {
    /// Create a node attached to its declared predecessors.
    ///
    /// The node's level is `1 + max(pred levels)`, or 0 for roots.
    pub fn create(domain: &Arc<Domain>, ops: Arc<dyn NodeOps>, preds: &[NodeRef]) -> NodeRef {
        let id = domain.next_node_id();
        let level = preds.iter().map(|p| p.level()).max().map_or(0, |m| m + 1);
        let node = Arc::new(Node {
            id,
            domain: Arc::downgrade(domain),
            state: NodeState::new(level),
            edges: Mutex::new(Edges {
                preds: preds.to_vec(),
                succs: Vec::new(),
            }),
            ops,
        });
        for pred in preds {
            pred.edges.lock().succs.push(Arc::downgrade(&node));
        }
        let engine = domain.engine();
        engine.on_node_create(&node);
        for pred in preds {
            engine.on_node_attach(&node, pred);
        }
        trace!(node = %node.id, level, preds = preds.len(), "node created");
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn level(&self) -> u32 {
        self.state.level()
    }

    pub fn is_input(&self) -> bool {
        self.ops.is_input()
    }

    pub fn is_dynamic(&self) -> bool {
        self.ops.is_dynamic()
    }

    pub fn dependency_count(&self) -> usize {
        self.ops.dependency_count()
    }

    pub(crate) fn tick(&self, turn: &Turn) -> TickResult {
        self.ops.tick(turn)
    }

    pub(crate) fn apply_input(&self, turn: &Turn) -> bool {
        self.ops.apply_input(turn)
    }

    /// Snapshot of the current predecessors, in insertion order
    pub fn predecessors(&self) -> Vec<NodeRef> {
        self.edges.lock().preds.clone()
    }

    pub fn predecessor_ids(&self) -> Vec<NodeId> {
        self.edges.lock().preds.iter().map(|p| p.id).collect()
    }

    /// Snapshot of the live successors, pruning dead back-references
    pub fn successors(&self) -> Vec<NodeRef> {
        let mut edges = self.edges.lock();
        let mut out = Vec::with_capacity(edges.succs.len());
        edges.succs.retain(|weak| match weak.upgrade() {
            Some(succ) => {
                out.push(succ);
                true
            }
            None => false,
        });
        out
    }

    /// Mark this node resolved for the turn and snapshot its successors.
    ///
    /// Both happen under the edge lock so a concurrent dynamic attach
    /// observes either "unresolved, and I am in the snapshot" or
    /// "resolved, and I am not": the counting engines rely on exactly
    /// one of discharge-by-pred or no-count-no-discharge happening.
    pub(crate) fn complete_tick(&self, turn_id: u64) -> Vec<NodeRef> {
        let mut edges = self.edges.lock();
        self.state.resolved.store(turn_id, Ordering::Release);
        let mut out = Vec::with_capacity(edges.succs.len());
        edges.succs.retain(|weak| match weak.upgrade() {
            Some(succ) => {
                out.push(succ);
                true
            }
            None => false,
        });
        out
    }

    /// Attach a predecessor mid-turn. Returns whether the predecessor
    /// is dirty in this turn and has not yet reported (in which case
    /// it will discharge this node when it completes).
    ///
    /// When the predecessor still owes a report, this node's pending
    /// count is incremented under the predecessor's edge lock, before
    /// the discharge could possibly run.
    pub(crate) fn attach_pred_in_turn(self: &Arc<Self>, pred: &NodeRef, turn_id: u64) -> bool {
        let owes = {
            let mut pred_edges = pred.edges.lock();
            pred_edges.succs.push(Arc::downgrade(self));
            let owes = pred.state.is_marked(turn_id) && !pred.state.is_resolved(turn_id);
            if owes {
                self.state.pending.increment(turn_id);
            }
            owes
        };
        self.edges.lock().preds.push(pred.clone());
        owes
    }

    pub(crate) fn detach_pred(&self, pred: &NodeRef) -> Result<()> {
        {
            let mut edges = self.edges.lock();
            let pos = edges
                .preds
                .iter()
                .position(|p| Arc::ptr_eq(p, pred))
                .ok_or_else(|| Error::InvalidState {
                    message: format!("{} is not a predecessor of {}", pred.id, self.id),
                })?;
            edges.preds.remove(pos);
        }
        pred.edges
            .lock()
            .succs
            .retain(|weak| weak.upgrade().is_some_and(|s| s.id != self.id));
        Ok(())
    }

    /// Recompute this node's level from its current predecessors into
    /// the `new_level` scratch field, without committing it.
    pub(crate) fn stage_new_level(&self) -> u32 {
        let level = {
            let edges = self.edges.lock();
            edges.preds.iter().map(|p| p.level()).max().map_or(0, |m| m + 1)
        };
        self.state.new_level.store(level, Ordering::Release);
        level
    }

    /// Commit the staged level; cascading raises are the caller's job.
    pub(crate) fn commit_level(&self) {
        self.state
            .set_level(self.state.new_level.load(Ordering::Acquire));
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("level", &self.level())
            .field("input", &self.is_input())
            .finish()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(domain) = self.domain.upgrade() {
            domain.engine().on_node_destroy(self);
        }
    }
}

/// Raise a node's level to at least `min`, cascading to successors so
/// `level(pred) < level(succ)` keeps holding.
pub(crate) fn raise_level(node: &NodeRef, min: u32) {
    if node.level() >= min {
        return;
    }
    node.state.set_level(min);
    for succ in node.successors() {
        raise_level(&succ, min + 1);
    }
}

/// Whether `target` is reachable from `from` along successor edges
fn reaches(from: &NodeRef, target: &NodeRef) -> bool {
    if Arc::ptr_eq(from, target) {
        return true;
    }
    let mut visited = HashSet::new();
    visited.insert(from.id);
    let mut stack = vec![from.clone()];
    while let Some(node) = stack.pop() {
        for succ in node.successors() {
            if succ.id == target.id {
                return true;
            }
            if visited.insert(succ.id) {
                stack.push(succ);
            }
        }
    }
    false
}

/// Apply the edge delta of a `Rewired` tick result.
///
/// Checks for cycles before any edge is installed, performs the
/// detaches and attaches, re-levels the node (cascading raises to
/// successors), and returns the newly attached predecessors that are
/// dirty in this turn and still owe the node a report.
pub(crate) fn apply_rewire(
    node: &NodeRef,
    detach: &[NodeRef],
    attach: &[NodeRef],
    turn: &Turn,
    engine: &dyn PropagationEngine,
) -> Result<Vec<NodeRef>> {
    for pred in attach {
        if reaches(node, pred) {
            return Err(Error::CycleDetected { node: pred.id });
        }
    }

    for pred in detach {
        node.detach_pred(pred)?;
        engine.on_node_detach(node, pred);
    }

    let mut owing = Vec::new();
    for pred in attach {
        if node.attach_pred_in_turn(pred, turn.id()) {
            owing.push(pred.clone());
        }
        engine.on_node_attach(node, pred);
    }

    if let (Some(old), Some(new)) = (detach.first(), attach.first()) {
        engine.on_node_shift(node, old, new, turn);
    }

    let old_level = node.level();
    let new_level = node.stage_new_level();
    node.commit_level();
    if new_level > old_level {
        for succ in node.successors() {
            raise_level(&succ, new_level + 1);
        }
    }
    trace!(node = %node.id(), old_level, new_level, "rewired");
    Ok(owing)
}
