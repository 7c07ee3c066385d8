//! Propagation engines
//!
//! An engine receives lifecycle notifications from the graph and, given
//! a turn whose inputs have been applied, delivers the change to every
//! reachable node in dependency order. The three engines share
//! observable semantics and differ in concurrency strategy.

mod pulsecount;
mod subtree;
mod toposort;
mod wavefront;

pub use pulsecount::PulsecountEngine;
pub use subtree::SubtreeEngine;
pub use toposort::ToposortEngine;

use crate::error::Result;
use crate::graph::{Node, NodeRef};
use crate::turn::Turn;
use crate::types::EngineKind;

/// Engine interface consumed by the graph and the domain.
///
/// Node hooks fire on graph mutations; turn hooks bracket the phases of
/// a transaction. `on_turn_input_change` is how admission hands the
/// engine its dirty roots; `propagate` drains them.
pub trait PropagationEngine: Send + Sync {
    fn on_node_create(&self, _node: &NodeRef) {}
    fn on_node_destroy(&self, _node: &Node) {}
    fn on_node_attach(&self, _node: &NodeRef, _parent: &NodeRef) {}
    fn on_node_detach(&self, _node: &NodeRef, _parent: &NodeRef) {}

    /// A node's output changed during `turn`
    fn on_node_pulse(&self, _node: &NodeRef, _turn: &Turn) {}
    /// A node evaluated without a downstream effect during `turn`
    fn on_node_idle_pulse(&self, _node: &NodeRef, _turn: &Turn) {}
    /// A dynamic node moved from `old` to `new` during `turn`
    fn on_node_shift(&self, _node: &NodeRef, _old: &NodeRef, _new: &NodeRef, _turn: &Turn) {}

    fn on_turn_admission_start(&self, _turn: &Turn) {}
    fn on_turn_admission_end(&self, _turn: &Turn) {}
    /// An input node published a changed value during admission
    fn on_turn_input_change(&self, node: &NodeRef, turn: &Turn);
    /// Deliver the admitted changes through the graph
    fn propagate(&self, turn: &Turn) -> Result<()>;
    fn on_turn_end(&self, _turn: &Turn) {}
}

/// Instantiate the engine a domain was configured with
pub(crate) fn build_engine(kind: EngineKind) -> Box<dyn PropagationEngine> {
    match kind {
        EngineKind::ToposortSeq => Box::new(ToposortEngine::sequential()),
        EngineKind::ToposortPar => Box::new(ToposortEngine::parallel()),
        EngineKind::Pulsecount => Box::new(PulsecountEngine::new()),
        EngineKind::Subtree => Box::new(SubtreeEngine::new()),
    }
}
