//! Observer nodes
//!
//! An observer is a terminal sink node: it fires its callback during
//! propagation and never pulses downstream. The registry pins the node
//! alive; `ObserverAction::StopAndDetach` queues the detach on the
//! active turn, which unregisters it during finalization.

use std::sync::Arc;

use crate::graph::{Node, NodeOps, NodeRef};
use crate::nodes::event::Events;
use crate::nodes::signal::Signal;
use crate::observer::ObserverContext;
use crate::turn::Turn;
use crate::types::{ObserverAction, ObserverId, TickResult};

struct ObserverNode {
    id: ObserverId,
    func: Box<dyn Fn(&ObserverContext<'_>) -> ObserverAction + Send + Sync>,
}

impl NodeOps for ObserverNode {
    fn tick(&self, turn: &Turn) -> TickResult {
        let ctx = ObserverContext::new(turn, self.id);
        if (self.func)(&ctx) == ObserverAction::StopAndDetach {
            turn.queue_observer_detach(self.id);
        }
        TickResult::IdlePulsed
    }

    fn dependency_count(&self) -> usize {
        1
    }
}

/// Handle to an attached observer
pub struct Observer {
    id: ObserverId,
    domain: crate::domain::DomainRef,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Whether the observer is still registered with its domain
    pub fn is_attached(&self) -> bool {
        self.domain.observers().contains(self.id)
    }
}

fn attach(
    domain: &crate::domain::DomainRef,
    subject: &NodeRef,
    func: Box<dyn Fn(&ObserverContext<'_>) -> ObserverAction + Send + Sync>,
) -> Observer {
    let id = domain.next_observer_id();
    let node = Node::create(domain, Arc::new(ObserverNode { id, func }), &[subject.clone()]);
    domain.observers().register(id, node);
    Observer {
        id,
        domain: domain.clone(),
    }
}

/// Observe a signal: the callback fires with the signal's value each
/// time the signal pulses.
pub fn observe<T: Clone + PartialEq + Send + 'static>(
    signal: &Signal<T>,
    f: impl Fn(&T, &ObserverContext<'_>) -> ObserverAction + Send + Sync + 'static,
) -> Observer {
    let cell = signal.cell.clone();
    attach(
        &signal.domain,
        &signal.node,
        Box::new(move |ctx| {
            let value = cell.get();
            f(&value, ctx)
        }),
    )
}

/// Observe an event stream: the callback fires once per occurrence.
/// Returning `StopAndDetach` detaches after the current occurrence and
/// skips the rest of the turn's batch.
pub fn observe_events<E: Clone + Send + 'static>(
    events: &Events<E>,
    f: impl Fn(&E, &ObserverContext<'_>) -> ObserverAction + Send + Sync + 'static,
) -> Observer {
    let cell = events.cell.clone();
    attach(
        &events.domain,
        &events.node,
        Box::new(move |ctx| {
            cell.with_current(ctx.turn_id(), |batch| {
                for event in batch {
                    if f(event, ctx) == ObserverAction::StopAndDetach {
                        return ObserverAction::StopAndDetach;
                    }
                }
                ObserverAction::Continue
            })
        }),
    )
}
