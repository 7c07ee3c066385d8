//! Event stream nodes
//!
//! An event stream carries a list of occurrences per turn. Buffers are
//! stamped with the turn that filled them and cleared lazily on first
//! access from a later turn, under a per-node light mutex, so a reader
//! can never confuse a previous turn's events for current ones.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::{DomainRef, Transaction};
use crate::graph::{Node, NodeOps, NodeRef};
use crate::turn::Turn;
use crate::types::TickResult;

struct EventBuf<E> {
    turn_id: u64,
    events: Vec<E>,
}

/// Turn-stamped event buffer shared between a node and its readers
pub(crate) struct EventCell<E> {
    buf: Mutex<EventBuf<E>>,
}

impl<E: Clone> EventCell<E> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(EventBuf {
                turn_id: 0,
                events: Vec::new(),
            }),
        })
    }

    /// Read the events of the given turn, clearing a stale buffer first
    pub(crate) fn with_current<R>(&self, turn_id: u64, f: impl FnOnce(&[E]) -> R) -> R {
        let mut buf = self.buf.lock();
        if buf.turn_id != turn_id {
            buf.turn_id = turn_id;
            buf.events.clear();
        }
        f(&buf.events)
    }

    fn publish(&self, turn_id: u64, events: Vec<E>) {
        let mut buf = self.buf.lock();
        buf.turn_id = turn_id;
        buf.events = events;
    }
}

/// Input event node: occurrences staged by the host
struct EventSourceNode<E> {
    cell: Arc<EventCell<E>>,
    staged: Mutex<Vec<E>>,
}

impl<E: Clone + Send + 'static> NodeOps for EventSourceNode<E> {
    fn tick(&self, _turn: &Turn) -> TickResult {
        unreachable!("input nodes are applied, never ticked")
    }

    fn apply_input(&self, turn: &Turn) -> bool {
        let staged = std::mem::take(&mut *self.staged.lock());
        if staged.is_empty() {
            return false;
        }
        self.cell.publish(turn.id(), staged);
        true
    }

    fn is_input(&self) -> bool {
        true
    }

    fn dependency_count(&self) -> usize {
        0
    }
}

/// Host-fed event stream
pub struct EventSource<E> {
    domain: DomainRef,
    node: NodeRef,
    source: Arc<EventSourceNode<E>>,
}

impl<E: Clone + Send + 'static> EventSource<E> {
    pub fn new(domain: &DomainRef) -> Self {
        let source = Arc::new(EventSourceNode {
            cell: EventCell::new(),
            staged: Mutex::new(Vec::new()),
        });
        let node = Node::create(domain, source.clone(), &[]);
        Self {
            domain: domain.clone(),
            node,
            source,
        }
    }

    /// Stage an occurrence; delivered when the turn admits inputs.
    pub fn emit(&self, tx: &mut Transaction<'_>, event: E) {
        self.source.staged.lock().push(event);
        tx.stage(&self.node);
    }

    /// Read-only view usable as a dependency
    pub fn events(&self) -> Events<E> {
        Events {
            domain: self.domain.clone(),
            node: self.node.clone(),
            cell: self.source.cell.clone(),
        }
    }
}

impl<E> Clone for EventSource<E> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
            source: self.source.clone(),
        }
    }
}

/// Derived event node: filter-map over the upstream occurrences
struct EventMapNode<E, U> {
    src: Arc<EventCell<E>>,
    out: Arc<EventCell<U>>,
    func: Box<dyn Fn(&E) -> Option<U> + Send + Sync>,
}

impl<E, U> NodeOps for EventMapNode<E, U>
where
    E: Clone + Send + 'static,
    U: Clone + Send + 'static,
{
    fn tick(&self, turn: &Turn) -> TickResult {
        let outs: Vec<U> = self
            .src
            .with_current(turn.id(), |events| {
                events.iter().filter_map(|e| (self.func)(e)).collect()
            });
        let pulsed = !outs.is_empty();
        self.out.publish(turn.id(), outs);
        if pulsed {
            TickResult::Pulsed
        } else {
            TickResult::IdlePulsed
        }
    }

    fn dependency_count(&self) -> usize {
        1
    }
}

/// Read-only event stream handle
pub struct Events<E> {
    pub(crate) domain: DomainRef,
    pub(crate) node: NodeRef,
    pub(crate) cell: Arc<EventCell<E>>,
}

impl<E> Clone for Events<E> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Events<E> {
    /// Derived stream keeping the `Some` results of `f`
    pub fn filter_map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(&E) -> Option<U> + Send + Sync + 'static,
    ) -> Events<U> {
        let out = EventCell::new();
        let ops = Arc::new(EventMapNode {
            src: self.cell.clone(),
            out: out.clone(),
            func: Box::new(f),
        });
        let node = Node::create(&self.domain, ops, &[self.node.clone()]);
        Events {
            domain: self.domain.clone(),
            node,
            cell: out,
        }
    }

    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(&E) -> U + Send + Sync + 'static,
    ) -> Events<U> {
        self.filter_map(move |e| Some(f(e)))
    }

    pub fn filter(&self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Events<E> {
        self.filter_map(move |e| if pred(e) { Some(e.clone()) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::nodes::observer::observe_events;
    use crate::types::{DomainConfig, ObserverAction};

    #[test]
    fn events_flow_through_filter_map() {
        let domain = Domain::new(DomainConfig::sequential()).unwrap();
        let source = EventSource::<i32>::new(&domain);
        let evens = source.events().filter(|e| e % 2 == 0).map(|e| e * 10);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _obs = observe_events(&evens, move |event, _ctx| {
            log.lock().push(*event);
            ObserverAction::Continue
        });

        domain
            .transaction(|tx| {
                source.emit(tx, 1);
                source.emit(tx, 2);
                source.emit(tx, 3);
                source.emit(tx, 4);
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![20, 40]);
    }

    #[test]
    fn stale_events_are_not_replayed() {
        let domain = Domain::new(DomainConfig::sequential()).unwrap();
        let source = EventSource::<&'static str>::new(&domain);
        let all = source.events().map(|e| e.to_string());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _obs = observe_events(&all, move |event: &String, _ctx| {
            log.lock().push(event.clone());
            ObserverAction::Continue
        });

        domain.transaction(|tx| source.emit(tx, "first")).unwrap();
        domain.transaction(|tx| source.emit(tx, "second")).unwrap();

        assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);
    }
}
