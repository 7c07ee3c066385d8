//! Signal nodes
//!
//! A signal is a continuous value. Input signals ([`VarSignal`]) stage
//! changes through a transaction and publish them at admission;
//! computed signals re-evaluate when a predecessor pulses and pulse
//! only when their own value actually changed. [`select`] is the
//! dynamic node: it swaps its data predecessor when its selector flips.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::{DomainRef, Transaction};
use crate::graph::{Node, NodeOps, NodeRef};
use crate::turn::Turn;
use crate::types::TickResult;

/// Last-committed value of a signal, shared between the owning node and
/// its readers. Readers outside a turn see the last-committed value.
pub(crate) struct SignalCell<T> {
    value: Mutex<T>,
}

impl<T: Clone> SignalCell<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
        })
    }

    pub(crate) fn get(&self) -> T {
        self.value.lock().clone()
    }

    fn set(&self, value: T) {
        *self.value.lock() = value;
    }
}

enum StagedInput<T> {
    Set(T),
    Modify(Box<dyn FnOnce(&mut T) + Send>),
}

/// Input signal node: no predecessors, mutated by the host
struct VarNode<T> {
    cell: Arc<SignalCell<T>>,
    staged: Mutex<Vec<StagedInput<T>>>,
}

impl<T: Clone + PartialEq + Send + 'static> NodeOps for VarNode<T> {
    fn tick(&self, _turn: &Turn) -> TickResult {
        unreachable!("input nodes are applied, never ticked")
    }

    fn apply_input(&self, _turn: &Turn) -> bool {
        let staged = std::mem::take(&mut *self.staged.lock());
        if staged.is_empty() {
            return false;
        }
        let mut value = self.cell.get();
        for input in staged {
            match input {
                StagedInput::Set(v) => value = v,
                StagedInput::Modify(f) => f(&mut value),
            }
        }
        if value != self.cell.get() {
            self.cell.set(value);
            true
        } else {
            false
        }
    }

    fn is_input(&self) -> bool {
        true
    }

    fn dependency_count(&self) -> usize {
        0
    }
}

/// Host-mutable input signal
pub struct VarSignal<T> {
    domain: DomainRef,
    node: NodeRef,
    var: Arc<VarNode<T>>,
}

impl<T: Clone + PartialEq + Send + 'static> VarSignal<T> {
    pub fn new(domain: &DomainRef, initial: T) -> Self {
        let var = Arc::new(VarNode {
            cell: SignalCell::new(initial),
            staged: Mutex::new(Vec::new()),
        });
        let node = Node::create(domain, var.clone(), &[]);
        Self {
            domain: domain.clone(),
            node,
            var,
        }
    }

    /// Stage a new value; published when the turn admits inputs.
    pub fn set(&self, tx: &mut Transaction<'_>, value: T) {
        self.var.staged.lock().push(StagedInput::Set(value));
        tx.stage(&self.node);
    }

    /// Stage an in-place update, applied after earlier staged inputs.
    pub fn modify(&self, tx: &mut Transaction<'_>, f: impl FnOnce(&mut T) + Send + 'static) {
        self.var.staged.lock().push(StagedInput::Modify(Box::new(f)));
        tx.stage(&self.node);
    }

    /// Last-committed value
    pub fn get(&self) -> T {
        self.var.cell.get()
    }

    /// Read-only view usable as a dependency
    pub fn signal(&self) -> Signal<T> {
        Signal {
            domain: self.domain.clone(),
            node: self.node.clone(),
            cell: self.var.cell.clone(),
        }
    }
}

impl<T> Clone for VarSignal<T> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
            var: self.var.clone(),
        }
    }
}

/// Computed signal node: re-evaluates a pure closure over its
/// predecessors' cells
struct MapNode<T> {
    cell: Arc<SignalCell<T>>,
    eval: Box<dyn Fn() -> T + Send + Sync>,
    deps: usize,
}

impl<T: Clone + PartialEq + Send + 'static> NodeOps for MapNode<T> {
    fn tick(&self, _turn: &Turn) -> TickResult {
        let next = (self.eval)();
        if next != self.cell.get() {
            self.cell.set(next);
            TickResult::Pulsed
        } else {
            TickResult::IdlePulsed
        }
    }

    fn dependency_count(&self) -> usize {
        self.deps
    }
}

/// Read-only signal handle
pub struct Signal<T> {
    pub(crate) domain: DomainRef,
    pub(crate) node: NodeRef,
    pub(crate) cell: Arc<SignalCell<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            node: self.node.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Signal<T> {
    /// Last-committed value
    pub fn get(&self) -> T {
        self.cell.get()
    }

    pub fn level(&self) -> u32 {
        self.node.level()
    }

    pub fn predecessor_ids(&self) -> Vec<crate::types::NodeId> {
        self.node.predecessor_ids()
    }

    fn derived<U: Clone + PartialEq + Send + 'static>(
        domain: &DomainRef,
        eval: Box<dyn Fn() -> U + Send + Sync>,
        preds: &[NodeRef],
    ) -> Signal<U> {
        // Evaluate eagerly so the signal is readable before any turn.
        let cell = SignalCell::new(eval());
        let ops = Arc::new(MapNode {
            cell: cell.clone(),
            eval,
            deps: preds.len(),
        });
        let node = Node::create(domain, ops, preds);
        Signal {
            domain: domain.clone(),
            node,
            cell,
        }
    }

    /// Derived signal over one input
    pub fn map<U: Clone + PartialEq + Send + 'static>(
        &self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> Signal<U> {
        let src = self.cell.clone();
        Self::derived(
            &self.domain,
            Box::new(move || {
                let value = src.get();
                f(&value)
            }),
            &[self.node.clone()],
        )
    }

    /// Derived signal over two inputs
    pub fn map2<U, V>(
        &self,
        other: &Signal<U>,
        f: impl Fn(&T, &U) -> V + Send + Sync + 'static,
    ) -> Signal<V>
    where
        U: Clone + PartialEq + Send + 'static,
        V: Clone + PartialEq + Send + 'static,
    {
        let left = self.cell.clone();
        let right = other.cell.clone();
        Self::derived(
            &self.domain,
            Box::new(move || {
                let a = left.get();
                let b = right.get();
                f(&a, &b)
            }),
            &[self.node.clone(), other.node.clone()],
        )
    }
}

struct Branch<T> {
    node: NodeRef,
    cell: Arc<SignalCell<T>>,
}

/// Dynamic selector node: predecessors are `[selector, active branch]`;
/// flipping the selector rewires the data edge mid-turn
struct SelectNode<T> {
    cell: Arc<SignalCell<T>>,
    selector: Arc<SignalCell<bool>>,
    on_true: Branch<T>,
    on_false: Branch<T>,
    active: Mutex<bool>,
}

impl<T: Clone + PartialEq + Send + 'static> NodeOps for SelectNode<T> {
    fn tick(&self, _turn: &Turn) -> TickResult {
        let want = self.selector.get();
        {
            let mut active = self.active.lock();
            if *active != want {
                *active = want;
                let (from, to) = if want {
                    (&self.on_false, &self.on_true)
                } else {
                    (&self.on_true, &self.on_false)
                };
                return TickResult::Rewired {
                    detach: vec![from.node.clone()],
                    attach: vec![to.node.clone()],
                };
            }
        }
        let next = if want {
            self.on_true.cell.get()
        } else {
            self.on_false.cell.get()
        };
        if next != self.cell.get() {
            self.cell.set(next);
            TickResult::Pulsed
        } else {
            TickResult::IdlePulsed
        }
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn dependency_count(&self) -> usize {
        2
    }
}

/// Signal that follows `on_true` or `on_false` depending on `selector`,
/// depending only on the branch it currently follows
pub fn select<T: Clone + PartialEq + Send + 'static>(
    selector: &Signal<bool>,
    on_true: &Signal<T>,
    on_false: &Signal<T>,
) -> Signal<T> {
    let active = selector.get();
    let initial = if active {
        on_true.get()
    } else {
        on_false.get()
    };
    let cell = SignalCell::new(initial);
    let ops = Arc::new(SelectNode {
        cell: cell.clone(),
        selector: selector.cell.clone(),
        on_true: Branch {
            node: on_true.node.clone(),
            cell: on_true.cell.clone(),
        },
        on_false: Branch {
            node: on_false.node.clone(),
            cell: on_false.cell.clone(),
        },
        active: Mutex::new(active),
    });
    let branch = if active { on_true } else { on_false };
    let node = Node::create(
        &selector.domain,
        ops,
        &[selector.node.clone(), branch.node.clone()],
    );
    Signal {
        domain: selector.domain.clone(),
        node,
        cell,
    }
}
