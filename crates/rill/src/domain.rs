//! Domain orchestrator
//!
//! A domain hosts one engine, one turn queue, and one observer
//! registry. Transactions run the full turn pipeline: admission (user
//! closure plus any merged inputs), input application, propagation,
//! finalization, and post-end continuation dispatch. Finalization and
//! queue release run on every exit path, including a panicking tick.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, info, instrument, trace};

use crate::engine::{PropagationEngine, build_engine};
use crate::error::{Error, Result};
use crate::graph::NodeRef;
use crate::observer::ObserverRegistry;
use crate::queue::{TurnGate, TurnQueue};
use crate::turn::{Continuation, InputFn, Turn, TurnState};
use crate::types::{DomainConfig, NodeId, ObserverId, TransactionMode, TurnFlags};

/// Shared handle to a domain
pub type DomainRef = Arc<Domain>;

/// A self-contained reactive graph with its own engine and turn queue
pub struct Domain {
    config: DomainConfig,
    engine: Box<dyn PropagationEngine>,
    queue: TurnQueue,
    observers: ObserverRegistry,
    next_turn_id: AtomicU64,
    next_node_id: AtomicU64,
    next_observer_id: AtomicU64,
}

impl Domain {
    pub fn new(config: DomainConfig) -> Result<DomainRef> {
        config.validate()?;
        info!(engine = %config.engine, concurrency = ?config.concurrency, "domain created");
        Ok(Arc::new(Self {
            engine: build_engine(config.engine),
            queue: TurnQueue::new(),
            observers: ObserverRegistry::default(),
            next_turn_id: AtomicU64::new(1),
            next_node_id: AtomicU64::new(0),
            next_observer_id: AtomicU64::new(0),
            config,
        }))
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn default_flags(&self) -> TurnFlags {
        self.config.default_flags()
    }

    pub(crate) fn engine(&self) -> &dyn PropagationEngine {
        self.engine.as_ref()
    }

    pub(crate) fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Number of currently attached observers
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn next_node_id(&self) -> NodeId {
        NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_observer_id(&self) -> ObserverId {
        ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Run a transaction with the domain's default flags
    pub fn transaction<R>(
        self: &Arc<Self>,
        input: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> Result<R> {
        self.do_transaction(self.default_flags(), input)
    }

    /// Run a transaction: admit a turn, stage inputs through the user
    /// closure, propagate, finalize, dispatch continuations.
    #[instrument(skip_all, fields(engine = %self.config.engine))]
    pub fn do_transaction<R>(
        self: &Arc<Self>,
        flags: TurnFlags,
        input: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> Result<R> {
        let exclusive = self.config.transaction_mode == TransactionMode::Exclusive;
        let gate = TurnGate::new(flags.allow_input_merging);
        if exclusive {
            self.queue.start(&gate);
        }
        let turn = Turn::new(self.next_turn_id.fetch_add(1, Ordering::Relaxed), flags);
        trace!(turn = turn.id(), "turn admitted");

        // Admission: the user closure stages inputs, then any closures
        // that merged into this turn while it was blocked.
        self.engine.on_turn_admission_start(&turn);
        let mut tx = Transaction::new(&turn);
        let mut failure: Option<Error> = None;
        let mut value: Option<R> = None;
        match catch_unwind(AssertUnwindSafe(|| input(&mut tx))) {
            Ok(v) => value = Some(v),
            Err(payload) => failure = Some(tick_panic(payload)),
        }
        if failure.is_none() && exclusive {
            for merged in gate.take_merged_inputs() {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| merged(&mut tx))) {
                    failure = Some(tick_panic(payload));
                    break;
                }
            }
        }
        self.engine.on_turn_admission_end(&turn);
        turn.advance_state(TurnState::Executing);

        if failure.is_none() {
            for staged in tx.take_changed() {
                if staged.apply_input(&turn) {
                    self.engine.on_turn_input_change(&staged, &turn);
                }
            }
            match catch_unwind(AssertUnwindSafe(|| self.engine.propagate(&turn))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failure = Some(err),
                Err(payload) => failure = Some(tick_panic(payload)),
            }
        }

        // Scoped release: even a failed turn detaches its queued
        // observers, releases the queue, and dispatches continuations.
        self.engine.on_turn_end(&turn);
        let continuations = turn.finalize(&self.observers);
        if exclusive {
            self.queue.end(&gate);
        }
        turn.advance_state(TurnState::Ended);
        trace!(turn = turn.id(), failed = failure.is_some(), "turn ended");
        self.dispatch_continuations(continuations);

        match (failure, value) {
            (Some(err), _) => Err(err),
            (None, Some(v)) => Ok(v),
            (None, None) => unreachable!("turn neither produced a value nor failed"),
        }
    }

    /// Submit inputs that may merge into a turn already waiting in the
    /// queue. If merged, the closure runs on the thread owning that
    /// turn and this call returns once the turn has ended; otherwise a
    /// regular transaction runs.
    pub fn async_transaction(
        self: &Arc<Self>,
        flags: TurnFlags,
        input: impl FnOnce(&mut Transaction<'_>) + Send + 'static,
    ) -> Result<()> {
        self.async_transaction_boxed(flags, Box::new(input))
    }

    fn async_transaction_boxed(self: &Arc<Self>, flags: TurnFlags, input: InputFn) -> Result<()> {
        let input = if self.config.transaction_mode == TransactionMode::Exclusive {
            match self.queue.try_merge(input) {
                Ok(()) => return Ok(()),
                Err(input) => input,
            }
        } else {
            input
        };
        self.do_transaction(flags, move |tx| input(tx))
    }

    /// Dispatch recorded continuations, in record order, as turns in
    /// their target domains. A rejected dispatch is logged and dropped;
    /// the producing turn has already ended.
    fn dispatch_continuations(&self, continuations: Vec<Continuation>) {
        for continuation in continuations {
            let target = continuation.target;
            let flags = target.default_flags();
            if let Err(err) = target.async_transaction_boxed(flags, continuation.input) {
                let err = Error::ContinuationDispatch {
                    message: err.to_string(),
                };
                error!(error = %err, "continuation dropped");
            }
        }
    }
}

fn tick_panic(payload: Box<dyn std::any::Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    Error::TickPanicked { message }
}

/// Staging context handed to transaction closures
///
/// Input handles stage values through it; it records which input nodes
/// were touched so admission knows what to apply.
pub struct Transaction<'t> {
    turn: &'t Turn,
    changed: Vec<NodeRef>,
    seen: HashSet<NodeId>,
}

impl<'t> Transaction<'t> {
    pub(crate) fn new(turn: &'t Turn) -> Self {
        Self {
            turn,
            changed: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// The turn this transaction stages into
    pub fn turn(&self) -> &'t Turn {
        self.turn
    }

    /// Record an input node as touched. Idempotent per node.
    pub(crate) fn stage(&mut self, node: &NodeRef) {
        if self.seen.insert(node.id()) {
            self.changed.push(node.clone());
        }
    }

    fn take_changed(&mut self) -> Vec<NodeRef> {
        self.seen.clear();
        std::mem::take(&mut self.changed)
    }
}
