//! Observer registry
//!
//! The registry pins observer nodes alive while they are attached.
//! Unregistering drops the strong reference; the observer node dies and
//! its back-reference in the observed node is pruned lazily. Called
//! only from turn finalization, after propagation has quiesced, so an
//! observer never observes its own detach mid-tick.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::domain::Domain;
use crate::graph::NodeRef;
use crate::turn::Turn;
use crate::types::ObserverId;

/// Set of attached observers, keyed by stable identity
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Mutex<IndexMap<ObserverId, NodeRef>>,
}

impl ObserverRegistry {
    pub(crate) fn register(&self, id: ObserverId, node: NodeRef) {
        self.entries.lock().insert(id, node);
    }

    /// Idempotent: unregistering an unknown id is a no-op.
    pub(crate) fn unregister(&self, id: ObserverId) {
        if self.entries.lock().shift_remove(&id).is_some() {
            trace!(observer = %id, "observer unregistered");
        }
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Handed to observer callbacks while they fire
pub struct ObserverContext<'a> {
    turn: &'a Turn,
    observer: ObserverId,
}

impl<'a> ObserverContext<'a> {
    pub(crate) fn new(turn: &'a Turn, observer: ObserverId) -> Self {
        Self { turn, observer }
    }

    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    pub fn turn_id(&self) -> u64 {
        self.turn.id()
    }

    /// Record a continuation to run as a later turn in `domain`
    pub fn record_continuation(
        &self,
        domain: &Arc<Domain>,
        input: impl FnOnce(&mut crate::domain::Transaction<'_>) + Send + 'static,
    ) {
        self.turn.record_continuation(domain, input);
    }
}
