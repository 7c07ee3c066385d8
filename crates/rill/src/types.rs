//! Core identifier and configuration types
//!
//! Ids are plain newtypes; configuration enums select which
//! engine/turn-queue pairing a domain instantiates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node, allocated per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Unique identifier for an observer, allocated per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Result of evaluating a node within a turn
pub enum TickResult {
    /// Output changed; successors must be scheduled
    Pulsed,
    /// Evaluated without a downstream effect; satisfies waiting
    /// successors but propagates nothing
    IdlePulsed,
    /// The node changed its own predecessor set mid-tick. The engine
    /// applies the edge delta, re-levels, and re-schedules the node.
    Rewired {
        detach: Vec<crate::graph::NodeRef>,
        attach: Vec<crate::graph::NodeRef>,
    },
}

impl fmt::Debug for TickResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickResult::Pulsed => write!(f, "Pulsed"),
            TickResult::IdlePulsed => write!(f, "IdlePulsed"),
            TickResult::Rewired { detach, attach } => f
                .debug_struct("Rewired")
                .field("detach", &detach.len())
                .field("attach", &attach.len())
                .finish(),
        }
    }
}

/// What an observer callback wants to happen to the observer itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverAction {
    /// Stay attached
    Continue,
    /// Queue this observer for detach when the turn finalizes
    StopAndDetach,
}

/// Per-turn admission flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFlags {
    /// Allow later inputs to merge into this turn while it is still
    /// waiting behind its predecessor
    pub allow_input_merging: bool,
}

impl TurnFlags {
    pub const MERGING: TurnFlags = TurnFlags {
        allow_input_merging: true,
    };
}

/// Propagation engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// Level-ordered, ticked on the calling thread
    ToposortSeq,
    /// Level-ordered, each level batch evaluated in parallel
    ToposortPar,
    /// Mark phase + parallel wavefront over pending-predecessor counts
    Pulsecount,
    /// Parallel wavefront restricted to the dirty subtree
    Subtree,
}

impl EngineKind {
    /// All engine kinds, for test matrices
    pub const ALL: [EngineKind; 4] = [
        EngineKind::ToposortSeq,
        EngineKind::ToposortPar,
        EngineKind::Pulsecount,
        EngineKind::Subtree,
    ];

    /// Whether this engine ticks nodes on worker threads
    pub fn is_parallel(&self) -> bool {
        !matches!(self, EngineKind::ToposortSeq)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::ToposortSeq => "toposort_seq",
            EngineKind::ToposortPar => "toposort_par",
            EngineKind::Pulsecount => "pulsecount",
            EngineKind::Subtree => "subtree",
        };
        write!(f, "{name}")
    }
}

/// How turns submitted from multiple threads are admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMode {
    /// Turns are serialized by the domain's turn queue
    Exclusive,
    /// No serialization; the caller guarantees one thread at a time
    None,
}

/// Domain concurrency profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyTag {
    /// Single-threaded use, no turn queue
    Sequential,
    /// Concurrent submitters, sequential propagation
    SequentialConcurrent,
    /// Concurrent submitters, parallel propagation
    ParallelConcurrent,
}

/// Configuration a domain is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub engine: EngineKind,
    pub transaction_mode: TransactionMode,
    pub concurrency: ConcurrencyTag,
    /// Default admission flags for turns that do not specify their own
    pub input_merging: bool,
}

impl DomainConfig {
    /// Single-threaded domain: sequential toposort, no turn queue.
    pub fn sequential() -> Self {
        Self {
            engine: EngineKind::ToposortSeq,
            transaction_mode: TransactionMode::None,
            concurrency: ConcurrencyTag::Sequential,
            input_merging: false,
        }
    }

    /// Concurrent submitters, sequential propagation.
    pub fn sequential_concurrent() -> Self {
        Self {
            engine: EngineKind::ToposortSeq,
            transaction_mode: TransactionMode::Exclusive,
            concurrency: ConcurrencyTag::SequentialConcurrent,
            input_merging: false,
        }
    }

    /// Concurrent submitters, parallel propagation with the given engine.
    pub fn parallel_concurrent(engine: EngineKind) -> Self {
        Self {
            engine,
            transaction_mode: TransactionMode::Exclusive,
            concurrency: ConcurrencyTag::ParallelConcurrent,
            input_merging: false,
        }
    }

    pub fn with_input_merging(mut self, on: bool) -> Self {
        self.input_merging = on;
        self
    }

    /// Default admission flags derived from the domain configuration
    pub fn default_flags(&self) -> TurnFlags {
        TurnFlags {
            allow_input_merging: self.input_merging,
        }
    }

    /// Check the engine/concurrency pairing is one this core supports
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        use crate::error::Error;

        let ok = match self.concurrency {
            ConcurrencyTag::Sequential => {
                self.engine == EngineKind::ToposortSeq
                    && self.transaction_mode == TransactionMode::None
            }
            ConcurrencyTag::SequentialConcurrent => {
                self.engine == EngineKind::ToposortSeq
                    && self.transaction_mode == TransactionMode::Exclusive
            }
            ConcurrencyTag::ParallelConcurrent => {
                self.engine.is_parallel()
                    && self.transaction_mode == TransactionMode::Exclusive
            }
        };

        if ok {
            Ok(())
        } else {
            Err(Error::InvalidConfig {
                message: format!(
                    "{:?} does not pair with engine {} / mode {:?}",
                    self.concurrency, self.engine, self.transaction_mode
                ),
            })
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self::sequential_concurrent()
    }
}
