//! Rill
//!
//! A reactive-dataflow core: build a DAG of signals and event streams
//! inside a [`Domain`], change inputs through transactional turns, and
//! let one of three interchangeable propagation engines deliver the
//! change to every dependent node and observer, glitch-free.
//!
//! ```
//! use rill::{Domain, DomainConfig, ObserverAction, VarSignal, observe};
//!
//! let domain = Domain::new(DomainConfig::sequential()).unwrap();
//! let a = VarSignal::new(&domain, 1);
//! let b = VarSignal::new(&domain, 2);
//! let sum = a.signal().map2(&b.signal(), |a, b| a + b);
//! assert_eq!(sum.get(), 3);
//!
//! let _obs = observe(&sum, |value, _ctx| {
//!     println!("sum = {value}");
//!     ObserverAction::Continue
//! });
//!
//! domain.transaction(|tx| a.set(tx, 10)).unwrap();
//! assert_eq!(sum.get(), 12);
//! ```

pub mod domain;
pub mod engine;
pub mod error;
pub mod graph;
pub mod nodes;
pub mod observer;
mod queue;
pub mod turn;
pub mod types;

pub use domain::{Domain, DomainRef, Transaction};
pub use engine::PropagationEngine;
pub use error::{Error, Result};
pub use graph::{Node, NodeOps, NodeRef};
pub use nodes::{EventSource, Events, Observer, Signal, VarSignal, observe, observe_events, select};
pub use observer::{ObserverContext, ObserverRegistry};
pub use turn::{Turn, TurnState};
pub use types::{
    ConcurrencyTag, DomainConfig, EngineKind, NodeId, ObserverAction, ObserverId, TickResult,
    TransactionMode, TurnFlags,
};
