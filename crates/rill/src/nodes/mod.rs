//! Built-in node kinds
//!
//! The engines only see [`crate::graph::NodeOps`]; these are the node
//! kinds a combinator layer builds on: input and computed signals, a
//! dynamic selector, event streams, and observers.

mod event;
mod observer;
mod signal;

pub use event::{EventSource, Events};
pub use observer::{Observer, observe, observe_events};
pub use signal::{Signal, VarSignal, select};
