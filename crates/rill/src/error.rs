//! Core errors

use thiserror::Error;

use crate::types::NodeId;

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced from transactions and graph operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("attaching {node} would create a cycle")]
    CycleDetected { node: NodeId },

    #[error("tick callback panicked: {message}")]
    TickPanicked { message: String },

    #[error("invalid graph state: {message}")]
    InvalidState { message: String },

    #[error("continuation rejected by target domain: {message}")]
    ContinuationDispatch { message: String },

    #[error("invalid domain configuration: {message}")]
    InvalidConfig { message: String },
}
