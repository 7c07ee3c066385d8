//! Integration test harness for rill.
//!
//! Every end-to-end scenario is expected to behave identically across
//! all engine configurations, so the harness provides the engine
//! matrix and a thread-safe firing log for observer assertions.

use std::sync::Arc;

use parking_lot::Mutex;
use rill::{Domain, DomainConfig, DomainRef, EngineKind};

/// One domain per supported engine configuration, labeled for
/// assertion messages.
pub fn engine_matrix() -> Vec<(&'static str, DomainRef)> {
    init_tracing();
    vec![
        (
            "seq_toposort",
            Domain::new(DomainConfig::sequential_concurrent()).expect("valid config"),
        ),
        (
            "par_toposort",
            Domain::new(DomainConfig::parallel_concurrent(EngineKind::ToposortPar))
                .expect("valid config"),
        ),
        (
            "pulsecount",
            Domain::new(DomainConfig::parallel_concurrent(EngineKind::Pulsecount))
                .expect("valid config"),
        ),
        (
            "subtree",
            Domain::new(DomainConfig::parallel_concurrent(EngineKind::Subtree))
                .expect("valid config"),
        ),
    ]
}

/// Thread-safe log of observer firings
pub struct FiringLog<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> FiringLog<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: Clone> Default for FiringLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FiringLog<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

/// Install a subscriber once so `RUST_LOG` works in test runs
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
