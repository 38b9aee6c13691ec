//! Run context: cancellation and progress reporting
//!
//! These traits allow the engine to be used without depending on a
//! specific terminal UI.

use crate::types::{OperationKind, OperationOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Run-level cancellation signal
///
/// Once cancelled, the scheduler stops dispatching operations. Operations
/// already running are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for execution
///
/// All calls happen on the thread that called `execute`.
pub trait ProgressCallback {
    /// Called once with the number of operations that will run
    fn on_run_start(&mut self, operations: usize);

    /// Called when the first provider call of an operation is dispatched
    fn on_operation_start(&mut self, resource: &str, kind: OperationKind);

    /// Called when an operation settles (including skipped ones)
    fn on_operation_complete(&mut self, outcome: &OperationOutcome);

    /// Called after every operation settled
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _operations: usize) {}
    fn on_operation_start(&mut self, _resource: &str, _kind: OperationKind) {}
    fn on_operation_complete(&mut self, _outcome: &OperationOutcome) {}
    fn on_run_complete(&mut self) {}
}
