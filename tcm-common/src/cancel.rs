//! Cooperative cancellation token shared between the presentation
//! layer and the worker.
//!
//! Cancellation is observed at loop boundaries only; no remote call is
//! interrupted mid-flight.

use crate::errors::PipelineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Cloning hands out another handle to the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Loop-boundary check: returns `PipelineError::Cancelled` once the
    /// flag is set.
    pub fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
