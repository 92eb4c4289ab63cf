//! Undo actions for multi-step provisioning.
//!
//! Each step that creates a cloud resource registers the action that removes
//! it. If a later step fails the caller rolls back, which runs the registered
//! actions newest-first. Undo actions are best-effort: their failures are
//! logged and never replace the error that triggered the rollback.

use futures::future::BoxFuture;
use std::future::Future;
use tracing::{debug, warn};
use warmpool_core::Result;

struct Step {
    label: String,
    undo: BoxFuture<'static, Result<()>>,
}

/// A stack of pending undo actions.
#[derive(Default)]
pub struct Compensation {
    steps: Vec<Step>,
}

impl Compensation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the undo action for a step that just succeeded.
    ///
    /// The future is not polled until [`rollback`](Self::rollback).
    pub fn push<F>(&mut self, label: impl Into<String>, undo: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push(Step {
            label: label.into(),
            undo: Box::pin(undo),
        });
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keeps every resource; the registered actions are dropped unrun.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Runs all registered actions in reverse order.
    ///
    /// Returns how many of them failed.
    pub async fn rollback(mut self) -> usize {
        let steps = std::mem::take(&mut self.steps);
        let mut failed = 0;
        for step in steps.into_iter().rev() {
            match step.undo.await {
                Ok(()) => debug!(step = %step.label, "compensated"),
                Err(e) => {
                    failed += 1;
                    warn!(step = %step.label, error = %e, "compensation failed");
                }
            }
        }
        failed
    }
}

impl Drop for Compensation {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            warn!(
                pending = self.steps.len(),
                "compensation dropped without commit or rollback"
            );
        }
    }
}
