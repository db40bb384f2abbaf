// # Status Reporter Trait
//
// Reports the outcome of each batch to the upstream orchestrator.
//
// Reporting is fire-and-forget from the dispatcher's point of view: the
// dispatcher enqueues outcomes and a separate worker calls the reporter, so
// a slow orchestrator never delays reconciliation.

use async_trait::async_trait;

use crate::model::BatchStatus;

/// Trait for batch outcome reporters
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Report the outcome of batch `batch_id`
    ///
    /// Errors are logged by the caller and never retried.
    async fn report(&self, batch_id: i64, status: BatchStatus) -> Result<(), crate::Error>;
}
