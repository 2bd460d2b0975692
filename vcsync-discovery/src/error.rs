//! Pass-level error taxonomy.
//!
//! Only errors that abort an entire pass live here. Per-item failures are
//! recorded as `ItemOutcome::Failed` in the pass report and never propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A required remote parent object (cluster, host) was not found.
    /// Fatal for the current pass; retried on the next scheduled tick.
    #[error("{0} not found in vCenter inventory")]
    Lookup(String),

    /// Session or HTTP failure talking to vCenter. Aborts the pass; the
    /// fixed-interval schedule is the only retry mechanism.
    #[error("vCenter transport error: {0}")]
    Transport(String),

    /// Local store failure while loading the domain's resources.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
