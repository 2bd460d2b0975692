//! Per-domain reconcilers.
//!
//! Each reconciler runs one fetch-match-diff-apply pass for its resource
//! domain. Domains are independent: they are scheduled separately and never
//! share state beyond the read-mostly configuration and the session handle.

pub mod instance;
pub mod portgroup;
pub mod template;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::report::SyncReport;

/// A reconcilable resource domain.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Domain name for logs and reports.
    fn domain(&self) -> &'static str;

    /// Polling interval; the scheduler restarts it after each completion.
    fn interval(&self) -> Duration;

    /// Run one pass. Errors abort the whole pass and are retried on the
    /// next scheduled tick; per-item failures are inside the report.
    async fn reconcile(&self) -> Result<SyncReport, SyncError>;
}
