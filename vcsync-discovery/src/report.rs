//! Per-pass outcome reporting.
//!
//! Every item processed in a reconciliation pass ends in exactly one
//! [`ItemOutcome`]. Skips are policy decisions, not failures; failures are
//! recorded and never abort the pass. The [`SyncObserver`] hook surfaces
//! outcomes without any control-flow dependency.

use tracing::{debug, error, info};

/// Why an item was intentionally not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The domain's sync-enable flag is off.
    SyncDisabled,
    /// Deletion candidate, but the domain's deletion flag is off.
    DeletionDisabled,
    /// Deletion candidate recorded against a different vCenter installation.
    ForeignInstallation,
    /// Local resource was not created by discovery.
    UserCreated,
    /// Excluded by the domain's name filter.
    Filtered,
    /// Create/delete deferred to the next full pass.
    DeferredToFullSync,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::SyncDisabled => "sync disabled",
            SkipReason::DeletionDisabled => "deletion disabled",
            SkipReason::ForeignInstallation => "foreign installation",
            SkipReason::UserCreated => "user created",
            SkipReason::Filtered => "filtered",
            SkipReason::DeferredToFullSync => "deferred to full sync",
        }
    }
}

/// Final outcome for a single resource in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ItemResult {
    pub name: String,
    pub outcome: ItemOutcome,
}

/// Aggregated result of one reconciliation pass for one domain.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub domain: &'static str,
    pub items: Vec<ItemResult>,
}

impl SyncReport {
    pub fn new(domain: &'static str) -> Self {
        Self {
            domain,
            items: Vec::new(),
        }
    }

    /// Record an outcome and notify the observer.
    pub fn record(&mut self, observer: &dyn SyncObserver, name: &str, outcome: ItemOutcome) {
        let item = ItemResult {
            name: name.to_string(),
            outcome,
        };
        observer.item(self.domain, &item);
        self.items.push(item);
    }

    fn count(&self, f: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| f(&i.outcome)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Created))
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Updated))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Deleted))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped(_)))
    }

    /// True when the pass applied no changes (idempotence check).
    pub fn is_noop(&self) -> bool {
        self.created() == 0 && self.updated() == 0 && self.deleted() == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "created={} updated={} deleted={} unchanged={} skipped={} failed={}",
            self.created(),
            self.updated(),
            self.deleted(),
            self.count(|o| matches!(o, ItemOutcome::Unchanged)),
            self.skipped(),
            self.failed(),
        )
    }
}

/// Hook surfacing per-item outcomes and pass completion.
pub trait SyncObserver: Send + Sync {
    fn item(&self, domain: &str, item: &ItemResult);
    fn pass_finished(&self, report: &SyncReport);
}

/// Observer that reports through tracing.
pub struct LogObserver;

impl SyncObserver for LogObserver {
    fn item(&self, domain: &str, item: &ItemResult) {
        match &item.outcome {
            ItemOutcome::Created => info!(domain, name = %item.name, "created"),
            ItemOutcome::Updated => info!(domain, name = %item.name, "updated"),
            ItemOutcome::Deleted => info!(domain, name = %item.name, "deleted"),
            ItemOutcome::Unchanged => debug!(domain, name = %item.name, "unchanged"),
            ItemOutcome::Skipped(reason) => {
                info!(domain, name = %item.name, reason = reason.as_str(), "skipped")
            }
            ItemOutcome::Failed(err) => error!(domain, name = %item.name, error = %err, "failed"),
        }
    }

    fn pass_finished(&self, report: &SyncReport) {
        info!(domain = report.domain, "pass finished: {}", report.summary());
    }
}

/// Observer that discards everything (for tests).
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn item(&self, _domain: &str, _item: &ItemResult) {}
    fn pass_finished(&self, _report: &SyncReport) {}
}
