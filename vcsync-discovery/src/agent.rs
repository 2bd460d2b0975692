//! Discovery agent. Owns the session, the store and one reconciler per
//! resource domain, and schedules each domain on its own interval.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::clients::vcenter::VcInventory;
use crate::config::DiscoveryConfig;
use crate::reconciler::instance::InstanceReconciler;
use crate::reconciler::portgroup::PortGroupReconciler;
use crate::reconciler::template::TemplateReconciler;
use crate::reconciler::Reconciler;
use crate::report::SyncObserver;
use crate::store::SqliteStore;
use crate::timer::run_on_interval;

pub struct DiscoveryAgent {
    reconcilers: Vec<Arc<dyn Reconciler>>,
}

impl DiscoveryAgent {
    pub fn new(
        config: &DiscoveryConfig,
        inventory: Arc<dyn VcInventory>,
        store: Arc<SqliteStore>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        let portgroup = PortGroupReconciler::new(
            Arc::clone(&inventory),
            store.clone(),
            Arc::clone(&observer),
            config.portgroup.clone(),
        );
        let template = TemplateReconciler::new(
            Arc::clone(&inventory),
            store.clone(),
            Arc::clone(&observer),
            config.template.clone(),
            config.vim.page_size,
        );
        let instance = InstanceReconciler::new(
            Arc::clone(&inventory),
            store,
            Arc::clone(&observer),
            config.instance.clone(),
            config.vim.page_size,
        );

        Self {
            reconcilers: vec![Arc::new(portgroup), Arc::new(template), Arc::new(instance)],
        }
    }

    /// Spawn one sync task per domain and run until shutdown. Domains are
    /// never serialized against each other; a slow pass in one domain only
    /// pushes back that domain's own next tick.
    pub async fn run(self) -> Result<()> {
        let mut handles = Vec::new();
        for reconciler in self.reconcilers {
            let domain = reconciler.domain();
            let interval = reconciler.interval();
            info!(domain, ?interval, "starting sync task");

            handles.push(tokio::spawn(async move {
                run_on_interval(domain, interval, || {
                    let reconciler = Arc::clone(&reconciler);
                    async move {
                        if let Err(e) = reconciler.reconcile().await {
                            error!(
                                domain = reconciler.domain(),
                                error = %e,
                                "pass aborted, retrying on next tick"
                            );
                        }
                    }
                })
                .await;
            }));
        }

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}
