//! Instance reconciler - imports vCenter virtual machines as local
//! instances.
//!
//! Instance passes run on a short interval, so most ticks only refresh the
//! attributes of instances that already correspond; the interval timer
//! promotes every Nth tick to a full pass that also creates and deletes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Reconciler;
use crate::attrs::has_changes;
use crate::clients::vcenter::VcInventory;
use crate::config::InstanceConfig;
use crate::error::SyncError;
use crate::matcher::{discovered_name, is_discovered, split_uuid_suffix, CandidateIndex, Claim};
use crate::report::{ItemOutcome, SkipReason, SyncObserver, SyncReport};
use crate::store::{InstanceStore, InstanceUpdate};
use crate::timer::IntervalTimer;

pub const DOMAIN: &str = "instance";

/// Instance properties that participate in drift detection.
const INSTANCE_CHECK_LIST: &[&str] = &[
    "power_state",
    "cpu_count",
    "memory_mb",
    "vmware_ostype",
    "instance_uuid",
];

const INSTANCE_INT_ATTRS: &[&str] = &["cpu_count", "memory_mb"];

pub struct InstanceReconciler {
    inventory: Arc<dyn VcInventory>,
    store: Arc<dyn InstanceStore>,
    observer: Arc<dyn SyncObserver>,
    config: InstanceConfig,
    page_size: u32,
    full_sync_timer: Mutex<IntervalTimer>,
}

impl InstanceReconciler {
    pub fn new(
        inventory: Arc<dyn VcInventory>,
        store: Arc<dyn InstanceStore>,
        observer: Arc<dyn SyncObserver>,
        config: InstanceConfig,
        page_size: u32,
    ) -> Self {
        let full_sync_timer = Mutex::new(IntervalTimer::new(
            config.full_sync_frequency,
            1,
            "full-instance-sync",
        ));
        Self {
            inventory,
            store,
            observer,
            config,
            page_size,
            full_sync_timer,
        }
    }
}

#[async_trait]
impl Reconciler for InstanceReconciler {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn interval(&self) -> Duration {
        self.config.sync_interval
    }

    async fn reconcile(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(DOMAIN);

        if !self.config.policy.enabled() {
            info!("instance sync is disabled");
            return Ok(report);
        }
        let full = self.full_sync_timer.lock().await.rings();
        debug!(full, "starting instance pass");

        let ignore = &self.config.policy.name_filter;
        let vms = self.inventory.list_vms(self.page_size).await?;
        let instances = self.store.list_instances().await?;

        let by_id: HashMap<&str, &crate::store::InstanceEntry> =
            instances.iter().map(|e| (e.id.as_str(), e)).collect();
        let ids: HashSet<&str> = instances.iter().map(|e| e.id.as_str()).collect();
        let mut index = CandidateIndex::new();
        for entry in &instances {
            index.insert(&entry.id, entry.instance_uuid(), Some(&entry.name));
        }

        let prefix = &self.config.policy.prefix;

        for vm in &vms {
            if ignore.contains(&vm.name) {
                debug!(vm = %vm.name, "ignored by configuration");
                report.record(
                    &*self.observer,
                    &vm.name,
                    ItemOutcome::Skipped(SkipReason::Filtered),
                );
                continue;
            }
            // Instance UUID first, then an embedded local id in the VM
            // name, then the prefixed display name.
            let claim = match &vm.instance_uuid {
                Some(uuid) => index.claim_by_uuid(uuid),
                None => Claim::NoMatch,
            };
            let (claim, target_name) = match claim {
                Claim::Matched(id) => (Claim::Matched(id), vm.name.clone()),
                _ => match split_uuid_suffix(&vm.name) {
                    Some((uuid, base)) if ids.contains(uuid.as_str()) => {
                        (index.claim_id(&uuid), base)
                    }
                    _ => {
                        let name = discovered_name(prefix, &vm.name);
                        (index.claim_by_name(&name), name)
                    }
                },
            };

            match claim {
                Claim::Matched(id) => {
                    let entry = by_id[id.as_str()];
                    let outcome = if has_changes(
                        &entry.properties,
                        &vm.attrs,
                        INSTANCE_CHECK_LIST,
                        INSTANCE_INT_ATTRS,
                    ) {
                        let update = InstanceUpdate {
                            properties: Some(vm.attrs.clone()),
                            ..Default::default()
                        };
                        match self.store.update_instance(&id, &update).await {
                            Ok(_) => ItemOutcome::Updated,
                            Err(e) => ItemOutcome::Failed(e.to_string()),
                        }
                    } else {
                        ItemOutcome::Unchanged
                    };
                    report.record(&*self.observer, &entry.name, outcome);
                }
                Claim::Collision(_) | Claim::NoMatch => {
                    if !full {
                        report.record(
                            &*self.observer,
                            &target_name,
                            ItemOutcome::Skipped(SkipReason::DeferredToFullSync),
                        );
                        continue;
                    }
                    if !self.config.policy.allow_create {
                        report.record(
                            &*self.observer,
                            &target_name,
                            ItemOutcome::Skipped(SkipReason::SyncDisabled),
                        );
                        continue;
                    }
                    let outcome = match self.store.create_instance(&target_name, &vm.attrs).await {
                        Ok(_) => ItemOutcome::Created,
                        Err(e) => ItemOutcome::Failed(e.to_string()),
                    };
                    report.record(&*self.observer, &target_name, outcome);
                }
            }
        }

        if full {
            for entry in &instances {
                if index.is_claimed(&entry.id) {
                    continue;
                }
                if !is_discovered(prefix, &entry.name) {
                    // Looks synced (carries a recorded UUID) but no longer
                    // provably ours; everything else is a user instance.
                    if entry.instance_uuid().is_some() {
                        report.record(
                            &*self.observer,
                            &entry.name,
                            ItemOutcome::Skipped(SkipReason::UserCreated),
                        );
                    }
                    continue;
                }
                if !self.config.policy.allow_delete {
                    report.record(
                        &*self.observer,
                        &entry.name,
                        ItemOutcome::Skipped(SkipReason::DeletionDisabled),
                    );
                    continue;
                }
                if entry.vcenter_ip() != Some(self.inventory.host_ip()) {
                    info!(
                        instance = %entry.name,
                        recorded = entry.vcenter_ip().unwrap_or("<none>"),
                        current = self.inventory.host_ip(),
                        "orphan belongs to a different vCenter, not deleting"
                    );
                    report.record(
                        &*self.observer,
                        &entry.name,
                        ItemOutcome::Skipped(SkipReason::ForeignInstallation),
                    );
                    continue;
                }
                let outcome = match self.store.delete_instance(&entry.id).await {
                    Ok(true) => ItemOutcome::Deleted,
                    Ok(false) => ItemOutcome::Failed("instance already gone".to_string()),
                    Err(e) => ItemOutcome::Failed(e.to_string()),
                };
                report.record(&*self.observer, &entry.name, outcome);
            }
        }

        self.observer.pass_finished(&report);
        Ok(report)
    }
}
