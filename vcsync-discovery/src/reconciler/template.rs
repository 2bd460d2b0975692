//! Template reconciler - imports vCenter VM templates as local images.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::attrs::{changed_keys, get_int, get_str};
use crate::clients::vcenter::{TemplateInfo, VcInventory};
use crate::config::TemplateConfig;
use crate::error::SyncError;
use crate::matcher::{CandidateIndex, Claim};
use crate::report::{ItemOutcome, SkipReason, SyncObserver, SyncReport};
use crate::store::{ImageStore, ImageUpdate};

pub const DOMAIN: &str = "template";

/// Image properties that participate in drift detection.
const PROPERTY_CHECK_LIST: &[&str] = &[
    "template_name",
    "vmware_ostype",
    "template_guestfullname",
    "vmware_adaptertype",
    "vmware_disktype",
    "hw_vif_model",
    "vmware_template",
    "template_instanceuuid",
    "vcenter_ip",
    "vmware_path",
    "vmware_toolsversion",
    "nic_num",
    "root_disk_size",
    "size",
];

/// Subset of the check list compared as integers.
const INT_ATTR_LIST: &[&str] = &["vmware_toolsversion", "nic_num", "root_disk_size", "size"];

/// Remote template snapshot for one pass.
///
/// Owned by a single reconciler and invalidated at the start of every pass,
/// so a pass always works on a fresh fetch but never fetches twice.
#[derive(Default)]
struct TemplateCache {
    entries: Option<Vec<TemplateInfo>>,
}

impl TemplateCache {
    fn invalidate(&mut self) {
        self.entries = None;
    }

    async fn get_or_fetch(
        &mut self,
        inventory: &dyn VcInventory,
        page_size: u32,
    ) -> Result<Vec<TemplateInfo>, SyncError> {
        if self.entries.is_none() {
            self.entries = Some(inventory.list_templates(page_size).await?);
        }
        Ok(self.entries.clone().unwrap_or_default())
    }
}

pub struct TemplateReconciler {
    inventory: Arc<dyn VcInventory>,
    store: Arc<dyn ImageStore>,
    observer: Arc<dyn SyncObserver>,
    config: TemplateConfig,
    page_size: u32,
    cache: Mutex<TemplateCache>,
}

impl TemplateReconciler {
    pub fn new(
        inventory: Arc<dyn VcInventory>,
        store: Arc<dyn ImageStore>,
        observer: Arc<dyn SyncObserver>,
        config: TemplateConfig,
        page_size: u32,
    ) -> Self {
        Self {
            inventory,
            store,
            observer,
            config,
            page_size,
            cache: Mutex::new(TemplateCache::default()),
        }
    }
}

#[async_trait]
impl Reconciler for TemplateReconciler {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn interval(&self) -> Duration {
        self.config.sync_interval
    }

    async fn reconcile(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(DOMAIN);

        if !self.config.policy.enabled() {
            info!("template sync is disabled");
            return Ok(report);
        }

        let templates = {
            let mut cache = self.cache.lock().await;
            cache.invalidate();
            cache.get_or_fetch(&*self.inventory, self.page_size).await?
        };
        let images = self.store.list_template_images().await?;

        let by_id: HashMap<&str, &crate::store::ImageEntry> =
            images.iter().map(|img| (img.id.as_str(), img)).collect();
        let mut index = CandidateIndex::new();
        for img in &images {
            index.insert(&img.id, img.template_instance_uuid(), img.template_name());
        }

        for tpl in &templates {
            let Some(template_name) = get_str(&tpl.attrs, "template_name").map(str::to_string)
            else {
                report.record(
                    &*self.observer,
                    &tpl.name,
                    ItemOutcome::Failed("template has no template_name property".to_string()),
                );
                continue;
            };
            let remote_size = get_int(&tpl.attrs, "size").unwrap_or(0);

            // Instance UUID is the primary identity; display name is the
            // fallback when neither side carries a UUID match.
            let (claim, via_uuid) = match get_str(&tpl.attrs, "template_instanceuuid") {
                Some(uuid) => match index.claim_by_uuid(uuid) {
                    Claim::NoMatch => (index.claim_by_name(&template_name), false),
                    claim => (claim, true),
                },
                None => (index.claim_by_name(&template_name), false),
            };

            match claim {
                Claim::Matched(id) => {
                    let image = by_id[id.as_str()];
                    let outcome = if image.size_bytes == 0 && remote_size > 0 {
                        // Size is only known after creation; a zero local
                        // size is corrected regardless of the check list.
                        info!(image = %image.name, size = remote_size, "backfilling image size");
                        let update = ImageUpdate {
                            size_bytes: Some(remote_size),
                            properties: (!via_uuid).then(|| tpl.attrs.clone()),
                            ..Default::default()
                        };
                        match self.store.update_image(&id, &update).await {
                            Ok(_) => ItemOutcome::Updated,
                            Err(e) => ItemOutcome::Failed(e.to_string()),
                        }
                    } else {
                        let changed = changed_keys(
                            &image.properties,
                            &tpl.attrs,
                            PROPERTY_CHECK_LIST,
                            INT_ATTR_LIST,
                        );
                        if changed.is_empty() {
                            ItemOutcome::Unchanged
                        } else {
                            info!(image = %image.name, ?changed, "image properties drifted");
                            // UUID matches replace the property set; name
                            // matches merge over what is already recorded.
                            let properties = if via_uuid {
                                tpl.attrs.clone()
                            } else {
                                let mut merged = image.properties.clone();
                                merged.extend(tpl.attrs.clone());
                                merged
                            };
                            let update = ImageUpdate {
                                name: Some(template_name.clone()),
                                properties: Some(properties),
                                ..Default::default()
                            };
                            match self.store.update_image(&id, &update).await {
                                Ok(_) => ItemOutcome::Updated,
                                Err(e) => ItemOutcome::Failed(e.to_string()),
                            }
                        }
                    };
                    report.record(&*self.observer, &template_name, outcome);
                }
                Claim::Collision(_) | Claim::NoMatch => {
                    if !self.config.policy.allow_create {
                        report.record(
                            &*self.observer,
                            &template_name,
                            ItemOutcome::Skipped(SkipReason::SyncDisabled),
                        );
                        continue;
                    }
                    // Create with size 0, then write the real size; the
                    // backfill only runs once the parent create succeeded.
                    let outcome = match self.store.create_image(&template_name, 0, &tpl.attrs).await
                    {
                        Ok(image) => {
                            let update = ImageUpdate {
                                size_bytes: Some(remote_size),
                                ..Default::default()
                            };
                            match self.store.update_image(&image.id, &update).await {
                                Ok(_) => ItemOutcome::Created,
                                Err(e) => {
                                    ItemOutcome::Failed(format!("size backfill failed: {}", e))
                                }
                            }
                        }
                        Err(e) => ItemOutcome::Failed(e.to_string()),
                    };
                    report.record(&*self.observer, &template_name, outcome);
                }
            }
        }

        // Local images no remote template claimed are orphans.
        info!(
            allow_deletion = self.config.policy.allow_delete,
            "processing orphan template images"
        );
        for image in &images {
            if index.is_claimed(&image.id) {
                continue;
            }
            let Some(instance_uuid) = image.template_instance_uuid() else {
                continue;
            };
            debug!(orphan = %image.name, "orphan template image");

            match self.inventory.vm_exists(instance_uuid).await {
                Ok(true) => {
                    info!(image = %image.name, "template has been converted to a VM");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(image = %image.name, error = %e, "orphan check failed");
                    report.record(&*self.observer, &image.name, ItemOutcome::Failed(e.to_string()));
                    continue;
                }
            }

            if !self.config.policy.allow_delete {
                report.record(
                    &*self.observer,
                    &image.name,
                    ItemOutcome::Skipped(SkipReason::DeletionDisabled),
                );
                continue;
            }
            // Never delete an image recorded against another vCenter.
            if image.vcenter_ip() != Some(self.inventory.host_ip()) {
                info!(
                    image = %image.name,
                    recorded = image.vcenter_ip().unwrap_or("<none>"),
                    current = self.inventory.host_ip(),
                    "orphan belongs to a different vCenter, not deleting"
                );
                report.record(
                    &*self.observer,
                    &image.name,
                    ItemOutcome::Skipped(SkipReason::ForeignInstallation),
                );
                continue;
            }
            let outcome = match self.store.delete_image(&image.id).await {
                Ok(true) => ItemOutcome::Deleted,
                Ok(false) => ItemOutcome::Failed("image already gone".to_string()),
                Err(e) => ItemOutcome::Failed(e.to_string()),
            };
            report.record(&*self.observer, &image.name, outcome);
        }

        self.observer.pass_finished(&report);
        Ok(report)
    }
}
