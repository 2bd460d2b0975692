//! Port group reconciler - imports vCenter port groups as local networks.
//!
//! A port group is comparable by the triple (name, vlan id, physical
//! device). For cluster scope only triples present on every host are
//! importable; host-local leftovers are dropped because they are not yet
//! uniformly configured.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::clients::vcenter::{DvsPortGroup, RawPortGroup, VcInventory};
use crate::config::{PortGroupConfig, Scope};
use crate::error::SyncError;
use crate::matcher::{discovered_name, is_discovered, split_uuid_suffix};
use crate::report::{ItemOutcome, SkipReason, SyncObserver, SyncReport};
use crate::store::{NetworkEntry, NetworkStore};

pub const DOMAIN: &str = "portgroup";

/// The attribute triple a port group reduces to once the vswitch has been
/// mapped to a physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortGroupInfo {
    pub name: String,
    pub vlan_id: i64,
    pub physical_dev: String,
}

/// Triples present, by value equality, in every host's list.
pub fn common_port_groups(per_host: &HashMap<String, Vec<PortGroupInfo>>) -> Vec<PortGroupInfo> {
    let mut hosts = per_host.values();
    let Some(first) = hosts.next() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|pg| per_host.values().all(|list| list.contains(pg)))
        .cloned()
        .collect()
}

/// VLAN 0 is untagged: flat network with no segmentation id. Any other tag
/// is a vlan network with the tag as segmentation id.
pub fn segment_values(vlan_id: i64) -> (&'static str, Option<i64>) {
    if vlan_id == 0 {
        ("flat", None)
    } else {
        ("vlan", Some(vlan_id))
    }
}

/// Map standard port groups to triples: translate the vswitch through the
/// configured mapping (unmapped vswitches are dropped) and apply the name
/// allow-list (empty allows everything).
fn map_standard(
    raw: &[RawPortGroup],
    vswitch_map: &HashMap<String, String>,
    filter: &[String],
) -> Vec<PortGroupInfo> {
    raw.iter()
        .filter_map(|pg| {
            let physical_dev = vswitch_map.get(&pg.vswitch)?;
            if !filter.is_empty() && !filter.contains(&pg.name) {
                return None;
            }
            Some(PortGroupInfo {
                name: pg.name.clone(),
                vlan_id: pg.vlan_id,
                physical_dev: physical_dev.clone(),
            })
        })
        .collect()
}

/// Map distributed port groups to triples. Trunk/range configurations carry
/// no single vlan and are skipped. With `required_hosts` set (cluster
/// scope), the port group must span every host in the cluster.
fn map_dvs(
    dvs: &[DvsPortGroup],
    required_hosts: Option<&[String]>,
    vswitch_map: &HashMap<String, String>,
    filter: &[String],
) -> Vec<PortGroupInfo> {
    dvs.iter()
        .filter_map(|pg| {
            let vlan_id = match pg.vlan {
                Some(vlan_id) => vlan_id,
                None => {
                    debug!(portgroup = %pg.name, "skipping trunk/range dvs port group");
                    return None;
                }
            };
            if let Some(required) = required_hosts {
                let covered: HashSet<&String> = pg.hosts.iter().collect();
                if !required.iter().all(|h| covered.contains(h)) {
                    debug!(portgroup = %pg.name, "dvs port group does not span all cluster hosts");
                    return None;
                }
            }
            let physical_dev = vswitch_map.get(&pg.vswitch)?;
            if !filter.is_empty() && !filter.contains(&pg.name) {
                return None;
            }
            Some(PortGroupInfo {
                name: pg.name.clone(),
                vlan_id,
                physical_dev: physical_dev.clone(),
            })
        })
        .collect()
}

pub struct PortGroupReconciler {
    inventory: Arc<dyn VcInventory>,
    store: Arc<dyn NetworkStore>,
    observer: Arc<dyn SyncObserver>,
    config: PortGroupConfig,
}

impl PortGroupReconciler {
    pub fn new(
        inventory: Arc<dyn VcInventory>,
        store: Arc<dyn NetworkStore>,
        observer: Arc<dyn SyncObserver>,
        config: PortGroupConfig,
    ) -> Self {
        Self {
            inventory,
            store,
            observer,
            config,
        }
    }

    /// Fetch and reduce the remote side to importable triples. Standard port
    /// groups are collected per host and intersected for cluster scope; DVS
    /// port groups use the host-coverage check instead.
    async fn fetch_remote(&self, scope: &Scope) -> Result<Vec<PortGroupInfo>, SyncError> {
        let vswitch_map = self.config.vswitch_map();
        let filter = &self.config.policy.name_filter;

        let mut list = match scope {
            Scope::Host(host) => {
                let standard = self.inventory.standard_port_groups(host).await?;
                let mut list = map_standard(&standard, &vswitch_map, filter);
                let dvs = self.inventory.dvs_port_groups(scope).await?;
                list.extend(map_dvs(&dvs, None, &vswitch_map, filter));
                list
            }
            Scope::Cluster(cluster) => {
                let hosts = self.inventory.hosts_in_cluster(cluster).await?;
                let mut per_host = HashMap::new();
                for host in &hosts {
                    let standard = self.inventory.standard_port_groups(host).await?;
                    per_host.insert(host.clone(), map_standard(&standard, &vswitch_map, filter));
                    debug!(host = %host, portgroups = per_host[host].len(), "collected port groups");
                }
                let mut list = common_port_groups(&per_host);
                let dvs = self.inventory.dvs_port_groups(scope).await?;
                list.extend(map_dvs(&dvs, Some(&hosts), &vswitch_map, filter));
                list
            }
        };

        // Standard and DVS lists can both carry the same triple.
        let mut seen = HashSet::new();
        list.retain(|pg| seen.insert(pg.clone()));
        Ok(list)
    }

    /// Local networks eligible for deletion: discovered, carrying a
    /// segment, and no longer present as a remote triple.
    fn delete_candidates<'a>(
        &self,
        locals: &'a [NetworkEntry],
        remote: &[PortGroupInfo],
    ) -> Vec<&'a NetworkEntry> {
        let prefix = &self.config.policy.prefix;
        locals
            .iter()
            .filter(|net| {
                if !is_discovered(prefix, &net.name) {
                    return false;
                }
                let Some(segment) = &net.segment else {
                    return false;
                };
                let triple = PortGroupInfo {
                    name: net.name[prefix.len()..].to_string(),
                    vlan_id: segment.segmentation_id.unwrap_or(0),
                    physical_dev: segment.physical_network.clone(),
                };
                !remote.contains(&triple)
            })
            .collect()
    }

    /// Resolve the local name a remote port group corresponds to. A
    /// UUID-shaped suffix marks a port group created from a network id: if
    /// that network exists here it is ours and corresponds under the base
    /// name; otherwise it belongs to another installation and is mirrored
    /// under its full, prefixed name.
    async fn resolve_target_name(&self, pg_name: &str) -> Result<String, String> {
        let prefix = &self.config.policy.prefix;
        match split_uuid_suffix(pg_name) {
            Some((uuid, base)) => match self.store.get_network(&uuid).await {
                Ok(Some(_)) => {
                    info!(portgroup = %pg_name, "port group was created by this installation");
                    Ok(base)
                }
                Ok(None) => {
                    let name = discovered_name(prefix, pg_name);
                    info!(portgroup = %pg_name, import_as = %name,
                          "port group was created by another installation, mirroring");
                    Ok(name)
                }
                Err(e) => Err(e.to_string()),
            },
            None => Ok(discovered_name(prefix, pg_name)),
        }
    }
}

#[async_trait]
impl Reconciler for PortGroupReconciler {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn interval(&self) -> Duration {
        self.config.sync_interval
    }

    async fn reconcile(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(DOMAIN);

        if !self.config.policy.enabled() {
            info!("port group sync is disabled");
            return Ok(report);
        }
        let Some(scope) = &self.config.scope else {
            warn!("no cluster or host scope configured, skipping port group pass");
            return Ok(report);
        };

        let remote = self.fetch_remote(scope).await?;
        let locals = self.store.list_networks().await?;
        let delete_candidates = self.delete_candidates(&locals, &remote);

        let mut by_name: HashMap<&str, Vec<&NetworkEntry>> = HashMap::new();
        for net in &locals {
            by_name.entry(net.name.as_str()).or_default().push(net);
        }

        let mut claimed: HashSet<String> = HashSet::new();

        for pg in &remote {
            let target_name = match self.resolve_target_name(&pg.name).await {
                Ok(name) => name,
                Err(e) => {
                    report.record(&*self.observer, &pg.name, ItemOutcome::Failed(e));
                    continue;
                }
            };
            let (network_type, segmentation_id) = segment_values(pg.vlan_id);
            let candidates = by_name.get(target_name.as_str());

            // Exact triple match: nothing to do.
            let exact = candidates.and_then(|nets| {
                nets.iter().find(|net| {
                    !claimed.contains(&net.id)
                        && net.segment.as_ref().is_some_and(|s| {
                            s.segmentation_id.unwrap_or(0) == pg.vlan_id
                                && s.physical_network == pg.physical_dev
                        })
                })
            });
            if let Some(net) = exact {
                claimed.insert(net.id.clone());
                report.record(&*self.observer, &net.name, ItemOutcome::Unchanged);
                continue;
            }

            // Name match with drifted segment attributes: update in place.
            let name_match =
                candidates.and_then(|nets| nets.iter().find(|net| !claimed.contains(&net.id)));
            if let Some(net) = name_match {
                claimed.insert(net.id.clone());
                let result = if net.segment.is_some() {
                    self.store
                        .update_segment(&net.id, network_type, segmentation_id, &pg.physical_dev)
                        .await
                        .map(|_| ())
                } else {
                    self.store
                        .create_segment(&net.id, network_type, segmentation_id, &pg.physical_dev)
                        .await
                        .map(|_| ())
                };
                let outcome = match result {
                    Ok(()) => ItemOutcome::Updated,
                    Err(e) => ItemOutcome::Failed(e.to_string()),
                };
                report.record(&*self.observer, &net.name, outcome);
                continue;
            }

            // No correspondence: create network, then its segment.
            if !self.config.policy.allow_create {
                report.record(
                    &*self.observer,
                    &target_name,
                    ItemOutcome::Skipped(SkipReason::SyncDisabled),
                );
                continue;
            }
            match self.store.create_network(&target_name).await {
                Ok(net) => {
                    claimed.insert(net.id.clone());
                    let outcome = match self
                        .store
                        .create_segment(&net.id, network_type, segmentation_id, &pg.physical_dev)
                        .await
                    {
                        Ok(_) => ItemOutcome::Created,
                        Err(e) => ItemOutcome::Failed(format!("segment creation failed: {}", e)),
                    };
                    report.record(&*self.observer, &target_name, outcome);
                }
                // Parent failed, segment creation is skipped.
                Err(e) => {
                    report.record(&*self.observer, &target_name, ItemOutcome::Failed(e.to_string()));
                }
            }
        }

        // Deletion is delete-only; networks matched above are never
        // deletion candidates even if their old triple vanished.
        for net in delete_candidates {
            if claimed.contains(&net.id) {
                continue;
            }
            if !self.config.policy.allow_delete {
                report.record(
                    &*self.observer,
                    &net.name,
                    ItemOutcome::Skipped(SkipReason::DeletionDisabled),
                );
                continue;
            }
            let outcome = match self.store.delete_network(&net.id).await {
                Ok(true) => ItemOutcome::Deleted,
                Ok(false) => ItemOutcome::Failed("network already gone".to_string()),
                Err(e) => ItemOutcome::Failed(e.to_string()),
            };
            report.record(&*self.observer, &net.name, outcome);
        }

        self.observer.pass_finished(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(name: &str, vlan_id: i64, physical_dev: &str) -> PortGroupInfo {
        PortGroupInfo {
            name: name.to_string(),
            vlan_id,
            physical_dev: physical_dev.to_string(),
        }
    }

    #[test]
    fn test_intersection_keeps_common_triples_only() {
        let per_host = HashMap::from([
            ("host1".to_string(), vec![pg("a", 1, "p1"), pg("b", 2, "p1")]),
            ("host2".to_string(), vec![pg("a", 1, "p1"), pg("c", 3, "p1")]),
        ]);
        let common = common_port_groups(&per_host);
        assert_eq!(common, vec![pg("a", 1, "p1")]);
    }

    #[test]
    fn test_intersection_compares_full_triple() {
        // Same name but different vlan on the second host: not common.
        let per_host = HashMap::from([
            ("host1".to_string(), vec![pg("a", 1, "p1")]),
            ("host2".to_string(), vec![pg("a", 2, "p1")]),
        ]);
        assert!(common_port_groups(&per_host).is_empty());
    }

    #[test]
    fn test_intersection_trivial_inputs() {
        assert!(common_port_groups(&HashMap::new()).is_empty());

        let single = HashMap::from([("host1".to_string(), vec![pg("a", 1, "p1"), pg("b", 0, "p2")])]);
        assert_eq!(common_port_groups(&single).len(), 2);
    }

    #[test]
    fn test_vlan_policy() {
        assert_eq!(segment_values(0), ("flat", None));
        assert_eq!(segment_values(10), ("vlan", Some(10)));
    }

    #[test]
    fn test_map_standard_applies_mapping_and_filter() {
        let vswitch_map = HashMap::from([("vswitch0".to_string(), "physnet1".to_string())]);
        let raw = vec![
            RawPortGroup {
                name: "br-1".to_string(),
                vlan_id: 10,
                vswitch: "vswitch0".to_string(),
            },
            RawPortGroup {
                name: "br-2".to_string(),
                vlan_id: 20,
                vswitch: "unmapped".to_string(),
            },
        ];

        let mapped = map_standard(&raw, &vswitch_map, &[]);
        assert_eq!(mapped, vec![pg("br-1", 10, "physnet1")]);

        let filtered = map_standard(&raw, &vswitch_map, &["other".to_string()]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_map_dvs_requires_cluster_coverage_and_vlan() {
        let vswitch_map = HashMap::from([("dvs0".to_string(), "physnet1".to_string())]);
        let hosts = vec!["host1".to_string(), "host2".to_string()];
        let dvs = vec![
            DvsPortGroup {
                name: "dpg-all".to_string(),
                vlan: Some(5),
                vswitch: "dvs0".to_string(),
                hosts: hosts.clone(),
            },
            DvsPortGroup {
                name: "dpg-partial".to_string(),
                vlan: Some(6),
                vswitch: "dvs0".to_string(),
                hosts: vec!["host1".to_string()],
            },
            DvsPortGroup {
                name: "dpg-trunk".to_string(),
                vlan: None,
                vswitch: "dvs0".to_string(),
                hosts: hosts.clone(),
            },
        ];

        let mapped = map_dvs(&dvs, Some(&hosts), &vswitch_map, &[]);
        assert_eq!(mapped, vec![pg("dpg-all", 5, "physnet1")]);

        // Host scope has no coverage requirement.
        let mapped = map_dvs(&dvs, None, &vswitch_map, &[]);
        assert_eq!(mapped.len(), 2);
    }
}
