//! End-to-end reconciliation scenarios against a fake inventory and the
//! in-memory SQLite store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vcsync_discovery::attrs::{AttrValue, Attrs};
use vcsync_discovery::clients::vcenter::{
    DvsPortGroup, RawPortGroup, TemplateInfo, VcInventory, VmInfo,
};
use vcsync_discovery::config::{
    InstanceConfig, PortGroupConfig, Scope, SyncPolicy, TemplateConfig,
};
use vcsync_discovery::error::SyncError;
use vcsync_discovery::reconciler::instance::InstanceReconciler;
use vcsync_discovery::reconciler::portgroup::PortGroupReconciler;
use vcsync_discovery::reconciler::template::TemplateReconciler;
use vcsync_discovery::reconciler::Reconciler;
use vcsync_discovery::report::{ItemOutcome, NoopObserver, SkipReason};
use vcsync_discovery::store::{ImageStore, InstanceStore, NetworkStore, SqliteStore};

const VC_IP: &str = "10.0.0.1";
const UUID_A: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
const UUID_B: &str = "0e5a3bd2-91cf-43a8-8c4e-6f2d1b7a9c01";

#[derive(Default)]
struct FakeInventory {
    host_ip: String,
    clusters: HashMap<String, Vec<String>>,
    standard: Mutex<HashMap<String, Vec<RawPortGroup>>>,
    dvs: Mutex<Vec<DvsPortGroup>>,
    templates: Mutex<Vec<TemplateInfo>>,
    vms: Mutex<Vec<VmInfo>>,
    live_vms: HashSet<String>,
}

impl FakeInventory {
    fn new() -> Self {
        Self {
            host_ip: VC_IP.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VcInventory for FakeInventory {
    async fn hosts_in_cluster(&self, cluster: &str) -> Result<Vec<String>, SyncError> {
        self.clusters
            .get(cluster)
            .cloned()
            .ok_or_else(|| SyncError::Lookup(format!("cluster '{}'", cluster)))
    }

    async fn standard_port_groups(&self, host: &str) -> Result<Vec<RawPortGroup>, SyncError> {
        Ok(self
            .standard
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default())
    }

    async fn dvs_port_groups(&self, _scope: &Scope) -> Result<Vec<DvsPortGroup>, SyncError> {
        Ok(self.dvs.lock().unwrap().clone())
    }

    async fn list_templates(&self, _page_size: u32) -> Result<Vec<TemplateInfo>, SyncError> {
        Ok(self.templates.lock().unwrap().clone())
    }

    async fn list_vms(&self, _page_size: u32) -> Result<Vec<VmInfo>, SyncError> {
        Ok(self.vms.lock().unwrap().clone())
    }

    async fn vm_exists(&self, instance_uuid: &str) -> Result<bool, SyncError> {
        Ok(self.live_vms.contains(instance_uuid))
    }

    fn host_ip(&self) -> &str {
        &self.host_ip
    }
}

fn attrs(pairs: &[(&str, AttrValue)]) -> Attrs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn raw_pg(name: &str, vlan_id: i64) -> RawPortGroup {
    RawPortGroup {
        name: name.to_string(),
        vlan_id,
        vswitch: "vs1".to_string(),
    }
}

fn pg_config(scope: Scope, allow_delete: bool) -> PortGroupConfig {
    PortGroupConfig {
        policy: SyncPolicy::new(true, allow_delete, "Discovered-"),
        sync_interval: Duration::from_secs(300),
        physical_network_mappings: HashMap::from([("p1".to_string(), "vs1".to_string())]),
        scope: Some(scope),
    }
}

fn template_config(allow_delete: bool) -> TemplateConfig {
    TemplateConfig {
        policy: SyncPolicy::new(true, allow_delete, "DiscoveredImage-"),
        sync_interval: Duration::from_secs(300),
    }
}

fn instance_config(allow_delete: bool, full_sync_frequency: i64) -> InstanceConfig {
    InstanceConfig {
        policy: SyncPolicy::new(true, allow_delete, "DiscoveredVM-"),
        sync_interval: Duration::from_secs(20),
        full_sync_frequency,
    }
}

/// Template attribute bag as the extraction step would produce it.
fn template_attrs(name: &str, instance_uuid: Option<&str>, ostype: &str, size: i64) -> Attrs {
    let mut a = attrs(&[
        ("template_name", format!("DiscoveredImage-{}", name).into()),
        ("vmware_ostype", ostype.into()),
        ("vmware_template", AttrValue::Bool(true)),
        ("size", AttrValue::Int(size)),
        ("nic_num", AttrValue::Int(1)),
        ("root_disk_size", AttrValue::Int(size)),
        ("vcenter_ip", VC_IP.into()),
    ]);
    if let Some(uuid) = instance_uuid {
        a.insert("template_instanceuuid".to_string(), uuid.into());
    }
    a
}

fn template(name: &str, instance_uuid: Option<&str>, ostype: &str, size: i64) -> TemplateInfo {
    TemplateInfo {
        name: name.to_string(),
        attrs: template_attrs(name, instance_uuid, ostype, size),
    }
}

fn vm_attrs(instance_uuid: Option<&str>, power_state: &str, cpu: i64, memory: i64) -> Attrs {
    let mut a = attrs(&[
        ("power_state", power_state.into()),
        ("cpu_count", AttrValue::Int(cpu)),
        ("memory_mb", AttrValue::Int(memory)),
        ("vmware_ostype", "ubuntu64Guest".into()),
        ("vcenter_ip", VC_IP.into()),
    ]);
    if let Some(uuid) = instance_uuid {
        a.insert("instance_uuid".to_string(), uuid.into());
    }
    a
}

fn vm(name: &str, instance_uuid: Option<&str>, power_state: &str) -> VmInfo {
    VmInfo {
        name: name.to_string(),
        instance_uuid: instance_uuid.map(str::to_string),
        attrs: vm_attrs(instance_uuid, power_state, 2, 2048),
    }
}

// === Port group scenarios ===

#[tokio::test]
async fn test_portgroup_create_from_cluster() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        clusters: HashMap::from([(
            "c1".to_string(),
            vec!["h1".to_string(), "h2".to_string()],
        )]),
        standard: Mutex::new(HashMap::from([
            ("h1".to_string(), vec![raw_pg("br-1", 10)]),
            ("h2".to_string(), vec![raw_pg("br-1", 10)]),
        ])),
        ..FakeInventory::new()
    });
    let reconciler = PortGroupReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Cluster("c1".to_string()), false),
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 1);

    let nets = store.list_networks().await.unwrap();
    assert_eq!(nets.len(), 1);
    assert_eq!(nets[0].name, "Discovered-br-1");
    let seg = nets[0].segment.as_ref().unwrap();
    assert_eq!(seg.network_type, "vlan");
    assert_eq!(seg.segmentation_id, Some(10));
    assert_eq!(seg.physical_network, "p1");

    // Unchanged remote state: the second pass applies nothing.
    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
    assert_eq!(store.list_networks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_portgroup_host_local_resources_dropped() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        clusters: HashMap::from([(
            "c1".to_string(),
            vec!["h1".to_string(), "h2".to_string()],
        )]),
        standard: Mutex::new(HashMap::from([
            ("h1".to_string(), vec![raw_pg("br-1", 10), raw_pg("only-h1", 20)]),
            ("h2".to_string(), vec![raw_pg("br-1", 10)]),
        ])),
        ..FakeInventory::new()
    });
    let reconciler = PortGroupReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Cluster("c1".to_string()), false),
    );

    reconciler.reconcile().await.unwrap();
    let nets = store.list_networks().await.unwrap();
    assert_eq!(nets.len(), 1);
    assert_eq!(nets[0].name, "Discovered-br-1");
}

#[tokio::test]
async fn test_portgroup_untagged_becomes_flat() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        standard: Mutex::new(HashMap::from([(
            "h1".to_string(),
            vec![raw_pg("br-flat", 0)],
        )])),
        ..FakeInventory::new()
    });
    let reconciler = PortGroupReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Host("h1".to_string()), false),
    );

    reconciler.reconcile().await.unwrap();
    let nets = store.list_networks().await.unwrap();
    let seg = nets[0].segment.as_ref().unwrap();
    assert_eq!(seg.network_type, "flat");
    assert_eq!(seg.segmentation_id, None);
}

#[tokio::test]
async fn test_portgroup_vlan_drift_updates_in_place() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        standard: Mutex::new(HashMap::from([(
            "h1".to_string(),
            vec![raw_pg("br-1", 10)],
        )])),
        ..FakeInventory::new()
    });
    let reconciler = PortGroupReconciler::new(
        inventory.clone(),
        store.clone(),
        Arc::new(NoopObserver),
        // Deletion enabled to prove a drifted network is updated, not
        // deleted and recreated.
        pg_config(Scope::Host("h1".to_string()), true),
    );

    reconciler.reconcile().await.unwrap();

    inventory
        .standard
        .lock()
        .unwrap()
        .insert("h1".to_string(), vec![raw_pg("br-1", 20)]);

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(report.deleted(), 0);

    let nets = store.list_networks().await.unwrap();
    assert_eq!(nets.len(), 1);
    assert_eq!(nets[0].segment.as_ref().unwrap().segmentation_id, Some(20));

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_portgroup_deletion_flag_and_guard() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        standard: Mutex::new(HashMap::from([(
            "h1".to_string(),
            vec![raw_pg("br-1", 10)],
        )])),
        ..FakeInventory::new()
    });

    let disabled = PortGroupReconciler::new(
        inventory.clone(),
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Host("h1".to_string()), false),
    );
    disabled.reconcile().await.unwrap();

    // A user-created network (no discovery prefix) is never a candidate.
    let user_net = store.create_network("corp-net").await.unwrap();
    store
        .create_segment(&user_net.id, "vlan", Some(99), "p1")
        .await
        .unwrap();

    inventory.standard.lock().unwrap().clear();

    // Deletion disabled: the vanished port group survives as a skip.
    let report = disabled.reconcile().await.unwrap();
    assert_eq!(report.deleted(), 0);
    assert!(report
        .items
        .iter()
        .any(|i| i.outcome == ItemOutcome::Skipped(SkipReason::DeletionDisabled)));
    assert_eq!(store.list_networks().await.unwrap().len(), 2);

    // Deletion enabled: only the discovered network goes away.
    let enabled = PortGroupReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Host("h1".to_string()), true),
    );
    let report = enabled.reconcile().await.unwrap();
    assert_eq!(report.deleted(), 1);

    let nets = store.list_networks().await.unwrap();
    assert_eq!(nets.len(), 1);
    assert_eq!(nets[0].name, "corp-net");
}

#[tokio::test]
async fn test_portgroup_uuid_suffix_identity() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());

    // A network created here, whose id another installation would see
    // embedded in the port group name.
    let ours = store.create_network("mynet").await.unwrap();
    store
        .create_segment(&ours.id, "vlan", Some(7), "p1")
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory {
        standard: Mutex::new(HashMap::from([(
            "h1".to_string(),
            vec![
                raw_pg(&format!("mynet-{}", ours.id), 7),
                // Foreign suffix: no such local network id.
                raw_pg(&format!("other-{}", UUID_B), 5),
            ],
        )])),
        ..FakeInventory::new()
    });
    let reconciler = PortGroupReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Host("h1".to_string()), false),
    );

    let report = reconciler.reconcile().await.unwrap();
    // Ours corresponds under its base name; the foreign one is mirrored
    // under its full prefixed name.
    assert_eq!(report.created(), 1);

    let nets = store.list_networks().await.unwrap();
    let names: Vec<&str> = nets.iter().map(|n| n.name.as_str()).collect();
    assert!(names.contains(&"mynet"));
    assert!(names.contains(&format!("Discovered-other-{}", UUID_B).as_str()));
    assert_eq!(nets.len(), 2);
}

#[tokio::test]
async fn test_portgroup_missing_cluster_aborts_pass() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory::new());
    let reconciler = PortGroupReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        pg_config(Scope::Cluster("ghost".to_string()), false),
    );

    let err = reconciler.reconcile().await.unwrap_err();
    assert!(matches!(err, SyncError::Lookup(_)));
}

#[tokio::test]
async fn test_portgroup_no_scope_is_noop() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let net = store.create_network("Discovered-stale").await.unwrap();
    store
        .create_segment(&net.id, "vlan", Some(10), "p1")
        .await
        .unwrap();

    let mut config = pg_config(Scope::Host("unused".to_string()), true);
    config.scope = None;
    let reconciler = PortGroupReconciler::new(
        Arc::new(FakeInventory::new()),
        store.clone(),
        Arc::new(NoopObserver),
        config,
    );

    // Without a scope the pass must not treat "nothing remote" as license
    // to delete everything discovered.
    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
    assert!(report.items.is_empty());
    assert_eq!(store.list_networks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_portgroup_kill_switch() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        standard: Mutex::new(HashMap::from([(
            "h1".to_string(),
            vec![raw_pg("br-1", 10)],
        )])),
        ..FakeInventory::new()
    });
    let mut config = pg_config(Scope::Host("h1".to_string()), true);
    config.policy = SyncPolicy::new(false, true, "Discovered-");
    let reconciler =
        PortGroupReconciler::new(inventory, store.clone(), Arc::new(NoopObserver), config);

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
    assert!(report.items.is_empty());
    assert!(store.list_networks().await.unwrap().is_empty());
}

// === Template scenarios ===

#[tokio::test]
async fn test_template_create_writes_size_after_creation() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        templates: Mutex::new(vec![template("centos7", Some(UUID_A), "centos7_64Guest", 4096)]),
        ..FakeInventory::new()
    });
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(false),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 1);

    let images = store.list_template_images().await.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].name, "DiscoveredImage-centos7");
    assert_eq!(images[0].size_bytes, 4096);
    assert_eq!(images[0].template_instance_uuid(), Some(UUID_A));

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_template_property_drift_update_then_idempotent() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
        .create_image(
            "DiscoveredImage-centos",
            4096,
            &template_attrs("centos", Some(UUID_A), "centos6", 4096),
        )
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory {
        templates: Mutex::new(vec![template("centos", Some(UUID_A), "centos7", 4096)]),
        ..FakeInventory::new()
    });
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(false),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(report.created(), 0);

    let images = store.list_template_images().await.unwrap();
    assert_eq!(
        images[0].properties.get("vmware_ostype"),
        Some(&AttrValue::Str("centos7".to_string()))
    );

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_template_size_backfill_forced() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    // Properties already agree; only the size column is stuck at zero.
    store
        .create_image(
            "DiscoveredImage-centos",
            0,
            &template_attrs("centos", Some(UUID_A), "centos7", 4096),
        )
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory {
        templates: Mutex::new(vec![template("centos", Some(UUID_A), "centos7", 4096)]),
        ..FakeInventory::new()
    });
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(false),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(store.list_template_images().await.unwrap()[0].size_bytes, 4096);

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_template_name_fallback_match() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    // Local image has no recorded instance UUID; the remote template does.
    let mut seeded = template_attrs("centos", None, "centos7", 4096);
    seeded.remove("template_instanceuuid");
    store
        .create_image("DiscoveredImage-centos", 4096, &seeded)
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory {
        templates: Mutex::new(vec![template("centos", Some(UUID_A), "centos7", 4096)]),
        ..FakeInventory::new()
    });
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(false),
        100,
    );

    // Matched by name, not created; the new UUID is merged in.
    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 0);
    assert_eq!(report.updated(), 1);

    let images = store.list_template_images().await.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].template_instance_uuid(), Some(UUID_A));
}

#[tokio::test]
async fn test_template_matcher_uniqueness() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
        .create_image(
            "DiscoveredImage-tpl",
            1024,
            &template_attrs("tpl", Some(UUID_A), "centos7", 1024),
        )
        .await
        .unwrap();

    // Two remote templates carry the same instance UUID; only one may
    // resolve to the existing image.
    let inventory = Arc::new(FakeInventory {
        templates: Mutex::new(vec![
            template("tpl", Some(UUID_A), "centos7", 1024),
            template("tpl-copy", Some(UUID_A), "centos7", 1024),
        ]),
        ..FakeInventory::new()
    });
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(false),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 1);
    assert_eq!(store.list_template_images().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_template_orphan_deletion_guards() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());

    // Orphan recorded against a different vCenter installation.
    let mut foreign = template_attrs("foreign", Some(UUID_A), "centos7", 1024);
    foreign.insert("vcenter_ip".to_string(), "10.9.9.9".into());
    store
        .create_image("DiscoveredImage-foreign", 1024, &foreign)
        .await
        .unwrap();

    // Orphan from this installation.
    store
        .create_image(
            "DiscoveredImage-local",
            1024,
            &template_attrs("local", Some(UUID_B), "centos7", 1024),
        )
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory::new());
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(true),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.deleted(), 1);
    assert!(report
        .items
        .iter()
        .any(|i| i.outcome == ItemOutcome::Skipped(SkipReason::ForeignInstallation)));

    // The foreign orphan survives even though deletion is enabled.
    let images = store.list_template_images().await.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].name, "DiscoveredImage-foreign");
}

#[tokio::test]
async fn test_template_orphan_kept_when_deletion_disabled() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
        .create_image(
            "DiscoveredImage-old",
            1024,
            &template_attrs("old", Some(UUID_A), "centos7", 1024),
        )
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory::new());
    let reconciler = TemplateReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        template_config(false),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.deleted(), 0);
    assert_eq!(store.list_template_images().await.unwrap().len(), 1);
}

// === Instance scenarios ===

#[tokio::test]
async fn test_instance_create_waits_for_full_pass() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        vms: Mutex::new(vec![vm("web-1", Some(UUID_A), "poweredOn")]),
        ..FakeInventory::new()
    });
    let reconciler = InstanceReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        instance_config(false, 2),
        100,
    );

    // First tick is incremental: the unknown VM is deferred.
    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 0);
    assert!(report
        .items
        .iter()
        .any(|i| i.outcome == ItemOutcome::Skipped(SkipReason::DeferredToFullSync)));
    assert!(store.list_instances().await.unwrap().is_empty());

    // Second tick rings the timer: full pass creates it.
    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 1);

    let instances = store.list_instances().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].name, "DiscoveredVM-web-1");
    assert_eq!(instances[0].instance_uuid(), Some(UUID_A));
}

#[tokio::test]
async fn test_instance_attribute_refresh_on_incremental_pass() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
        .create_instance(
            "DiscoveredVM-web-1",
            &vm_attrs(Some(UUID_A), "poweredOn", 2, 2048),
        )
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory {
        vms: Mutex::new(vec![vm("web-1", Some(UUID_A), "poweredOff")]),
        ..FakeInventory::new()
    });
    // Frequency high enough that no full pass happens in this test.
    let reconciler = InstanceReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        instance_config(false, 100),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(
        store.list_instances().await.unwrap()[0]
            .properties
            .get("power_state"),
        Some(&AttrValue::Str("poweredOff".to_string()))
    );

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_instance_ignore_list() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let inventory = Arc::new(FakeInventory {
        vms: Mutex::new(vec![
            vm("web-1", Some(UUID_A), "poweredOn"),
            vm("scratch", Some(UUID_B), "poweredOn"),
        ]),
        ..FakeInventory::new()
    });
    let mut config = instance_config(false, 1);
    config.policy = config.policy.with_filter(vec!["scratch".to_string()]);
    let reconciler =
        InstanceReconciler::new(inventory, store.clone(), Arc::new(NoopObserver), config, 100);

    reconciler.reconcile().await.unwrap();
    let instances = store.list_instances().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].name, "DiscoveredVM-web-1");
}

#[tokio::test]
async fn test_instance_deletion_guards() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());

    let mut foreign = vm_attrs(Some(UUID_A), "poweredOn", 2, 2048);
    foreign.insert("vcenter_ip".to_string(), "10.9.9.9".into());
    store
        .create_instance("DiscoveredVM-foreign", &foreign)
        .await
        .unwrap();
    store
        .create_instance(
            "DiscoveredVM-gone",
            &vm_attrs(Some(UUID_B), "poweredOn", 2, 2048),
        )
        .await
        .unwrap();
    // User instance: never touched, whatever the flags say.
    store
        .create_instance("pet-vm", &Attrs::new())
        .await
        .unwrap();

    let inventory = Arc::new(FakeInventory::new());
    let reconciler = InstanceReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        instance_config(true, 1),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.deleted(), 1);

    let instances = store.list_instances().await.unwrap();
    let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
    assert!(names.contains(&"DiscoveredVM-foreign"));
    assert!(names.contains(&"pet-vm"));
    assert!(!names.contains(&"DiscoveredVM-gone"));
}

#[tokio::test]
async fn test_instance_uuid_in_name_refers_to_local_instance() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let ours = store
        .create_instance("app-1", &vm_attrs(None, "poweredOn", 2, 2048))
        .await
        .unwrap();

    // The VM name embeds our instance id; it must not be re-imported.
    let inventory = Arc::new(FakeInventory {
        vms: Mutex::new(vec![VmInfo {
            name: format!("app-1-{}", ours.id),
            instance_uuid: None,
            attrs: vm_attrs(None, "poweredOn", 2, 2048),
        }]),
        ..FakeInventory::new()
    });
    let reconciler = InstanceReconciler::new(
        inventory,
        store.clone(),
        Arc::new(NoopObserver),
        instance_config(false, 1),
        100,
    );

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.created(), 0);
    assert_eq!(store.list_instances().await.unwrap().len(), 1);
}
