//! Discovery configuration.
//!
//! Values come from the CLI (see `main.rs`); defaults match the original
//! deployment conventions. Each domain carries its own policy and interval
//! so the per-domain sync tasks stay independent.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::debug;

/// What a domain's pass is allowed to do.
///
/// The per-domain sync-enable flag populates both `allow_create` and
/// `allow_update`; `allow_update` is the kill switch checked at the start of
/// every pass. Deletion is always opted into separately.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub allow_create: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
    /// Port groups: allow-list (empty allows all). Instances: ignore-list.
    pub name_filter: Vec<String>,
    /// Discovery prefix applied to created local resources.
    pub prefix: String,
}

impl SyncPolicy {
    pub fn new(allow_sync: bool, allow_delete: bool, prefix: &str) -> Self {
        Self {
            allow_create: allow_sync,
            allow_update: allow_sync,
            allow_delete,
            name_filter: Vec::new(),
            prefix: prefix.to_string(),
        }
    }

    pub fn with_filter(mut self, filter: Vec<String>) -> Self {
        self.name_filter = filter;
        self
    }

    /// Kill switch: false disables the whole pass.
    pub fn enabled(&self) -> bool {
        self.allow_update
    }
}

/// Where port group discovery looks: a whole cluster or a single host.
/// Mutually exclusive by construction.
#[derive(Debug, Clone)]
pub enum Scope {
    Cluster(String),
    Host(String),
}

/// vCenter session settings.
#[derive(Debug, Clone)]
pub struct VimConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    /// Remote page size, followed to exhaustion within one pass.
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct PortGroupConfig {
    pub policy: SyncPolicy,
    pub sync_interval: Duration,
    /// physical network -> vswitch, as configured.
    pub physical_network_mappings: HashMap<String, String>,
    pub scope: Option<Scope>,
}

impl PortGroupConfig {
    /// Reversed mapping used while importing: vswitch -> physical network.
    pub fn vswitch_map(&self) -> HashMap<String, String> {
        self.physical_network_mappings
            .iter()
            .map(|(physnet, vswitch)| (vswitch.clone(), physnet.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub policy: SyncPolicy,
    pub sync_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub policy: SyncPolicy,
    pub sync_interval: Duration,
    /// Full create/update/delete pass every this many ticks; the other
    /// ticks only refresh attributes of already-matched instances.
    pub full_sync_frequency: i64,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub vim: VimConfig,
    pub portgroup: PortGroupConfig,
    pub template: TemplateConfig,
    pub instance: InstanceConfig,
    pub data_dir: String,
}

/// Parse `physnet:vswitch` pairs. Malformed entries are skipped with a debug
/// log; an empty result is a configuration error because nothing could be
/// imported without at least one mapping.
pub fn parse_physical_network_mappings(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut mappings = HashMap::new();
    for entry in raw {
        match entry.split_once(':') {
            Some((physnet, vswitch)) if !physnet.trim().is_empty() && !vswitch.trim().is_empty() => {
                mappings.insert(physnet.trim().to_string(), vswitch.trim().to_string());
            }
            _ => debug!(mapping = %entry, "invalid physical network mapping"),
        }
    }
    if mappings.is_empty() {
        bail!(
            "physical network mappings are required, format is <physnet>:<vswitch>, \
             e.g. physnet1:vswitch0"
        );
    }
    Ok(mappings)
}
