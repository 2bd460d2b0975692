//! vcsync-discovery: discovery agent for vCenter inventory.
//!
//! This daemon polls a vCenter installation and converges the local
//! platform store to match it:
//! - port groups are imported as networks
//! - VM templates are imported as images
//! - virtual machines are imported as instances
//!
//! Each domain syncs on its own interval; deletion is opt-in per domain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcsync_discovery::agent::DiscoveryAgent;
use vcsync_discovery::clients::VimClient;
use vcsync_discovery::config::{
    parse_physical_network_mappings, DiscoveryConfig, InstanceConfig, PortGroupConfig, Scope,
    SyncPolicy, TemplateConfig, VimConfig,
};
use vcsync_discovery::report::LogObserver;
use vcsync_discovery::store::SqliteStore;

/// vcsync discovery agent
#[derive(Parser, Debug)]
#[command(name = "vcsync-discovery", version, about)]
struct Args {
    /// vCenter API endpoint (e.g., https://vcenter.example.com)
    #[arg(long)]
    vc_endpoint: String,

    /// Username for the vCenter session
    #[arg(long)]
    vc_username: String,

    /// Password for the vCenter session
    #[arg(long)]
    vc_password: String,

    /// Skip TLS verification of the vCenter certificate
    #[arg(long)]
    vc_insecure: bool,

    /// Remote page size; pagination is followed to exhaustion
    #[arg(long, default_value_t = 4000)]
    page_size: u32,

    /// Name of the target VMware cluster
    #[arg(long, conflicts_with = "esxi_host")]
    cluster_name: Option<String>,

    /// Name of a single target ESXi host
    #[arg(long)]
    esxi_host: Option<String>,

    /// Directory for the local store database
    #[arg(long, default_value = "/var/lib/vcsync")]
    data_dir: String,

    /// Disable port group sync
    #[arg(long)]
    no_portgroup_sync: bool,

    /// Allow deletion of discovered networks that vanished from vCenter
    #[arg(long)]
    portgroup_deletion: bool,

    /// Port group sync interval in seconds
    #[arg(long, default_value_t = 300)]
    portgroup_sync_interval: u64,

    /// Prefix for discovered network names
    #[arg(long, default_value = "DiscoveredNet-")]
    network_prefix: String,

    /// Physical network mapping, format <physnet>:<vswitch> (repeatable)
    #[arg(long = "physical-network-mapping")]
    physical_network_mappings: Vec<String>,

    /// Only import port groups with these names (repeatable)
    #[arg(long = "port-group-filter")]
    port_group_filters: Vec<String>,

    /// Disable template sync
    #[arg(long)]
    no_template_sync: bool,

    /// Allow deletion of discovered images that vanished from vCenter
    #[arg(long)]
    template_deletion: bool,

    /// Template sync interval in seconds
    #[arg(long, default_value_t = 300)]
    template_sync_interval: u64,

    /// Prefix for discovered image names
    #[arg(long, default_value = "DiscoveredImage-")]
    image_prefix: String,

    /// Disable instance sync
    #[arg(long)]
    no_instance_sync: bool,

    /// Allow deletion of discovered instances that vanished from vCenter
    #[arg(long)]
    instance_deletion: bool,

    /// Instance sync interval in seconds
    #[arg(long, default_value_t = 20)]
    instance_sync_interval: u64,

    /// Instance sync ticks between full instance syncs
    #[arg(long, default_value_t = 30)]
    full_instance_sync_frequency: i64,

    /// Prefix for discovered instance names
    #[arg(long, default_value = "DiscoveredVM-")]
    instance_prefix: String,

    /// Virtual machine names to ignore (repeatable)
    #[arg(long = "vm-ignore")]
    vm_ignore_list: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<DiscoveryConfig> {
        let scope = match (self.cluster_name, self.esxi_host) {
            (Some(cluster), None) => Some(Scope::Cluster(cluster)),
            (None, Some(host)) => Some(Scope::Host(host)),
            (None, None) => None,
            // clap's conflicts_with rules this out
            (Some(_), Some(_)) => unreachable!("cluster and host scope are mutually exclusive"),
        };

        let physical_network_mappings =
            parse_physical_network_mappings(&self.physical_network_mappings)?;

        Ok(DiscoveryConfig {
            vim: VimConfig {
                endpoint: self.vc_endpoint,
                username: self.vc_username,
                password: self.vc_password,
                insecure: self.vc_insecure,
                page_size: self.page_size,
            },
            portgroup: PortGroupConfig {
                policy: SyncPolicy::new(
                    !self.no_portgroup_sync,
                    self.portgroup_deletion,
                    &self.network_prefix,
                )
                .with_filter(self.port_group_filters),
                sync_interval: Duration::from_secs(self.portgroup_sync_interval),
                physical_network_mappings,
                scope,
            },
            template: TemplateConfig {
                policy: SyncPolicy::new(
                    !self.no_template_sync,
                    self.template_deletion,
                    &self.image_prefix,
                ),
                sync_interval: Duration::from_secs(self.template_sync_interval),
            },
            instance: InstanceConfig {
                policy: SyncPolicy::new(
                    !self.no_instance_sync,
                    self.instance_deletion,
                    &self.instance_prefix,
                )
                .with_filter(self.vm_ignore_list),
                sync_interval: Duration::from_secs(self.instance_sync_interval),
                full_sync_frequency: self.full_instance_sync_frequency,
            },
            data_dir: self.data_dir,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vcsync_discovery=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.into_config()?;

    info!("Starting vcsync-discovery agent");
    info!(endpoint = %config.vim.endpoint, "vCenter endpoint");

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .context("Failed to create data directory")?;
    let store = Arc::new(SqliteStore::new(&config.data_dir).await?);

    // Session failure at startup is unrecoverable for this process.
    let inventory = Arc::new(
        VimClient::connect(&config.vim, &config.template.policy.prefix)
            .await
            .context("Failed to establish vCenter session")?,
    );

    let agent = DiscoveryAgent::new(&config, inventory, store, Arc::new(LogObserver));
    agent.run().await
}
