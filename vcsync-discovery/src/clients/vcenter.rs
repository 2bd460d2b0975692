//! vCenter inventory client.
//!
//! `VcInventory` is the seam the reconcilers consume; `VimClient` implements
//! it over the vCenter JSON API. The session is established once at startup
//! and the token is reused for the process lifetime; list endpoints are
//! paged and every page is consumed within the pass that asked for them.
//!
//! Attribute extraction happens here, at the collaborator boundary: remote
//! objects leave this module as typed [`Attrs`] bags, never as raw payloads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::attrs::{AttrValue, Attrs};
use crate::config::{Scope, VimConfig};
use crate::error::SyncError;

/// Standard port group as reported by one host: name, vlan id and the
/// vswitch it hangs off. Mapping vswitch to a physical device is the
/// importer's job, not the client's.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawPortGroup {
    pub name: String,
    pub vlan_id: i64,
    pub vswitch: String,
}

/// Distributed port group. `vlan` is absent for trunk/range configurations,
/// which are not importable. `hosts` is the set of hosts the port group
/// spans, used for the cluster coverage check.
#[derive(Debug, Clone, Deserialize)]
pub struct DvsPortGroup {
    pub name: String,
    pub vlan: Option<i64>,
    pub vswitch: String,
    pub hosts: Vec<String>,
}

/// A VM template with its extracted image properties.
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    pub name: String,
    pub attrs: Attrs,
}

/// A (non-template) virtual machine with its extracted properties.
#[derive(Debug, Clone)]
pub struct VmInfo {
    pub name: String,
    pub instance_uuid: Option<String>,
    pub attrs: Attrs,
}

/// Remote inventory operations the reconcilers depend on.
#[async_trait]
pub trait VcInventory: Send + Sync {
    /// Host names in the named cluster. A missing cluster is a lookup
    /// failure and aborts the caller's pass.
    async fn hosts_in_cluster(&self, cluster: &str) -> Result<Vec<String>, SyncError>;

    /// Standard port groups configured on one host.
    async fn standard_port_groups(&self, host: &str) -> Result<Vec<RawPortGroup>, SyncError>;

    /// Distributed port groups visible in the given scope.
    async fn dvs_port_groups(&self, scope: &Scope) -> Result<Vec<DvsPortGroup>, SyncError>;

    /// All VM templates, paged to exhaustion.
    async fn list_templates(&self, page_size: u32) -> Result<Vec<TemplateInfo>, SyncError>;

    /// All virtual machines that are not templates, paged to exhaustion.
    async fn list_vms(&self, page_size: u32) -> Result<Vec<VmInfo>, SyncError>;

    /// Whether a live VM with this instance UUID exists.
    async fn vm_exists(&self, instance_uuid: &str) -> Result<bool, SyncError>;

    /// Address of the vCenter this session talks to. Stamped onto created
    /// resources and used as the same-origin deletion guard.
    fn host_ip(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next_page: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmTemplateDto {
    pub name: String,
    pub instance_uuid: Option<String>,
    pub bios_uuid: Option<String>,
    pub guest_id: Option<String>,
    pub guest_full_name: Option<String>,
    pub tools_version: Option<i64>,
    pub vm_path: Option<String>,
    pub scsi_controller: Option<String>,
    pub nic_type: Option<String>,
    #[serde(default)]
    pub nic_count: i64,
    #[serde(default)]
    pub disks: Vec<DiskDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskDto {
    pub capacity_bytes: i64,
    #[serde(default)]
    pub thin_provisioned: bool,
    pub bus: DiskBus,
    #[serde(default)]
    pub root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    Scsi,
    Ide,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmDto {
    pub name: String,
    pub instance_uuid: Option<String>,
    pub power_state: String,
    pub cpu_count: i64,
    pub memory_mb: i64,
    pub guest_id: Option<String>,
}

/// Short adapter-type names for the SCSI controller variants.
fn scsi_adapter_type(controller: &str) -> Option<&'static str> {
    match controller {
        "VirtualLsiLogicSASController" => Some("lsiLogicsas"),
        "ParaVirtualSCSIController" => Some("paraVirtualscsi"),
        "VirtualBusLogicController" => Some("busLogic"),
        "VirtualLsiLogicController" => Some("lsiLogic"),
        _ => None,
    }
}

/// Rewrite a datastore path ("[ds1] dir/vm.vmx") into a URL path component.
fn datastore_url_path(path: &str) -> String {
    path.replace('[', "/").replace("] ", "/").replace(' ', "_")
}

/// Extract the comparable image properties of a template.
///
/// `template_name` carries the image prefix so a later pass can recognize
/// the image as discovered; `vcenter_ip` records which installation the
/// image was imported from.
pub fn template_attrs(dto: &VmTemplateDto, image_prefix: &str, host_ip: &str) -> TemplateInfo {
    let mut attrs = Attrs::new();
    attrs.insert(
        "template_name".to_string(),
        AttrValue::Str(format!("{}{}", image_prefix, dto.name)),
    );
    if let Some(uuid) = &dto.instance_uuid {
        attrs.insert("template_instanceuuid".to_string(), uuid.as_str().into());
    }
    if let Some(uuid) = &dto.bios_uuid {
        attrs.insert("template_uuid".to_string(), uuid.as_str().into());
    }
    if let Some(guest_id) = &dto.guest_id {
        attrs.insert("vmware_ostype".to_string(), guest_id.as_str().into());
    }
    if let Some(full_name) = &dto.guest_full_name {
        attrs.insert("template_guestfullname".to_string(), full_name.as_str().into());
    }
    if let Some(tools) = dto.tools_version {
        attrs.insert("vmware_toolsversion".to_string(), AttrValue::Int(tools));
    }
    if let Some(path) = &dto.vm_path {
        attrs.insert(
            "vmware_path".to_string(),
            AttrValue::Str(format!("http://{}{}", host_ip, datastore_url_path(path))),
        );
    }
    attrs.insert("vmware_template".to_string(), AttrValue::Bool(true));

    if let Some(adapter) = dto.scsi_controller.as_deref().and_then(scsi_adapter_type) {
        attrs.insert("vmware_adaptertype".to_string(), adapter.into());
    }
    if let Some(vif) = &dto.nic_type {
        attrs.insert("hw_vif_model".to_string(), vif.as_str().into());
    }
    attrs.insert("nic_num".to_string(), AttrValue::Int(dto.nic_count));

    let mut size = 0i64;
    let mut root_disk_size = 0i64;
    for disk in &dto.disks {
        size += disk.capacity_bytes;
        if disk.root {
            root_disk_size = disk.capacity_bytes;
        }
        match disk.bus {
            DiskBus::Scsi => {
                let disktype = if disk.thin_provisioned { "thin" } else { "preallocated" };
                attrs.insert("vmware_disktype".to_string(), disktype.into());
            }
            // eagerZeroedThick is not detectable here either way; IDE disks
            // force the adapter type.
            DiskBus::Ide => {
                attrs.insert("vmware_adaptertype".to_string(), "ide".into());
            }
        }
    }
    attrs.insert("size".to_string(), AttrValue::Int(size));
    attrs.insert("root_disk_size".to_string(), AttrValue::Int(root_disk_size));
    attrs.insert("vcenter_ip".to_string(), host_ip.into());

    TemplateInfo {
        name: dto.name.clone(),
        attrs,
    }
}

/// Extract the comparable properties of a virtual machine.
pub fn vm_attrs(dto: &VmDto, host_ip: &str) -> VmInfo {
    let mut attrs = Attrs::new();
    attrs.insert("power_state".to_string(), dto.power_state.as_str().into());
    attrs.insert("cpu_count".to_string(), AttrValue::Int(dto.cpu_count));
    attrs.insert("memory_mb".to_string(), AttrValue::Int(dto.memory_mb));
    if let Some(guest_id) = &dto.guest_id {
        attrs.insert("vmware_ostype".to_string(), guest_id.as_str().into());
    }
    if let Some(uuid) = &dto.instance_uuid {
        attrs.insert("instance_uuid".to_string(), uuid.as_str().into());
    }
    attrs.insert("vcenter_ip".to_string(), host_ip.into());

    VmInfo {
        name: dto.name.clone(),
        instance_uuid: dto.instance_uuid.clone(),
        attrs,
    }
}

/// Host part of an endpoint URL, without scheme or port.
fn host_of(endpoint: &str) -> String {
    let stripped = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = stripped.split('/').next().unwrap_or(stripped);
    host.split(':').next().unwrap_or(host).to_string()
}

/// Client for the vCenter JSON API.
pub struct VimClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    host_ip: String,
    image_prefix: String,
}

impl VimClient {
    /// Establish the session. Called once at startup; a failure here is
    /// unrecoverable for the process instance.
    pub async fn connect(config: &VimConfig, image_prefix: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .context("Failed to build HTTP client")?;

        let url = format!("{}/api/session", config.endpoint.trim_end_matches('/'));
        info!(endpoint = %config.endpoint, "Creating vCenter session");
        let resp = http
            .post(&url)
            .basic_auth(&config.username, Some(&config.password))
            .send()
            .await
            .context("Failed to reach vCenter")?
            .error_for_status()
            .context("vCenter session creation rejected")?;
        let token: String = resp.json().await.context("Invalid session response")?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token,
            host_ip: host_of(&config.endpoint),
            image_prefix: image_prefix.to_string(),
        })
    }

    /// GET a JSON document. When `lookup` names the object being resolved,
    /// a 404 is reported as a lookup failure instead of a transport error.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        lookup: Option<&str>,
    ) -> Result<T, SyncError> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(%url, "vCenter GET");
        let resp = self
            .http
            .get(&url)
            .header("vmware-api-session-id", &self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            if let Some(name) = lookup {
                return Err(SyncError::Lookup(name.to_string()));
            }
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        page_size: u32,
    ) -> Result<Vec<T>, SyncError> {
        let mut items = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let mut query = vec![("page_size", page_size.to_string())];
            if let Some(token) = &page {
                query.push(("page", token.clone()));
            }
            let mut batch: Page<T> = self.get_json(path, &query, None).await?;
            items.append(&mut batch.items);
            match batch.next_page {
                Some(next) => page = Some(next),
                None => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl VcInventory for VimClient {
    async fn hosts_in_cluster(&self, cluster: &str) -> Result<Vec<String>, SyncError> {
        let lookup = format!("cluster '{}'", cluster);
        self.get_json(
            &format!("/api/vcenter/cluster/{}/hosts", cluster),
            &[],
            Some(lookup.as_str()),
        )
        .await
    }

    async fn standard_port_groups(&self, host: &str) -> Result<Vec<RawPortGroup>, SyncError> {
        let lookup = format!("host '{}'", host);
        self.get_json(
            &format!("/api/vcenter/host/{}/portgroups", host),
            &[],
            Some(lookup.as_str()),
        )
        .await
    }

    async fn dvs_port_groups(&self, scope: &Scope) -> Result<Vec<DvsPortGroup>, SyncError> {
        let (path, lookup) = match scope {
            Scope::Cluster(name) => (
                format!("/api/vcenter/cluster/{}/dvs-portgroups", name),
                format!("cluster '{}'", name),
            ),
            Scope::Host(name) => (
                format!("/api/vcenter/host/{}/dvs-portgroups", name),
                format!("host '{}'", name),
            ),
        };
        self.get_json(&path, &[], Some(lookup.as_str())).await
    }

    async fn list_templates(&self, page_size: u32) -> Result<Vec<TemplateInfo>, SyncError> {
        let dtos: Vec<VmTemplateDto> = self
            .fetch_all_pages("/api/vcenter/vm-templates", page_size)
            .await?;
        info!(count = dtos.len(), "Found VM templates in vCenter");
        Ok(dtos
            .iter()
            .map(|dto| template_attrs(dto, &self.image_prefix, &self.host_ip))
            .collect())
    }

    async fn list_vms(&self, page_size: u32) -> Result<Vec<VmInfo>, SyncError> {
        let dtos: Vec<VmDto> = self.fetch_all_pages("/api/vcenter/vms", page_size).await?;
        info!(count = dtos.len(), "Found virtual machines in vCenter");
        Ok(dtos.iter().map(|dto| vm_attrs(dto, &self.host_ip)).collect())
    }

    async fn vm_exists(&self, instance_uuid: &str) -> Result<bool, SyncError> {
        let url = format!("{}/api/vcenter/vm-lookup", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .header("vmware-api-session-id", &self.token)
            .query(&[("instance_uuid", instance_uuid)])
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        resp.error_for_status()
            .map(|_| true)
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    fn host_ip(&self) -> &str {
        &self.host_ip
    }
}
