//! Local system-of-record interfaces.
//!
//! The reconcilers only ever see these traits; the bundled SQLite
//! implementation lives in [`sqlite`]. Domain tables are disjoint, so
//! concurrent access from the per-domain sync tasks contends at row level at
//! worst.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::attrs::{get_str, Attrs};

pub use sqlite::SqliteStore;

/// Network segment attributes (the two scalar attributes a port group maps
/// onto, plus the derived network type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub id: String,
    pub network_id: String,
    /// "vlan" for tagged port groups, "flat" for untagged.
    pub network_type: String,
    pub segmentation_id: Option<i64>,
    pub physical_network: String,
}

/// Network entry with its segment, if one exists.
#[derive(Debug, Clone)]
pub struct NetworkEntry {
    pub id: String,
    pub name: String,
    pub status: String,
    pub segment: Option<SegmentEntry>,
    pub created_at: String,
    pub updated_at: String,
}

/// Template image entry. All comparable image attributes live in
/// `properties`; `size_bytes` is kept as a column because it is written
/// after creation, once the true size is known.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub id: String,
    pub name: String,
    pub size_bytes: i64,
    pub properties: Attrs,
    pub created_at: String,
    pub updated_at: String,
}

impl ImageEntry {
    pub fn template_name(&self) -> Option<&str> {
        get_str(&self.properties, "template_name")
    }

    pub fn template_instance_uuid(&self) -> Option<&str> {
        get_str(&self.properties, "template_instanceuuid")
    }

    pub fn vcenter_ip(&self) -> Option<&str> {
        get_str(&self.properties, "vcenter_ip")
    }

    /// Images carrying a template name originated from discovery.
    pub fn is_discovered(&self) -> bool {
        self.template_name().is_some()
    }
}

/// Partial image update; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ImageUpdate {
    pub name: Option<String>,
    pub size_bytes: Option<i64>,
    pub properties: Option<Attrs>,
}

/// Compute instance entry.
#[derive(Debug, Clone)]
pub struct InstanceEntry {
    pub id: String,
    pub name: String,
    pub properties: Attrs,
    pub created_at: String,
    pub updated_at: String,
}

impl InstanceEntry {
    pub fn instance_uuid(&self) -> Option<&str> {
        get_str(&self.properties, "instance_uuid")
    }

    pub fn vcenter_ip(&self) -> Option<&str> {
        get_str(&self.properties, "vcenter_ip")
    }
}

/// Partial instance update; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdate {
    pub name: Option<String>,
    pub properties: Option<Attrs>,
}

#[async_trait]
pub trait NetworkStore: Send + Sync {
    async fn list_networks(&self) -> Result<Vec<NetworkEntry>>;
    async fn get_network(&self, id: &str) -> Result<Option<NetworkEntry>>;
    async fn create_network(&self, name: &str) -> Result<NetworkEntry>;
    async fn create_segment(
        &self,
        network_id: &str,
        network_type: &str,
        segmentation_id: Option<i64>,
        physical_network: &str,
    ) -> Result<SegmentEntry>;
    async fn update_segment(
        &self,
        network_id: &str,
        network_type: &str,
        segmentation_id: Option<i64>,
        physical_network: &str,
    ) -> Result<bool>;
    async fn delete_network(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Images that carry template properties (discovered images only).
    async fn list_template_images(&self) -> Result<Vec<ImageEntry>>;
    async fn create_image(&self, name: &str, size_bytes: i64, properties: &Attrs)
        -> Result<ImageEntry>;
    async fn update_image(&self, id: &str, update: &ImageUpdate) -> Result<bool>;
    async fn delete_image(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<InstanceEntry>>;
    async fn create_instance(&self, name: &str, properties: &Attrs) -> Result<InstanceEntry>;
    async fn update_instance(&self, id: &str, update: &InstanceUpdate) -> Result<bool>;
    async fn delete_instance(&self, id: &str) -> Result<bool>;
}
