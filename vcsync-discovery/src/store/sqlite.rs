//! SQLite-backed implementation of the store traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::attrs::Attrs;

use super::{
    ImageEntry, ImageStore, ImageUpdate, InstanceEntry, InstanceStore, InstanceUpdate,
    NetworkEntry, NetworkStore, SegmentEntry,
};

/// SQLite-backed system-of-record for discovered resources.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(data_dir: &str) -> Result<Self> {
        let db_path = format!("{}/vcsync.db", data_dir);
        let db_url = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn network_from_row(row: &sqlx::sqlite::SqliteRow) -> NetworkEntry {
    let segment = row
        .get::<Option<String>, _>("segment_id")
        .map(|segment_id| SegmentEntry {
            id: segment_id,
            network_id: row.get("id"),
            network_type: row.get("network_type"),
            segmentation_id: row.get("segmentation_id"),
            physical_network: row.get("physical_network"),
        });

    NetworkEntry {
        id: row.get("id"),
        name: row.get("name"),
        status: row.get("status"),
        segment,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_properties(raw: &str) -> Attrs {
    serde_json::from_str(raw).unwrap_or_default()
}

const NETWORK_SELECT: &str = r#"
    SELECT n.id, n.name, n.status, n.created_at, n.updated_at,
           s.id AS segment_id, s.network_type, s.segmentation_id, s.physical_network
    FROM networks n
    LEFT JOIN network_segments s ON s.network_id = n.id
"#;

#[async_trait]
impl NetworkStore for SqliteStore {
    async fn list_networks(&self) -> Result<Vec<NetworkEntry>> {
        let rows = sqlx::query(&format!("{} ORDER BY n.created_at DESC", NETWORK_SELECT))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(network_from_row).collect())
    }

    async fn get_network(&self, id: &str) -> Result<Option<NetworkEntry>> {
        let row = sqlx::query(&format!("{} WHERE n.id = ?", NETWORK_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(network_from_row))
    }

    async fn create_network(&self, name: &str) -> Result<NetworkEntry> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO networks (id, name, status, created_at, updated_at)
            VALUES (?, ?, 'ACTIVE', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(NetworkEntry {
            id,
            name: name.to_string(),
            status: "ACTIVE".to_string(),
            segment: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn create_segment(
        &self,
        network_id: &str,
        network_type: &str,
        segmentation_id: Option<i64>,
        physical_network: &str,
    ) -> Result<SegmentEntry> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO network_segments (id, network_id, network_type, segmentation_id, physical_network)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(network_id)
        .bind(network_type)
        .bind(segmentation_id)
        .bind(physical_network)
        .execute(&self.pool)
        .await?;

        Ok(SegmentEntry {
            id,
            network_id: network_id.to_string(),
            network_type: network_type.to_string(),
            segmentation_id,
            physical_network: physical_network.to_string(),
        })
    }

    async fn update_segment(
        &self,
        network_id: &str,
        network_type: &str,
        segmentation_id: Option<i64>,
        physical_network: &str,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE network_segments
            SET network_type = ?, segmentation_id = ?, physical_network = ?
            WHERE network_id = ?
            "#,
        )
        .bind(network_type)
        .bind(segmentation_id)
        .bind(physical_network)
        .bind(network_id)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE networks SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(network_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a network and its segment in a single transaction.
    async fn delete_network(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM network_segments WHERE network_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM networks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ImageStore for SqliteStore {
    async fn list_template_images(&self) -> Result<Vec<ImageEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, size_bytes, properties, created_at, updated_at
            FROM images ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ImageEntry {
                id: r.get("id"),
                name: r.get("name"),
                size_bytes: r.get("size_bytes"),
                properties: parse_properties(r.get::<String, _>("properties").as_str()),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .filter(|entry| entry.is_discovered())
            .collect())
    }

    async fn create_image(
        &self,
        name: &str,
        size_bytes: i64,
        properties: &Attrs,
    ) -> Result<ImageEntry> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        let props_json = serde_json::to_string(properties)?;
        sqlx::query(
            r#"
            INSERT INTO images (id, name, size_bytes, properties, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(size_bytes)
        .bind(&props_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(ImageEntry {
            id,
            name: name.to_string(),
            size_bytes,
            properties: properties.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn update_image(&self, id: &str, update: &ImageUpdate) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let props_json = update
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE images
            SET name = COALESCE(?, name),
                size_bytes = COALESCE(?, size_bytes),
                properties = COALESCE(?, properties),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.name.as_deref())
        .bind(update.size_bytes)
        .bind(props_json)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_image(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn list_instances(&self) -> Result<Vec<InstanceEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, properties, created_at, updated_at
            FROM instances ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| InstanceEntry {
                id: r.get("id"),
                name: r.get("name"),
                properties: parse_properties(r.get::<String, _>("properties").as_str()),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    async fn create_instance(&self, name: &str, properties: &Attrs) -> Result<InstanceEntry> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        let props_json = serde_json::to_string(properties)?;
        sqlx::query(
            r#"
            INSERT INTO instances (id, name, properties, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(&props_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(InstanceEntry {
            id,
            name: name.to_string(),
            properties: properties.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn update_instance(&self, id: &str, update: &InstanceUpdate) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let props_json = update
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET name = COALESCE(?, name),
                properties = COALESCE(?, properties),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.name.as_deref())
        .bind(props_json)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_instance(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
