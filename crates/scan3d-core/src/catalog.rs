//! Model catalog
//!
//! The orchestrator hands a finished [`ArtifactDescriptor`] to a
//! [`CatalogRegistrar`]. Two registrars ship here:
//! - [`InMemoryCatalog`] keeps records in a [`DashMap`] for embedding and tests
//! - [`JsonLinesCatalog`] appends one JSON record per line to a file

use crate::error::CatalogError;
use crate::types::{ArtifactDescriptor, CatalogEntryId, ModelFormat, OwnerId, Registration};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Longest accepted display name
pub const MAX_DISPLAY_NAME_CHARS: usize = 100;

/// Longest accepted description
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Catalogued model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: CatalogEntryId,
    pub owner_id: OwnerId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub model_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub format: ModelFormat,
    pub frame_count: usize,
    pub checksum: String,
    pub is_public: bool,
    pub view_count: u64,
    pub created_at: DateTime<Utc>,
}

impl CatalogRecord {
    /// Validate `registration` and build a record for `descriptor`
    ///
    /// # Errors
    /// Returns [`CatalogError::Rejected`] if the display name is blank or
    /// either text field is too long.
    pub fn build(
        descriptor: &ArtifactDescriptor,
        registration: &Registration,
    ) -> Result<Self, CatalogError> {
        let name = registration.display_name.trim();
        if name.is_empty() {
            return Err(CatalogError::Rejected("display name is empty".to_string()));
        }
        if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(CatalogError::Rejected(format!(
                "display name longer than {MAX_DISPLAY_NAME_CHARS} characters"
            )));
        }
        if registration.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(CatalogError::Rejected(format!(
                "description longer than {MAX_DESCRIPTION_CHARS} characters"
            )));
        }
        let category = match registration.category.trim() {
            "" => Registration::DEFAULT_CATEGORY.to_string(),
            c => c.to_string(),
        };

        Ok(Self {
            id: CatalogEntryId::new(),
            owner_id: registration.owner_id.clone(),
            name: name.to_string(),
            description: registration.description.trim().to_string(),
            category,
            model_url: descriptor.model_url.clone(),
            file_name: descriptor.file_name.clone(),
            file_size: descriptor.size_bytes,
            format: descriptor.format,
            frame_count: descriptor.frame_count,
            checksum: descriptor.checksum.clone(),
            is_public: true,
            view_count: 0,
            created_at: Utc::now(),
        })
    }
}

/// Records finished models
#[async_trait]
pub trait CatalogRegistrar: Send + Sync {
    /// Record `descriptor` under `registration`
    ///
    /// # Errors
    /// Returns [`CatalogError`] if the entry is rejected or cannot be stored.
    async fn register(
        &self,
        descriptor: &ArtifactDescriptor,
        registration: &Registration,
    ) -> Result<CatalogEntryId, CatalogError>;
}

/// Catalog held in memory
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    records: DashMap<CatalogEntryId, CatalogRecord>,
}

impl InMemoryCatalog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record by id
    #[must_use]
    pub fn get(&self, id: &CatalogEntryId) -> Option<CatalogRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Records owned by `owner`, newest first
    #[must_use]
    pub fn list_by_owner(&self, owner: &OwnerId) -> Vec<CatalogRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| &r.owner_id == owner)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bump the view counter, returning the new count
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] for an unknown id.
    pub fn increment_view_count(&self, id: &CatalogEntryId) -> Result<u64, CatalogError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        record.view_count += 1;
        Ok(record.view_count)
    }

    /// Remove and return a record
    ///
    /// Only the record is removed. Deleting the model file is the caller's
    /// business.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] for an unknown id.
    pub fn remove(&self, id: &CatalogEntryId) -> Result<CatalogRecord, CatalogError> {
        self.records
            .remove(id)
            .map(|(_, record)| record)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl CatalogRegistrar for InMemoryCatalog {
    async fn register(
        &self,
        descriptor: &ArtifactDescriptor,
        registration: &Registration,
    ) -> Result<CatalogEntryId, CatalogError> {
        let record = CatalogRecord::build(descriptor, registration)?;
        let id = record.id;
        tracing::debug!("Catalogued {} as {}", record.model_url, id);
        self.records.insert(id, record);
        Ok(id)
    }
}

/// Catalog appended to a JSON Lines file
#[derive(Debug)]
pub struct JsonLinesCatalog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonLinesCatalog {
    /// Catalog stored at `path` (created on first registration)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file, in registration order
    ///
    /// A missing file is an empty catalog.
    ///
    /// # Errors
    /// Returns [`CatalogError`] if the file cannot be read or a line is not a
    /// record.
    pub async fn load(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(CatalogError::from))
            .collect()
    }
}

#[async_trait]
impl CatalogRegistrar for JsonLinesCatalog {
    async fn register(
        &self,
        descriptor: &ArtifactDescriptor,
        registration: &Registration,
    ) -> Result<CatalogEntryId, CatalogError> {
        let record = CatalogRecord::build(descriptor, registration)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;

        tracing::debug!("Catalogued {} in {}", record.model_url, self.path.display());
        Ok(record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn descriptor(file_name: &str) -> ArtifactDescriptor {
        ArtifactDescriptor {
            model_path: PathBuf::from("/srv/models").join(file_name),
            file_name: file_name.to_string(),
            model_url: format!("/uploads/models/{file_name}"),
            size_bytes: 1024,
            frame_count: 12,
            workspace_ref: PathBuf::from("/tmp/ws"),
            produced_at: Utc::now(),
            format: ModelFormat::Glb,
            checksum: "ab".repeat(32),
        }
    }

    #[tokio::test]
    async fn registers_and_lists_by_owner() {
        let catalog = InMemoryCatalog::new();
        let alice = OwnerId::new("alice");
        let reg = Registration::new(alice.clone(), "  Pizza  ").with_description("Margherita");

        let id = catalog.register(&descriptor("pizza-1.glb"), &reg).await.unwrap();
        catalog
            .register(&descriptor("cake-2.glb"), &Registration::new(OwnerId::new("bob"), "Cake"))
            .await
            .unwrap();

        let record = catalog.get(&id).unwrap();
        assert_eq!(record.name, "Pizza");
        assert_eq!(record.category, "General");
        assert_eq!(record.file_size, 1024);
        assert!(record.is_public);
        assert_eq!(catalog.list_by_owner(&alice).len(), 1);
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn rejects_blank_names() {
        let catalog = InMemoryCatalog::new();
        let reg = Registration::new(OwnerId::new("alice"), "   ");
        let err = catalog.register(&descriptor("x-1.glb"), &reg).await.unwrap_err();
        assert!(matches!(err, CatalogError::Rejected(_)));
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn view_count_and_removal() {
        let catalog = InMemoryCatalog::new();
        let reg = Registration::new(OwnerId::new("alice"), "Pizza");
        let id = catalog.register(&descriptor("pizza-1.glb"), &reg).await.unwrap();

        assert_eq!(catalog.increment_view_count(&id).unwrap(), 1);
        assert_eq!(catalog.increment_view_count(&id).unwrap(), 2);
        assert_eq!(catalog.remove(&id).unwrap().view_count, 2);
        assert!(matches!(catalog.remove(&id), Err(CatalogError::NotFound(_))));
        assert!(catalog.increment_view_count(&id).is_err());
    }

    #[tokio::test]
    async fn json_lines_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog = JsonLinesCatalog::new(dir.path().join("db").join("models.jsonl"));
        assert!(catalog.load().await.unwrap().is_empty());

        let reg = Registration::new(OwnerId::new("alice"), "Pizza").with_category("Food");
        let first = catalog.register(&descriptor("pizza-1.glb"), &reg).await.unwrap();
        let second = catalog.register(&descriptor("pizza-2.glb"), &reg).await.unwrap();

        let records = catalog.load().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, first);
        assert_eq!(records[1].id, second);
        assert_eq!(records[1].category, "Food");
    }
}
