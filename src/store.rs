//! # Settings Store Module
//!
//! ## Purpose
//! Persistent storage of named keyword setting groups and the pointer that
//! selects the active one, using an embedded database.
//!
//! ## Input/Output Specification
//! - **Input**: Setting groups (name, keywords, threshold), active selection
//! - **Output**: Persisted settings, active-setting reads, change events
//! - **Storage**: Sled embedded database, bincode-encoded values
//!
//! ## Key Features
//! - Whole-group create/update/delete, never partial mutation
//! - Active-setting pointer with dangling-pointer cleanup on read
//! - Change notifications so the engine can re-bootstrap out-of-band edits
//!
//! Absence of an active setting is a valid state, not an error: the engine
//! stays inert until one is selected.

use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Default highlight threshold for newly created setting groups
pub const DEFAULT_NEW_SETTING_THRESHOLD: u32 = 3;

const SETTINGS_TREE: &str = "setting_groups";
const META_TREE: &str = "meta";
const ACTIVE_ID_KEY: &str = "current_active_setting_id";

/// A named keyword configuration group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSetting {
    /// Unique setting group identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Keyword list, display casing preserved
    pub keywords: Vec<String>,
    /// Minimum distinct-keyword count for the highlight marker
    pub highlight_threshold: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl StoredSetting {
    /// Create a new setting group
    pub fn new(name: impl Into<String>, keywords: Vec<String>, highlight_threshold: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            keywords,
            // A threshold below 1 can never be crossed meaningfully
            highlight_threshold: highlight_threshold.max(1),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted settings interface the engine bootstraps from
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// All setting groups, unordered
    async fn list(&self) -> Result<Vec<StoredSetting>>;

    /// One setting group by id
    async fn get(&self, id: Uuid) -> Result<Option<StoredSetting>>;

    /// Create or replace a setting group wholesale
    async fn save(&self, setting: StoredSetting) -> Result<()>;

    /// Delete a setting group; clears the active pointer if it pointed here
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Id of the active setting group, if any
    async fn active_setting_id(&self) -> Result<Option<Uuid>>;

    /// Mark a setting group active
    async fn set_active(&self, id: Uuid) -> Result<()>;

    /// Clear the active selection
    async fn clear_active(&self) -> Result<()>;

    /// Resolve the active setting. A pointer to a deleted setting is removed
    /// and reported as "no active setting".
    async fn load_active(&self) -> Result<Option<StoredSetting>>;

    /// Receiver that observes a revision bump on every store write
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Sled-backed settings store
pub struct SledSettingsStore {
    db: Arc<sled::Db>,
    settings: sled::Tree,
    meta: sled::Tree,
    revision: watch::Sender<u64>,
}

impl SledSettingsStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::open(path)?;
        let settings = db.open_tree(SETTINGS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let (revision, _) = watch::channel(0);

        tracing::info!(
            "Settings store opened at {:?} with {} setting groups",
            path,
            settings.len()
        );

        Ok(Self {
            db: Arc::new(db),
            settings,
            meta,
            revision,
        })
    }

    /// Verify the store is writable
    pub fn health_check(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn store_error(operation: &str, details: impl ToString) -> EngineError {
        EngineError::Store {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }
}

#[async_trait]
impl SettingsStore for SledSettingsStore {
    async fn list(&self) -> Result<Vec<StoredSetting>> {
        let mut out = Vec::new();
        for entry in self.settings.iter() {
            let (_, value) = entry.map_err(|e| Self::store_error("list", e))?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredSetting>> {
        let value = self
            .settings
            .get(id.as_bytes())
            .map_err(|e| Self::store_error("get", e))?;
        match value {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, mut setting: StoredSetting) -> Result<()> {
        setting.highlight_threshold = setting.highlight_threshold.max(1);
        setting.updated_at = Utc::now();

        let value = bincode::serialize(&setting)?;
        self.settings
            .insert(setting.id.as_bytes(), value)
            .map_err(|e| Self::store_error("save", e))?;

        tracing::debug!("Saved setting group '{}' ({})", setting.name, setting.id);
        self.bump_revision();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.settings
            .remove(id.as_bytes())
            .map_err(|e| Self::store_error("delete", e))?;

        if self.active_setting_id().await? == Some(id) {
            self.meta
                .remove(ACTIVE_ID_KEY)
                .map_err(|e| Self::store_error("delete", e))?;
            tracing::debug!("Cleared active pointer to deleted setting {}", id);
        }

        self.bump_revision();
        Ok(())
    }

    async fn active_setting_id(&self) -> Result<Option<Uuid>> {
        let value = self
            .meta
            .get(ACTIVE_ID_KEY)
            .map_err(|e| Self::store_error("active_setting_id", e))?;
        match value {
            Some(bytes) => {
                let id = Uuid::from_slice(&bytes).map_err(|e| {
                    Self::store_error("active_setting_id", format!("corrupt id: {}", e))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn set_active(&self, id: Uuid) -> Result<()> {
        if self.get(id).await?.is_none() {
            return Err(EngineError::SettingNotFound { id: id.to_string() });
        }
        self.meta
            .insert(ACTIVE_ID_KEY, id.as_bytes().to_vec())
            .map_err(|e| Self::store_error("set_active", e))?;
        self.bump_revision();
        Ok(())
    }

    async fn clear_active(&self) -> Result<()> {
        self.meta
            .remove(ACTIVE_ID_KEY)
            .map_err(|e| Self::store_error("clear_active", e))?;
        self.bump_revision();
        Ok(())
    }

    async fn load_active(&self) -> Result<Option<StoredSetting>> {
        let Some(id) = self.active_setting_id().await? else {
            return Ok(None);
        };

        match self.get(id).await? {
            Some(setting) => Ok(Some(setting)),
            None => {
                // Dangling pointer: the setting it named is gone
                tracing::warn!("Active setting {} no longer exists, clearing pointer", id);
                self.meta
                    .remove(ACTIVE_ID_KEY)
                    .map_err(|e| Self::store_error("load_active", e))?;
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SledSettingsStore) {
        let dir = TempDir::new().unwrap();
        let store = SledSettingsStore::open(dir.path().join("settings.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let (_dir, store) = open_store();
        let setting = StoredSetting::new(
            "backend",
            vec!["Rust".to_string(), "C++".to_string()],
            DEFAULT_NEW_SETTING_THRESHOLD,
        );
        let id = setting.id;
        store.save(setting).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "backend");
        assert_eq!(loaded.keywords, vec!["Rust", "C++"]);
        assert_eq!(loaded.highlight_threshold, 3);
    }

    #[tokio::test]
    async fn test_zero_threshold_clamped_on_save() {
        let (_dir, store) = open_store();
        let mut setting = StoredSetting::new("s", vec!["Go".to_string()], 2);
        setting.highlight_threshold = 0;
        let id = setting.id;
        store.save(setting).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().highlight_threshold, 1);
    }

    #[tokio::test]
    async fn test_no_active_setting_is_valid_state() {
        let (_dir, store) = open_store();
        assert!(store.active_setting_id().await.unwrap().is_none());
        assert!(store.load_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_setting_lifecycle() {
        let (_dir, store) = open_store();
        let setting = StoredSetting::new("s", vec!["Rust".to_string()], 1);
        let id = setting.id;
        store.save(setting).await.unwrap();

        store.set_active(id).await.unwrap();
        assert_eq!(store.load_active().await.unwrap().unwrap().id, id);

        store.clear_active().await.unwrap();
        assert!(store.load_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_active_unknown_id_rejected() {
        let (_dir, store) = open_store();
        assert!(store.set_active(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_dangling_active_pointer_removed_on_load() {
        let (_dir, store) = open_store();
        let setting = StoredSetting::new("s", vec!["Rust".to_string()], 1);
        let id = setting.id;
        store.save(setting).await.unwrap();
        store.set_active(id).await.unwrap();

        // Remove behind the pointer's back
        store.settings.remove(id.as_bytes()).unwrap();

        assert!(store.load_active().await.unwrap().is_none());
        assert!(store.active_setting_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_clears_active_pointer() {
        let (_dir, store) = open_store();
        let setting = StoredSetting::new("s", vec!["Rust".to_string()], 1);
        let id = setting.id;
        store.save(setting).await.unwrap();
        store.set_active(id).await.unwrap();

        store.delete(id).await.unwrap();
        assert!(store.active_setting_id().await.unwrap().is_none());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_bump_revision() {
        let (_dir, store) = open_store();
        let rx = store.subscribe();
        let before = *rx.borrow();

        store
            .save(StoredSetting::new("s", vec!["Rust".to_string()], 1))
            .await
            .unwrap();

        assert!(*rx.borrow() > before);
    }
}
