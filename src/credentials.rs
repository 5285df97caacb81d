//! Key/value settings for OAuth client credentials and user tokens
//!
//! The database is the source of truth. Legacy on-disk files are read only
//! when the key is absent, copied into the store, and removed once the copy
//! is confirmed.

use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::Database;
use crate::error::Result;

#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Read a setting; store errors read as "not set"
    pub fn get_setting(&self, key: &str) -> Option<String> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                error!(key = %key, "Failed to read setting: {}", e);
                None
            }
        }
    }

    fn try_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert a setting; failures are logged and swallowed
    pub fn set_setting(&self, key: &str, value: &str) {
        if let Err(e) = self.try_set(key, value) {
            error!(key = %key, "Failed to write setting: {}", e);
        }
    }

    fn try_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a setting, returning whether it existed
    pub fn delete_setting(&self, key: &str) -> bool {
        let result = self.db.lock().and_then(|conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])
                .map_err(Into::into)
        });
        match result {
            Ok(rows) => rows > 0,
            Err(e) => {
                error!(key = %key, "Failed to delete setting: {}", e);
                false
            }
        }
    }

    /// Resolve a setting from the store, falling back to a legacy file
    ///
    /// A legacy hit is promoted into the store and the file is deleted only
    /// after the stored value reads back identical. When the store already
    /// holds the key the legacy file is not touched.
    pub async fn resolve(&self, key: &str, legacy_path: &Path) -> Option<String> {
        if let Some(value) = self.get_setting(key) {
            return Some(value);
        }

        let content = match tokio::fs::read_to_string(legacy_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read legacy file {:?}: {}", legacy_path, e);
                return None;
            }
        };

        info!(key = %key, "Migrating legacy file {:?} into the settings store", legacy_path);
        self.set_setting(key, &content);

        if self.get_setting(key).as_deref() == Some(content.as_str()) {
            match tokio::fs::remove_file(legacy_path).await {
                Ok(()) => info!("Removed legacy file {:?}", legacy_path),
                Err(e) => warn!("Could not remove legacy file {:?}: {}", legacy_path, e),
            }
        } else {
            warn!(key = %key, "Setting did not persist, keeping legacy file {:?}", legacy_path);
        }

        Some(content)
    }
}
