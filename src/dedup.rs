//! Persisted set of message ids that were already delivered
//!
//! Lookups and inserts never fail from the caller's point of view: a store
//! error is logged and read as "not processed" (lookups) or ignored (inserts),
//! so a broken database degrades to duplicate notifications rather than a
//! stalled pipeline.

use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::Database;
use crate::error::Result;

#[derive(Clone)]
pub struct DedupStore {
    db: Arc<Database>,
}

impl DedupStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run the one-shot legacy migration, then report the record count
    pub async fn init(&self, legacy_path: &Path) -> Result<()> {
        self.migrate_legacy(legacy_path).await;
        info!("Dedup store ready with {} processed ids", self.count());
        Ok(())
    }

    /// Import a legacy flat JSON array of ids and rename the file to `.bak`
    ///
    /// Returns the number of ids read from the legacy file. Ids already in
    /// the store are ignored, so an interrupted migration can be re-run.
    pub async fn migrate_legacy(&self, legacy_path: &Path) -> usize {
        let content = match tokio::fs::read_to_string(legacy_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                error!("Failed to read legacy id file {:?}: {}", legacy_path, e);
                return 0;
            }
        };

        let ids: Vec<String> = match serde_json::from_str(&content) {
            Ok(ids) => ids,
            Err(e) => {
                error!("Legacy id file {:?} is not a JSON array of strings: {}", legacy_path, e);
                return 0;
            }
        };

        if ids.is_empty() {
            return 0;
        }

        info!(
            "Found legacy id file, migrating {} ids into the database",
            ids.len()
        );

        if let Err(e) = self.insert_all(&ids) {
            error!("Legacy id migration failed, leaving {:?} in place: {}", legacy_path, e);
            return 0;
        }

        let backup = backup_path(legacy_path);
        match tokio::fs::rename(legacy_path, &backup).await {
            Ok(()) => info!("Migration complete, legacy file renamed to {:?}", backup),
            Err(e) => warn!("Migrated ids but could not rename {:?}: {}", legacy_path, e),
        }

        ids.len()
    }

    fn insert_all(&self, ids: &[String]) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO processed_ids (id) VALUES (?1)")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Whether the id was already delivered; errors read as `false`
    pub fn has(&self, id: &str) -> bool {
        match self.try_has(id) {
            Ok(found) => found,
            Err(e) => {
                error!(message_id = %id, "Dedup lookup failed: {}", e);
                false
            }
        }
    }

    fn try_has(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT id FROM processed_ids WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Record a delivered id; inserting an existing id is a no-op
    pub fn add(&self, id: &str) {
        let result = self.db.lock().and_then(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO processed_ids (id) VALUES (?1)",
                params![id],
            )
            .map_err(Into::into)
        });
        if let Err(e) = result {
            error!(message_id = %id, "Failed to record processed id: {}", e);
        }
    }

    pub fn count(&self) -> usize {
        let result = self.db.lock().and_then(|conn| {
            conn.query_row("SELECT COUNT(*) FROM processed_ids", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(Into::into)
        });
        match result {
            Ok(count) => count as usize,
            Err(e) => {
                error!("Failed to count processed ids: {}", e);
                0
            }
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}
