//! libSQL backend: durable `CompletionStore`.
//!
//! The onboarded addresses live as one JSON array in the `settings` table,
//! under a single fixed key.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::migrations;
use super::traits::CompletionStore;
use crate::error::DatabaseError;
use crate::onboarding::model::settings_keys;

/// libSQL-backed completion store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlCompletionStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    key: String,
    /// Serializes read-modify-write of the address list.
    write_lock: Mutex<()>,
}

impl LibSqlCompletionStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, key: &str) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db, key).await?;
        info!(path = %path.display(), key = %key, "Completion store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(key: &str) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db, key).await
    }

    async fn from_database(db: LibSqlDatabase, key: &str) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            key: key.to_string(),
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Load the stored address list. A missing or malformed value is empty.
    async fn load(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM settings WHERE user_id = ?1 AND key = ?2",
                params![settings_keys::LOCAL_USER, self.key.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load completions: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value_str: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("read completion list: {e}")))?;
                match serde_json::from_str::<Vec<String>>(&value_str) {
                    Ok(list) => Ok(list),
                    Err(e) => {
                        tracing::warn!(key = %self.key, error = %e, "Ignoring malformed completion list");
                        Ok(Vec::new())
                    }
                }
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(DatabaseError::Query(format!("load completions: {e}"))),
        }
    }

    async fn save(&self, list: &[String]) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let value_str =
            serde_json::to_string(list).map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO settings (user_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, key) DO UPDATE SET value = ?3, updated_at = ?4",
                params![settings_keys::LOCAL_USER, self.key.as_str(), value_str, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save completions: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl CompletionStore for LibSqlCompletionStore {
    async fn has(&self, address: &str) -> Result<bool, DatabaseError> {
        Ok(self.load().await?.iter().any(|a| a == address))
    }

    async fn set(&self, address: &str) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;
        if list.iter().any(|a| a == address) {
            debug!(address = %address, "Address already recorded as onboarded");
            return Ok(());
        }
        list.push(address.to_string());
        self.save(&list).await
    }

    async fn list(&self) -> Result<Vec<String>, DatabaseError> {
        self.load().await
    }
}
