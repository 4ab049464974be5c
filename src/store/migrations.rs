//! Schema for the libSQL completion store.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "settings",
    sql: r#"
        CREATE TABLE IF NOT EXISTS settings (
            user_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, key)
        );
    "#,
}];

/// Bring the schema up to the latest version.
///
/// Applied versions are recorded in `_migrations`; re-running is a no-op.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let applied = schema_version(conn).await?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");
        let failed = |e: libsql::Error| {
            DatabaseError::Migration(format!("V{} {}: {e}", migration.version, migration.name))
        };
        conn.execute_batch(migration.sql).await.map_err(failed)?;
        conn.execute(
            "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(failed)?;
    }
    Ok(())
}

/// Highest applied version, 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let read_failed = |e: libsql::Error| DatabaseError::Migration(format!("read schema version: {e}"));
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(read_failed)?;
    match rows.next().await.map_err(read_failed)? {
        Some(row) => row.get::<i64>(0).map_err(read_failed),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_settings_table() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["_migrations", "settings"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = schema_version(&conn).await.unwrap();
        assert_eq!(version, 1);
    }
}
