//! Embedded schema migrations for the durable queue store.

use sqlx::SqlitePool;

use crate::errors::{DbError, DbResult};

// Embed migration SQL at compile time
const MIGRATION_UPLOAD_QUEUE: &str = include_str!("../migrations/20250601000000_upload_queue.sql");

// List of migrations with their names and SQL content
const MIGRATIONS: &[(&str, &str)] = &[(
    "20250601000000_upload_queue.sql",
    MIGRATION_UPLOAD_QUEUE,
)];

/// Apply all pending migrations.
///
/// Idempotent: applied migrations are tracked in `_migrations`, so an
/// existing database is never recreated and queued data is preserved.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let already_applied = sqlx::query("SELECT name FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?
            .is_some();

        if already_applied {
            continue;
        }

        log::info!("Applying migration {}", name);

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
        }

        sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO upload_queue
             (id, payload, target_record_id, target_field, file_name, created_at, updated_at)
             VALUES ('a', x'00', 'b', 'photo', 'p.jpg', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();

        // Re-running must not recreate tables or lose data
        run_migrations(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM upload_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
