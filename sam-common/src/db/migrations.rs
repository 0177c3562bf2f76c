//! Versioned schema migrations
//!
//! Each service owns an ordered list of [`Migration`]s. Applied versions are
//! tracked per component in the `schema_version` table so several services
//! may share one database file without stepping on each other.
//!
//! # Guidelines
//!
//! 1. Never modify a released migration; append a new one
//! 2. Statements must be idempotent (`IF NOT EXISTS`) so a half-applied
//!    migration can be retried after a crash
//! 3. Versions start at 1 and increase by one

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// One schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

async fn ensure_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            component TEXT NOT NULL,
            version INTEGER NOT NULL,
            description TEXT NOT NULL,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (component, version)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest applied version for `component` (0 when none)
pub async fn current_version(pool: &SqlitePool, component: &str) -> Result<i64> {
    ensure_version_table(pool).await?;
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version WHERE component = ?")
            .bind(component)
            .fetch_one(pool)
            .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded version
///
/// Each migration runs in its own transaction together with its version row.
pub async fn run_migrations(
    pool: &SqlitePool,
    component: &str,
    migrations: &[Migration],
) -> Result<()> {
    for (idx, m) in migrations.iter().enumerate() {
        if m.version != idx as i64 + 1 {
            return Err(Error::Internal(format!(
                "{} migration list out of order at version {}",
                component, m.version
            )));
        }
    }

    let target = migrations.len() as i64;
    let current = current_version(pool, component).await?;

    if current == target {
        info!("{} schema is up to date (v{})", component, current);
        return Ok(());
    }
    if current > target {
        warn!(
            "{} schema version ({}) is newer than code version ({})",
            component, current, target
        );
        return Ok(());
    }

    info!("Running {} migrations: v{} -> v{}", component, current, target);

    for m in migrations.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for stmt in m.statements {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (component, version, description) VALUES (?, ?, ?)")
            .bind(component)
            .bind(m.version)
            .bind(m.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("✓ {} migration v{} completed: {}", component, m.version, m.description);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPS: &[Migration] = &[
        Migration {
            version: 1,
            description: "create widgets",
            statements: &["CREATE TABLE IF NOT EXISTS widgets (id INTEGER PRIMARY KEY)"],
        },
        Migration {
            version: 2,
            description: "add widget name",
            statements: &["ALTER TABLE widgets ADD COLUMN name TEXT"],
        },
    ];

    async fn memory_pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn applies_each_step_once() {
        let pool = memory_pool().await;

        run_migrations(&pool, "test", STEPS).await.unwrap();
        assert_eq!(current_version(&pool, "test").await.unwrap(), 2);

        // Second run is a no-op; re-running ALTER TABLE would fail
        run_migrations(&pool, "test", STEPS).await.unwrap();
        assert_eq!(current_version(&pool, "test").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn components_are_tracked_separately() {
        let pool = memory_pool().await;
        run_migrations(&pool, "a", &STEPS[..1]).await.unwrap();
        assert_eq!(current_version(&pool, "a").await.unwrap(), 1);
        assert_eq!(current_version(&pool, "b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_gapped_versions() {
        let pool = memory_pool().await;
        let gapped = [STEPS[1]];
        assert!(run_migrations(&pool, "gap", &gapped).await.is_err());
    }
}
