//! Account database schema
//!
//! Group scopes are stored as a JSON array of scope codes. The root group
//! (id 1, `ROOT`) is created by the first migration and receives every new
//! scope.

use chrono::{DateTime, Utc};
use sam_common::db::{open_pool, run_migrations, Migration};
use sam_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

pub const COMPONENT: &str = "sam-account";

pub const ROOT_GROUP_ID: i64 = 1;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "users, groups, ownership and scopes",
    statements: &[
        r#"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            password TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            locale TEXT NOT NULL,
            role TEXT NOT NULL,
            profile_pic TEXT,
            cont_failed_login INTEGER NOT NULL DEFAULT 0,
            first_login INTEGER NOT NULL DEFAULT 1,
            created_on TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            fully_qualified_name TEXT NOT NULL UNIQUE,
            parent_id INTEGER REFERENCES groups(id),
            scopes TEXT NOT NULL DEFAULT '[]',
            created_by TEXT NOT NULL,
            created_on TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_groups_parent ON groups(parent_id)",
        r#"
        CREATE TABLE IF NOT EXISTS group_ownership (
            group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
            created_on TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS scopes (
            scope_code TEXT PRIMARY KEY,
            scope_name TEXT NOT NULL,
            scope_type TEXT NOT NULL DEFAULT 'GENERIC',
            created_by TEXT NOT NULL,
            created_on TEXT NOT NULL
        )
        "#,
        r#"
        INSERT OR IGNORE INTO groups (id, name, fully_qualified_name, parent_id, scopes, created_by, created_on)
        VALUES (1, 'ROOT', 'ROOT', NULL, '[]', 'system', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        "#,
    ],
}];

/// Open the database and bring the account schema up to date
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    run_migrations(&pool, COMPONENT, MIGRATIONS).await?;
    tracing::info!(path = %db_path.display(), "sam-account database ready");
    Ok(pool)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", raw, e)))
}
