//! Scopes and their attachment to groups

use chrono::Utc;
use sam_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::{load_tree, AccountRepository};
use crate::db::{parse_timestamp, ROOT_GROUP_ID};
use crate::group_tree::PATH_SEPARATOR;
use crate::models::{Scope, ScopeType};

const GROUPS_WITH_SCOPE: &str = r#"
    SELECT id, name, scopes FROM groups
    WHERE EXISTS (SELECT 1 FROM json_each(groups.scopes) WHERE json_each.value = ?)
    ORDER BY name
"#;

async fn fetch_scope(conn: &mut SqliteConnection, scope_code: &str) -> Result<Option<Scope>> {
    let row = sqlx::query(
        "SELECT scope_code, scope_name, scope_type, created_by, created_on FROM scopes WHERE scope_code = ?",
    )
    .bind(scope_code)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let group_names: Vec<String> = sqlx::query(GROUPS_WITH_SCOPE)
        .bind(scope_code)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|r| r.get("name"))
        .collect();
    row_to_scope(&row, group_names).map(Some)
}

fn row_to_scope(row: &SqliteRow, group_names: Vec<String>) -> Result<Scope> {
    let scope_type: String = row.get("scope_type");
    let created_on: String = row.get("created_on");
    Ok(Scope {
        scope_code: row.get("scope_code"),
        scope_name: row.get("scope_name"),
        scope_type: ScopeType::parse(&scope_type).unwrap_or_default(),
        created_by: row.get("created_by"),
        created_on: parse_timestamp(&created_on)?,
        group_names,
    })
}

impl AccountRepository {
    /// Register a scope and attach it to the root group
    pub async fn create_scope(
        &self,
        scope_code: &str,
        scope_name: &str,
        created_by: &str,
        scope_type: ScopeType,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if fetch_scope(&mut tx, scope_code).await?.is_some() {
            return Err(Error::InvalidInput(format!("scope {} already exists", scope_code)));
        }

        sqlx::query(
            "INSERT INTO scopes (scope_code, scope_name, scope_type, created_by, created_on) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(scope_code)
        .bind(scope_name)
        .bind(scope_type.as_str())
        .bind(created_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("UPDATE groups SET scopes = json_insert(scopes, '$[#]', ?) WHERE id = ?")
            .bind(scope_code)
            .bind(ROOT_GROUP_ID)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() != 1 {
            return Err(Error::NotFound("root group".to_string()));
        }

        tx.commit().await?;
        info!(scope = %scope_code, scope_type = scope_type.as_str(), created_by = %created_by, "Scope created");
        Ok(())
    }

    /// Details of the requested scopes; unknown codes are skipped
    pub async fn list_scopes(&self, scope_codes: &[String]) -> Result<Vec<Scope>> {
        let mut conn = self.pool.acquire().await?;
        let mut scopes = Vec::with_capacity(scope_codes.len());
        for code in scope_codes {
            if let Some(scope) = fetch_scope(&mut conn, code).await? {
                scopes.push(scope);
            }
        }
        Ok(scopes)
    }

    pub async fn scope_by_code(&self, scope_code: &str) -> Result<Scope> {
        let mut conn = self.pool.acquire().await?;
        fetch_scope(&mut conn, scope_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scope {}", scope_code)))
    }

    /// Remove a scope everywhere in one transaction
    ///
    /// The scope is detached from every group. Non-root groups left without
    /// any scope are deleted together with their memberships, deepest first;
    /// a group that still has children after that keeps its row.
    pub async fn drop_scope(&self, scope_code: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if fetch_scope(&mut tx, scope_code).await?.is_none() {
            return Err(Error::NotFound(format!("scope {}", scope_code)));
        }

        let rows = sqlx::query(GROUPS_WITH_SCOPE)
            .bind(scope_code)
            .fetch_all(&mut *tx)
            .await?;
        let mut emptied = BTreeSet::new();
        for row in &rows {
            let id: i64 = row.get("id");
            let raw: String = row.get("scopes");
            let mut scopes: Vec<String> = serde_json::from_str(&raw)?;
            scopes.retain(|s| s != scope_code);
            sqlx::query("UPDATE groups SET scopes = ? WHERE id = ?")
                .bind(serde_json::to_string(&scopes)?)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if scopes.is_empty() && id != ROOT_GROUP_ID {
                emptied.insert(id);
            }
        }

        let mut tree = load_tree(&mut tx).await?;
        let mut doomed: Vec<(usize, i64)> = emptied
            .iter()
            .filter_map(|&id| {
                tree.path_of(id)
                    .map(|fqn| (fqn.matches(PATH_SEPARATOR).count(), id))
            })
            .collect();
        doomed.sort_by(|a, b| b.cmp(a));

        let mut deleted = 0usize;
        for (_, id) in doomed {
            if tree.remove(id).is_err() {
                warn!(group_id = id, scope = %scope_code, "Group without scopes kept: it still has child groups");
                continue;
            }
            sqlx::query("DELETE FROM group_ownership WHERE group_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM groups WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += 1;
        }

        sqlx::query("DELETE FROM scopes WHERE scope_code = ?")
            .bind(scope_code)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(scope = %scope_code, detached = rows.len(), groups_deleted = deleted, "Scope dropped");
        Ok(())
    }
}
