//! Group hierarchy and ownership queries

use chrono::Utc;
use sam_common::{Error, Result};
use sqlx::{Row, SqliteConnection};
use tracing::info;

use super::{expect_one, groups_by_ids, load_tree, row_to_group, AccountRepository, GROUP_SELECT};
use crate::group_tree::GroupTree;
use crate::models::{Group, GroupUpdate, NewGroup};

/// Write back the paths produced by a tree rename or move
async fn persist_paths(conn: &mut SqliteConnection, changed: &[(i64, String)]) -> Result<()> {
    for (id, fqn) in changed {
        sqlx::query("UPDATE groups SET fully_qualified_name = ? WHERE id = ?")
            .bind(fqn)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Reject a path already held by another group
fn ensure_path_free(tree: &GroupTree, fqn: &str, owner: Option<i64>) -> Result<()> {
    match tree.find_by_path(fqn) {
        Some(existing) if Some(existing.id) != owner => {
            Err(Error::InvalidInput(format!("group {} already exists", fqn)))
        }
        _ => Ok(()),
    }
}

async fn group_scopes(conn: &mut SqliteConnection, group_id: i64) -> Result<Vec<String>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT scopes FROM groups WHERE id = ?")
        .bind(group_id)
        .fetch_optional(&mut *conn)
        .await?;
    let raw = raw.ok_or_else(|| Error::NotFound(format!("group {}", group_id)))?;
    Ok(serde_json::from_str(&raw)?)
}

impl AccountRepository {
    /// Create a group below an existing parent
    ///
    /// The group's scopes must be a subset of its parent's scopes.
    pub async fn create_group(&self, created_by: &str, group: &NewGroup) -> Result<Group> {
        let parent_id = group
            .parent_id
            .ok_or_else(|| Error::InvalidInput("parent group is required".to_string()))?;

        let mut tx = self.pool.begin().await?;
        let tree = load_tree(&mut tx).await?;
        let fqn = tree.path_for(&group.name, Some(parent_id))?;
        ensure_path_free(&tree, &fqn, None)?;

        let parent_scopes = group_scopes(&mut tx, parent_id).await?;
        if let Some(missing) = group.scopes.iter().find(|s| !parent_scopes.contains(s)) {
            return Err(Error::InvalidInput(format!(
                "scope {} is not available in the parent group",
                missing
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO groups (name, fully_qualified_name, parent_id, scopes, created_by, created_on)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&group.name)
        .bind(&fqn)
        .bind(parent_id)
        .bind(serde_json::to_string(&group.scopes)?)
        .bind(created_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        tx.commit().await?;

        info!(group_id = id, fqn = %fqn, created_by = %created_by, "Group created");
        self.group_info(id).await
    }

    pub async fn group_info(&self, group_id: i64) -> Result<Group> {
        let sql = format!("{} WHERE g.id = ?", GROUP_SELECT);
        let row = sqlx::query(&sql)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))?;
        row_to_group(&row)
    }

    /// Rename a group and/or replace its scopes
    ///
    /// A rename rewrites the path of the group and every descendant in the
    /// same transaction.
    pub async fn update_group(&self, group_id: i64, update: &GroupUpdate) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut tree = load_tree(&mut tx).await?;
        if !tree.contains(group_id) {
            return Err(Error::NotFound(format!("group {}", group_id)));
        }

        if let Some(name) = &update.name {
            let parent = tree.get(group_id).and_then(|n| n.parent_id);
            let fqn = tree.path_for(name, parent)?;
            ensure_path_free(&tree, &fqn, Some(group_id))?;

            let changed = tree.rename(group_id, name)?;
            sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
                .bind(name)
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
            persist_paths(&mut tx, &changed).await?;
            info!(group_id, fqn = %fqn, rewritten = changed.len(), "Group renamed");
        }

        if let Some(scopes) = &update.scopes {
            let result = sqlx::query("UPDATE groups SET scopes = ? WHERE id = ?")
                .bind(serde_json::to_string(scopes)?)
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
            expect_one(result.rows_affected(), &format!("group {}", group_id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Reparent a group; its subtree follows
    pub async fn move_group(&self, group_id: i64, new_parent: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut tree = load_tree(&mut tx).await?;
        let name = tree
            .get(group_id)
            .map(|n| n.name.clone())
            .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))?;
        if tree.get(group_id).and_then(|n| n.parent_id).is_none() {
            return Err(Error::InvalidInput("the root group cannot be moved".to_string()));
        }
        let fqn = tree.path_for(&name, Some(new_parent))?;
        ensure_path_free(&tree, &fqn, Some(group_id))?;

        let changed = tree.move_to(group_id, Some(new_parent))?;
        sqlx::query("UPDATE groups SET parent_id = ? WHERE id = ?")
            .bind(new_parent)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        persist_paths(&mut tx, &changed).await?;
        tx.commit().await?;

        info!(group_id, parent_id = new_parent, rewritten = changed.len(), "Group moved");
        Ok(())
    }

    /// Delete a leaf group that has no members
    pub async fn delete_group(&self, group_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut tree = load_tree(&mut tx).await?;
        if tree.get(group_id).is_some_and(|n| n.parent_id.is_none()) {
            return Err(Error::FailedPrecondition(
                "the root group cannot be deleted".to_string(),
            ));
        }
        tree.remove(group_id)?;

        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_ownership WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(&mut *tx)
            .await?;
        if members != 0 {
            return Err(Error::FailedPrecondition(format!(
                "group {} still has {} users",
                group_id, members
            )));
        }

        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        expect_one(result.rows_affected(), &format!("group {}", group_id))?;
        tx.commit().await?;

        info!(group_id, "Group deleted");
        Ok(())
    }

    pub async fn child_groups_direct(&self, group_id: i64) -> Result<Vec<Group>> {
        let sql = format!("{} WHERE g.parent_id = ? ORDER BY g.fully_qualified_name", GROUP_SELECT);
        let rows = sqlx::query(&sql).bind(group_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_group).collect()
    }

    /// Every group below `group_id`, excluding itself
    pub async fn child_groups_all(&self, group_id: i64) -> Result<Vec<Group>> {
        let tree = self.group_tree().await?;
        if !tree.contains(group_id) {
            return Err(Error::NotFound(format!("group {}", group_id)));
        }
        groups_by_ids(&self.pool, &tree.descendants(group_id)).await
    }

    /// Ids of the groups a user owns directly or through an ancestor, sorted
    pub(crate) async fn user_owned_group_ids(&self, user_id: &str) -> Result<Vec<i64>> {
        let direct: Vec<i64> =
            sqlx::query_scalar("SELECT group_id FROM group_ownership WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        if direct.is_empty() {
            return Ok(Vec::new());
        }
        let tree = self.group_tree().await?;
        Ok(tree.covering(&direct))
    }

    /// Groups owned by the user, including every subgroup of a direct group
    ///
    /// Returns the total count alongside the groups.
    pub async fn user_owned_groups(&self, user_id: &str) -> Result<(usize, Vec<Group>)> {
        let ids = self.user_owned_group_ids(user_id).await?;
        let groups = groups_by_ids(&self.pool, &ids).await?;
        Ok((groups.len(), groups))
    }

    pub async fn user_owned_groups_direct(&self, user_id: &str) -> Result<Vec<Group>> {
        let sql = format!(
            "{} JOIN group_ownership o ON o.group_id = g.id WHERE o.user_id = ? ORDER BY g.fully_qualified_name",
            GROUP_SELECT
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_group).collect()
    }

    /// True when the group lies within a subtree the user owns
    pub async fn user_owns_group(&self, user_id: &str, group_id: i64) -> Result<bool> {
        let direct: Vec<i64> =
            sqlx::query_scalar("SELECT group_id FROM group_ownership WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        if direct.is_empty() {
            return Ok(false);
        }
        let tree = self.group_tree().await?;
        Ok(direct.iter().any(|&owned| tree.is_within(owned, group_id)))
    }

    pub async fn group_exists_by_fqn(&self, fqn: &str) -> Result<bool> {
        let row = sqlx::query("SELECT id FROM groups WHERE fully_qualified_name = ?")
            .bind(fqn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn root_group(&self) -> Result<Group> {
        let sql = format!("{} WHERE g.parent_id IS NULL ORDER BY g.id LIMIT 1", GROUP_SELECT);
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("root group".to_string()))?;
        row_to_group(&row)
    }

    pub async fn is_group_root(&self, group_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT parent_id FROM groups WHERE id = ?")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))?;
        Ok(row.get::<Option<i64>, _>("parent_id").is_none())
    }
}
