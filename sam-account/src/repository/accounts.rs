//! User accounts and group membership

use chrono::Utc;
use sam_common::{Error, Result, Role};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use super::{expect_one, load_tree, AccountRepository};
use crate::db::parse_timestamp;
use crate::models::{AccountInfo, AccountUpdate, NewAccount};

const ACCOUNT_SELECT: &str = r#"
    SELECT
        u.username, u.first_name, u.last_name, u.locale, u.role, u.profile_pic,
        u.cont_failed_login, u.first_login, u.created_on,
        (SELECT json_group_array(g.name)
           FROM group_ownership o JOIN groups g ON g.id = o.group_id
          WHERE o.user_id = u.username) AS group_names
    FROM users u
"#;

fn row_to_account(row: &SqliteRow) -> Result<AccountInfo> {
    let role: String = row.get("role");
    let created_on: String = row.get("created_on");
    let group_names: String = row.get("group_names");
    let mut groups: Vec<String> = serde_json::from_str(&group_names)?;
    groups.sort();

    Ok(AccountInfo {
        user_id: row.get("username"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        locale: row.get("locale"),
        role: role
            .parse::<Role>()
            .map_err(|_| Error::Internal(format!("Unknown role '{}'", role)))?,
        profile_pic: row.get("profile_pic"),
        first_login: row.get::<i64, _>("first_login") != 0,
        cont_failed_login: row.get("cont_failed_login"),
        created_on: parse_timestamp(&created_on)?,
        groups,
    })
}

impl AccountRepository {
    /// Store a new user together with its initial group memberships
    pub async fn create_account(&self, account: &NewAccount) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(&account.user_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists != 0 {
            return Err(Error::InvalidInput(format!(
                "user {} already exists",
                account.user_id
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO users
                (username, password, first_name, last_name, locale, role, created_on)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.user_id)
        .bind(&account.password_hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.locale)
        .bind(account.role.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let tree = load_tree(&mut tx).await?;
        for group_id in &account.groups {
            if !tree.contains(*group_id) {
                return Err(Error::NotFound(format!("group {}", group_id)));
            }
            sqlx::query("INSERT INTO group_ownership (group_id, user_id, created_on) VALUES (?, ?, ?)")
                .bind(group_id)
                .bind(&account.user_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(user_id = %account.user_id, groups = account.groups.len(), "Account created");
        Ok(())
    }

    pub async fn account_info(&self, user_id: &str) -> Result<AccountInfo> {
        let sql = format!("{} WHERE u.username = ?", ACCOUNT_SELECT);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;
        row_to_account(&row)
    }

    /// Stored password hash, for the authentication layer
    pub async fn password_hash(&self, user_id: &str) -> Result<String> {
        sqlx::query_scalar("SELECT password FROM users WHERE username = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
    }

    pub async fn update_account(&self, user_id: &str, update: &AccountUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET first_name = ?, last_name = ?, locale = ?, profile_pic = ? WHERE username = ?",
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.locale)
        .bind(&update.profile_pic)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), &format!("user {}", user_id))
    }

    pub async fn update_user_role(&self, user_id: &str, role: Role) -> Result<()> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE username = ?")
            .bind(role.to_string())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), &format!("user {}", user_id))?;
        info!(user_id = %user_id, role = %role, "Role updated");
        Ok(())
    }

    pub async fn change_user_first_login(&self, user_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET first_login = 0 WHERE username = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), &format!("user {}", user_id))
    }

    /// Replace the password hash and clear the failed-login counter
    pub async fn change_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET password = ?, cont_failed_login = 0 WHERE username = ?",
        )
        .bind(password_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), &format!("user {}", user_id))
    }

    /// Count one more consecutive failed login; returns the new count
    pub async fn increase_failed_login(&self, user_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            "UPDATE users SET cont_failed_login = cont_failed_login + 1 WHERE username = ? RETURNING cont_failed_login",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
    }

    pub async fn reset_failed_login(&self, user_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET cont_failed_login = 0 WHERE username = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), &format!("user {}", user_id))
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count != 0)
    }

    /// Every user except `excluding`, ordered by user id
    pub async fn users_all(&self, excluding: &str) -> Result<Vec<AccountInfo>> {
        let sql = format!("{} WHERE u.username != ? ORDER BY u.username", ACCOUNT_SELECT);
        let rows = sqlx::query(&sql).bind(excluding).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_account).collect()
    }

    /// Direct members of a group
    pub async fn group_users(&self, group_id: i64) -> Result<Vec<AccountInfo>> {
        let sql = format!(
            "{} WHERE u.username IN (SELECT user_id FROM group_ownership WHERE group_id = ?) ORDER BY u.username",
            ACCOUNT_SELECT
        );
        let rows = sqlx::query(&sql).bind(group_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_account).collect()
    }

    /// Add users to a group; every user must exist and not already be a member
    pub async fn add_group_users(&self, group_id: i64, user_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        for user_id in user_ids {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO group_ownership (group_id, user_id, created_on)
                SELECT ?, username, ? FROM users WHERE username = ?
                  AND EXISTS (SELECT 1 FROM groups WHERE id = ?)
                "#,
            )
            .bind(group_id)
            .bind(&now)
            .bind(user_id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() != 1 {
                return Err(Error::InvalidInput(format!(
                    "cannot add user {} to group {}",
                    user_id, group_id
                )));
            }
        }
        tx.commit().await?;
        debug!(group_id, added = user_ids.len(), "Group users added");
        Ok(())
    }

    /// Remove users from a group; every user must currently be a member
    pub async fn delete_group_users(&self, group_id: i64, user_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for user_id in user_ids {
            let result = sqlx::query("DELETE FROM group_ownership WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() != 1 {
                return Err(Error::InvalidInput(format!(
                    "user {} is not a member of group {}",
                    user_id, group_id
                )));
            }
        }
        tx.commit().await?;
        debug!(group_id, removed = user_ids.len(), "Group users removed");
        Ok(())
    }

    /// True when `user_id` is a direct member of any group in the subtrees
    /// owned by `admin_id`
    pub async fn user_belongs_to_admin_group(&self, admin_id: &str, user_id: &str) -> Result<bool> {
        let admin_groups = self.user_owned_group_ids(admin_id).await?;
        let user_groups: Vec<i64> =
            sqlx::query_scalar("SELECT group_id FROM group_ownership WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(user_groups.iter().any(|g| admin_groups.binary_search(g).is_ok()))
    }
}
