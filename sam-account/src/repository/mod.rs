//! Account, group and scope persistence
//!
//! Group paths are derived from the in-memory [`GroupTree`]: every write that
//! changes a name or a parent loads the tree inside the transaction, applies
//! the change there and writes back each affected path before committing.

mod accounts;
mod groups;
mod scopes;

use sam_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::group_tree::{GroupTree, GroupTreeError};
use crate::models::Group;

impl From<GroupTreeError> for Error {
    fn from(err: GroupTreeError) -> Self {
        match err {
            GroupTreeError::UnknownGroup(id) => Error::NotFound(format!("group {}", id)),
            GroupTreeError::UnknownParent { .. }
            | GroupTreeError::Cycle { .. }
            | GroupTreeError::InvalidName(_) => Error::InvalidInput(err.to_string()),
            GroupTreeError::HasChildren(_) => Error::FailedPrecondition(err.to_string()),
            GroupTreeError::DuplicateId(_) => Error::Internal(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current group hierarchy
    pub async fn group_tree(&self) -> Result<GroupTree> {
        let mut conn = self.pool.acquire().await?;
        load_tree(&mut conn).await
    }
}

pub(crate) async fn load_tree(conn: &mut SqliteConnection) -> Result<GroupTree> {
    let rows = sqlx::query("SELECT id, name, parent_id FROM groups")
        .fetch_all(&mut *conn)
        .await?;
    let tree = GroupTree::from_rows(rows.iter().map(|row| {
        (
            row.get::<i64, _>("id"),
            row.get::<String, _>("name"),
            row.get::<Option<i64>, _>("parent_id"),
        )
    }))?;
    Ok(tree)
}

const GROUP_SELECT: &str = r#"
    SELECT
        g.id, g.name, g.fully_qualified_name, g.parent_id, g.scopes,
        (SELECT COUNT(*) FROM group_ownership o WHERE o.group_id = g.id) AS total_users,
        (SELECT COUNT(*) FROM groups c WHERE c.parent_id = g.id) AS total_groups
    FROM groups g
"#;

fn row_to_group(row: &SqliteRow) -> Result<Group> {
    let scopes: String = row.get("scopes");
    Ok(Group {
        id: row.get("id"),
        name: row.get("name"),
        fully_qualified_name: row.get("fully_qualified_name"),
        parent_id: row.get("parent_id"),
        scopes: serde_json::from_str(&scopes)?,
        number_of_users: row.get("total_users"),
        number_of_groups: row.get("total_groups"),
    })
}

/// Fetch groups by id, ordered by path
async fn groups_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Group>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "{} WHERE g.id IN ({}) ORDER BY g.fully_qualified_name",
        GROUP_SELECT, placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_group).collect()
}

fn expect_one(affected: u64, what: &str) -> Result<()> {
    match affected {
        1 => Ok(()),
        0 => Err(Error::NotFound(what.to_string())),
        n => Err(Error::Internal(format!(
            "{}: expected one row to be affected, actual affected rows: {}",
            what, n
        ))),
    }
}
