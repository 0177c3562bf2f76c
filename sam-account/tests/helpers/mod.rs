//! Test Helper Utilities

#![allow(dead_code)]

use anyhow::Result;
use sam_account::models::{NewAccount, NewGroup};
use sam_account::AccountRepository;
use sam_common::Role;
use tempfile::TempDir;

/// Repository over a fresh database holding only the root group
///
/// TempDir must be kept alive for the duration of the test
pub async fn create_test_repo() -> Result<(TempDir, AccountRepository)> {
    let temp_dir = TempDir::new()?;
    let pool = sam_account::init_database_pool(&temp_dir.path().join("test_sam_account.db")).await?;
    Ok((temp_dir, AccountRepository::new(pool)))
}

pub fn new_account(user_id: &str, role: Role, groups: Vec<i64>) -> NewAccount {
    NewAccount {
        user_id: user_id.to_string(),
        password_hash: "$2a$10$hash".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        locale: "en".to_string(),
        role,
        groups,
    }
}

pub fn new_group(name: &str, parent_id: i64, scopes: &[&str]) -> NewGroup {
    NewGroup {
        name: name.to_string(),
        parent_id: Some(parent_id),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}
