//! Account, group and scope records

use chrono::{DateTime, Utc};
use sam_common::Role;
use serde::{Deserialize, Serialize};

/// Stored user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub locale: String,
    pub role: Role,
    #[serde(default)]
    pub profile_pic: Option<String>,
    pub first_login: bool,
    pub cont_failed_login: i64,
    pub created_on: DateTime<Utc>,
    /// Names of the groups the user belongs to directly
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Values for a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    /// Already hashed by the caller
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub locale: String,
    pub role: Role,
    /// Groups the user joins on creation
    pub groups: Vec<i64>,
}

/// Personal details a user may change themselves
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub first_name: String,
    pub last_name: String,
    pub locale: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub fully_qualified_name: String,
    pub parent_id: Option<i64>,
    pub scopes: Vec<String>,
    pub number_of_users: i64,
    pub number_of_groups: i64,
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub parent_id: Option<i64>,
    pub scopes: Vec<String>,
}

/// Changes applied by [`crate::AccountRepository::update_group`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

/// Whether a scope's data is generic or tied to one organisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeType {
    #[default]
    Generic,
    Specific,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Generic => "GENERIC",
            ScopeType::Specific => "SPECIFIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GENERIC" => Some(ScopeType::Generic),
            "SPECIFIC" => Some(ScopeType::Specific),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub scope_code: String,
    pub scope_name: String,
    pub scope_type: ScopeType,
    pub created_by: String,
    pub created_on: DateTime<Utc>,
    /// Groups the scope is attached to
    pub group_names: Vec<String>,
}
