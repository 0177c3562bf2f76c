//! # SAM Account Repository
//!
//! Persistence for user accounts, the group hierarchy and scopes:
//! - [`GroupTree`] keeps group paths consistent across renames and moves
//! - [`AccountRepository`] stores accounts, groups, memberships and scopes
//!   in SQLite and resolves transitive group ownership

pub mod db;
pub mod group_tree;
pub mod models;
pub mod repository;

pub use db::init_database_pool;
pub use group_tree::{GroupTree, GroupTreeError};
pub use repository::AccountRepository;
