//! # SAM Common Library
//!
//! Shared code for the SAM platform services:
//! - Error type shared by repositories and services
//! - Caller claims (user, role, scopes) and the HTTP extractor for them
//! - Configuration file resolution
//! - SQLite pool initialisation and versioned migrations

pub mod claims;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;

pub use claims::{Claims, Role};
pub use error::{Error, Result};
