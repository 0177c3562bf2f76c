//! Database helpers shared by SAM services

pub mod init;
pub mod migrations;

pub use init::{open_pool, DEFAULT_BUSY_TIMEOUT_MS};
pub use migrations::{run_migrations, Migration};
