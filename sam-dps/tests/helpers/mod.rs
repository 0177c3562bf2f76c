//! Test Helper Utilities
//!
//! Shared utilities for testing sam-dps

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_transport;
pub mod workbook_builder;

// Re-export commonly used items
pub use db_utils::{create_test_db, seed_upload, test_config, wait_for_status};
pub use fake_transport::FakeTransport;
pub use workbook_builder::{valid_sheets, write_workbook, Sheet};
