//! On-disk file layout
//!
//! - incoming data files: `<files_location>/<file_name>`
//! - processed files: `<archive_location>/<upload_id>_<file_name>`
//! - analysis input and report: `<rawdata_location>/<scope>/analysis/<file>`
//! - analysis good rows: `<rawdata_location>/<scope>/analysis/good_<file>`
//! - analysis bad rows: `<rawdata_location>/<scope>/errors/bad_<file>`

use std::io;
use std::path::PathBuf;

use crate::config::StorageConfig;

/// Marker prefixed to transformed files handed to ingestion
pub const PROCESSING_MARKER: &str = "PROCESSING#";

#[derive(Debug, Clone)]
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn files_dir(&self) -> &PathBuf {
        &self.config.files_location
    }

    pub fn incoming_path(&self, file_name: &str) -> PathBuf {
        self.config.files_location.join(file_name)
    }

    pub fn archive_path(&self, upload_id: i64, file_name: &str) -> PathBuf {
        self.config
            .archive_location
            .join(format!("{}_{}", upload_id, file_name))
    }

    /// Move a processed file out of the incoming directory
    pub fn archive(&self, upload_id: i64, file_name: &str) -> io::Result<PathBuf> {
        let from = self.incoming_path(file_name);
        let to = self.archive_path(upload_id, file_name);
        std::fs::create_dir_all(&self.config.archive_location)?;
        std::fs::rename(&from, &to)?;
        tracing::info!(
            upload_id,
            from = %from.display(),
            to = %to.display(),
            "Archived file"
        );
        Ok(to)
    }

    pub fn analysis_dir(&self, scope: &str) -> PathBuf {
        self.config.rawdata_location.join(scope).join("analysis")
    }

    pub fn errors_dir(&self, scope: &str) -> PathBuf {
        self.config.rawdata_location.join(scope).join("errors")
    }

    pub fn analysis_input(&self, scope: &str, file: &str) -> PathBuf {
        self.analysis_dir(scope).join(file)
    }

    pub fn good_output(&self, scope: &str, file: &str) -> PathBuf {
        self.analysis_dir(scope).join(format!("good_{}", file))
    }

    pub fn bad_output(&self, scope: &str, file: &str) -> PathBuf {
        self.errors_dir(scope).join(format!("bad_{}", file))
    }
}

/// Archive, logging instead of failing: a missing source must not undo a
/// status change that already happened
pub fn archive_quietly(storage: &Storage, upload_id: i64, file_name: &str) {
    if let Err(e) = storage.archive(upload_id, file_name) {
        tracing::warn!(upload_id, file_name, error = %e, "Failed to archive file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn storage(root: &Path) -> Storage {
        Storage::new(StorageConfig {
            files_location: root.join("files"),
            archive_location: root.join("archive"),
            rawdata_location: root.join("raw"),
        })
    }

    #[test]
    fn archive_moves_with_upload_prefix() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = storage(dir.path());
        std::fs::create_dir_all(storage.files_dir()).unwrap();
        std::fs::write(storage.incoming_path("S1_applications.csv"), "x").unwrap();

        let archived = storage.archive(12, "S1_applications.csv").unwrap();

        assert_eq!(archived, dir.path().join("archive").join("12_S1_applications.csv"));
        assert!(archived.exists());
        assert!(!storage.incoming_path("S1_applications.csv").exists());
    }

    #[test]
    fn analysis_layout() {
        let storage = storage(Path::new("/data"));
        assert_eq!(
            storage.good_output("S1", "inv.xlsx"),
            PathBuf::from("/data/raw/S1/analysis/good_inv.xlsx")
        );
        assert_eq!(
            storage.bad_output("S1", "inv.xlsx"),
            PathBuf::from("/data/raw/S1/errors/bad_inv.xlsx")
        );
    }
}
