//! Global upload poller
//!
//! A global upload is transformed outside DPS into per-type CSV files named
//! `<global id>_<SCOPE>_<type>.csv` in the files directory. Each cycle
//! looks at every global upload still PENDING or UPLOADED:
//!
//! - `<global id>.error` present: the transformation failed, FAILED
//!   `NifiInternalError`
//! - no transformed file yet: wait; after `wait_limit` empty cycles FAILED
//!   `NifiTimeout`
//! - transformed files present: the global upload becomes PROCESSED, the
//!   files are renamed `PROCESSING#<name>` and handed to
//!   [`IngestionOrchestrator::notify_upload`]. A refused notification puts
//!   names and status back so the next cycle retries.

use futures::FutureExt;
use sam_common::{Claims, Result, Role};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::orchestrator::{IngestionOrchestrator, NotifyUploadRequest, NIFI_USER};
use crate::db::uploads;
use crate::models::{UploadRecord, UploadStatus};
use crate::storage::{Storage, PROCESSING_MARKER};

/// Empty cycles seen per global upload id
#[derive(Debug, Default)]
pub struct PollerState {
    waits: Mutex<HashMap<i64, u32>>,
}

impl PollerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more empty cycle and return the total
    pub async fn bump(&self, global_id: i64) -> u32 {
        let mut waits = self.waits.lock().await;
        let count = waits.entry(global_id).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn forget(&self, global_id: i64) {
        self.waits.lock().await.remove(&global_id);
    }

    pub async fn waits(&self, global_id: i64) -> u32 {
        self.waits.lock().await.get(&global_id).copied().unwrap_or(0)
    }
}

/// What one cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub triggered: usize,
    pub failed: usize,
    pub waiting: usize,
}

pub struct Poller {
    orchestrator: IngestionOrchestrator,
    storage: Storage,
    state: PollerState,
    wait_limit: u32,
    interval: Duration,
}

impl Poller {
    pub fn new(
        orchestrator: IngestionOrchestrator,
        storage: Storage,
        state: PollerState,
        wait_limit: u32,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            storage,
            state,
            wait_limit,
            interval,
        }
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    pub fn orchestrator(&self) -> &IngestionOrchestrator {
        &self.orchestrator
    }

    /// Cycle at startup, then every `interval` until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        tracing::info!(interval_secs = self.interval.as_secs(), "Poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.guarded_cycle().await,
            }
        }
        tracing::info!("Poller stopped");
    }

    /// One cycle; a panic is logged and swallowed
    pub async fn guarded_cycle(&self) {
        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(Ok(report)) => {
                if report != CycleReport::default() {
                    tracing::info!(
                        triggered = report.triggered,
                        failed = report.failed,
                        waiting = report.waiting,
                        "Poller cycle finished"
                    );
                }
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Poller cycle failed"),
            Err(_) => tracing::error!("Poller cycle panicked, recovered"),
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let pool = self.orchestrator.pool();
        let pending = uploads::list_pending_global(pool).await?;
        let mut report = CycleReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        let names = list_file_names(self.storage.files_dir());

        for global in pending {
            let gid = global.upload_id;

            if names.contains(&format!("{}.error", gid)) {
                tracing::warn!(global_file_id = gid, "Transformation reported an error");
                uploads::update_status(pool, gid, UploadStatus::Failed, "NifiInternalError").await?;
                self.state.forget(gid).await;
                report.failed += 1;
                continue;
            }

            let prefix = format!("{}_", gid);
            let transformed: Vec<&String> = names
                .iter()
                .filter(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
                .collect();

            if transformed.is_empty() {
                let waited = self.state.bump(gid).await;
                if waited > self.wait_limit {
                    tracing::warn!(global_file_id = gid, waited, "Transformed files never arrived");
                    uploads::update_status(pool, gid, UploadStatus::Failed, "NifiTimeout").await?;
                    self.state.forget(gid).await;
                    report.failed += 1;
                } else {
                    report.waiting += 1;
                }
                continue;
            }

            self.state.forget(gid).await;
            if self.hand_over(&global, &transformed).await? {
                report.triggered += 1;
            }
        }
        Ok(report)
    }

    /// Returns false when the hand-over failed and was undone
    ///
    /// Every transformed file must take the processing marker before the
    /// notification goes out; a single rename failure undoes the others and
    /// leaves the global upload for the next cycle.
    async fn hand_over(&self, global: &UploadRecord, transformed: &[&String]) -> Result<bool> {
        let pool = self.orchestrator.pool();
        let gid = global.upload_id;
        uploads::update_status(pool, gid, UploadStatus::Processed, "").await?;

        let dir = self.storage.files_dir();
        let mut renamed = Vec::with_capacity(transformed.len());
        for name in transformed {
            let marked = format!("{}{}", PROCESSING_MARKER, name);
            if let Err(e) = std::fs::rename(dir.join(name.as_str()), dir.join(&marked)) {
                tracing::warn!(
                    global_file_id = gid,
                    file = %name,
                    error = %e,
                    "Rename failed, will retry"
                );
                self.undo_hand_over(global, &renamed).await?;
                return Ok(false);
            }
            renamed.push(((*name).clone(), marked));
        }

        let claims = Claims::new(NIFI_USER, Role::SuperAdmin, vec![global.scope.clone()]);
        let request = NotifyUploadRequest {
            scope: global.scope.clone(),
            data_type: "data".to_string(),
            uploaded_by: NIFI_USER.to_string(),
            scope_type: Some(global.scope_type.as_str().to_string()),
            files: renamed.iter().map(|(_, marked)| marked.clone()).collect(),
            is_delete_old_inventory: false,
            global_file_id: Some(gid),
            analysis_id: global.analysis_id.clone(),
        };

        match self.orchestrator.notify_upload(&claims, request).await {
            Ok(_) => {
                tracing::info!(global_file_id = gid, files = renamed.len(), "Transformed files queued");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(global_file_id = gid, error = %e, "Notify refused, will retry");
                self.undo_hand_over(global, &renamed).await?;
                Ok(false)
            }
        }
    }

    async fn undo_hand_over(
        &self,
        global: &UploadRecord,
        renamed: &[(String, String)],
    ) -> Result<()> {
        let dir = self.storage.files_dir();
        for (original, marked) in renamed {
            if let Err(e) = std::fs::rename(dir.join(marked), dir.join(original)) {
                tracing::error!(file = %marked, error = %e, "Cannot restore file name");
            }
        }
        uploads::transition_status(
            self.orchestrator.pool(),
            global.upload_id,
            UploadStatus::Processed,
            global.status,
        )
        .await?;
        Ok(())
    }
}

fn list_file_names(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "Files directory missing");
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect()
}
