//! Analysis request flow
//!
//! After the workbook passes its preconditions, seven tasks run in one
//! [`JoinSet`]: a task per sheet and a writer per output workbook. Sheet
//! tasks hand their rows and annotations to the writers over bounded
//! channels; a writer finishes once every sheet task has dropped its sender.
//! Softpartitions wait for the servers verdicts and products for the
//! softpartition verdicts, each over a oneshot channel.

use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use super::schema::SheetKind;
use super::sheets::{self, SheetInput, SheetOutcome, Verdicts};
use super::validator::{self, SheetHeaders};
use super::workbook::{Rows, Workbook};
use super::writer::{self, SheetNotes, SheetRows};
use super::{
    AnalysisError, AnalysisResponse, ObjectCommentInfo, BAD_FILE, CORE_FACTOR_CACHING_ERROR,
    INVALID_FILE_EXTENSION,
};
use crate::services::core_factor_cache::{CoreFactorCache, CoreFactorTrie};
use crate::storage::Storage;

const WORKBOOK_EXTENSION: &str = "xlsx";
const CHANNEL_CAPACITY: usize = 4;

/// Runs `DataAnalysis` requests
#[derive(Clone)]
pub struct AnalysisEngine {
    pool: SqlitePool,
    storage: Storage,
    core_factors: Arc<CoreFactorCache>,
}

/// Workbook contents once the preconditions hold
struct Prepared {
    sheets: Vec<(String, Arc<Rows>)>,
    inputs: HashMap<SheetKind, SheetInput>,
}

/// Senders shared by the sheet tasks
#[derive(Clone)]
struct Outputs {
    good: mpsc::Sender<SheetRows>,
    bad: mpsc::Sender<SheetRows>,
    notes: mpsc::Sender<SheetNotes>,
}

impl Outputs {
    async fn emit(&self, kind: SheetKind, outcome: SheetOutcome) -> Result<(), AnalysisError> {
        let closed = |_| AnalysisError::Internal(format!("{} writer stopped", kind.name()));
        self.good
            .send(SheetRows {
                kind,
                rows: outcome.good,
            })
            .await
            .map_err(closed)?;
        self.bad
            .send(SheetRows {
                kind,
                rows: outcome.bad,
            })
            .await
            .map_err(closed)?;
        self.notes
            .send(SheetNotes {
                kind,
                notes: outcome.comments,
            })
            .await
            .map_err(|_| AnalysisError::Internal(format!("{} report writer stopped", kind.name())))
    }
}

pub fn has_workbook_extension(file: &str) -> bool {
    file.rsplit_once('.')
        .is_some_and(|(_, ext)| ext == WORKBOOK_EXTENSION)
}

/// Message naming the required sheets absent from `names`
fn missing_sheets(names: &[String]) -> Option<String> {
    let missing: Vec<&str> = SheetKind::ALL
        .iter()
        .map(|k| k.name())
        .filter(|name| !names.iter().any(|n| n == name))
        .collect();
    match missing.len() {
        0 => None,
        1 => Some(format!("{} sheet is missing", missing[0])),
        _ => Some(format!("{} sheets are missing", missing.join(", "))),
    }
}

fn join_failure(e: tokio::task::JoinError) -> AnalysisError {
    AnalysisError::Internal(format!("analysis task aborted: {}", e))
}

impl AnalysisEngine {
    pub fn new(pool: SqlitePool, storage: Storage, core_factors: Arc<CoreFactorCache>) -> Self {
        Self {
            pool,
            storage,
            core_factors,
        }
    }

    /// Analyze `<rawdata>/<scope>/analysis/<file>`
    pub async fn analyze(&self, scope: &str, file: &str) -> AnalysisResponse {
        if !has_workbook_extension(file) {
            tracing::warn!(file, "Analysis refused, not a workbook");
            return AnalysisResponse::failed(INVALID_FILE_EXTENSION);
        }

        let path = self.storage.analysis_input(scope, file);
        let opened = tokio::task::spawn_blocking({
            let path = path.clone();
            move || Workbook::open(&path)
        })
        .await;
        let workbook = match opened {
            Ok(Ok(workbook)) => workbook,
            Ok(Err(e)) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to open workbook");
                return AnalysisResponse::failed(BAD_FILE);
            }
            Err(e) => return AnalysisResponse::from_error(&join_failure(e)),
        };

        if let Some(message) = missing_sheets(&workbook.sheet_names()) {
            tracing::warn!(file, message = %message, "Analysis refused");
            return AnalysisResponse::failed(message);
        }

        let prepared = match prepare(workbook).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(file, error = %e, "Workbook rejected");
                return AnalysisResponse::from_error(&e);
            }
        };

        let trie = match self.core_factors.ensure_cached(&self.pool).await {
            Ok(trie) => trie,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build core factor cache");
                return AnalysisResponse::failed(CORE_FACTOR_CACHING_ERROR);
            }
        };

        match self.run(scope, file, prepared, trie).await {
            Ok(()) => {
                tracing::info!(scope, file, "Analysis completed");
                AnalysisResponse::completed(scope, file)
            }
            Err(e) => {
                tracing::error!(scope, file, error = %e, "Analysis failed");
                AnalysisResponse::from_error(&e)
            }
        }
    }

    async fn run(
        &self,
        scope: &str,
        file: &str,
        prepared: Prepared,
        trie: Arc<CoreFactorTrie>,
    ) -> Result<(), AnalysisError> {
        let Prepared { sheets, mut inputs } = prepared;
        let headers: Arc<BTreeMap<SheetKind, SheetHeaders>> = Arc::new(
            inputs
                .iter()
                .map(|(kind, input)| (*kind, input.headers.clone()))
                .collect(),
        );
        let mut header_notes: HashMap<String, Vec<ObjectCommentInfo>> = HashMap::new();
        for (kind, h) in headers.iter() {
            if !h.duplicates.is_empty() {
                header_notes.insert(kind.name().to_string(), h.duplicates.clone());
            }
        }

        let (good_tx, good_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (bad_tx, bad_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (notes_tx, notes_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let outputs = Outputs {
            good: good_tx,
            bad: bad_tx,
            notes: notes_tx,
        };
        let (servers_tx, servers_rx) = oneshot::channel::<Verdicts>();
        let (partitions_tx, partitions_rx) = oneshot::channel::<Verdicts>();

        let mut take = |kind: SheetKind| {
            inputs
                .remove(&kind)
                .ok_or_else(|| AnalysisError::Internal(format!("{} not prepared", kind.name())))
        };
        let servers = take(SheetKind::Servers)?;
        let partitions = take(SheetKind::Softpartitions)?;
        let products = take(SheetKind::Products)?;
        let rights = take(SheetKind::AcquiredRights)?;

        let mut tasks: JoinSet<Result<(), AnalysisError>> = JoinSet::new();

        let out = outputs.clone();
        tasks.spawn(async move {
            let (outcome, verdicts) = sheets::analyze_servers(&servers);
            // a closed receiver means the softpartition task already failed
            let _ = servers_tx.send(verdicts);
            out.emit(servers.kind, outcome).await
        });

        let out = outputs.clone();
        tasks.spawn(async move {
            let pending = sheets::screen_softpartitions(&partitions);
            let server_verdicts = servers_rx
                .await
                .map_err(|_| AnalysisError::Internal("server verdicts unavailable".into()))?;
            let (outcome, verdicts) = pending.resolve(&server_verdicts, &partitions.headers);
            let _ = partitions_tx.send(verdicts);
            out.emit(partitions.kind, outcome).await
        });

        let out = outputs.clone();
        tasks.spawn(async move {
            let pending = sheets::screen_products(&products);
            let partition_verdicts = partitions_rx
                .await
                .map_err(|_| AnalysisError::Internal("softpartition verdicts unavailable".into()))?;
            let (outcome, _) = pending.resolve(&partition_verdicts, &products.headers);
            out.emit(products.kind, outcome).await
        });

        let out = outputs;
        tasks.spawn(async move {
            let outcome = sheets::analyze_acquired_rights(&rights);
            out.emit(rights.kind, outcome).await
        });

        tasks.spawn(filtered_writer(
            good_rx,
            self.storage.good_output(scope, file),
            headers.clone(),
            Some(trie),
        ));
        let errors_dir = self.storage.errors_dir(scope);
        let bad_path = self.storage.bad_output(scope, file);
        let bad_headers = headers.clone();
        tasks.spawn(async move {
            tokio::fs::create_dir_all(&errors_dir).await?;
            filtered_writer(bad_rx, bad_path, bad_headers, None).await
        });
        tasks.spawn(report_writer(
            notes_rx,
            self.storage.analysis_input(scope, file),
            sheets,
            header_notes,
        ));

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined.unwrap_or_else(|e| Err(join_failure(e))) {
                tracing::debug!(error = %e, "Analysis task failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Read the four sheets and resolve their headers
async fn prepare(mut workbook: Workbook) -> Result<Prepared, AnalysisError> {
    let names = workbook.sheet_names();
    let sheets = tokio::task::spawn_blocking(move || {
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let rows = match workbook.read(&name) {
                Ok(rows) => rows,
                Err(e) => match SheetKind::from_name(&name) {
                    Some(kind) => {
                        tracing::error!(sheet = %name, error = %e, "Failed to read sheet");
                        return Err(AnalysisError::SheetRead(kind));
                    }
                    None => {
                        tracing::warn!(sheet = %name, error = %e, "Unreadable extra sheet skipped");
                        Vec::new()
                    }
                },
            };
            sheets.push((name, Arc::new(rows)));
        }
        Ok(sheets)
    })
    .await
    .map_err(join_failure)??;

    let mut inputs = HashMap::new();
    let mut missing_headers = Vec::new();
    for (name, rows) in &sheets {
        let Some(kind) = SheetKind::from_name(name) else {
            continue;
        };
        if rows.len() <= 1 {
            return Err(AnalysisError::Invalid(format!("{} sheet is empty", name)));
        }
        let headers = validator::resolve_headers(&rows[0]);
        let missing = validator::missing_mandatory_headers(kind, &headers);
        if !missing.is_empty() {
            tracing::warn!(sheet = %name, missing = ?missing, "Mandatory headers missing");
            missing_headers.push(name.clone());
        }
        inputs.insert(
            kind,
            SheetInput {
                kind,
                headers,
                rows: rows.clone(),
            },
        );
    }

    if !missing_headers.is_empty() {
        return Err(AnalysisError::Invalid(format!(
            "Mandatory headers are missing in {} please check global template file for more information",
            missing_headers.join(",")
        )));
    }
    Ok(Prepared { sheets, inputs })
}

/// Collect rows per sheet, then write the good or bad workbook
async fn filtered_writer(
    mut rx: mpsc::Receiver<SheetRows>,
    path: PathBuf,
    headers: Arc<BTreeMap<SheetKind, SheetHeaders>>,
    core_factors: Option<Arc<CoreFactorTrie>>,
) -> Result<(), AnalysisError> {
    let mut collected: BTreeMap<SheetKind, Vec<Vec<String>>> = BTreeMap::new();
    while let Some(sheet) = rx.recv().await {
        collected.entry(sheet.kind).or_default().extend(sheet.rows);
    }

    tokio::task::spawn_blocking(move || {
        let sheets: Vec<(SheetKind, &SheetHeaders, Vec<Vec<String>>)> = headers
            .iter()
            .map(|(kind, h)| (*kind, h, collected.remove(kind).unwrap_or_default()))
            .collect();
        let written = writer::write_filtered(&path, &sheets, core_factors.as_deref())?;
        if written {
            tracing::info!(file = %path.display(), "Analysis output written");
        }
        Ok(())
    })
    .await
    .map_err(join_failure)?
}

/// Collect annotations, then rewrite the upload as the annotated report
async fn report_writer(
    mut rx: mpsc::Receiver<SheetNotes>,
    path: PathBuf,
    sheets: Vec<(String, Arc<Rows>)>,
    mut notes: HashMap<String, Vec<ObjectCommentInfo>>,
) -> Result<(), AnalysisError> {
    while let Some(sheet) = rx.recv().await {
        if !sheet.notes.is_empty() {
            notes
                .entry(sheet.kind.name().to_string())
                .or_default()
                .extend(sheet.notes);
        }
    }
    if notes.is_empty() {
        return Ok(());
    }

    tokio::task::spawn_blocking(move || {
        writer::write_report(&path, &sheets, &notes)?;
        tracing::info!(file = %path.display(), "Analysis report written");
        Ok(())
    })
    .await
    .map_err(join_failure)?
}
