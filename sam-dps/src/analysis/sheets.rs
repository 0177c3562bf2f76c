//! Per-sheet analysis
//!
//! Servers and acquired rights are judged on their own rows. Softpartitions
//! and products reference rows of another sheet, so their analysis is split:
//! [`screen_softpartitions`] / [`screen_products`] run the local checks, and
//! the returned [`PendingSheet`] is resolved once the referenced sheet's
//! verdicts are known.

use std::collections::HashMap;
use std::sync::Arc;

use super::schema::SheetKind;
use super::validator::{self, RowScreen, Screened, SheetHeaders};
use super::workbook::Rows;
use super::{ActionKind, ObjectCommentInfo};

/// Final state of an identifier (server, softpartition)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Bad,
    Good,
}

/// Verdict per identifier; identifiers never seen are bad references
pub type Verdicts = HashMap<String, Verdict>;

/// Header resolution plus the rows of one sheet
#[derive(Debug, Clone)]
pub struct SheetInput {
    pub kind: SheetKind,
    pub headers: SheetHeaders,
    pub rows: Arc<Rows>,
}

/// Rows split for the output workbooks
#[derive(Debug, Default)]
pub struct SheetOutcome {
    pub good: Vec<Vec<String>>,
    pub bad: Vec<Vec<String>>,
    pub comments: Vec<ObjectCommentInfo>,
}

impl SheetOutcome {
    fn reject(&mut self, row: &[String], comments: impl IntoIterator<Item = ObjectCommentInfo>) {
        self.bad.push(row.to_vec());
        self.comments.extend(comments);
    }
}

/// Rows waiting on another sheet's verdicts
#[derive(Debug)]
pub struct PendingSheet {
    kind: SheetKind,
    outcome: SheetOutcome,
    /// Row number and row of each locally valid row, in sheet order
    waiting: Vec<(u32, Vec<String>)>,
    /// Column holding the referenced identifier
    reference_column: &'static str,
    /// Column holding this row's own identifier, if other sheets refer to it
    id_column: Option<&'static str>,
    verdicts: Verdicts,
}

impl PendingSheet {
    /// Settle waiting rows against `upstream` and return this sheet's verdicts
    pub fn resolve(mut self, upstream: &Verdicts, headers: &SheetHeaders) -> (SheetOutcome, Verdicts) {
        // Products may reference servers directly
        for (id, verdict) in upstream {
            self.verdicts.entry(id.clone()).or_insert(*verdict);
        }

        let reference_col = headers.column(self.reference_column).unwrap_or(0);
        for (row_no, row) in self.waiting {
            let reference = headers.value(&row, self.reference_column);
            if upstream.get(reference) == Some(&Verdict::Good) {
                self.outcome.good.push(row);
                continue;
            }
            if let Some(id_column) = self.id_column {
                self.verdicts
                    .insert(headers.value(&row, id_column).to_string(), Verdict::Bad);
            }
            let comment = ObjectCommentInfo::cell(
                format!(
                    "Bad reference, Either server {} is missing or containing errors",
                    reference
                ),
                ActionKind::BadReference,
                row_no,
                reference_col,
            );
            self.outcome.reject(&row, [comment]);
        }

        tracing::debug!(
            sheet = self.kind.name(),
            good = self.outcome.good.len(),
            bad = self.outcome.bad.len(),
            "Sheet resolved"
        );
        (self.outcome, self.verdicts)
    }
}

/// Servers: one row per server id
///
/// The verdict of a server id is the verdict of its last row.
pub fn analyze_servers(input: &SheetInput) -> (SheetOutcome, Verdicts) {
    let headers = &input.headers;
    let mut screen = RowScreen::new(input.kind, headers);
    let mut outcome = SheetOutcome::default();
    let mut verdicts = Verdicts::new();
    let mut seen_ids: HashMap<String, u32> = HashMap::new();
    let id_col = headers.column("server_id").unwrap_or(0);

    for (row_no, row) in validator::data_rows(&input.rows) {
        let server_id = headers.value(row, "server_id").to_string();
        let verdict = match screen.screen(row, row_no) {
            Screened::Duplicate(comment) => {
                outcome.reject(row, [comment]);
                Verdict::Bad
            }
            Screened::Invalid(comments) => {
                outcome.reject(row, comments);
                Verdict::Bad
            }
            Screened::Valid if seen_ids.contains_key(&server_id) => {
                let comment = ObjectCommentInfo::cell(
                    "ServerId is repeated with different configuration",
                    ActionKind::Inconsistent1,
                    row_no,
                    id_col,
                );
                outcome.reject(row, [comment]);
                Verdict::Bad
            }
            Screened::Valid => {
                seen_ids.insert(server_id.clone(), row_no);
                outcome.good.push(row.clone());
                Verdict::Good
            }
        };
        verdicts.insert(server_id, verdict);
    }
    (outcome, verdicts)
}

/// Softpartitions: local checks; server references resolve later
///
/// The first row of a softpartition id decides its initial verdict.
pub fn screen_softpartitions(input: &SheetInput) -> PendingSheet {
    let headers = &input.headers;
    let mut screen = RowScreen::new(input.kind, headers);
    let mut pending = PendingSheet {
        kind: input.kind,
        outcome: SheetOutcome::default(),
        waiting: Vec::new(),
        reference_column: "server_id",
        id_column: Some("softpartition_id"),
        verdicts: Verdicts::new(),
    };
    let mut owners: HashMap<String, String> = HashMap::new();
    let id_col = headers.column("softpartition_id").unwrap_or(0);

    for (row_no, row) in validator::data_rows(&input.rows) {
        let partition_id = headers.value(row, "softpartition_id").to_string();
        let server_id = headers.value(row, "server_id");

        let verdict = match screen.screen(row, row_no) {
            Screened::Duplicate(comment) => {
                pending.outcome.reject(row, [comment]);
                Verdict::Bad
            }
            Screened::Invalid(comments) => {
                pending.outcome.reject(row, comments);
                Verdict::Bad
            }
            Screened::Valid => match owners.get(&partition_id) {
                Some(owner) if owner != server_id => {
                    let comment = ObjectCommentInfo::cell(
                        "same softpartition id cannot have multiple server_id",
                        ActionKind::Inconsistent1,
                        row_no,
                        id_col,
                    );
                    pending.outcome.reject(row, [comment]);
                    Verdict::Bad
                }
                _ => {
                    owners.insert(partition_id.clone(), server_id.to_string());
                    pending.waiting.push((row_no, row.clone()));
                    Verdict::Good
                }
            },
        };
        pending.verdicts.entry(partition_id).or_insert(verdict);
    }
    pending
}

/// Products: local checks; host references resolve later
pub fn screen_products(input: &SheetInput) -> PendingSheet {
    let headers = &input.headers;
    let mut screen = RowScreen::new(input.kind, headers);
    let mut pending = PendingSheet {
        kind: input.kind,
        outcome: SheetOutcome::default(),
        waiting: Vec::new(),
        reference_column: "host_id",
        id_column: None,
        verdicts: Verdicts::new(),
    };
    let mut application_names: HashMap<String, String> = HashMap::new();
    let app_col = headers.column("application_id").unwrap_or(0);

    for (row_no, row) in validator::data_rows(&input.rows) {
        match screen.screen(row, row_no) {
            Screened::Duplicate(comment) => pending.outcome.reject(row, [comment]),
            Screened::Invalid(comments) => pending.outcome.reject(row, comments),
            Screened::Valid => {
                let app_id = headers.value(row, "application_id");
                let app_name = headers.value(row, "application_name");
                let conflict = match application_names.get(app_id) {
                    Some(known) => !app_name.is_empty() && known != app_name,
                    None => {
                        if !app_id.is_empty() && !app_name.is_empty() {
                            application_names.insert(app_id.to_string(), app_name.to_string());
                        }
                        false
                    }
                };
                if conflict {
                    let comment = ObjectCommentInfo::cell(
                        "Inconsistency, same application_id cannot have different name",
                        ActionKind::Inconsistent1,
                        row_no,
                        app_col,
                    );
                    pending.outcome.reject(row, [comment]);
                } else {
                    pending.waiting.push((row_no, row.clone()));
                }
            }
        }
    }
    pending
}

/// Acquired rights: no references to other sheets
pub fn analyze_acquired_rights(input: &SheetInput) -> SheetOutcome {
    let headers = &input.headers;
    let mut screen = RowScreen::new(input.kind, headers);
    let mut outcome = SheetOutcome::default();

    for (row_no, row) in validator::data_rows(&input.rows) {
        match screen.screen(row, row_no) {
            Screened::Duplicate(comment) => outcome.reject(row, [comment]),
            Screened::Invalid(comments) => outcome.reject(row, comments),
            Screened::Valid => {
                let comments = validator::acquired_right_inconsistencies(headers, row, row_no);
                if comments.is_empty() {
                    outcome.good.push(row.clone());
                } else {
                    outcome.reject(row, comments);
                }
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::validator::resolve_headers;

    fn input(kind: SheetKind, rows: &[&[&str]]) -> SheetInput {
        let rows: Rows = rows
            .iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect();
        SheetInput {
            kind,
            headers: resolve_headers(&rows[0]),
            rows: Arc::new(rows),
        }
    }

    fn servers() -> SheetInput {
        input(
            SheetKind::Servers,
            &[
                &[
                    "server_id",
                    "server_name",
                    "cpu_model",
                    "cores_per_processor",
                    "server_processors_numbers",
                    "cluster_name",
                    "vcenter_name",
                    "ibm_pvu",
                    "sag_uvu",
                    "cpu_manufacturer",
                ],
                &["srv1", "a", "xeon", "4", "2", "", "", "", "", "intel"],
                &["srv2", "b", "xeon", "many", "2", "", "", "", "", "intel"],
                &["srv1", "a", "xeon", "4", "2", "", "", "", "", "intel"],
                &["srv3", "c", "epyc", "8", "1", "", "", "", "", "amd"],
                &["srv3", "c", "epyc", "16", "1", "", "", "", "", "amd"],
            ],
        )
    }

    fn softpartitions() -> SheetInput {
        input(
            SheetKind::Softpartitions,
            &[
                &["softpartition_id", "server_id", "softpartition_name"],
                &["p1", "srv1", "one"],
                &["p2", "srv2", "two"],
                &["p3", "srv9", "three"],
                &["p4", "srv1", "four"],
            ],
        )
    }

    #[test]
    fn server_verdicts_follow_last_row() {
        let (outcome, verdicts) = analyze_servers(&servers());

        // srv1's exact copy and srv3's conflicting second row are rejected
        assert_eq!(verdicts.get("srv1"), Some(&Verdict::Bad));
        assert_eq!(verdicts.get("srv2"), Some(&Verdict::Bad));
        assert_eq!(verdicts.get("srv3"), Some(&Verdict::Bad));
        assert_eq!(outcome.good.len(), 2);
        assert_eq!(outcome.bad.len(), 3);

        let actions: Vec<ActionKind> = outcome.comments.iter().map(|c| c.action).collect();
        assert_eq!(
            actions,
            vec![
                ActionKind::WrongTypeField,
                ActionKind::DuplicateLine,
                ActionKind::Inconsistent1
            ]
        );
    }

    #[test]
    fn softpartition_on_bad_server_is_demoted() {
        let mut server_verdicts = Verdicts::new();
        server_verdicts.insert("srv1".to_string(), Verdict::Good);
        server_verdicts.insert("srv2".to_string(), Verdict::Bad);

        let input = softpartitions();
        let pending = screen_softpartitions(&input);
        let (outcome, verdicts) = pending.resolve(&server_verdicts, &input.headers);

        let good_ids: Vec<&str> = outcome.good.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(good_ids, vec!["p1", "p4"]);
        assert_eq!(outcome.bad.len(), 2);
        assert!(outcome
            .comments
            .iter()
            .all(|c| c.action == ActionKind::BadReference));
        assert_eq!(
            outcome.comments[0].msg,
            "Bad reference, Either server srv2 is missing or containing errors"
        );

        assert_eq!(verdicts.get("p1"), Some(&Verdict::Good));
        assert_eq!(verdicts.get("p2"), Some(&Verdict::Bad));
        assert_eq!(verdicts.get("p3"), Some(&Verdict::Bad));
        // server verdicts are carried for products hosted on servers
        assert_eq!(verdicts.get("srv1"), Some(&Verdict::Good));
    }

    #[test]
    fn softpartition_moving_between_servers_is_inconsistent() {
        let input = input(
            SheetKind::Softpartitions,
            &[
                &["softpartition_id", "server_id", "softpartition_name"],
                &["p1", "srv1", "one"],
                &["p1", "srv2", "one"],
            ],
        );
        let mut server_verdicts = Verdicts::new();
        server_verdicts.insert("srv1".to_string(), Verdict::Good);
        server_verdicts.insert("srv2".to_string(), Verdict::Good);

        let (outcome, verdicts) = screen_softpartitions(&input).resolve(&server_verdicts, &input.headers);

        assert_eq!(outcome.good.len(), 1);
        assert_eq!(outcome.comments[0].action, ActionKind::Inconsistent1);
        assert_eq!(verdicts.get("p1"), Some(&Verdict::Good));
    }

    #[test]
    fn products_resolve_against_partitions_and_servers() {
        let input = input(
            SheetKind::Products,
            &[
                &[
                    "product_name",
                    "product_version",
                    "product_editor",
                    "host_id",
                    "domain",
                    "environment",
                    "application_name",
                    "application_id",
                    "application_instance_name",
                    "number_of_access",
                ],
                &["db", "19", "oracle", "p1", "", "", "crm", "a1", "", "3"],
                &["db", "19", "oracle", "srv1", "", "", "", "", "", ""],
                &["db", "19", "oracle", "p2", "", "", "", "", "", ""],
                &["mw", "12", "oracle", "p1", "", "", "erp", "a1", "", ""],
            ],
        );
        let mut upstream = Verdicts::new();
        upstream.insert("p1".to_string(), Verdict::Good);
        upstream.insert("p2".to_string(), Verdict::Bad);
        upstream.insert("srv1".to_string(), Verdict::Good);

        let (outcome, _) = screen_products(&input).resolve(&upstream, &input.headers);

        assert_eq!(outcome.good.len(), 2);
        assert_eq!(outcome.bad.len(), 2);
        let actions: Vec<ActionKind> = outcome.comments.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![ActionKind::Inconsistent1, ActionKind::BadReference]);
    }

    #[test]
    fn acquired_rights_route_rows() {
        let input = input(
            SheetKind::AcquiredRights,
            &[
                &[
                    "sku",
                    "product_name",
                    "product_version",
                    "product_editor",
                    "metric",
                    "acquired_licenses",
                    "unit_price",
                ],
                &["s1", "db", "19", "oracle", "ops", "10", "2.5"],
                &["s2", "db", "19", "oracle", "ops", "ten", "2.5"],
                &["s1", "db", "19", "oracle", "ops", "10", "2.5"],
                &["s+3", "db", "19", "oracle", "ops", "1", "1"],
            ],
        );

        let outcome = analyze_acquired_rights(&input);

        assert_eq!(outcome.good.len(), 1);
        assert_eq!(outcome.bad.len(), 3);
    }
}
