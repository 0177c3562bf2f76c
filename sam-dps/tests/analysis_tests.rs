//! Global workbook analysis, end to end through the file system

mod helpers;

use helpers::{create_test_db, test_config, valid_sheets, write_workbook, Sheet};
use sam_dps::analysis::workbook::Workbook;
use sam_dps::analysis::{AnalysisEngine, AnalysisStatus};
use sam_dps::db::core_factor::{self, CoreFactorReference};
use sam_dps::services::CoreFactorCache;
use sam_dps::storage::Storage;
use std::sync::Arc;

const SCOPE: &str = "OFR";

fn engine(pool: sqlx::SqlitePool, storage: Storage) -> AnalysisEngine {
    AnalysisEngine::new(pool, storage, Arc::new(CoreFactorCache::new()))
}

fn reference(manufacturer: &str, model: &str, factor: &str) -> CoreFactorReference {
    CoreFactorReference {
        manufacturer: manufacturer.to_string(),
        model: model.to_string(),
        core_factor: factor.to_string(),
    }
}

#[tokio::test]
async fn missing_softpartitions_sheet_fails() {
    // Given: a workbook without the softpartitions sheet
    let (dir, pool) = create_test_db().await.unwrap();
    let config = test_config(dir.path());
    let storage = Storage::new(config.storage.clone());
    let sheets: Vec<Sheet> = valid_sheets()
        .into_iter()
        .filter(|(name, _)| *name != "softpartitions")
        .collect();
    write_workbook(&storage.analysis_input(SCOPE, "inv.xlsx"), &sheets);

    // When: analysed
    let response = engine(pool, storage).analyze(SCOPE, "inv.xlsx").await;

    // Then: FAILED naming the sheet
    assert_eq!(response.status, AnalysisStatus::Failed);
    assert!(response.description.contains("softpartitions"));
    assert!(response.description.contains("sheet is missing"));
    assert!(response.report.is_empty());
}

#[tokio::test]
async fn wrong_extension_is_refused() {
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);

    let response = engine(pool, storage).analyze(SCOPE, "inv.csv").await;

    assert_eq!(response.status, AnalysisStatus::Failed);
    assert_eq!(response.description, sam_dps::analysis::INVALID_FILE_EXTENSION);
}

#[tokio::test]
async fn empty_sheet_is_a_user_failure() {
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let mut sheets = valid_sheets();
    sheets[3].1.truncate(1);
    write_workbook(&storage.analysis_input(SCOPE, "inv.xlsx"), &sheets);

    let response = engine(pool, storage).analyze(SCOPE, "inv.xlsx").await;

    assert_eq!(response.status, AnalysisStatus::Failed);
    assert_eq!(response.description, "analysis:acquiredRights sheet is empty");
}

#[tokio::test]
async fn clean_workbook_completes_with_core_factors() {
    // Given: a consistent workbook and an Intel Xeon factor
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    core_factor::replace_references(
        &pool,
        &[reference("default", "", "1"), reference("Intel", "Xeon", "0.5")],
        "cf.xlsx",
    )
    .await
    .unwrap();
    write_workbook(&storage.analysis_input(SCOPE, "inv.xlsx"), &valid_sheets());

    // When
    let response = engine(pool, storage.clone()).analyze(SCOPE, "inv.xlsx").await;

    // Then: every row is good; no bad workbook
    assert_eq!(response.status, AnalysisStatus::Completed, "{}", response.description);
    assert!(response.target_file.contains("good_inv.xlsx"));
    assert!(!storage.bad_output(SCOPE, "inv.xlsx").exists());

    let mut good = Workbook::open(&storage.good_output(SCOPE, "inv.xlsx")).unwrap();
    let servers = good.read("servers").unwrap();
    let factor_col = servers[0].iter().position(|h| h == "oracle_core_factor").unwrap();
    assert_eq!(servers[1][factor_col], "0.5");
    assert_eq!(good.read("softpartitions").unwrap().len(), 2);
    assert_eq!(good.read("products").unwrap().len(), 2);
    assert_eq!(good.read("acquiredRights").unwrap().len(), 2);
}

#[tokio::test]
async fn bad_server_demotes_dependent_rows() {
    // Given: the only server lacks its core count
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    let mut sheets = valid_sheets();
    sheets[0].1[1][3] = String::new();
    write_workbook(&storage.analysis_input(SCOPE, "inv.xlsx"), &sheets);

    // When
    let response = engine(pool, storage.clone()).analyze(SCOPE, "inv.xlsx").await;

    // Then: server, softpartition and product rows are bad, the right stays good
    assert_eq!(response.status, AnalysisStatus::Completed, "{}", response.description);

    let mut bad = Workbook::open(&storage.bad_output(SCOPE, "inv.xlsx")).unwrap();
    assert_eq!(bad.read("servers").unwrap().len(), 2);
    assert_eq!(bad.read("softpartitions").unwrap()[1][1], "P1");
    assert_eq!(bad.read("products").unwrap()[1][3], "P1");
    assert_eq!(bad.read("acquiredRights").unwrap().len(), 1);

    let mut good = Workbook::open(&storage.good_output(SCOPE, "inv.xlsx")).unwrap();
    assert_eq!(good.read("acquiredRights").unwrap()[1][6], "SKU1");
    assert_eq!(good.read("servers").unwrap().len(), 1);

    // The annotated report keeps the original rows
    let mut report = Workbook::open(&storage.analysis_input(SCOPE, "inv.xlsx")).unwrap();
    assert_eq!(report.read("softpartitions").unwrap()[1][1], "P1");
}

#[tokio::test]
async fn unparsable_core_factor_aborts_analysis() {
    let (dir, pool) = create_test_db().await.unwrap();
    let storage = Storage::new(test_config(dir.path()).storage);
    core_factor::replace_references(&pool, &[reference("IBM", "power", "abc")], "cf.xlsx")
        .await
        .unwrap();
    write_workbook(&storage.analysis_input(SCOPE, "inv.xlsx"), &valid_sheets());

    let response = engine(pool, storage).analyze(SCOPE, "inv.xlsx").await;

    assert_eq!(response.status, AnalysisStatus::Failed);
    assert_eq!(response.description, sam_dps::analysis::CORE_FACTOR_CACHING_ERROR);
}
