//! End-to-end tests for the features business model over the in-memory
//! collaborators.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use usage_billing::features::memory::{
    seed_reference_data, InMemoryFeaturesRepository, InMemoryFileManager,
    InMemoryPlatformsRepository, RecordingReportSink, StoredFile,
};
use usage_billing::features::models::status;
use usage_billing::features::report::{col, CellFormat, VALUE_ROW};
use usage_billing::features::{period, FeatureStatRow, FeaturesRepository, FeaturesService};
use usage_billing::AppError;

struct Harness {
    features: Arc<InMemoryFeaturesRepository>,
    platforms: Arc<InMemoryPlatformsRepository>,
    files: Arc<InMemoryFileManager>,
    reports: Arc<RecordingReportSink>,
    service: FeaturesService,
}

fn harness() -> Harness {
    let features = Arc::new(InMemoryFeaturesRepository::default());
    let platforms = Arc::new(InMemoryPlatformsRepository::default());
    let files = Arc::new(InMemoryFileManager::default());
    let reports = Arc::new(RecordingReportSink::default());
    let service = FeaturesService::new(
        features.clone(),
        platforms.clone(),
        files.clone(),
        files.clone(),
        reports.clone(),
    );
    Harness {
        features,
        platforms,
        files,
        reports,
        service,
    }
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().expect("object payload").clone()
}

/// Seed the per-platform billed figures and raw stats the report fixture
/// grid is built from.
fn seed_report_values(repo: &InMemoryFeaturesRepository, platform: &str, id: i64, period_id: i64) {
    for (feature, value) in [
        ("active_users", 1000.0),
        ("inactive_users", 2000.0),
        ("deleted_users", 2500.0),
    ] {
        repo.add_stat_value(platform, "users", feature, period_id, id, value);
    }
    for (feature, value) in [
        ("database", 1500.0),
        ("content", 2500.0),
        ("primary_backup", 350.0),
        ("secondary_backup", 300.0),
        ("sql_backup", 250.0),
    ] {
        repo.add_stat_value(platform, "storage", feature, period_id, id, value);
    }
    for (feature, value) in [
        ("active_users", 100.0),
        ("inactive_users", 200.0),
        ("deleted_users", 250.0),
    ] {
        repo.add_billed(platform, "users", feature, period_id, id, value);
    }
    repo.add_billed(platform, "storage", "storage", period_id, id, 250.0);
}

fn seed_report_world(h: &Harness) {
    seed_reference_data(&h.features);
    h.features.add_billing_period(3, "2018-03");
    h.features.add_platform_meta(1, "platform1", 20, 30);
    h.platforms.add_platform(1, "platform1", "platform1", 20, 30);
    seed_report_values(&h.features, "platform1", 1, 3);
}

#[tokio::test]
async fn set_feature_data_inline_stores_scalar_and_breakdown_rows() {
    let h = harness();
    h.features.add_feature(7, "storage", "storage");
    h.platforms.add_platform(1, "platA", "Platform A", 20, 30);
    h.platforms.add_platform(2, "platB", "Platform B", 20, 30);

    let ok = h
        .service
        .set_feature_data(&payload(json!({
            "featureCode": "storage",
            "sourceFormat": "inline",
            "sourceData": {
                "platA": {"database": 10, "content": 20},
                "platB": 99,
            },
        })))
        .await
        .unwrap();
    assert_eq!(ok.code, status::SET_FEATURE_DATA_OK);

    let period_id = h
        .features
        .billing_period_by_date(&period::current_period_date())
        .await
        .unwrap()
        .expect("current period created on ingest");
    let rows = h.features.inserted_stats();
    assert_eq!(
        rows,
        vec![
            FeatureStatRow {
                platform_id: 1,
                feature_id: 7,
                billing_period_id: period_id,
                stat_code: "content".to_string(),
                value: 20,
            },
            FeatureStatRow {
                platform_id: 1,
                feature_id: 7,
                billing_period_id: period_id,
                stat_code: "database".to_string(),
                value: 10,
            },
            FeatureStatRow {
                platform_id: 2,
                feature_id: 7,
                billing_period_id: period_id,
                stat_code: "storage".to_string(),
                value: 99,
            },
        ]
    );
}

#[tokio::test]
async fn set_feature_data_all_broadcasts_to_every_platform() {
    let h = harness();
    h.features.add_feature(7, "active_users", "users");
    h.platforms.add_platform(1, "platA", "Platform A", 20, 30);
    h.platforms.add_platform(2, "platB", "Platform B", 20, 30);

    h.service
        .set_feature_data(&payload(json!({
            "featureCode": "active_users",
            "sourceFormat": "inline",
            "sourceData": {"all": 500},
        })))
        .await
        .unwrap();

    let rows = h.features.inserted_stats();
    assert_eq!(rows.len(), 2);
    let platform_ids: Vec<i64> = rows.iter().map(|r| r.platform_id).collect();
    assert_eq!(platform_ids, vec![1, 2]);
    assert!(rows.iter().all(|r| r.stat_code == "active_users" && r.value == 500));
}

#[tokio::test]
async fn set_feature_data_blob_resolves_platforms_from_rows() {
    let h = harness();
    h.features.add_feature(7, "storage", "storage");
    h.platforms.add_platform(1, "platA", "Platform A", 20, 30);
    h.platforms.add_platform(2, "platB", "Platform B", 20, 30);
    h.files.add(StoredFile {
        id: 11,
        url: "https://files/stats.csv".to_string(),
        content: "platA;database;10\nplatB;database;30\n".to_string(),
    });

    let ok = h
        .service
        .set_feature_data(&payload(json!({
            "featureCode": "storage",
            "sourceFormat": "blob",
            "sourceData": {"all": "https://files/stats.csv"},
        })))
        .await
        .unwrap();
    assert_eq!(ok.code, status::SET_FEATURE_DATA_OK);

    let rows = h.features.inserted_stats();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].platform_id, 1);
    assert_eq!(rows[1].platform_id, 2);
    assert_eq!(rows[1].value, 30);
}

#[tokio::test]
async fn set_feature_data_collects_every_missing_field() {
    let h = harness();
    let err = h
        .service
        .set_feature_data(&payload(json!({})))
        .await
        .unwrap_err();
    let codes: Vec<&str> = err
        .findings()
        .expect("validation error")
        .iter()
        .map(|f| f.code)
        .collect();
    assert_eq!(codes, vec!["999005003", "999005004", "999005005"]);
    assert!(h.features.inserted_stats().is_empty());
}

#[tokio::test]
async fn set_feature_data_rejects_unknown_blob_file_during_validation() {
    let h = harness();
    h.features.add_feature(7, "storage", "storage");
    h.platforms.add_platform(1, "platA", "Platform A", 20, 30);

    let err = h
        .service
        .set_feature_data(&payload(json!({
            "featureCode": "storage",
            "sourceFormat": "blob",
            "sourceData": {"platA": "https://files/nope.csv"},
        })))
        .await
        .unwrap_err();
    let findings = err.findings().expect("validation error");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].code, "999005010");
    assert!(findings[0].description.contains("https://files/nope.csv"));
}

#[tokio::test]
async fn generate_costs_reports_persists_one_grid_per_platform() {
    let h = harness();
    seed_report_world(&h);

    let ok = h
        .service
        .generate_costs_reports(&payload(json!({
            "platformCode": ["platform1"],
            "period": "2018-03",
        })))
        .await
        .unwrap();
    assert_eq!(ok.code, status::GENERATE_COSTS_REPORTS_OK);

    let persisted = h.reports.persisted();
    assert_eq!(persisted.len(), 1);
    let (name, grid) = &persisted[0];
    assert_eq!(name, "platform1-2018-03.xlsx");
    assert_eq!(grid.number(VALUE_ROW, col::USERS_TOTAL), Some(5500.0));
    assert_eq!(grid.number(VALUE_ROW, col::USERS_TOTAL_COST), Some(550.0));
    assert_eq!(grid.number(VALUE_ROW, col::STORAGE_TOTAL), Some(4900.0));
    assert_eq!(grid.number(VALUE_ROW, col::GRAND_TOTAL), Some(800.0));
    assert_eq!(
        grid.cell(VALUE_ROW, col::GRAND_TOTAL).map(|c| c.format),
        Some(CellFormat::Currency)
    );
    assert!(h.reports.cleaned().is_empty());
}

#[tokio::test]
async fn generate_costs_reports_cleans_staged_artifacts_on_request() {
    let h = harness();
    seed_report_world(&h);

    h.service
        .generate_costs_reports(&payload(json!({
            "platformCode": "all",
            "period": "2018-03",
            "deleteTempFiles": true,
        })))
        .await
        .unwrap();

    assert_eq!(h.reports.cleaned(), vec!["platform1-2018-03.xlsx".to_string()]);
}

#[tokio::test]
async fn generate_costs_reports_aborts_on_persist_failure() {
    let h = harness();
    seed_report_world(&h);
    h.features.add_platform_meta(2, "platform2", 20, 30);
    h.platforms.add_platform(2, "platform2", "platform2", 20, 30);
    seed_report_values(&h.features, "platform2", 2, 3);
    h.reports.fail_on("platform2-2018-03.xlsx");

    let err = h
        .service
        .generate_costs_reports(&payload(json!({
            "platformCode": "all",
            "period": "2018-03",
        })))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(status::CANT_PERSIST));

    // The first platform's artifact stays in place.
    let persisted = h.reports.persisted();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].0, "platform1-2018-03.xlsx");
}

#[tokio::test]
async fn generate_costs_reports_rejects_unknown_period_and_platform() {
    let h = harness();
    seed_report_world(&h);

    let err = h
        .service
        .generate_costs_reports(&payload(json!({
            "platformCode": ["ghost"],
            "period": "2018-04",
        })))
        .await
        .unwrap_err();
    let codes: Vec<&str> = err
        .findings()
        .expect("validation error")
        .iter()
        .map(|f| f.code)
        .collect();
    assert_eq!(codes, vec!["999005002", "999005012"]);
}

#[tokio::test]
async fn generate_costs_reports_flags_non_string_period() {
    let h = harness();
    seed_report_world(&h);

    let err = h
        .service
        .generate_costs_reports(&payload(json!({
            "platformCode": ["platform1"],
            "period": 201803,
        })))
        .await
        .unwrap_err();
    let codes: Vec<&str> = err
        .findings()
        .expect("validation error")
        .iter()
        .map(|f| f.code)
        .collect();
    assert_eq!(codes, vec!["999005011"]);
}

#[tokio::test]
async fn generate_costs_reports_surfaces_missing_billed_data() {
    let h = harness();
    seed_reference_data(&h.features);
    h.features.add_billing_period(3, "2018-03");
    h.features.add_platform_meta(1, "platform1", 20, 30);
    h.platforms.add_platform(1, "platform1", "platform1", 20, 30);

    let err = h
        .service
        .generate_costs_reports(&payload(json!({
            "platformCode": ["platform1"],
            "period": "2018-03",
        })))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(status::BILLED_DATA_NOT_FOUND));
    assert!(matches!(err, AppError::Action { .. }));
}
