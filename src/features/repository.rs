use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use super::models::{FeatureStatRow, FileRecord, NestedValues, PlatformReportData};
use super::report::ReportGrid;
use crate::error::AppResult;

/// Feature reference data, billing periods, stat storage and the report
/// reference sets. Backed by Postgres in production, in-memory in tests.
#[async_trait]
pub trait FeaturesRepository: Send + Sync {
    async fn exists_feature_code(&self, code: &str) -> AppResult<bool>;
    async fn exists_feature_codes(&self, codes: &[String]) -> AppResult<HashMap<String, bool>>;
    async fn feature_id_by_code(&self, code: &str) -> AppResult<Option<i64>>;

    /// Idempotent get-or-create keyed by the unique `YYYY-MM` date. Concurrent
    /// callers for one new date must converge on the same id.
    async fn ensure_billing_period(&self, date: &str) -> AppResult<i64>;
    /// Pure read; report requests never auto-create periods.
    async fn billing_period_by_date(&self, date: &str) -> AppResult<Option<i64>>;

    /// One bulk insert per ingest call; rows are append-only.
    async fn insert_feature_stats(&self, rows: &[FeatureStatRow]) -> AppResult<()>;

    async fn platform_report_data(&self, ids: &[i64]) -> AppResult<Vec<PlatformReportData>>;
    async fn report_literals(
        &self,
        codes: &[&str],
        locale: &str,
    ) -> AppResult<HashMap<String, String>>;
    async fn category_translations(
        &self,
        codes: &[&str],
        locale: &str,
    ) -> AppResult<HashMap<String, String>>;
    async fn features_billed(&self, platform_ids: &[i64], period_id: i64)
        -> AppResult<NestedValues>;
    async fn features_stats(&self, platform_ids: &[i64], period_id: i64)
        -> AppResult<NestedValues>;
}

/// Platform reference data, owned by platform management; read-only here.
#[async_trait]
pub trait PlatformsRepository: Send + Sync {
    async fn exists_platform_code(&self, code: &str) -> AppResult<bool>;
    async fn exists_platform_codes(&self, codes: &[String]) -> AppResult<HashMap<String, bool>>;
    /// Batched code-to-id resolution; `None` selects every platform.
    async fn platform_ids_by_code(
        &self,
        codes: Option<&[String]>,
    ) -> AppResult<BTreeMap<String, i64>>;
}

/// Stored-file metadata lookups for blob source data.
#[async_trait]
pub trait FilesRepository: Send + Sync {
    async fn exists_file_by_url(&self, url: &str) -> AppResult<bool>;
    async fn file_by_url(&self, url: &str) -> AppResult<Option<FileRecord>>;
}

/// Raw content retrieval for a stored file.
#[async_trait]
pub trait FileContentStore: Send + Sync {
    async fn contents_by_id(&self, id: i64) -> AppResult<String>;
}

/// Renders and stores one report artifact per platform. The binary
/// spreadsheet encoding lives behind this seam.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn persist(&self, grid: &ReportGrid, name: &str) -> anyhow::Result<()>;
    /// Remove a staged transient artifact, if any.
    async fn cleanup(&self, name: &str) -> anyhow::Result<()>;
}
