//! Postgres-backed collaborator implementations and the filesystem report
//! sink used for staging artifacts.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::fs;
use tracing::info;

use super::models::{FeatureStatRow, FileRecord, NestedValues, PlatformReportData};
use super::report::ReportGrid;
use super::repository::{
    FeaturesRepository, FileContentStore, FilesRepository, PlatformsRepository, ReportSink,
};
use crate::config::REPORTS_CACHE_DIR;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgFeaturesRepository {
    pool: PgPool,
}

impl PgFeaturesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn nested_values(
        &self,
        sql: &str,
        platform_ids: &[i64],
        period_id: i64,
    ) -> AppResult<NestedValues> {
        let rows = sqlx::query(sql)
            .bind(platform_ids)
            .bind(period_id)
            .fetch_all(&self.pool)
            .await?;
        let mut result = NestedValues::new();
        for row in rows {
            let platform: String = row.get("platform_name");
            let category: String = row.get("category_code");
            let feature: String = row.get("feature_code");
            let value: f64 = row.get("value");
            result
                .entry(platform)
                .or_default()
                .entry(category)
                .or_default()
                .insert(feature, value);
        }
        Ok(result)
    }
}

#[async_trait]
impl FeaturesRepository for PgFeaturesRepository {
    async fn exists_feature_code(&self, code: &str) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM features WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn exists_feature_codes(&self, codes: &[String]) -> AppResult<HashMap<String, bool>> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT code FROM features WHERE code = ANY($1)")
                .bind(codes)
                .fetch_all(&self.pool)
                .await?;
        Ok(codes
            .iter()
            .map(|code| (code.clone(), existing.contains(code)))
            .collect())
    }

    async fn feature_id_by_code(&self, code: &str) -> AppResult<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM features WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn ensure_billing_period(&self, date: &str) -> AppResult<i64> {
        // The unique constraint on the period date is authoritative: a
        // concurrent creator makes the insert a no-op and the re-read still
        // returns the winning row.
        sqlx::query(
            r#"
            INSERT INTO billing_periods (billing_period_date, created_at)
            VALUES ($1, NOW())
            ON CONFLICT (billing_period_date) DO NOTHING
            "#,
        )
        .bind(date)
        .execute(&self.pool)
        .await?;
        let id: i64 =
            sqlx::query_scalar("SELECT id FROM billing_periods WHERE billing_period_date = $1")
                .bind(date)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    async fn billing_period_by_date(&self, date: &str) -> AppResult<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM billing_periods WHERE billing_period_date = $1")
                .bind(date)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn insert_feature_stats(&self, rows: &[FeatureStatRow]) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let platform_ids: Vec<i64> = rows.iter().map(|r| r.platform_id).collect();
        let feature_ids: Vec<i64> = rows.iter().map(|r| r.feature_id).collect();
        let period_ids: Vec<i64> = rows.iter().map(|r| r.billing_period_id).collect();
        let codes: Vec<String> = rows.iter().map(|r| r.stat_code.clone()).collect();
        let values: Vec<i64> = rows.iter().map(|r| r.value).collect();
        sqlx::query(
            r#"
            INSERT INTO platform_feature_stats
                (platform_id, feature_id, billing_period_id, code, value, created_at)
            SELECT platform_id, feature_id, billing_period_id, code, value, NOW()
            FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BIGINT[], $4::TEXT[], $5::BIGINT[])
                AS t(platform_id, feature_id, billing_period_id, code, value)
            "#,
        )
        .bind(&platform_ids)
        .bind(&feature_ids)
        .bind(&period_ids)
        .bind(&codes)
        .bind(&values)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn platform_report_data(&self, ids: &[i64]) -> AppResult<Vec<PlatformReportData>> {
        let platforms = sqlx::query_as::<_, PlatformReportData>(
            "SELECT id, name, storage, estimated_users FROM platforms WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(platforms)
    }

    async fn report_literals(
        &self,
        codes: &[&str],
        locale: &str,
    ) -> AppResult<HashMap<String, String>> {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        let rows = sqlx::query("SELECT code, text FROM literals WHERE code = ANY($1) AND locale = $2")
            .bind(&codes)
            .bind(locale)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("code"), row.get("text")))
            .collect())
    }

    async fn category_translations(
        &self,
        codes: &[&str],
        locale: &str,
    ) -> AppResult<HashMap<String, String>> {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        let rows = sqlx::query(
            "SELECT code, text FROM feature_category_i18n WHERE code = ANY($1) AND locale = $2",
        )
        .bind(&codes)
        .bind(locale)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("code"), row.get("text")))
            .collect())
    }

    async fn features_billed(
        &self,
        platform_ids: &[i64],
        period_id: i64,
    ) -> AppResult<NestedValues> {
        self.nested_values(
            r#"
            SELECT p.name AS platform_name, c.code AS category_code,
                   f.code AS feature_code, b.value AS value
            FROM platform_feature_billed b
            JOIN features f ON f.id = b.feature_id
            JOIN feature_categories c ON c.id = f.category_id
            JOIN platforms p ON p.id = b.platform_id
            WHERE b.platform_id = ANY($1) AND b.billing_period_id = $2
            "#,
            platform_ids,
            period_id,
        )
        .await
    }

    async fn features_stats(
        &self,
        platform_ids: &[i64],
        period_id: i64,
    ) -> AppResult<NestedValues> {
        self.nested_values(
            r#"
            SELECT p.name AS platform_name, c.code AS category_code,
                   f.code AS feature_code, s.value::DOUBLE PRECISION AS value
            FROM platform_feature_stats s
            JOIN features f ON f.id = s.feature_id
            JOIN feature_categories c ON c.id = f.category_id
            JOIN platforms p ON p.id = s.platform_id
            WHERE s.platform_id = ANY($1) AND s.billing_period_id = $2
            "#,
            platform_ids,
            period_id,
        )
        .await
    }
}

#[derive(Clone)]
pub struct PgPlatformsRepository {
    pool: PgPool,
}

impl PgPlatformsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlatformsRepository for PgPlatformsRepository {
    async fn exists_platform_code(&self, code: &str) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM platforms WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn exists_platform_codes(&self, codes: &[String]) -> AppResult<HashMap<String, bool>> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT code FROM platforms WHERE code = ANY($1)")
                .bind(codes)
                .fetch_all(&self.pool)
                .await?;
        Ok(codes
            .iter()
            .map(|code| (code.clone(), existing.contains(code)))
            .collect())
    }

    async fn platform_ids_by_code(
        &self,
        codes: Option<&[String]>,
    ) -> AppResult<BTreeMap<String, i64>> {
        let rows = match codes {
            Some(codes) => {
                sqlx::query("SELECT code, id FROM platforms WHERE code = ANY($1)")
                    .bind(codes)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query("SELECT code, id FROM platforms").fetch_all(&self.pool).await?,
        };
        Ok(rows
            .into_iter()
            .map(|row| (row.get("code"), row.get("id")))
            .collect())
    }
}

/// File metadata lives in Postgres; contents live on the shared filesystem
/// the metadata points at.
#[derive(Clone)]
pub struct PgFileManager {
    pool: PgPool,
}

impl PgFileManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FilesRepository for PgFileManager {
    async fn exists_file_by_url(&self, url: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM files WHERE url = $1)")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn file_by_url(&self, url: &str) -> AppResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>("SELECT id, path FROM files WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl FileContentStore for PgFileManager {
    async fn contents_by_id(&self, id: i64) -> AppResult<String> {
        let path: String = sqlx::query_scalar("SELECT path FROM files WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        fs::read_to_string(&path)
            .await
            .map_err(|err| AppError::Message(format!("can't read stored file `{path}`: {err}")))
    }
}

/// Stages one JSON snapshot of the grid per report under the cache dir. The
/// binary spreadsheet encoding is owned by the downstream rendering layer.
pub struct FsReportSink {
    dir: PathBuf,
}

impl FsReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn staged_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl Default for FsReportSink {
    fn default() -> Self {
        Self::new(REPORTS_CACHE_DIR.as_str())
    }
}

#[async_trait]
impl ReportSink for FsReportSink {
    async fn persist(&self, grid: &ReportGrid, name: &str) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.staged_path(name);
        let encoded = serde_json::to_vec_pretty(grid)?;
        fs::write(&path, encoded).await?;
        info!(path = %path.display(), "report staged");
        Ok(())
    }

    async fn cleanup(&self, name: &str) -> anyhow::Result<()> {
        fs::remove_file(self.staged_path(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::report::{CellFormat, CellStyle, CellValue};

    #[tokio::test]
    async fn fs_sink_stages_and_cleans_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsReportSink::new(dir.path());
        let mut grid = ReportGrid::new("platform1 svc 2018-03".into(), "manager".into());
        grid.set(0, 0, CellValue::Int(1), CellFormat::Number, CellStyle::default());

        sink.persist(&grid, "platform1-2018-03.xlsx").await.unwrap();
        let staged = dir.path().join("platform1-2018-03.xlsx.json");
        let raw = std::fs::read_to_string(&staged).unwrap();
        assert!(raw.contains("platform1 svc 2018-03"));

        sink.cleanup("platform1-2018-03.xlsx").await.unwrap();
        assert!(!staged.exists());
    }
}
