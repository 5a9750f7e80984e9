//! In-memory collaborator implementations for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::models::{
    FeatureStatRow, FileRecord, NestedValues, PlatformReportData, CATEGORY_TRANSLATIONS,
    REPORT_LITERALS,
};
use super::report::ReportGrid;
use super::repository::{
    FeaturesRepository, FileContentStore, FilesRepository, PlatformsRepository, ReportSink,
};
use crate::config::DEFAULT_LANGUAGE;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
struct FeatureDef {
    id: i64,
    code: String,
    category_code: String,
}

#[derive(Debug, Clone)]
struct ValueEntry {
    platform_id: i64,
    platform_name: String,
    category: String,
    feature: String,
    period_id: i64,
    value: f64,
}

#[derive(Default)]
struct FeaturesState {
    features: Vec<FeatureDef>,
    periods: BTreeMap<String, i64>,
    stats: Vec<FeatureStatRow>,
    billed: Vec<ValueEntry>,
    stat_values: Vec<ValueEntry>,
    platform_meta: BTreeMap<i64, PlatformReportData>,
    literals: HashMap<(String, String), String>,
    category_i18n: HashMap<(String, String), String>,
}

#[derive(Default)]
pub struct InMemoryFeaturesRepository {
    state: Mutex<FeaturesState>,
}

impl InMemoryFeaturesRepository {
    pub fn add_feature(&self, id: i64, code: &str, category_code: &str) {
        self.state.lock().unwrap().features.push(FeatureDef {
            id,
            code: code.to_string(),
            category_code: category_code.to_string(),
        });
    }

    pub fn add_billing_period(&self, id: i64, date: &str) {
        self.state.lock().unwrap().periods.insert(date.to_string(), id);
    }

    pub fn add_platform_meta(&self, id: i64, name: &str, storage: i64, estimated_users: i64) {
        self.state.lock().unwrap().platform_meta.insert(
            id,
            PlatformReportData {
                id,
                name: name.to_string(),
                storage,
                estimated_users,
            },
        );
    }

    pub fn add_literal(&self, code: &str, locale: &str, text: &str) {
        self.state
            .lock()
            .unwrap()
            .literals
            .insert((code.to_string(), locale.to_string()), text.to_string());
    }

    pub fn add_category_translation(&self, code: &str, locale: &str, text: &str) {
        self.state
            .lock()
            .unwrap()
            .category_i18n
            .insert((code.to_string(), locale.to_string()), text.to_string());
    }

    pub fn add_billed(
        &self,
        platform_name: &str,
        category: &str,
        feature: &str,
        period_id: i64,
        platform_id: i64,
        value: f64,
    ) {
        self.state.lock().unwrap().billed.push(ValueEntry {
            platform_id,
            platform_name: platform_name.to_string(),
            category: category.to_string(),
            feature: feature.to_string(),
            period_id,
            value,
        });
    }

    pub fn add_stat_value(
        &self,
        platform_name: &str,
        category: &str,
        feature: &str,
        period_id: i64,
        platform_id: i64,
        value: f64,
    ) {
        self.state.lock().unwrap().stat_values.push(ValueEntry {
            platform_id,
            platform_name: platform_name.to_string(),
            category: category.to_string(),
            feature: feature.to_string(),
            period_id,
            value,
        });
    }

    pub fn inserted_stats(&self) -> Vec<FeatureStatRow> {
        self.state.lock().unwrap().stats.clone()
    }
}

#[async_trait]
impl FeaturesRepository for InMemoryFeaturesRepository {
    async fn exists_feature_code(&self, code: &str) -> AppResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .features
            .iter()
            .any(|f| f.code == code))
    }

    async fn exists_feature_codes(&self, codes: &[String]) -> AppResult<HashMap<String, bool>> {
        let state = self.state.lock().unwrap();
        Ok(codes
            .iter()
            .map(|code| (code.clone(), state.features.iter().any(|f| &f.code == code)))
            .collect())
    }

    async fn feature_id_by_code(&self, code: &str) -> AppResult<Option<i64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .features
            .iter()
            .find(|f| f.code == code)
            .map(|f| f.id))
    }

    async fn ensure_billing_period(&self, date: &str) -> AppResult<i64> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.periods.get(date) {
            return Ok(*id);
        }
        let id = state.periods.values().max().copied().unwrap_or(0) + 1;
        state.periods.insert(date.to_string(), id);
        Ok(id)
    }

    async fn billing_period_by_date(&self, date: &str) -> AppResult<Option<i64>> {
        Ok(self.state.lock().unwrap().periods.get(date).copied())
    }

    async fn insert_feature_stats(&self, rows: &[FeatureStatRow]) -> AppResult<()> {
        self.state.lock().unwrap().stats.extend(rows.iter().cloned());
        Ok(())
    }

    async fn platform_report_data(&self, ids: &[i64]) -> AppResult<Vec<PlatformReportData>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .platform_meta
            .values()
            .filter(|meta| ids.contains(&meta.id))
            .cloned()
            .collect())
    }

    async fn report_literals(
        &self,
        codes: &[&str],
        locale: &str,
    ) -> AppResult<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        Ok(codes
            .iter()
            .filter_map(|code| {
                state
                    .literals
                    .get(&(code.to_string(), locale.to_string()))
                    .map(|text| (code.to_string(), text.clone()))
            })
            .collect())
    }

    async fn category_translations(
        &self,
        codes: &[&str],
        locale: &str,
    ) -> AppResult<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        Ok(codes
            .iter()
            .filter_map(|code| {
                state
                    .category_i18n
                    .get(&(code.to_string(), locale.to_string()))
                    .map(|text| (code.to_string(), text.clone()))
            })
            .collect())
    }

    async fn features_billed(
        &self,
        platform_ids: &[i64],
        period_id: i64,
    ) -> AppResult<NestedValues> {
        let state = self.state.lock().unwrap();
        Ok(fold_entries(&state.billed, platform_ids, period_id))
    }

    async fn features_stats(
        &self,
        platform_ids: &[i64],
        period_id: i64,
    ) -> AppResult<NestedValues> {
        let state = self.state.lock().unwrap();
        let mut result = fold_entries(&state.stat_values, platform_ids, period_id);
        // Rows stored through the ingest path resolve their category through
        // the feature definition, like the relational fetch does.
        for row in &state.stats {
            if row.billing_period_id != period_id || !platform_ids.contains(&row.platform_id) {
                continue;
            }
            let Some(feature) = state.features.iter().find(|f| f.id == row.feature_id) else {
                continue;
            };
            let Some(meta) = state.platform_meta.get(&row.platform_id) else {
                continue;
            };
            result
                .entry(meta.name.clone())
                .or_default()
                .entry(feature.category_code.clone())
                .or_default()
                .insert(feature.code.clone(), row.value as f64);
        }
        Ok(result)
    }
}

fn fold_entries(entries: &[ValueEntry], platform_ids: &[i64], period_id: i64) -> NestedValues {
    let mut result = NestedValues::new();
    for entry in entries {
        if entry.period_id != period_id || !platform_ids.contains(&entry.platform_id) {
            continue;
        }
        result
            .entry(entry.platform_name.clone())
            .or_default()
            .entry(entry.category.clone())
            .or_default()
            .insert(entry.feature.clone(), entry.value);
    }
    result
}

/// Seed every required report literal and category translation for the
/// configured locale, with predictable texts derived from the codes.
pub fn seed_reference_data(repo: &InMemoryFeaturesRepository) {
    let locale = DEFAULT_LANGUAGE.as_str();
    for code in REPORT_LITERALS {
        repo.add_literal(code, locale, code.trim_start_matches("features-report-"));
    }
    for code in CATEGORY_TRANSLATIONS {
        repo.add_category_translation(code, locale, code);
    }
}

#[derive(Debug, Clone)]
struct PlatformDef {
    id: i64,
    code: String,
}

#[derive(Default)]
pub struct InMemoryPlatformsRepository {
    platforms: Mutex<Vec<PlatformDef>>,
}

impl InMemoryPlatformsRepository {
    pub fn add_platform(&self, id: i64, code: &str, _name: &str, _storage: i64, _users: i64) {
        self.platforms.lock().unwrap().push(PlatformDef {
            id,
            code: code.to_string(),
        });
    }
}

#[async_trait]
impl PlatformsRepository for InMemoryPlatformsRepository {
    async fn exists_platform_code(&self, code: &str) -> AppResult<bool> {
        Ok(self
            .platforms
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.code == code))
    }

    async fn exists_platform_codes(&self, codes: &[String]) -> AppResult<HashMap<String, bool>> {
        let platforms = self.platforms.lock().unwrap();
        Ok(codes
            .iter()
            .map(|code| (code.clone(), platforms.iter().any(|p| &p.code == code)))
            .collect())
    }

    async fn platform_ids_by_code(
        &self,
        codes: Option<&[String]>,
    ) -> AppResult<BTreeMap<String, i64>> {
        let platforms = self.platforms.lock().unwrap();
        Ok(platforms
            .iter()
            .filter(|p| codes.map_or(true, |codes| codes.contains(&p.code)))
            .map(|p| (p.code.clone(), p.id))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: i64,
    pub url: String,
    pub content: String,
}

#[derive(Default)]
pub struct InMemoryFileManager {
    files: Mutex<Vec<StoredFile>>,
}

impl InMemoryFileManager {
    pub fn add(&self, file: StoredFile) {
        self.files.lock().unwrap().push(file);
    }
}

#[async_trait]
impl FilesRepository for InMemoryFileManager {
    async fn exists_file_by_url(&self, url: &str) -> AppResult<bool> {
        Ok(self.files.lock().unwrap().iter().any(|f| f.url == url))
    }

    async fn file_by_url(&self, url: &str) -> AppResult<Option<FileRecord>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.url == url)
            .map(|f| FileRecord {
                id: f.id,
                path: f.url.clone(),
            }))
    }
}

#[async_trait]
impl FileContentStore for InMemoryFileManager {
    async fn contents_by_id(&self, id: i64) -> AppResult<String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.content.clone())
            .ok_or_else(|| AppError::Message(format!("no stored file with id {id}")))
    }
}

/// Records persisted grids instead of rendering them; can be told to fail
/// for one artifact name to exercise the abort path.
#[derive(Default)]
pub struct RecordingReportSink {
    persisted: Mutex<Vec<(String, ReportGrid)>>,
    cleaned: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingReportSink {
    pub fn fail_on(&self, name: &str) {
        *self.fail_on.lock().unwrap() = Some(name.to_string());
    }

    pub fn persisted(&self) -> Vec<(String, ReportGrid)> {
        self.persisted.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for RecordingReportSink {
    async fn persist(&self, grid: &ReportGrid, name: &str) -> anyhow::Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(name) {
            anyhow::bail!("storage backend rejected `{name}`");
        }
        self.persisted
            .lock()
            .unwrap()
            .push((name.to_string(), grid.clone()));
        Ok(())
    }

    async fn cleanup(&self, name: &str) -> anyhow::Result<()> {
        self.cleaned.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
