use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::models::SourceFormat;
use super::normalize::{csv_fields, csv_lines, ALL_PLATFORMS};
use super::repository::{
    FeaturesRepository, FileContentStore, FilesRepository, PlatformsRepository,
};
use crate::error::{AppError, AppResult, Finding};

/// Calendar-month period pattern, `YYYY-MM`.
static PERIOD_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").expect("period pattern"));

/// Every validation failure the features validators can produce. The
/// descriptor table below maps each kind to its stable code and templated
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    NotFoundFeatureCode,
    NotFoundPlatformCode,
    MissingFieldPlatformCode,
    BadFormatPlatformCode,
    MissingFieldPeriod,
    BadFormatPeriod,
    PeriodDoesNotExist,
    MissingFieldFeatureCode,
    MissingFieldSourceFormat,
    MissingFieldSourceData,
    InvalidSourceFormat,
    InvalidSourceData,
    NegativeStats,
    AllAndCodes,
    NotFoundFileBlob,
    EmptyFileBlob,
    MissingPlatforms,
    InvalidPlatforms,
    InvalidBlobRowFormat,
}

struct Descriptor {
    code: &'static str,
    title: &'static str,
    template: &'static str,
}

const FEATURES_TITLE: &str = "Validation of Features failed";
const SET_FEATURE_TITLE: &str = "Validation of setFeatureData failed";

fn descriptor(kind: FindingKind) -> Descriptor {
    use FindingKind::*;
    let (code, title, template) = match kind {
        NotFoundFeatureCode => (
            "999005001",
            FEATURES_TITLE,
            "Feature code `{{featureCode}}` not found",
        ),
        NotFoundPlatformCode => (
            "999005002",
            FEATURES_TITLE,
            "Platform code `{{platformCode}}` not found",
        ),
        MissingFieldPlatformCode => ("999005008", FEATURES_TITLE, "Missing field `platformCode`"),
        BadFormatPlatformCode => (
            "999005009",
            FEATURES_TITLE,
            "Field `platformCode` is badly formatted, must be an array of platform codes or the `all` string",
        ),
        MissingFieldPeriod => ("999005010", FEATURES_TITLE, "Missing field `period`"),
        BadFormatPeriod => (
            "999005011",
            FEATURES_TITLE,
            "Field `period` is badly formatted, must be YYYY-MM format",
        ),
        PeriodDoesNotExist => ("999005012", FEATURES_TITLE, "`period` does not exists"),
        MissingFieldFeatureCode => ("999005003", SET_FEATURE_TITLE, "Missing field `featureCode`"),
        MissingFieldSourceFormat => {
            ("999005004", SET_FEATURE_TITLE, "Missing field `sourceFormat`")
        }
        MissingFieldSourceData => ("999005005", SET_FEATURE_TITLE, "Missing field `sourceData`"),
        InvalidSourceFormat => ("999005006", SET_FEATURE_TITLE, "Field `sourceFormat` is invalid"),
        InvalidSourceData => (
            "999005007",
            SET_FEATURE_TITLE,
            "Field `sourceData` cannot be empty",
        ),
        NegativeStats => (
            "999005008",
            SET_FEATURE_TITLE,
            "Stats values cannot be negative",
        ),
        AllAndCodes => (
            "999005009",
            SET_FEATURE_TITLE,
            "Source data cannot have the key \"all\" and the platform codes key in the same action",
        ),
        NotFoundFileBlob => (
            "999005010",
            SET_FEATURE_TITLE,
            "File/s `{{files}}` not found.",
        ),
        EmptyFileBlob => ("999005011", SET_FEATURE_TITLE, "Files `{{files}}` are empty."),
        MissingPlatforms => (
            "999005012",
            SET_FEATURE_TITLE,
            "Missing platforms `{{platforms}}` in the file.",
        ),
        InvalidPlatforms => (
            "999005013",
            SET_FEATURE_TITLE,
            "Invalid platforms `{{platforms}}` in the file.",
        ),
        InvalidBlobRowFormat => (
            "999005014",
            SET_FEATURE_TITLE,
            "Incorrect row format type of blob csv",
        ),
    };
    Descriptor { code, title, template }
}

impl FindingKind {
    pub fn finding(self) -> Finding {
        let desc = descriptor(self);
        Finding {
            code: desc.code,
            title: desc.title,
            description: desc.template.to_string(),
        }
    }

    /// Build a finding substituting one `{{placeholder}}` in the template.
    pub fn finding_with(self, placeholder: &str, value: &str) -> Finding {
        let desc = descriptor(self);
        Finding {
            code: desc.code,
            title: desc.title,
            description: desc
                .template
                .replace(&format!("{{{{{placeholder}}}}}"), value),
        }
    }
}

/// JSON falsiness as the ingest contract defines it: null, false, zero,
/// empty string, empty array/object entries are dropped before the
/// emptiness check.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn is_missing(params: &Map<String, Value>, field: &str) -> bool {
    params.get(field).map(is_falsy).unwrap_or(true)
}

/// Validates a `setFeatureData` payload before normalization. All checks run
/// and every failure lands in the bag; the entry point raises the full bag.
pub struct SetFeatureDataValidator<'a> {
    pub features: &'a dyn FeaturesRepository,
    pub platforms: &'a dyn PlatformsRepository,
    pub files: &'a dyn FilesRepository,
    pub contents: &'a dyn FileContentStore,
}

impl SetFeatureDataValidator<'_> {
    pub async fn validate(&self, params: &Map<String, Value>) -> AppResult<()> {
        let findings = self.collect(params).await?;
        if findings.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(findings))
        }
    }

    pub async fn collect(&self, params: &Map<String, Value>) -> AppResult<Vec<Finding>> {
        let mut bag = Vec::new();
        self.check_feature_code(params, &mut bag).await?;
        check_source_format(params, &mut bag);
        self.check_source_data(params, &mut bag).await?;
        Ok(bag)
    }

    async fn check_feature_code(
        &self,
        params: &Map<String, Value>,
        bag: &mut Vec<Finding>,
    ) -> AppResult<()> {
        // Non-string codes are coerced to their textual form before the
        // existence lookup.
        let code = match params.get("featureCode") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        match code.as_deref() {
            None | Some("") => bag.push(FindingKind::MissingFieldFeatureCode.finding()),
            Some(code) => {
                if !self.features.exists_feature_code(code).await? {
                    bag.push(FindingKind::NotFoundFeatureCode.finding_with("featureCode", code));
                }
            }
        }
        Ok(())
    }

    async fn check_source_data(
        &self,
        params: &Map<String, Value>,
        bag: &mut Vec<Finding>,
    ) -> AppResult<()> {
        let Some(raw) = params.get("sourceData").filter(|v| !v.is_null()) else {
            bag.push(FindingKind::MissingFieldSourceData.finding());
            return Ok(());
        };
        let Some(source_data) = raw.as_object() else {
            bag.push(FindingKind::InvalidSourceData.finding());
            return Ok(());
        };
        if source_data.values().all(is_falsy) {
            bag.push(FindingKind::InvalidSourceData.finding());
            return Ok(());
        }

        let explicit_codes: Vec<String> = source_data
            .keys()
            .filter(|key| key.as_str() != ALL_PLATFORMS)
            .cloned()
            .collect();
        if !explicit_codes.is_empty() {
            if source_data.contains_key(ALL_PLATFORMS) {
                bag.push(FindingKind::AllAndCodes.finding());
            }
            check_platform_code_list(self.platforms, &explicit_codes, bag).await?;
        }

        match params.get("sourceFormat").and_then(Value::as_str) {
            Some("inline") => check_inline_negatives(source_data, bag),
            Some("blob") => self.check_blob_files(source_data, bag).await?,
            _ => {}
        }
        Ok(())
    }

    /// File-level checks run over every referenced file; the offending
    /// identifiers are comma-joined into one finding per condition.
    async fn check_blob_files(
        &self,
        source_data: &Map<String, Value>,
        bag: &mut Vec<Finding>,
    ) -> AppResult<()> {
        let known: BTreeSet<String> = self
            .platforms
            .platform_ids_by_code(None)
            .await?
            .into_keys()
            .collect();

        let mut files_not_found: Vec<String> = Vec::new();
        let mut empty_files: Vec<String> = Vec::new();
        let mut missing_platforms: Vec<String> = Vec::new();
        let mut invalid_platforms: Vec<String> = Vec::new();
        let mut bad_row_format = false;

        for (code, raw_url) in source_data {
            let Some(url) = raw_url.as_str() else {
                continue;
            };
            if !self.files.exists_file_by_url(url).await? {
                files_not_found.push(url.to_string());
                continue;
            }
            let Some(record) = self.files.file_by_url(url).await? else {
                files_not_found.push(url.to_string());
                continue;
            };
            let content = self.contents.contents_by_id(record.id).await?;
            if content.trim().is_empty() {
                empty_files.push(url.to_string());
                continue;
            }

            let in_file: BTreeSet<&str> = csv_lines(&content)
                .map(|line| csv_fields(line)[0])
                .collect();
            if code == ALL_PLATFORMS {
                let missing: Vec<&str> = known
                    .iter()
                    .map(String::as_str)
                    .filter(|platform| !in_file.contains(platform))
                    .collect();
                if !missing.is_empty() {
                    missing_platforms.extend(missing.into_iter().map(String::from));
                    continue;
                }
            }
            let unknown: Vec<&str> = in_file
                .iter()
                .copied()
                .filter(|platform| !known.contains(*platform))
                .collect();
            if !unknown.is_empty() {
                invalid_platforms.extend(unknown.into_iter().map(String::from));
                continue;
            }
            if !csv_rows_well_formed(&content) {
                bad_row_format = true;
            }
        }

        push_joined(bag, FindingKind::NotFoundFileBlob, "files", &files_not_found);
        push_joined(bag, FindingKind::EmptyFileBlob, "files", &empty_files);
        push_joined(bag, FindingKind::MissingPlatforms, "platforms", &missing_platforms);
        push_joined(bag, FindingKind::InvalidPlatforms, "platforms", &invalid_platforms);
        if bad_row_format {
            bag.push(FindingKind::InvalidBlobRowFormat.finding());
        }
        Ok(())
    }
}

/// Validates a `generateCostsReports` payload: target platforms and an
/// explicit, already-existing period.
pub struct CostsReportValidator<'a> {
    pub features: &'a dyn FeaturesRepository,
    pub platforms: &'a dyn PlatformsRepository,
}

impl CostsReportValidator<'_> {
    pub async fn validate(&self, params: &Map<String, Value>) -> AppResult<()> {
        let findings = self.collect(params).await?;
        if findings.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(findings))
        }
    }

    pub async fn collect(&self, params: &Map<String, Value>) -> AppResult<Vec<Finding>> {
        let mut bag = Vec::new();
        self.check_platform_code(params, &mut bag).await?;
        self.check_period(params, &mut bag).await?;
        Ok(bag)
    }

    async fn check_platform_code(
        &self,
        params: &Map<String, Value>,
        bag: &mut Vec<Finding>,
    ) -> AppResult<()> {
        if is_missing(params, "platformCode") {
            bag.push(FindingKind::MissingFieldPlatformCode.finding());
        }
        match params.get("platformCode") {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s == ALL_PLATFORMS => {}
            Some(Value::Array(items)) => {
                let codes: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(String::from))
                    .collect();
                match codes {
                    Some(codes) if !codes.is_empty() => {
                        check_platform_code_list(self.platforms, &codes, bag).await?;
                    }
                    Some(_) => {}
                    None => bag.push(FindingKind::BadFormatPlatformCode.finding()),
                }
            }
            Some(_) => bag.push(FindingKind::BadFormatPlatformCode.finding()),
        }
        Ok(())
    }

    async fn check_period(
        &self,
        params: &Map<String, Value>,
        bag: &mut Vec<Finding>,
    ) -> AppResult<()> {
        if is_missing(params, "period") {
            bag.push(FindingKind::MissingFieldPeriod.finding());
        }
        match params.get("period") {
            None | Some(Value::Null) => {}
            Some(Value::String(period)) => {
                if !PERIOD_FORMAT.is_match(period) {
                    bag.push(FindingKind::BadFormatPeriod.finding());
                }
                if self.features.billing_period_by_date(period).await?.is_none() {
                    bag.push(FindingKind::PeriodDoesNotExist.finding());
                }
            }
            // A number or any other non-string shape can never match the
            // calendar-month pattern.
            Some(_) => bag.push(FindingKind::BadFormatPeriod.finding()),
        }
        Ok(())
    }
}

fn check_source_format(params: &Map<String, Value>, bag: &mut Vec<Finding>) {
    if is_missing(params, "sourceFormat") {
        bag.push(FindingKind::MissingFieldSourceFormat.finding());
    }
    if let Some(raw) = params.get("sourceFormat").filter(|v| !v.is_null()) {
        let valid = raw.as_str().and_then(SourceFormat::parse).is_some();
        if !valid {
            bag.push(FindingKind::InvalidSourceFormat.finding());
        }
    }
}

/// One finding regardless of how many values are negative.
fn check_inline_negatives(source_data: &Map<String, Value>, bag: &mut Vec<Finding>) {
    let negative = |value: &Value| value.as_f64().map(|n| n < 0.0).unwrap_or(false);
    let any_negative = source_data.values().any(|entry| match entry {
        Value::Object(breakdown) => breakdown.values().any(negative),
        scalar => negative(scalar),
    });
    if any_negative {
        bag.push(FindingKind::NegativeStats.finding());
    }
}

/// One comma-joined finding per condition, skipped when nothing matched.
fn push_joined(bag: &mut Vec<Finding>, kind: FindingKind, placeholder: &str, items: &[String]) {
    if !items.is_empty() {
        bag.push(kind.finding_with(placeholder, &items.join(",")));
    }
}

async fn check_platform_code_list(
    platforms: &dyn PlatformsRepository,
    codes: &[String],
    bag: &mut Vec<Finding>,
) -> AppResult<()> {
    let existing = platforms.exists_platform_codes(codes).await?;
    for code in codes {
        if !existing.get(code).copied().unwrap_or(false) {
            bag.push(FindingKind::NotFoundPlatformCode.finding_with("platformCode", code));
        }
    }
    Ok(())
}

/// Exactly three `;`-separated fields per row: non-empty platform code,
/// non-empty stat code, positive integer value.
fn csv_rows_well_formed(content: &str) -> bool {
    csv_lines(content).all(|line| {
        let fields = csv_fields(line);
        matches!(fields[..], [platform, stat, value]
            if !platform.is_empty()
                && !stat.is_empty()
                && value.parse::<i64>().map(|v| v > 0).unwrap_or(false))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::memory::{
        InMemoryFeaturesRepository, InMemoryFileManager, InMemoryPlatformsRepository, StoredFile,
    };
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    struct Fixture {
        features: InMemoryFeaturesRepository,
        platforms: InMemoryPlatformsRepository,
        files: InMemoryFileManager,
    }

    fn fixture() -> Fixture {
        let features = InMemoryFeaturesRepository::default();
        features.add_feature(7, "storage", "storage");
        let platforms = InMemoryPlatformsRepository::default();
        platforms.add_platform(1, "platA", "Platform A", 20, 30);
        platforms.add_platform(2, "platB", "Platform B", 25, 35);
        Fixture {
            features,
            platforms,
            files: InMemoryFileManager::default(),
        }
    }

    async fn collect(fx: &Fixture, payload: Value) -> Vec<Finding> {
        let validator = SetFeatureDataValidator {
            features: &fx.features,
            platforms: &fx.platforms,
            files: &fx.files,
            contents: &fx.files,
        };
        validator.collect(&params(payload)).await.unwrap()
    }

    fn codes(findings: &[Finding]) -> Vec<&'static str> {
        findings.iter().map(|f| f.code).collect()
    }

    #[tokio::test]
    async fn valid_inline_payload_produces_no_findings() {
        let fx = fixture();
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "inline", "sourceData": {"all": 100}}),
        )
        .await;
        assert!(findings.is_empty(), "unexpected findings: {findings:?}");
    }

    #[tokio::test]
    async fn missing_fields_are_each_reported() {
        let fx = fixture();
        let findings = collect(&fx, json!({})).await;
        assert_eq!(codes(&findings), vec!["999005003", "999005004", "999005005"]);
    }

    #[tokio::test]
    async fn unknown_feature_and_platform_codes_are_reported() {
        let fx = fixture();
        let findings = collect(
            &fx,
            json!({"featureCode": "nope", "sourceFormat": "inline", "sourceData": {"ghost": 5}}),
        )
        .await;
        assert!(findings
            .iter()
            .any(|f| f.code == "999005001" && f.description.contains("`nope`")));
        assert!(findings
            .iter()
            .any(|f| f.code == "999005002" && f.description.contains("`ghost`")));
    }

    #[tokio::test]
    async fn invalid_source_format_reported_alongside_emptiness() {
        let fx = fixture();
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "csv", "sourceData": {}}),
        )
        .await;
        assert_eq!(codes(&findings), vec!["999005006", "999005007"]);
    }

    #[tokio::test]
    async fn all_mixed_with_explicit_codes_is_one_finding() {
        let fx = fixture();
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "inline",
                   "sourceData": {"all": 5, "platA": 5}}),
        )
        .await;
        assert_eq!(codes(&findings), vec!["999005009"]);
    }

    #[tokio::test]
    async fn negatives_anywhere_produce_exactly_one_finding() {
        let fx = fixture();
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "inline",
                   "sourceData": {"platA": -5, "platB": {"x": -1, "y": -2}}}),
        )
        .await;
        assert_eq!(codes(&findings), vec!["999005008"]);
    }

    #[tokio::test]
    async fn blob_findings_aggregate_across_files() {
        let fx = fixture();
        fx.files.add(StoredFile {
            id: 1,
            url: "https://files/empty.csv".to_string(),
            content: String::new(),
        });
        fx.files.add(StoredFile {
            id: 2,
            url: "https://files/unknown.csv".to_string(),
            content: "ghost;stat;5\nplatA;stat;5".to_string(),
        });
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "blob",
                   "sourceData": {
                       "platA": "https://files/missing-a.csv",
                       "platB": "https://files/empty.csv",
                       "x": "https://files/unknown.csv"
                   }}),
        )
        .await;
        // `x` is flagged as an unknown platform key, then each file-level
        // condition aggregates into one comma-joined finding.
        assert!(findings
            .iter()
            .any(|f| f.code == "999005002" && f.description.contains("`x`")));
        assert!(findings
            .iter()
            .any(|f| f.code == "999005010" && f.description.contains("missing-a.csv")));
        assert!(findings
            .iter()
            .any(|f| f.code == "999005011" && f.description.contains("empty.csv")));
        assert!(findings
            .iter()
            .any(|f| f.code == "999005013" && f.description.contains("`ghost`")));
    }

    #[tokio::test]
    async fn blob_all_requires_every_platform_in_file() {
        let fx = fixture();
        fx.files.add(StoredFile {
            id: 1,
            url: "https://files/partial.csv".to_string(),
            content: "platA;stat;5".to_string(),
        });
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "blob",
                   "sourceData": {"all": "https://files/partial.csv"}}),
        )
        .await;
        assert_eq!(codes(&findings), vec!["999005012"]);
        assert!(findings[0].description.contains("`platB`"));
    }

    #[tokio::test]
    async fn blob_bad_row_shape_is_one_finding() {
        let fx = fixture();
        fx.files.add(StoredFile {
            id: 1,
            url: "https://files/bad.csv".to_string(),
            content: "platA;stat;5\nplatB;stat;0\nplatA;stat;5;extra".to_string(),
        });
        let findings = collect(
            &fx,
            json!({"featureCode": "storage", "sourceFormat": "blob",
                   "sourceData": {"platA": "https://files/bad.csv"}}),
        )
        .await;
        assert_eq!(codes(&findings), vec!["999005014"]);
    }

    #[tokio::test]
    async fn non_string_period_and_feature_code_still_yield_findings() {
        let fx = fixture();
        fx.features.add_billing_period(3, "2026-08");
        let validator = CostsReportValidator {
            features: &fx.features,
            platforms: &fx.platforms,
        };
        let bad = validator
            .collect(&params(json!({"platformCode": "all", "period": 201803})))
            .await
            .unwrap();
        assert_eq!(codes(&bad), vec!["999005011"]);

        let findings = collect(
            &fx,
            json!({"featureCode": 42, "sourceFormat": "inline", "sourceData": {"all": 1}}),
        )
        .await;
        assert_eq!(codes(&findings), vec!["999005001"]);
        assert!(findings[0].description.contains("`42`"));
    }

    #[tokio::test]
    async fn costs_report_validator_checks_platforms_and_period() {
        let fx = fixture();
        fx.features.add_billing_period(3, "2026-08");
        let validator = CostsReportValidator {
            features: &fx.features,
            platforms: &fx.platforms,
        };

        let ok = validator
            .collect(&params(json!({"platformCode": "all", "period": "2026-08"})))
            .await
            .unwrap();
        assert!(ok.is_empty(), "unexpected findings: {ok:?}");

        let bad = validator
            .collect(&params(json!({"platformCode": "some", "period": "2026/08"})))
            .await
            .unwrap();
        assert_eq!(codes(&bad), vec!["999005009", "999005011", "999005012"]);

        let missing = validator.collect(&params(json!({}))).await.unwrap();
        assert_eq!(codes(&missing), vec!["999005008", "999005010"]);

        let unknown = validator
            .collect(&params(
                json!({"platformCode": ["platA", "ghost"], "period": "1999-01"}),
            ))
            .await
            .unwrap();
        assert_eq!(codes(&unknown), vec!["999005002", "999005012"]);
    }
}
