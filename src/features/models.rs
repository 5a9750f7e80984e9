use std::collections::{BTreeMap, HashMap};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::error::{AppError, AppResult};

/// Stable status codes reported by the action entry points.
pub mod status {
    pub const SET_FEATURE_DATA_OK: &str = "000005000";
    pub const CANT_PERSIST: &str = "004005000";
    pub const FILE_NOT_FOUND: &str = "000005001";
    pub const PERIOD_NOT_FOUND: &str = "002005001";
    pub const BILLED_DATA_NOT_FOUND: &str = "002005000";
    pub const BILLED_STAT_NOT_FOUND: &str = "002005002";
    pub const GENERATE_COSTS_REPORTS_OK: &str = "000005003";
}

pub const DATA_NOT_FOUND: &str = "Data not found";
pub const CANT_PERSIST_TEXT: &str = "Can't persist report.";
pub const REPORT_EXTENSION: &str = ".xlsx";

/// Literal codes every report needs resolved for the configured locale.
pub const REPORT_LITERALS: [&str; 14] = [
    "features-report-plataforma",
    "features-report-periodo",
    "features-report-total-contratado",
    "features-report-coste",
    "features-report-total",
    "features-report-total-coste",
    "features-report-backups",
    "features-report-coste-servicio",
    "features-report-activos",
    "features-report-inactivos",
    "features-report-borrados",
    "features-report-base-de-datos",
    "features-report-contenido",
    "general-nombre-manager",
];

/// Father-category codes every report needs translated.
pub const CATEGORY_TRANSLATIONS: [&str; 2] = ["users", "storage"];

/// Successful action result, mirrored by the error-result shape in
/// [`crate::error::AppError::Action`].
#[derive(Debug, Clone, Serialize)]
pub struct ActionOk {
    pub action: &'static str,
    pub code: &'static str,
    pub text: &'static str,
    pub description: &'static str,
}

impl ActionOk {
    pub fn set_feature_data() -> Self {
        ActionOk {
            action: "setFeatureData",
            code: status::SET_FEATURE_DATA_OK,
            text: "Set feature data action completed",
            description: "All the data was stored.",
        }
    }

    pub fn generate_costs_reports() -> Self {
        ActionOk {
            action: "generateCostsReports",
            code: status::GENERATE_COSTS_REPORTS_OK,
            text: "Result Action completed",
            description: "The result action was completed.",
        }
    }
}

/// Accepted shapes for the `sourceData` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Inline,
    Blob,
}

impl SourceFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inline" => Some(SourceFormat::Inline),
            "blob" => Some(SourceFormat::Blob),
            _ => None,
        }
    }
}

/// One inline stat entry: either a bare value recorded under the feature's
/// own code, or a breakdown of stat-code to value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatValue {
    Scalar(i64),
    Breakdown(BTreeMap<String, i64>),
}

impl StatValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(StatValue::Scalar),
            Value::Object(map) => {
                let mut breakdown = BTreeMap::new();
                for (code, raw) in map {
                    breakdown.insert(code.clone(), raw.as_i64()?);
                }
                Some(StatValue::Breakdown(breakdown))
            }
            _ => None,
        }
    }
}

/// Target platforms of a report request: explicit codes or every platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSelector {
    All,
    Codes(Vec<String>),
}

impl<'de> Deserialize<'de> for PlatformSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(ref s) if s == "all" => Ok(PlatformSelector::All),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(code) => Ok(code),
                    other => Err(D::Error::custom(format!(
                        "platform code must be a string, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(PlatformSelector::Codes),
            other => Err(D::Error::custom(format!(
                "platformCode must be an array of codes or the string `all`, got {other}"
            ))),
        }
    }
}

/// Typed `setFeatureData` payload, deserialized only after validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFeatureDataParams {
    pub feature_code: String,
    pub source_format: SourceFormat,
    pub source_data: serde_json::Map<String, Value>,
}

/// Typed `generateCostsReports` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostsReportParams {
    pub platform_code: PlatformSelector,
    pub period: String,
    #[serde(default)]
    pub delete_temp_files: bool,
}

/// Canonical stat row, ready for the bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureStatRow {
    pub platform_id: i64,
    pub feature_id: i64,
    pub billing_period_id: i64,
    pub stat_code: String,
    pub value: i64,
}

/// Platform metadata needed by the report builder.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct PlatformReportData {
    pub id: i64,
    pub name: String,
    pub storage: i64,
    pub estimated_users: i64,
}

/// Stored file metadata resolved from a blob URL.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
}

/// `platform name -> father category -> feature code -> value`
pub type NestedValues = HashMap<String, HashMap<String, HashMap<String, f64>>>;

/// Everything the report builder needs for one request, resolved up front
/// and immutable from then on.
#[derive(Debug, Clone)]
pub struct AggregatedData {
    pub period: String,
    pub period_id: i64,
    pub platforms: Vec<PlatformReportData>,
    pub literals: HashMap<String, String>,
    pub categories: HashMap<String, String>,
    pub billed: NestedValues,
    pub stats: NestedValues,
}

impl AggregatedData {
    pub fn literal(&self, code: &str) -> AppResult<&str> {
        self.literals
            .get(code)
            .map(String::as_str)
            .ok_or_else(|| AppError::MissingLiterals(format!("report literal `{code}` missing")))
    }

    pub fn category(&self, code: &str) -> AppResult<&str> {
        self.categories.get(code).map(String::as_str).ok_or_else(|| {
            AppError::MissingLiterals(format!("category translation `{code}` missing"))
        })
    }

    pub fn billed_value(&self, platform: &str, category: &str, feature: &str) -> AppResult<f64> {
        lookup_nested(
            &self.billed,
            platform,
            category,
            feature,
            "billed",
            status::BILLED_DATA_NOT_FOUND,
        )
    }

    pub fn stat_value(&self, platform: &str, category: &str, feature: &str) -> AppResult<f64> {
        lookup_nested(
            &self.stats,
            platform,
            category,
            feature,
            "stat",
            status::BILLED_STAT_NOT_FOUND,
        )
    }
}

// A platform present in metadata but absent from the nested maps is a hard
// error, not a silent zero. Billed and stat lookups report their own codes.
fn lookup_nested(
    values: &NestedValues,
    platform: &str,
    category: &str,
    feature: &str,
    kind: &str,
    code: &'static str,
) -> AppResult<f64> {
    values
        .get(platform)
        .and_then(|categories| categories.get(category))
        .and_then(|features| features.get(feature))
        .copied()
        .ok_or_else(|| {
            AppError::action(
                code,
                DATA_NOT_FOUND,
                format!("Can't find {kind} value for {platform}/{category}/{feature}"),
            )
        })
}
