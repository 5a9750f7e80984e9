use std::collections::BTreeMap;

use super::models::{status, FeatureStatRow, SetFeatureDataParams, SourceFormat, StatValue};
use super::repository::{FileContentStore, FilesRepository};
use crate::error::{AppError, AppResult};

/// Sentinel `sourceData` key that targets every known platform.
pub const ALL_PLATFORMS: &str = "all";

const FILE_NOT_FOUND_TEXT: &str = "File not found.";

/// Per-request context resolved once before row construction: the feature id,
/// the current billing period and the batched platform-id map.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub feature_code: String,
    pub feature_id: i64,
    pub billing_period_id: i64,
    pub platform_ids: BTreeMap<String, i64>,
}

impl NormalizeContext {
    fn platform_id(&self, code: &str) -> AppResult<i64> {
        self.platform_ids.get(code).copied().ok_or_else(|| {
            AppError::Message(format!("platform code `{code}` is not resolvable"))
        })
    }

    fn row(&self, platform_id: i64, stat_code: &str, value: i64) -> FeatureStatRow {
        FeatureStatRow {
            platform_id,
            feature_id: self.feature_id,
            billing_period_id: self.billing_period_id,
            stat_code: stat_code.to_string(),
            value,
        }
    }
}

/// Convert a validated action payload into canonical stat rows.
pub async fn normalize(
    params: &SetFeatureDataParams,
    ctx: &NormalizeContext,
    files: &dyn FilesRepository,
    contents: &dyn FileContentStore,
) -> AppResult<Vec<FeatureStatRow>> {
    match params.source_format {
        SourceFormat::Inline => inline_rows(&params.source_data, ctx),
        SourceFormat::Blob => blob_rows(&params.source_data, ctx, files, contents).await,
    }
}

fn inline_rows(
    source_data: &serde_json::Map<String, serde_json::Value>,
    ctx: &NormalizeContext,
) -> AppResult<Vec<FeatureStatRow>> {
    let mut platform_stats: BTreeMap<String, StatValue> = BTreeMap::new();
    if let Some(all_value) = source_data.get(ALL_PLATFORMS) {
        // Broadcast: every known platform gets an identical copy. The
        // validator guarantees `all` is never mixed with explicit codes.
        let value = parse_stat_value(ALL_PLATFORMS, all_value)?;
        for code in ctx.platform_ids.keys() {
            platform_stats.insert(code.clone(), value.clone());
        }
    } else {
        for (code, raw) in source_data {
            platform_stats.insert(code.clone(), parse_stat_value(code, raw)?);
        }
    }

    let mut rows = Vec::new();
    for (code, stat) in &platform_stats {
        let platform_id = ctx.platform_id(code)?;
        match stat {
            StatValue::Scalar(value) => {
                rows.push(ctx.row(platform_id, &ctx.feature_code, *value));
            }
            StatValue::Breakdown(breakdown) => {
                for (stat_code, value) in breakdown {
                    rows.push(ctx.row(platform_id, stat_code, *value));
                }
            }
        }
    }
    Ok(rows)
}

/// In blob format the outer key only selects which file(s) to read; the
/// platform code inside each CSV row decides which platform a row belongs to.
async fn blob_rows(
    source_data: &serde_json::Map<String, serde_json::Value>,
    ctx: &NormalizeContext,
    files: &dyn FilesRepository,
    contents: &dyn FileContentStore,
) -> AppResult<Vec<FeatureStatRow>> {
    let mut rows = Vec::new();
    for (_code, raw_url) in source_data {
        let url = raw_url.as_str().ok_or_else(|| {
            AppError::Message("blob sourceData entries must be file URLs".to_string())
        })?;
        let record = files.file_by_url(url).await?.ok_or_else(|| {
            AppError::action(
                status::FILE_NOT_FOUND,
                FILE_NOT_FOUND_TEXT,
                format!("File `{url}` not found or can't be reached."),
            )
        })?;
        let content = contents.contents_by_id(record.id).await?;
        for line in csv_lines(&content) {
            let (platform_code, stat_code, value) = parse_csv_row(line)?;
            let platform_id = ctx.platform_id(platform_code)?;
            rows.push(ctx.row(platform_id, stat_code, value));
        }
    }
    Ok(rows)
}

/// Non-blank lines of a CSV blob; tolerates a trailing newline.
pub(crate) fn csv_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().filter(|line| !line.trim().is_empty())
}

/// Fields of one `platform;stat;value` row.
pub(crate) fn csv_fields(line: &str) -> Vec<&str> {
    line.split(';').map(str::trim).collect()
}

fn parse_csv_row(line: &str) -> AppResult<(&str, &str, i64)> {
    let fields = csv_fields(line);
    if let [platform, stat, value] = fields[..] {
        let value = value
            .parse::<i64>()
            .map_err(|_| AppError::Message(format!("invalid stat value in row `{line}`")))?;
        return Ok((platform, stat, value));
    }
    Err(AppError::Message(format!("malformed CSV row `{line}`")))
}

fn parse_stat_value(code: &str, raw: &serde_json::Value) -> AppResult<StatValue> {
    StatValue::from_json(raw).ok_or_else(|| {
        AppError::Message(format!("sourceData entry `{code}` is not a stat value"))
    })
}
