use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::models::{
    status, ActionOk, CostsReportParams, SetFeatureDataParams, CANT_PERSIST_TEXT,
    REPORT_EXTENSION,
};
use super::normalize::{self, NormalizeContext, ALL_PLATFORMS};
use super::repository::{
    FeaturesRepository, FileContentStore, FilesRepository, PlatformsRepository, ReportSink,
};
use super::validate::{CostsReportValidator, SetFeatureDataValidator};
use super::{period, report};
use crate::error::{AppError, AppResult};

/// Features business model: stat ingestion and cost-report generation over
/// the collaborator interfaces.
#[derive(Clone)]
pub struct FeaturesService {
    features: Arc<dyn FeaturesRepository>,
    platforms: Arc<dyn PlatformsRepository>,
    files: Arc<dyn FilesRepository>,
    contents: Arc<dyn FileContentStore>,
    reports: Arc<dyn ReportSink>,
}

impl FeaturesService {
    pub fn new(
        features: Arc<dyn FeaturesRepository>,
        platforms: Arc<dyn PlatformsRepository>,
        files: Arc<dyn FilesRepository>,
        contents: Arc<dyn FileContentStore>,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        FeaturesService {
            features,
            platforms,
            files,
            contents,
            reports,
        }
    }

    /// Store the feature stats carried by a `setFeatureData` action payload.
    /// Submission always targets the current billing period.
    pub async fn set_feature_data(&self, params: &Map<String, Value>) -> AppResult<ActionOk> {
        let validator = SetFeatureDataValidator {
            features: self.features.as_ref(),
            platforms: self.platforms.as_ref(),
            files: self.files.as_ref(),
            contents: self.contents.as_ref(),
        };
        validator.validate(params).await?;

        let typed: SetFeatureDataParams = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|err| AppError::Message(format!("malformed setFeatureData payload: {err}")))?;

        let period_date = period::current_period_date();
        let billing_period_id =
            period::resolve_or_create(self.features.as_ref(), &period_date).await?;
        let feature_id = self
            .features
            .feature_id_by_code(&typed.feature_code)
            .await?
            .ok_or_else(|| {
                AppError::Message(format!("feature `{}` vanished after validation", typed.feature_code))
            })?;

        let platform_ids = if typed.source_data.contains_key(ALL_PLATFORMS) {
            self.platforms.platform_ids_by_code(None).await?
        } else {
            let codes: Vec<String> = typed.source_data.keys().cloned().collect();
            self.platforms.platform_ids_by_code(Some(&codes)).await?
        };

        let ctx = NormalizeContext {
            feature_code: typed.feature_code.clone(),
            feature_id,
            billing_period_id,
            platform_ids,
        };
        let rows =
            normalize::normalize(&typed, &ctx, self.files.as_ref(), self.contents.as_ref()).await?;
        self.features.insert_feature_stats(&rows).await?;
        info!(
            feature = %typed.feature_code,
            period = %period_date,
            rows = rows.len(),
            "feature stats stored"
        );

        Ok(ActionOk::set_feature_data())
    }

    /// Generate and persist one cost report per requested platform. A persist
    /// failure aborts the remaining platforms; already-persisted artifacts
    /// stay in place.
    pub async fn generate_costs_reports(&self, params: &Map<String, Value>) -> AppResult<ActionOk> {
        let validator = CostsReportValidator {
            features: self.features.as_ref(),
            platforms: self.platforms.as_ref(),
        };
        validator.validate(params).await?;

        let typed: CostsReportParams = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|err| {
                AppError::Message(format!("malformed generateCostsReports payload: {err}"))
            })?;

        let aggregated = report::prepare(
            self.features.as_ref(),
            self.platforms.as_ref(),
            &typed.platform_code,
            &typed.period,
        )
        .await?;

        let mut staged = Vec::new();
        for platform in &aggregated.platforms {
            let grid = report::build_report(platform, &aggregated)?;
            let name = report_name(&platform.name, &aggregated.period);
            if let Err(err) = self.reports.persist(&grid, &name).await {
                error!(%name, %err, "failed to persist cost report");
                return Err(AppError::action(
                    status::CANT_PERSIST,
                    CANT_PERSIST_TEXT,
                    err.to_string(),
                ));
            }
            info!(%name, platform = %platform.name, "cost report persisted");
            staged.push(name);
        }

        if typed.delete_temp_files {
            for name in &staged {
                if let Err(err) = self.reports.cleanup(name).await {
                    warn!(%name, %err, "failed to clean up staged report");
                }
            }
        }

        Ok(ActionOk::generate_costs_reports())
    }
}

fn report_name(platform_name: &str, period: &str) -> String {
    format!("{platform_name}-{period}{REPORT_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_names_join_platform_and_period() {
        assert_eq!(report_name("platform1", "2018-03"), "platform1-2018-03.xlsx");
    }
}
