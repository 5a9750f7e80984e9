use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use super::models::{
    status, AggregatedData, PlatformReportData, PlatformSelector, CATEGORY_TRANSLATIONS,
    DATA_NOT_FOUND, REPORT_LITERALS,
};
use super::repository::{FeaturesRepository, PlatformsRepository};
use crate::config::DEFAULT_LANGUAGE;
use crate::error::{AppError, AppResult};

/// Fixed column layout of the cost report, leftmost first.
pub mod col {
    pub const PLATFORM: u32 = 0;
    pub const PERIOD: u32 = 1;
    pub const USERS_CONTRACTED: u32 = 2;
    pub const USERS_ACTIVE: u32 = 3;
    pub const USERS_ACTIVE_COST: u32 = 4;
    pub const USERS_INACTIVE: u32 = 5;
    pub const USERS_INACTIVE_COST: u32 = 6;
    pub const USERS_DELETED: u32 = 7;
    pub const USERS_DELETED_COST: u32 = 8;
    pub const USERS_TOTAL: u32 = 9;
    pub const USERS_TOTAL_COST: u32 = 10;
    pub const STORAGE_CONTRACTED: u32 = 11;
    pub const STORAGE_DATABASE: u32 = 12;
    pub const STORAGE_CONTENT: u32 = 13;
    pub const STORAGE_BACKUPS: u32 = 14;
    pub const STORAGE_TOTAL: u32 = 15;
    pub const STORAGE_COST: u32 = 16;
    pub const GRAND_TOTAL: u32 = 17;
}

pub const HEADER_ROW: u32 = 0;
pub const LABEL_ROW: u32 = 1;
pub const VALUE_ROW: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellValue {
    Text(String),
    Int(i64),
    Number(f64),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Number(v) => Some(*v),
            CellValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Rendering hint for a cell; the sink decides the concrete encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFormat {
    Text,
    Number,
    Currency,
    SizeMb,
    PeriodDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CellStyle {
    pub bold: bool,
    pub centered: bool,
    pub bordered: bool,
}

impl CellStyle {
    pub fn bold() -> Self {
        CellStyle {
            bold: true,
            ..CellStyle::default()
        }
    }

    pub fn header() -> Self {
        CellStyle {
            bold: true,
            centered: true,
            bordered: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub value: CellValue,
    pub format: CellFormat,
    pub style: CellStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSpan {
    pub row: u32,
    pub start_col: u32,
    pub end_col: u32,
}

/// Addressable 2D cell grid for one platform's cost report. Coordinates are
/// zero-based (row, column); the sink maps them to its own addressing.
#[derive(Debug, Clone, Serialize)]
pub struct ReportGrid {
    pub title: String,
    pub creator: String,
    pub merges: Vec<MergeSpan>,
    #[serde(serialize_with = "serialize_cells")]
    cells: BTreeMap<(u32, u32), Cell>,
}

fn serialize_cells<S: Serializer>(
    cells: &BTreeMap<(u32, u32), Cell>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Placed<'a> {
        row: u32,
        col: u32,
        #[serde(flatten)]
        cell: &'a Cell,
    }
    serializer.collect_seq(
        cells
            .iter()
            .map(|(&(row, col), cell)| Placed { row, col, cell }),
    )
}

impl ReportGrid {
    pub fn new(title: String, creator: String) -> Self {
        ReportGrid {
            title,
            creator,
            merges: Vec::new(),
            cells: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, row: u32, column: u32, value: CellValue, format: CellFormat, style: CellStyle) {
        self.cells.insert(row_col(row, column), Cell { value, format, style });
    }

    pub fn merge(&mut self, row: u32, start_col: u32, end_col: u32) {
        self.merges.push(MergeSpan { row, start_col, end_col });
    }

    pub fn cell(&self, row: u32, column: u32) -> Option<&Cell> {
        self.cells.get(&row_col(row, column))
    }

    pub fn value(&self, row: u32, column: u32) -> Option<&CellValue> {
        self.cell(row, column).map(|cell| &cell.value)
    }

    pub fn number(&self, row: u32, column: u32) -> Option<f64> {
        self.value(row, column).and_then(CellValue::as_f64)
    }
}

fn row_col(row: u32, column: u32) -> (u32, u32) {
    (row, column)
}

/// Gather everything one report request needs, short-circuiting on the first
/// failure. Literal shortfalls abort as configuration faults; absent period,
/// billed or stat data come back as structured per-request errors.
pub async fn prepare(
    features: &dyn FeaturesRepository,
    platforms: &dyn PlatformsRepository,
    selector: &PlatformSelector,
    period: &str,
) -> AppResult<AggregatedData> {
    let ids_by_code = match selector {
        PlatformSelector::All => platforms.platform_ids_by_code(None).await?,
        PlatformSelector::Codes(codes) => platforms.platform_ids_by_code(Some(codes)).await?,
    };
    let ids: Vec<i64> = ids_by_code.values().copied().collect();
    let platform_data = features.platform_report_data(&ids).await?;

    let locale = DEFAULT_LANGUAGE.as_str();
    let literals = features.report_literals(&REPORT_LITERALS, locale).await?;
    if literals.len() < REPORT_LITERALS.len() {
        return Err(AppError::MissingLiterals(format!(
            "{} of {} report literals resolved for locale `{locale}`",
            literals.len(),
            REPORT_LITERALS.len(),
        )));
    }
    let categories = features
        .category_translations(&CATEGORY_TRANSLATIONS, locale)
        .await?;
    if categories.len() < CATEGORY_TRANSLATIONS.len() {
        return Err(AppError::MissingLiterals(format!(
            "{} of {} father category translations resolved for locale `{locale}`",
            categories.len(),
            CATEGORY_TRANSLATIONS.len(),
        )));
    }

    let period_id = features
        .billing_period_by_date(period)
        .await?
        .ok_or_else(|| {
            AppError::action(
                status::PERIOD_NOT_FOUND,
                DATA_NOT_FOUND,
                format!("Can't find period with {period} date"),
            )
        })?;

    let billed = features.features_billed(&ids, period_id).await?;
    if billed.is_empty() {
        return Err(AppError::action(
            status::BILLED_DATA_NOT_FOUND,
            DATA_NOT_FOUND,
            format!("Can't find billed data for {ids:?} platforms"),
        ));
    }
    let stats = features.features_stats(&ids, period_id).await?;
    if stats.is_empty() {
        return Err(AppError::action(
            status::BILLED_STAT_NOT_FOUND,
            DATA_NOT_FOUND,
            format!("Can't find stat data for {ids:?} platforms"),
        ));
    }

    Ok(AggregatedData {
        period: period.to_string(),
        period_id,
        platforms: platform_data,
        literals,
        categories,
        billed,
        stats,
    })
}

/// Uppercase the first character only, leaving the rest untouched.
fn title_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Fold one platform's aggregated stats and billed figures into the fixed
/// three-row report grid.
pub fn build_report(platform: &PlatformReportData, agg: &AggregatedData) -> AppResult<ReportGrid> {
    let name = platform.name.as_str();
    let users_cat = agg.category("users")?.to_string();
    let storage_cat = agg.category("storage")?.to_string();

    let mut grid = ReportGrid::new(
        format!(
            "{name} {} {}",
            agg.literal("features-report-coste-servicio")?,
            agg.period
        ),
        agg.literal("general-nombre-manager")?.to_string(),
    );

    // Merged header spans for the two metric blocks plus the total cell.
    grid.set(
        HEADER_ROW,
        col::USERS_CONTRACTED,
        CellValue::Text(users_cat.to_uppercase()),
        CellFormat::Text,
        CellStyle::header(),
    );
    grid.merge(HEADER_ROW, col::USERS_CONTRACTED, col::USERS_TOTAL_COST);
    grid.set(
        HEADER_ROW,
        col::STORAGE_CONTRACTED,
        CellValue::Text(storage_cat.to_uppercase()),
        CellFormat::Text,
        CellStyle::header(),
    );
    grid.merge(HEADER_ROW, col::STORAGE_CONTRACTED, col::STORAGE_COST);
    grid.set(
        HEADER_ROW,
        col::GRAND_TOTAL,
        CellValue::Text(agg.literal("features-report-total")?.to_uppercase()),
        CellFormat::Text,
        CellStyle::header(),
    );

    let mut label = |grid: &mut ReportGrid, column: u32, text: String| {
        grid.set(LABEL_ROW, column, CellValue::Text(title_first(&text)), CellFormat::Text, CellStyle::bold());
    };
    label(&mut grid, col::PLATFORM, agg.literal("features-report-plataforma")?.to_string());
    label(&mut grid, col::PERIOD, agg.literal("features-report-periodo")?.to_string());
    label(&mut grid, col::USERS_CONTRACTED, agg.literal("features-report-total-contratado")?.to_string());
    label(&mut grid, col::USERS_ACTIVE, agg.literal("features-report-activos")?.to_string());
    label(&mut grid, col::USERS_ACTIVE_COST, agg.literal("features-report-coste")?.to_string());
    label(&mut grid, col::USERS_INACTIVE, agg.literal("features-report-inactivos")?.to_string());
    label(&mut grid, col::USERS_INACTIVE_COST, agg.literal("features-report-coste")?.to_string());
    label(&mut grid, col::USERS_DELETED, agg.literal("features-report-borrados")?.to_string());
    label(&mut grid, col::USERS_DELETED_COST, agg.literal("features-report-coste")?.to_string());
    label(
        &mut grid,
        col::USERS_TOTAL,
        format!("{} {users_cat}", agg.literal("features-report-total")?),
    );
    label(&mut grid, col::USERS_TOTAL_COST, agg.literal("features-report-total-coste")?.to_string());
    label(&mut grid, col::STORAGE_CONTRACTED, agg.literal("features-report-total-contratado")?.to_string());
    label(&mut grid, col::STORAGE_DATABASE, agg.literal("features-report-base-de-datos")?.to_string());
    label(&mut grid, col::STORAGE_CONTENT, agg.literal("features-report-contenido")?.to_string());
    label(&mut grid, col::STORAGE_BACKUPS, agg.literal("features-report-backups")?.to_string());
    label(&mut grid, col::STORAGE_TOTAL, agg.literal("features-report-total")?.to_string());
    label(&mut grid, col::STORAGE_COST, agg.literal("features-report-total-coste")?.to_string());
    label(&mut grid, col::GRAND_TOTAL, agg.literal("features-report-coste-servicio")?.to_string());

    let active = agg.stat_value(name, "users", "active_users")?;
    let inactive = agg.stat_value(name, "users", "inactive_users")?;
    let deleted = agg.stat_value(name, "users", "deleted_users")?;
    let active_cost = agg.billed_value(name, "users", "active_users")?;
    let inactive_cost = agg.billed_value(name, "users", "inactive_users")?;
    let deleted_cost = agg.billed_value(name, "users", "deleted_users")?;
    let users_total_cost = active_cost + inactive_cost + deleted_cost;

    let database = agg.stat_value(name, "storage", "database")?;
    let content = agg.stat_value(name, "storage", "content")?;
    let backups = agg.stat_value(name, "storage", "primary_backup")?
        + agg.stat_value(name, "storage", "secondary_backup")?
        + agg.stat_value(name, "storage", "sql_backup")?;
    let storage_cost = agg.billed_value(name, "storage", "storage")?;

    let mut value = |grid: &mut ReportGrid, column: u32, value: CellValue, format: CellFormat| {
        let style = CellStyle {
            centered: true,
            ..CellStyle::default()
        };
        grid.set(VALUE_ROW, column, value, format, style);
    };
    value(&mut grid, col::PLATFORM, CellValue::Text(name.to_string()), CellFormat::Text);
    value(&mut grid, col::PERIOD, CellValue::Text(agg.period.clone()), CellFormat::PeriodDate);
    value(&mut grid, col::USERS_CONTRACTED, CellValue::Int(platform.estimated_users), CellFormat::Number);
    value(&mut grid, col::USERS_ACTIVE, CellValue::Number(active), CellFormat::Number);
    value(&mut grid, col::USERS_ACTIVE_COST, CellValue::Number(active_cost), CellFormat::Currency);
    value(&mut grid, col::USERS_INACTIVE, CellValue::Number(inactive), CellFormat::Number);
    value(&mut grid, col::USERS_INACTIVE_COST, CellValue::Number(inactive_cost), CellFormat::Currency);
    value(&mut grid, col::USERS_DELETED, CellValue::Number(deleted), CellFormat::Number);
    value(&mut grid, col::USERS_DELETED_COST, CellValue::Number(deleted_cost), CellFormat::Currency);
    value(&mut grid, col::USERS_TOTAL, CellValue::Number(active + inactive + deleted), CellFormat::Number);
    value(&mut grid, col::USERS_TOTAL_COST, CellValue::Number(users_total_cost), CellFormat::Currency);
    value(&mut grid, col::STORAGE_CONTRACTED, CellValue::Int(platform.storage), CellFormat::SizeMb);
    value(&mut grid, col::STORAGE_DATABASE, CellValue::Number(database), CellFormat::SizeMb);
    value(&mut grid, col::STORAGE_CONTENT, CellValue::Number(content), CellFormat::SizeMb);
    value(&mut grid, col::STORAGE_BACKUPS, CellValue::Number(backups), CellFormat::SizeMb);
    value(
        &mut grid,
        col::STORAGE_TOTAL,
        CellValue::Number(backups + content + database),
        CellFormat::SizeMb,
    );
    value(&mut grid, col::STORAGE_COST, CellValue::Number(storage_cost), CellFormat::Currency);
    // Raw sum of the users block cost and the billed storage cost.
    value(
        &mut grid,
        col::GRAND_TOTAL,
        CellValue::Number(users_total_cost + storage_cost),
        CellFormat::Currency,
    );

    Ok(grid)
}
