pub mod memory;
pub mod models;
pub mod normalize;
pub mod period;
pub mod report;
pub mod repository;
pub mod service;
pub mod store;
pub mod validate;

pub use models::{
    ActionOk, AggregatedData, CostsReportParams, FeatureStatRow, PlatformReportData,
    PlatformSelector, SetFeatureDataParams, SourceFormat, StatValue,
};
pub use report::{CellFormat, CellValue, ReportGrid};
pub use repository::{
    FeaturesRepository, FileContentStore, FilesRepository, PlatformsRepository, ReportSink,
};
pub use service::FeaturesService;
