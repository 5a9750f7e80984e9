pub mod config;
pub mod error;
pub mod features;

pub use error::{AppError, AppResult, Finding};

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise logging and local environment. Safe to call more than once;
/// later calls keep the first subscriber.
pub fn init() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();
    dotenvy::dotenv().ok();
}
