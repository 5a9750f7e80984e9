use serde::Serialize;
use thiserror::Error;

/// One validation failure. Validators collect these instead of failing fast;
/// the action entry point raises the whole bag at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub code: &'static str,
    pub title: &'static str,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("validation failed with {} finding(s)", .0.len())]
    Validation(Vec<Finding>),
    /// Recoverable per-request failure, carrying the stable status code the
    /// caller reports back. Never leaks internal state.
    #[error("{text}: {description}")]
    Action {
        code: &'static str,
        text: &'static str,
        description: String,
    },
    /// Required literal/translation coverage is below the fixed set. This is
    /// a deployment problem, not a request problem, and aborts loudly.
    #[error("report configuration fault: {0}")]
    MissingLiterals(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn action(code: &'static str, text: &'static str, description: impl Into<String>) -> Self {
        AppError::Action {
            code,
            text,
            description: description.into(),
        }
    }

    /// Status code carried by `Action` errors, if any.
    pub fn status_code(&self) -> Option<&'static str> {
        match self {
            AppError::Action { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn findings(&self) -> Option<&[Finding]> {
        match self {
            AppError::Validation(findings) => Some(findings),
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
