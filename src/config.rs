use once_cell::sync::Lazy;

/// Locale used to resolve report literals and category translations.
pub static DEFAULT_LANGUAGE: Lazy<String> =
    Lazy::new(|| std::env::var("DEFAULT_LANGUAGE").unwrap_or_else(|_| "en".to_string()));

/// Directory where generated report artifacts are staged before upload.
pub static REPORTS_CACHE_DIR: Lazy<String> = Lazy::new(|| {
    std::env::var("REPORTS_CACHE_DIR").unwrap_or_else(|_| "storage/billing-reports".to_string())
});

/// Remote path prefix under which persisted reports are filed.
pub static REPORTS_REMOTE_PREFIX: Lazy<String> = Lazy::new(|| {
    std::env::var("REPORTS_REMOTE_PREFIX").unwrap_or_else(|_| "billingReports".to_string())
});
