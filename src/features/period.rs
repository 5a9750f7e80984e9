use chrono::{DateTime, Datelike, Utc};

use super::repository::FeaturesRepository;
use crate::error::AppResult;

/// Truncate a timestamp to the `YYYY-MM` period date. Stat submission always
/// targets the current period, never a caller-supplied one.
pub fn period_date_for(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

pub fn current_period_date() -> String {
    period_date_for(Utc::now())
}

/// Get-or-create the billing period for a date. The storage layer treats the
/// unique period-date constraint as authoritative, so two concurrent callers
/// both land on the same id.
pub async fn resolve_or_create(repo: &dyn FeaturesRepository, date: &str) -> AppResult<i64> {
    repo.ensure_billing_period(date).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::memory::InMemoryFeaturesRepository;
    use chrono::TimeZone;

    #[test]
    fn period_date_truncates_to_calendar_month() {
        let now = Utc.with_ymd_and_hms(2018, 3, 7, 23, 59, 59).unwrap();
        assert_eq!(period_date_for(now), "2018-03");
        let early = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(period_date_for(early), "2026-11");
    }

    #[tokio::test]
    async fn resolve_or_create_is_idempotent() {
        let repo = InMemoryFeaturesRepository::default();
        let first = resolve_or_create(&repo, "2026-08").await.unwrap();
        let second = resolve_or_create(&repo, "2026-08").await.unwrap();
        assert_eq!(first, second);
        let other = resolve_or_create(&repo, "2026-09").await.unwrap();
        assert_ne!(first, other);
        assert_eq!(
            repo.billing_period_by_date("2026-08").await.unwrap(),
            Some(first)
        );
        assert_eq!(repo.billing_period_by_date("1999-01").await.unwrap(), None);
    }
}
