use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use diesel::sql_types::{BigInt, Date, Nullable, Text, Uuid as SqlUuid};
use diesel::QueryableByName;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{AppError, AppResult};

/// Days covered when the caller gives no range.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Half-open `[from, to)` interval, both ends at UTC midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRangeQuery {
    pub fn resolve(&self, today: NaiveDate) -> AppResult<DateRange> {
        let end = self.end.unwrap_or(today);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_RANGE_DAYS - 1));
        if start > end {
            return Err(AppError::bad_request("ERR_INVALID_DATE_RANGE"));
        }
        let midnight = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN));
        Ok(DateRange {
            from: midnight(start),
            to: midnight(end + Duration::days(1)),
        })
    }
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StatusCount {
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QueueCount {
    #[diesel(sql_type = Nullable<SqlUuid>)]
    pub queue_id: Option<Uuid>,
    #[diesel(sql_type = Nullable<Text>)]
    pub queue_name: Option<String>,
    #[diesel(sql_type = BigInt)]
    pub pending: i64,
    #[diesel(sql_type = BigInt)]
    pub open: i64,
    #[diesel(sql_type = BigInt)]
    pub closed: i64,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserCount {
    #[diesel(sql_type = SqlUuid)]
    pub user_id: Uuid,
    #[diesel(sql_type = Text)]
    pub user_name: String,
    #[diesel(sql_type = BigInt)]
    pub open: i64,
    #[diesel(sql_type = BigInt)]
    pub closed: i64,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DayCount {
    #[diesel(sql_type = Date)]
    pub day: NaiveDate,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_range_includes_whole_end_day() {
        let q = DateRangeQuery {
            start: Some(date(2024, 3, 1)),
            end: Some(date(2024, 3, 1)),
        };
        let range = q.resolve(date(2024, 5, 1)).unwrap();
        assert_eq!(range.to - range.from, Duration::days(1));
    }

    #[test]
    fn test_default_range_ends_today() {
        let today = date(2024, 3, 31);
        let range = DateRangeQuery::default().resolve(today).unwrap();
        assert_eq!(range.from.date_naive(), date(2024, 3, 2));
        assert_eq!(range.to.date_naive(), date(2024, 4, 1));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let q = DateRangeQuery {
            start: Some(date(2024, 3, 2)),
            end: Some(date(2024, 3, 1)),
        };
        assert_eq!(
            q.resolve(date(2024, 3, 5)).unwrap_err().to_string(),
            "ERR_INVALID_DATE_RANGE"
        );
    }
}
