use crate::error::Error;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Date format accepted by the detection listing filters
pub const FILTER_DATE_FORMAT: &str = "%d/%m/%y";

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// A persisted detection, joined with the public camera identifier
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Detection {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub camera_ref: Uuid,
    pub camera_id: String,
    pub detected_at: DateTime<Utc>,
    pub class_id: i32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox_x: f32,
    pub bbox_y: f32,
    pub bbox_width: f32,
    pub bbox_height: f32,
    pub created_at: DateTime<Utc>,
}

/// Raw query parameters of the detection listing endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionQuery {
    pub date: Option<String>,
    pub limit: Option<i64>,
}

/// Validated filter passed to the repository
#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    pub camera_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl DetectionFilter {
    pub fn from_query(camera_id: Option<String>, query: &DetectionQuery) -> Result<Self, Error> {
        let date = match query.date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(parse_filter_date(raw)?),
            _ => None,
        };
        if let Some(limit) = query.limit {
            if limit <= 0 {
                return Err(Error::Validation("limit must be positive".to_string()));
            }
        }
        Ok(Self {
            camera_id,
            date,
            limit: query.limit,
        })
    }

    /// Row limit clamped to the allowed range
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

pub fn parse_filter_date(raw: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(raw, FILTER_DATE_FORMAT)
        .map_err(|_| Error::Validation("Invalid date format. Use DD/MM/YY".to_string()))
}

/// UTC bounds `[start, end)` of a calendar day in the server's local time zone
pub fn local_day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), Error> {
    let next = date
        .succ_opt()
        .ok_or_else(|| Error::Validation(format!("Date out of range: {}", date)))?;
    Ok((local_midnight(date)?, local_midnight(next)?))
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Utc>, Error> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Internal(format!("No midnight for {}", date)))?;
    // Midnight can be skipped by a DST change; fall back to reading it as UTC
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive));
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_month_short_year() {
        let date = parse_filter_date("07/03/24").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
    }

    #[test]
    fn rejects_iso_dates_with_the_expected_message() {
        match parse_filter_date("2024-03-07") {
            Err(Error::Validation(msg)) => assert_eq!(msg, "Invalid date format. Use DD/MM/YY"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn day_bounds_span_one_local_day() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let (start, end) = local_day_bounds(date).unwrap();
        assert!(start < end);
        assert_eq!(start.with_timezone(&Local).date_naive(), date);
        assert!(end - start <= chrono::Duration::hours(25));
    }

    #[test]
    fn blank_date_means_no_filter() {
        let query = DetectionQuery {
            date: Some("  ".to_string()),
            limit: None,
        };
        let filter = DetectionFilter::from_query(None, &query).unwrap();
        assert!(filter.date.is_none());
        assert_eq!(filter.effective_limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn non_positive_limit_is_rejected() {
        let query = DetectionQuery {
            date: None,
            limit: Some(0),
        };
        assert!(matches!(
            DetectionFilter::from_query(Some("cam".to_string()), &query),
            Err(Error::Validation(_))
        ));
    }
}
