use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::models::{Measurement, TimePoint};
use crate::store::{MeasurementFilter, SortOrder, TimeseriesQuery};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;
const DEFAULT_HOURS: i64 = 24;
const MAX_HOURS: i64 = 168;

#[derive(Debug, Default, Deserialize)]
pub struct MeasurementParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub station_id: Option<String>,
    pub country: Option<String>,
    pub pollutant: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_per_station: bool,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeseriesParams {
    pub station_id: Option<String>,
    pub pollutant: Option<String>,
    pub hours: Option<i64>,
}

/// Blank query values count as absent.
pub(super) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MeasurementParams {
    fn into_filter(self) -> Result<MeasurementFilter, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::InvalidRequest(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        let offset = u32::try_from(self.offset.unwrap_or(0)).map_err(|_| {
            ApiError::InvalidRequest("offset must be a non-negative integer".into())
        })?;
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(ApiError::InvalidRequest(
                    "since must not be later than until".into(),
                ));
            }
        }

        Ok(MeasurementFilter {
            station_id: non_empty(self.station_id),
            country: non_empty(self.country),
            pollutant: non_empty(self.pollutant),
            since: self.since,
            until: self.until,
            latest_per_station: self.latest_per_station,
            order: self.order,
            limit: limit as u32,
            offset,
        })
    }
}

impl TimeseriesParams {
    fn into_query(self, now: DateTime<Utc>) -> Result<TimeseriesQuery, ApiError> {
        let station_id = non_empty(self.station_id)
            .ok_or_else(|| ApiError::InvalidRequest("station_id is required".into()))?;
        let pollutant = non_empty(self.pollutant)
            .ok_or_else(|| ApiError::InvalidRequest("pollutant is required".into()))?;
        let hours = self.hours.unwrap_or(DEFAULT_HOURS);
        if !(1..=MAX_HOURS).contains(&hours) {
            return Err(ApiError::InvalidRequest(format!(
                "hours must be between 1 and {}",
                MAX_HOURS
            )));
        }

        Ok(TimeseriesQuery {
            station_id,
            pollutant,
            since: now - Duration::hours(hours),
        })
    }
}

pub async fn list_measurements(
    State(state): State<AppState>,
    params: Result<Query<MeasurementParams>, QueryRejection>,
) -> Result<Json<Vec<Measurement>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let filter = params.into_filter()?;
    let rows = state.store.measurements(&filter).await?;
    Ok(Json(rows))
}

/// Readings of one station/pollutant over the last `hours`, oldest first.
pub async fn measurements_timeseries(
    State(state): State<AppState>,
    params: Result<Query<TimeseriesParams>, QueryRejection>,
) -> Result<Json<Vec<TimePoint>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let query = params.into_query(Utc::now())?;
    let rows = state.store.timeseries(&query).await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_produce_first_page_ascending() {
        let filter = MeasurementParams::default().into_filter().unwrap();

        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.order, SortOrder::Asc);
        assert!(!filter.latest_per_station);
        assert!(filter.station_id.is_none());
    }

    #[test]
    fn limit_and_offset_bounds_are_enforced() {
        for limit in [0, 501, -3] {
            let params = MeasurementParams {
                limit: Some(limit),
                ..Default::default()
            };
            assert!(matches!(params.into_filter(), Err(ApiError::InvalidRequest(_))));
        }
        let params = MeasurementParams {
            limit: Some(500),
            offset: Some(40),
            ..Default::default()
        };
        let filter = params.into_filter().unwrap();
        assert_eq!((filter.limit, filter.offset), (500, 40));

        let params = MeasurementParams {
            offset: Some(-1),
            ..Default::default()
        };
        assert!(params.into_filter().is_err());
    }

    #[test]
    fn inverted_time_range_is_rejected() {
        let params = MeasurementParams {
            since: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(params.into_filter().is_err());
    }

    #[test]
    fn blank_filters_are_dropped() {
        let params = MeasurementParams {
            station_id: Some("  ".into()),
            pollutant: Some(" pm25 ".into()),
            ..Default::default()
        };
        let filter = params.into_filter().unwrap();
        assert!(filter.station_id.is_none());
        assert_eq!(filter.pollutant.as_deref(), Some("pm25"));
    }

    #[test]
    fn timeseries_window_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 8, 12, 0, 0).unwrap();
        let params = TimeseriesParams {
            station_id: Some("NL01491".into()),
            pollutant: Some("no2".into()),
            hours: None,
        };
        let query = params.into_query(now).unwrap();

        assert_eq!(query.since, Utc.with_ymd_and_hms(2024, 6, 7, 12, 0, 0).unwrap());
        assert_eq!(query.station_id, "NL01491");
    }

    #[test]
    fn timeseries_requires_station_and_pollutant_and_bounded_hours() {
        let now = Utc::now();
        let missing = TimeseriesParams {
            pollutant: Some("no2".into()),
            ..Default::default()
        };
        assert!(missing.into_query(now).is_err());

        let too_long = TimeseriesParams {
            station_id: Some("S1".into()),
            pollutant: Some("no2".into()),
            hours: Some(169),
        };
        assert!(too_long.into_query(now).is_err());
    }
}
