//! Read-only access to the measurement and station tables.

mod postgres;
mod supabase;

pub use postgres::PgStore;
pub use supabase::SupabaseStore;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Measurement, StationReading, TimePoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated filter for `/measurements`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementFilter {
    pub station_id: Option<String>,
    pub country: Option<String>,
    pub pollutant: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub latest_per_station: bool,
    pub order: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesQuery {
    pub station_id: String,
    pub pollutant: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationFilter {
    pub country: Option<String>,
    pub pollutant: Option<String>,
}

#[async_trait]
pub trait AirQualityStore: Send + Sync {
    /// Cheap round trip used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn measurements(&self, filter: &MeasurementFilter)
        -> Result<Vec<Measurement>, StoreError>;

    /// Readings for one station/pollutant since a point in time, oldest first.
    async fn timeseries(&self, query: &TimeseriesQuery) -> Result<Vec<TimePoint>, StoreError>;

    /// The latest reading per (station, pollutant) for every located station
    /// that has at least one reading, ordered by station id then pollutant.
    async fn latest_readings(
        &self,
        filter: &StationFilter,
    ) -> Result<Vec<StationReading>, StoreError>;

    async fn close(&self) {}
}

/// Keeps the first measurement seen for every (station, pollutant) pair.
/// Pages must be fed newest first.
#[derive(Debug, Default)]
pub(crate) struct LatestPerPair {
    seen: HashSet<(String, String)>,
    rows: Vec<Measurement>,
}

impl LatestPerPair {
    pub(crate) fn extend(&mut self, page: Vec<Measurement>) {
        for m in page {
            if self.seen.insert((m.station_id.clone(), m.pollutant.clone())) {
                self.rows.push(m);
            }
        }
    }

    pub(crate) fn into_rows(self) -> Vec<Measurement> {
        self.rows
    }
}

/// Order measurements by timestamp, breaking ties by station and pollutant.
pub(crate) fn sort_measurements(rows: &mut [Measurement], order: SortOrder) {
    rows.sort_by(|a, b| {
        let by_time = a.timestamp.cmp(&b.timestamp);
        let by_time = match order {
            SortOrder::Asc => by_time,
            SortOrder::Desc => by_time.reverse(),
        };
        by_time
            .then_with(|| a.station_id.cmp(&b.station_id))
            .then_with(|| a.pollutant.cmp(&b.pollutant))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn measurement(station: &str, pollutant: &str, hour: u32) -> Measurement {
        Measurement {
            station_id: station.into(),
            pollutant: pollutant.into(),
            value: Some(hour as f64),
            unit: Some("µg/m³".into()),
            city: None,
            location_name: None,
            lat: None,
            lon: None,
            country: Some("NL".into()),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            source: None,
        }
    }

    #[test]
    fn latest_per_pair_keeps_first_row_across_pages() {
        let mut latest = LatestPerPair::default();
        latest.extend(vec![measurement("S1", "pm25", 5), measurement("S1", "no2", 4)]);
        latest.extend(vec![measurement("S1", "pm25", 3), measurement("S2", "pm25", 2)]);
        let latest = latest.into_rows();

        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].value, Some(5.0));
        assert!(latest.iter().all(|m| m.value != Some(3.0)));
    }

    #[test]
    fn sort_measurements_breaks_ties_deterministically() {
        let mut rows = vec![
            measurement("S2", "pm25", 1),
            measurement("S1", "pm25", 2),
            measurement("S1", "no2", 1),
        ];
        sort_measurements(&mut rows, SortOrder::Asc);
        let keys: Vec<_> = rows
            .iter()
            .map(|m| (m.station_id.as_str(), m.pollutant.as_str()))
            .collect();
        assert_eq!(keys, vec![("S1", "no2"), ("S2", "pm25"), ("S1", "pm25")]);

        sort_measurements(&mut rows, SortOrder::Desc);
        assert_eq!(rows[0].station_id, "S1");
        assert_eq!(rows[0].pollutant, "pm25");
    }
}
