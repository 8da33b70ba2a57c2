use std::collections::BTreeMap;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::measurements::non_empty;
use super::AppState;
use crate::error::ApiError;
use crate::geometry::{self, Feature, FeatureCollection, GeoJsonGeometry};
use crate::models::{LatestReading, StationReading, StationSummary, StationWkt};
use crate::store::StationFilter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationFormat {
    #[default]
    Json,
    GeoJson,
}

#[derive(Debug, Default, Deserialize)]
pub struct StationParams {
    pub country: Option<String>,
    pub pollutant: Option<String>,
    #[serde(default)]
    pub format: StationFormat,
}

impl StationParams {
    fn filter(&self) -> StationFilter {
        StationFilter {
            country: non_empty(self.country.clone()),
            pollutant: non_empty(self.pollutant.clone()),
        }
    }
}

/// Group readings by station id, keeping station order stable.
fn by_station(readings: &[StationReading]) -> BTreeMap<&str, Vec<&StationReading>> {
    let mut groups: BTreeMap<&str, Vec<&StationReading>> = BTreeMap::new();
    for reading in readings {
        groups.entry(reading.station_id.as_str()).or_default().push(reading);
    }
    groups
}

/// Most recent reading of a group; the first one wins on equal timestamps.
fn newest<'a>(group: &[&'a StationReading]) -> Option<&'a StationReading> {
    group
        .iter()
        .copied()
        .reduce(|best, reading| if reading.ts > best.ts { reading } else { best })
}

pub fn summarize(readings: &[StationReading]) -> Vec<StationSummary> {
    by_station(readings)
        .into_values()
        .filter_map(|group| newest(&group))
        .map(|latest| StationSummary {
            id: latest.station_id.clone(),
            source: latest.source.clone(),
            country: latest.country.clone(),
            city: latest.city.clone(),
            location_name: latest.location_name.clone(),
            lat: latest.lat,
            lon: latest.lon,
            pollutant: latest.pollutant.clone(),
            latest_value: latest.value,
            unit: latest.unit.clone(),
            timestamp: latest.ts,
        })
        .collect()
}

pub fn with_wkt(readings: &[StationReading]) -> Vec<StationWkt> {
    by_station(readings)
        .into_values()
        .filter_map(|group| {
            let latest = newest(&group)?;
            Some(StationWkt {
                id: latest.station_id.clone(),
                geom: geometry::to_wkt(&geometry::point(latest.lat, latest.lon)),
                source: latest.source.clone(),
                country: latest.country.clone(),
                city: latest.city.clone(),
                location_name: latest.location_name.clone(),
                latest_value: latest.value,
                measurements: group.iter().map(|r| LatestReading::from(*r)).collect(),
            })
        })
        .collect()
}

fn to_feature_collection(stations: Vec<StationSummary>) -> FeatureCollection<StationSummary> {
    let features = stations
        .into_iter()
        .map(|station| Feature {
            geometry: GeoJsonGeometry::from(&geometry::point(station.lat, station.lon)),
            properties: station,
        })
        .collect();
    FeatureCollection { features }
}

/// Stations with their latest value, as plain JSON or a GeoJSON collection.
pub async fn list_stations(
    State(state): State<AppState>,
    params: Result<Query<StationParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let readings = state.store.latest_readings(&params.filter()).await?;
    let stations = summarize(&readings);

    Ok(match params.format {
        StationFormat::Json => Json(stations).into_response(),
        StationFormat::GeoJson => Json(to_feature_collection(stations)).into_response(),
    })
}

/// Stations with WKT geometry and the latest reading per pollutant.
pub async fn list_stations_wkt(
    State(state): State<AppState>,
    params: Result<Query<StationParams>, QueryRejection>,
) -> Result<Json<Vec<StationWkt>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let readings = state.store.latest_readings(&params.filter()).await?;
    Ok(Json(with_wkt(&readings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(station: &str, pollutant: &str, value: f64, hour: u32) -> StationReading {
        StationReading {
            station_id: station.into(),
            source: Some("eea".into()),
            country: Some("CZ".into()),
            city: None,
            location_name: Some("Praha 2".into()),
            lat: 50.0,
            lon: 14.0,
            pollutant: pollutant.into(),
            value: Some(value),
            unit: Some("µg/m³".into()),
            ts: Utc.with_ymd_and_hms(2024, 4, 2, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn summary_uses_most_recent_pollutant() {
        let readings = vec![
            reading("S1", "no2", 30.0, 9),
            reading("S1", "pm25", 12.5, 10),
            reading("S2", "o3", 60.0, 8),
        ];
        let stations = summarize(&readings);

        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].id, "S1");
        assert_eq!(stations[0].pollutant, "pm25");
        assert_eq!(stations[0].latest_value, Some(12.5));
        assert_eq!((stations[0].lat, stations[0].lon), (50.0, 14.0));
    }

    #[test]
    fn wkt_view_lists_every_pollutant() {
        let readings = vec![reading("S1", "no2", 30.0, 9), reading("S1", "pm25", 12.5, 10)];
        let stations = with_wkt(&readings);

        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].geom, "POINT(14.0 50.0)");
        assert_eq!(stations[0].latest_value, Some(12.5));
        let pollutants: Vec<_> = stations[0]
            .measurements
            .iter()
            .map(|m| m.pollutant.as_str())
            .collect();
        assert_eq!(pollutants, vec!["no2", "pm25"]);
    }

    #[test]
    fn both_views_cover_the_same_stations() {
        let readings = vec![
            reading("B", "no2", 1.0, 1),
            reading("A", "pm25", 2.0, 2),
            reading("C", "o3", 3.0, 3),
            reading("A", "no2", 4.0, 4),
        ];
        let plain: Vec<_> = summarize(&readings).into_iter().map(|s| s.id).collect();
        let wkt: Vec<_> = with_wkt(&readings).into_iter().map(|s| s.id).collect();

        assert_eq!(plain, vec!["A", "B", "C"]);
        assert_eq!(plain, wkt);
    }

    #[test]
    fn equal_timestamps_keep_first_reading() {
        let readings = vec![reading("S1", "no2", 1.0, 5), reading("S1", "pm25", 2.0, 5)];
        assert_eq!(summarize(&readings)[0].pollutant, "no2");
    }

    #[test]
    fn empty_readings_produce_empty_views() {
        assert!(summarize(&[]).is_empty());
        assert!(with_wkt(&[]).is_empty());
        assert!(to_feature_collection(Vec::new()).features.is_empty());
    }
}
