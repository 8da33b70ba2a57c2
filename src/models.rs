use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single reading as stored in the `measurements` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurement {
    pub station_id: String,
    pub pollutant: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub city: Option<String>,
    pub location_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country: Option<String>,
    #[serde(alias = "ts")]
    #[sqlx(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

/// Time-series projection of a [`Measurement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimePoint {
    pub station_id: String,
    pub pollutant: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub location_name: Option<String>,
    #[serde(alias = "ts")]
    #[sqlx(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

impl From<Measurement> for TimePoint {
    fn from(m: Measurement) -> Self {
        Self {
            station_id: m.station_id,
            pollutant: m.pollutant,
            value: m.value,
            unit: m.unit,
            country: m.country,
            city: m.city,
            location_name: m.location_name,
            timestamp: m.timestamp,
            source: m.source,
        }
    }
}

/// Row of the `stations` table. Position columns may be null upstream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub source: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub location_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// A located station joined with its most recent reading for one pollutant.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StationReading {
    pub station_id: String,
    pub source: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub location_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub pollutant: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub ts: DateTime<Utc>,
}

/// `/stations` entry: a station with plain coordinates and its latest value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSummary {
    pub id: String,
    pub source: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub location_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub pollutant: String,
    pub latest_value: Option<f64>,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `/stations_wkt` entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationWkt {
    pub id: String,
    pub geom: String,
    pub source: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub location_name: Option<String>,
    pub latest_value: Option<f64>,
    pub measurements: Vec<LatestReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    pub pollutant: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&StationReading> for LatestReading {
    fn from(r: &StationReading) -> Self {
        Self {
            pollutant: r.pollutant.clone(),
            value: r.value,
            unit: r.unit.clone(),
            timestamp: r.ts,
        }
    }
}
