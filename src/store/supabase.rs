use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use postgrest::{Builder, Postgrest};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;

use super::{
    sort_measurements, AirQualityStore, LatestPerPair, MeasurementFilter, SortOrder,
    StationFilter, TimeseriesQuery,
};
use crate::configuration::SupabaseSettings;
use crate::error::StoreError;
use crate::models::{Measurement, Station, StationReading, TimePoint};

const MEASUREMENT_SELECT: &str =
    "station_id,pollutant,value,unit,city,location_name,lat,lon,country,ts,source";
const TIMEPOINT_SELECT: &str =
    "station_id,pollutant,value,unit,country,city,location_name,ts,source";
const STATION_SELECT: &str = "station_id,source,country,city,location_name,lat,lon";

/// Rows requested per page. Matches the default `max-rows` of hosted Supabase;
/// a smaller server cap only costs extra round trips.
const PAGE_SIZE: usize = 1000;

/// Newest first, with a stable order inside equal timestamps so pages never
/// overlap or skip rows.
const NEWEST_FIRST: &str = "ts.desc,station_id.asc,pollutant.asc";

/// Store that goes through the Supabase PostgREST endpoint.
pub struct SupabaseStore {
    client: Postgrest,
}

impl SupabaseStore {
    pub fn new(settings: &SupabaseSettings) -> Self {
        let key = settings.key.expose_secret();
        let client = Postgrest::new(settings.rest_url())
            .insert_header("apikey", key)
            .insert_header("Authorization", format!("Bearer {}", key));
        info!("Configured Supabase REST client for {}", settings.uri);
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: Builder) -> Result<Vec<T>, StoreError> {
        let response = request
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Paging past the last row.
        if status.as_u16() == 416 {
            return Ok(Vec::new());
        }
        if status.is_server_error() || matches!(status.as_u16(), 401 | 403) {
            return Err(StoreError::Unavailable(format!(
                "PostgREST returned {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(StoreError::Query(format!(
                "PostgREST returned {}: {}",
                status, body
            )));
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Fetch every row of a listing, one `Range` page at a time. Offsets
    /// advance by the rows actually returned and the walk ends on an empty
    /// page.
    async fn fetch_all<T, F>(&self, request: F) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned + Send,
        F: Fn() -> Builder + Send + Sync,
    {
        let mut rows = Vec::new();
        loop {
            let offset = rows.len();
            let page: Vec<T> = self
                .fetch(request().range(offset, offset + PAGE_SIZE - 1))
                .await?;
            if page.is_empty() {
                return Ok(rows);
            }
            rows.extend(page);
        }
    }

    /// Latest measurement per (station, pollutant) from a newest-first walk
    /// over the whole filtered listing.
    async fn latest_per_pair<F>(&self, request: F) -> Result<Vec<Measurement>, StoreError>
    where
        F: Fn() -> Builder + Send + Sync,
    {
        let mut latest = LatestPerPair::default();
        let mut offset = 0;
        loop {
            let page: Vec<Measurement> = self
                .fetch(
                    request()
                        .order(NEWEST_FIRST)
                        .range(offset, offset + PAGE_SIZE - 1),
                )
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            latest.extend(page);
        }
        debug!("Scanned {} measurements for latest readings", offset);
        Ok(latest.into_rows())
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn filtered_measurements(mut request: Builder, filter: &MeasurementFilter) -> Builder {
    if let Some(station_id) = &filter.station_id {
        request = request.eq("station_id", station_id);
    }
    if let Some(country) = &filter.country {
        request = request.eq("country", country);
    }
    if let Some(pollutant) = &filter.pollutant {
        request = request.eq("pollutant", pollutant);
    }
    if let Some(since) = filter.since {
        request = request.gte("ts", timestamp(since));
    }
    if let Some(until) = filter.until {
        request = request.lte("ts", timestamp(until));
    }
    request
}

/// Join stations with their latest readings, keeping only located stations.
fn join_readings(stations: Vec<Station>, latest: Vec<Measurement>) -> Vec<StationReading> {
    let stations: HashMap<String, Station> = stations
        .into_iter()
        .map(|s| (s.station_id.clone(), s))
        .collect();

    let mut readings: Vec<StationReading> = latest
        .into_iter()
        .filter_map(|m| {
            let station = stations.get(&m.station_id)?;
            Some(StationReading {
                station_id: m.station_id,
                source: station.source.clone(),
                country: station.country.clone(),
                city: station.city.clone(),
                location_name: station.location_name.clone(),
                lat: station.lat?,
                lon: station.lon?,
                pollutant: m.pollutant,
                value: m.value,
                unit: m.unit,
                ts: m.timestamp,
            })
        })
        .collect();
    readings.sort_by(|a, b| {
        a.station_id
            .cmp(&b.station_id)
            .then_with(|| a.pollutant.cmp(&b.pollutant))
    });
    readings
}

#[async_trait]
impl AirQualityStore for SupabaseStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let request = self
            .client
            .from("measurements")
            .select("station_id")
            .limit(1);
        self.fetch::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn measurements(
        &self,
        filter: &MeasurementFilter,
    ) -> Result<Vec<Measurement>, StoreError> {
        if filter.latest_per_station {
            let mut latest = self
                .latest_per_pair(|| {
                    filtered_measurements(
                        self.client.from("measurements").select(MEASUREMENT_SELECT),
                        filter,
                    )
                })
                .await?;
            sort_measurements(&mut latest, filter.order);
            return Ok(latest
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .collect());
        }

        let direction = match filter.order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        let low = filter.offset as usize;
        let high = low + filter.limit as usize - 1;
        let request = filtered_measurements(
            self.client.from("measurements").select(MEASUREMENT_SELECT),
            filter,
        )
        .order(format!("ts.{},station_id.asc,pollutant.asc", direction))
        .range(low, high);
        self.fetch(request).await
    }

    async fn timeseries(&self, query: &TimeseriesQuery) -> Result<Vec<TimePoint>, StoreError> {
        let since = timestamp(query.since);
        self.fetch_all(|| {
            self.client
                .from("measurements")
                .select(TIMEPOINT_SELECT)
                .eq("station_id", &query.station_id)
                .eq("pollutant", &query.pollutant)
                .gte("ts", &since)
                .order("ts.asc")
        })
        .await
    }

    async fn latest_readings(
        &self,
        filter: &StationFilter,
    ) -> Result<Vec<StationReading>, StoreError> {
        let stations: Vec<Station> = self
            .fetch_all(|| {
                let request = self
                    .client
                    .from("stations")
                    .select(STATION_SELECT)
                    .not("is", "lat", "null")
                    .not("is", "lon", "null")
                    .order("station_id.asc");
                match &filter.country {
                    Some(country) => request.eq("country", country),
                    None => request,
                }
            })
            .await?;
        if stations.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = stations.iter().map(|s| s.station_id.clone()).collect();
        let latest = self
            .latest_per_pair(|| {
                let request = self
                    .client
                    .from("measurements")
                    .select(MEASUREMENT_SELECT)
                    .in_("station_id", &ids);
                match &filter.pollutant {
                    Some(pollutant) => request.eq("pollutant", pollutant),
                    None => request,
                }
            })
            .await?;

        Ok(join_readings(stations, latest))
    }
}
