use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};

use super::{AirQualityStore, MeasurementFilter, StationFilter, TimeseriesQuery};
use crate::configuration::DatabaseSettings;
use crate::error::StoreError;
use crate::models::{Measurement, StationReading, TimePoint};

const MEASUREMENT_COLUMNS: &str = "station_id, pollutant, value::float8 AS value, unit, city, \
     location_name, lat::float8 AS lat, lon::float8 AS lon, country, ts::timestamptz AS ts, source";

const TIMEPOINT_COLUMNS: &str = "station_id, pollutant, value::float8 AS value, unit, country, \
     city, location_name, ts::timestamptz AS ts, source";

/// Store backed by a bounded `sqlx` connection pool.
pub struct PgStore {
    pool: PgPool,
    retry_backoff: Duration,
}

impl PgStore {
    /// Create the pool without opening a connection, so the service starts
    /// even while the database is down.
    pub fn connect_lazy(settings: &DatabaseSettings) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect_lazy_with(settings.connect_options());
        info!(
            "Configured Postgres pool for {}:{}/{} (max {} connections)",
            settings.host, settings.port, settings.database_name, settings.max_connections
        );
        Self {
            pool,
            retry_backoff: settings.acquire_retry_backoff(),
        }
    }

    /// Acquire a pooled connection, retrying once after a backoff when the
    /// first attempt fails for a connectivity reason.
    async fn acquire(&self) -> Result<PoolConnection<Postgres>, StoreError> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                let e = StoreError::from(e);
                if !e.is_unavailable() || self.pool.is_closed() {
                    return Err(e);
                }
                warn!(
                    "Failed to acquire a connection ({}), retrying in {:?}",
                    e, self.retry_backoff
                );
                tokio::time::sleep(self.retry_backoff).await;
                Ok(self.pool.acquire().await?)
            }
        }
    }
}

#[async_trait]
impl AirQualityStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    async fn measurements(
        &self,
        filter: &MeasurementFilter,
    ) -> Result<Vec<Measurement>, StoreError> {
        let mut conn = self.acquire().await?;
        let mut query = measurements_query(filter);
        let rows = query
            .build_query_as::<Measurement>()
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    async fn timeseries(&self, query: &TimeseriesQuery) -> Result<Vec<TimePoint>, StoreError> {
        let mut conn = self.acquire().await?;
        let mut builder = timeseries_query(query);
        let rows = builder
            .build_query_as::<TimePoint>()
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    async fn latest_readings(
        &self,
        filter: &StationFilter,
    ) -> Result<Vec<StationReading>, StoreError> {
        let mut conn = self.acquire().await?;
        let mut query = latest_readings_query(filter);
        let rows = query
            .build_query_as::<StationReading>()
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    async fn close(&self) {
        info!("Closing Postgres pool");
        self.pool.close().await;
    }
}

fn push_measurement_filters(query: &mut QueryBuilder<'static, Postgres>, filter: &MeasurementFilter) {
    let mut separator = " WHERE ";
    let mut push_condition = |query: &mut QueryBuilder<'static, Postgres>, condition: &str| {
        query.push(separator).push(condition);
        separator = " AND ";
    };

    if let Some(station_id) = &filter.station_id {
        push_condition(&mut *query, "station_id = ");
        query.push_bind(station_id.clone());
    }
    if let Some(country) = &filter.country {
        push_condition(&mut *query, "country = ");
        query.push_bind(country.clone());
    }
    if let Some(pollutant) = &filter.pollutant {
        push_condition(&mut *query, "pollutant = ");
        query.push_bind(pollutant.clone());
    }
    if let Some(since) = filter.since {
        push_condition(&mut *query, "ts >= ");
        query.push_bind(since);
    }
    if let Some(until) = filter.until {
        push_condition(&mut *query, "ts <= ");
        query.push_bind(until);
    }
}

fn measurements_query(filter: &MeasurementFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT ");
    if filter.latest_per_station {
        query.push("* FROM (SELECT DISTINCT ON (station_id, pollutant) ");
        query.push(MEASUREMENT_COLUMNS).push(" FROM measurements");
        push_measurement_filters(&mut query, filter);
        query.push(" ORDER BY station_id, pollutant, ts DESC) AS latest");
    } else {
        query.push(MEASUREMENT_COLUMNS).push(" FROM measurements");
        push_measurement_filters(&mut query, filter);
    }
    query
        .push(" ORDER BY ts ")
        .push(filter.order.as_sql())
        .push(", station_id, pollutant LIMIT ")
        .push_bind(i64::from(filter.limit))
        .push(" OFFSET ")
        .push_bind(i64::from(filter.offset));
    query
}

fn timeseries_query(ts: &TimeseriesQuery) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT ");
    query
        .push(TIMEPOINT_COLUMNS)
        .push(" FROM measurements WHERE station_id = ")
        .push_bind(ts.station_id.clone())
        .push(" AND pollutant = ")
        .push_bind(ts.pollutant.clone())
        .push(" AND ts >= ")
        .push_bind(ts.since)
        .push(" ORDER BY ts");
    query
}

fn latest_readings_query(filter: &StationFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(
        "SELECT s.station_id, s.source, s.country, s.city, s.location_name, \
         s.lat::float8 AS lat, s.lon::float8 AS lon, lm.pollutant, lm.value, lm.unit, lm.ts \
         FROM stations s JOIN (SELECT DISTINCT ON (station_id, pollutant) \
         station_id, pollutant, value::float8 AS value, unit, ts::timestamptz AS ts FROM measurements",
    );
    if let Some(pollutant) = &filter.pollutant {
        query.push(" WHERE pollutant = ").push_bind(pollutant.clone());
    }
    query.push(
        " ORDER BY station_id, pollutant, ts DESC) lm ON lm.station_id = s.station_id \
         WHERE s.lat IS NOT NULL AND s.lon IS NOT NULL",
    );
    if let Some(country) = &filter.country {
        query.push(" AND s.country = ").push_bind(country.clone());
    }
    query.push(" ORDER BY s.station_id, lm.pollutant");
    query
}

/// SQLSTATE codes that mean the server is unreachable, shutting down or
/// rejecting our credentials.
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("28")
        || matches!(code, "53300" | "57P01" | "57P02" | "57P03")
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_) => StoreError::Unavailable(e.to_string()),
            sqlx::Error::Database(db)
                if db.code().map_or(false, |code| is_connection_sqlstate(&code)) =>
            {
                StoreError::Unavailable(e.to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. } => StoreError::Decode(e.to_string()),
            _ => StoreError::Query(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SortOrder;
    use chrono::{TimeZone, Utc};

    fn filter() -> MeasurementFilter {
        MeasurementFilter {
            station_id: None,
            country: None,
            pollutant: None,
            since: None,
            until: None,
            latest_per_station: false,
            order: SortOrder::Asc,
            limit: 100,
            offset: 0,
        }
    }

    #[test]
    fn unfiltered_measurements_query_only_binds_paging() {
        let query = measurements_query(&filter());
        let sql = query.sql();

        assert!(sql.starts_with("SELECT station_id, pollutant"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY ts ASC, station_id, pollutant LIMIT $1 OFFSET $2"));
    }

    #[test]
    fn measurement_filters_are_bound_in_order() {
        let mut f = filter();
        f.station_id = Some("NL01491".into());
        f.pollutant = Some("pm25".into());
        f.since = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        f.order = SortOrder::Desc;
        let query = measurements_query(&f);

        assert!(query
            .sql()
            .contains("WHERE station_id = $1 AND pollutant = $2 AND ts >= $3 ORDER BY ts DESC"));
        assert!(query.sql().ends_with("LIMIT $4 OFFSET $5"));
    }

    #[test]
    fn latest_per_station_wraps_distinct_on() {
        let mut f = filter();
        f.latest_per_station = true;
        f.country = Some("NL".into());
        let query = measurements_query(&f);
        let sql = query.sql();

        assert!(sql.starts_with("SELECT * FROM (SELECT DISTINCT ON (station_id, pollutant)"));
        assert!(sql.contains("WHERE country = $1 ORDER BY station_id, pollutant, ts DESC) AS latest"));
        assert!(sql.ends_with("LIMIT $2 OFFSET $3"));
    }

    #[test]
    fn timeseries_query_filters_station_pollutant_and_window() {
        let query = timeseries_query(&TimeseriesQuery {
            station_id: "S1".into(),
            pollutant: "no2".into(),
            since: Utc::now(),
        });

        assert!(query
            .sql()
            .ends_with("WHERE station_id = $1 AND pollutant = $2 AND ts >= $3 ORDER BY ts"));
    }

    #[test]
    fn latest_readings_query_places_filters_on_the_right_tables() {
        let query = latest_readings_query(&StationFilter {
            country: Some("CZ".into()),
            pollutant: Some("o3".into()),
        });
        let sql = query.sql();

        assert!(sql.contains("FROM measurements WHERE pollutant = $1 ORDER BY station_id"));
        assert!(sql.contains("s.lon IS NOT NULL AND s.country = $2"));
        assert!(sql.ends_with("ORDER BY s.station_id, lm.pollutant"));

        let unfiltered = latest_readings_query(&StationFilter::default());
        assert!(!unfiltered.sql().contains('$'));
    }

    #[test]
    fn connection_failures_are_classified_as_unavailable() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(StoreError::from(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused"
        )))
        .is_unavailable());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_unavailable());
        assert!(matches!(
            StoreError::from(sqlx::Error::ColumnNotFound("ts".into())),
            StoreError::Decode(_)
        ));
    }

    #[test]
    fn connection_sqlstates() {
        assert!(is_connection_sqlstate("08006"));
        assert!(is_connection_sqlstate("28P01"));
        assert!(is_connection_sqlstate("57P01"));
        assert!(!is_connection_sqlstate("42P01"));
    }
}
