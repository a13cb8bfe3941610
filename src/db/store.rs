use chrono::{DateTime, Duration, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{info, warn};

use crate::db::models::DeviceRow;
use crate::error::{AppError, Result};
use crate::types::{RecordFilter, StoredDeviceRecord};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SELECT_RECORDS: &str =
    "SELECT id, source, brand, model, condition, price, date_scraped FROM device_data";

/// Handle to the `device_data` store. Cheap to clone; constructed once in `main`
/// and passed to whatever needs it.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Opens (creating if needed) the SQLite file at `db_path` and applies migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let storage = Self::from_pool(pool).await?;
        info!("Database ready at {db_path}");
        Ok(storage)
    }

    /// Wraps an existing pool, applying migrations first.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every stored record, oldest first.
    pub async fn all_records(&self) -> Result<Vec<StoredDeviceRecord>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!("{SELECT_RECORDS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StoredDeviceRecord::from).collect())
    }

    /// Records matching `filter`, oldest first. Brand and condition compare
    /// case-insensitively; `since` is inclusive and `until` exclusive.
    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<StoredDeviceRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_RECORDS);
        qb.push(" WHERE 1 = 1");

        if let Some(brand) = &filter.brand {
            qb.push(" AND brand = ").push_bind(brand.clone()).push(" COLLATE NOCASE");
        }
        if let Some(condition) = &filter.condition {
            qb.push(" AND condition = ").push_bind(condition.clone()).push(" COLLATE NOCASE");
        }
        if !filter.sources.is_empty() {
            qb.push(" AND source IN (");
            let mut list = qb.separated(", ");
            for source in &filter.sources {
                list.push_bind(source.clone());
            }
            list.push_unseparated(")");
        }
        if let Some(since) = filter.since {
            qb.push(" AND date_scraped >= ").push_bind(since.timestamp_millis());
        }
        if let Some(until) = filter.until {
            qb.push(" AND date_scraped < ").push_bind(until.timestamp_millis());
        }
        qb.push(" ORDER BY id");

        let rows: Vec<DeviceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(StoredDeviceRecord::from).collect())
    }

    /// Records scraped within the last `days` days.
    pub async fn latest_records(&self, days: i64) -> Result<Vec<StoredDeviceRecord>> {
        self.latest_records_at(days, Utc::now()).await
    }

    pub async fn latest_records_at(&self, days: i64, now: DateTime<Utc>) -> Result<Vec<StoredDeviceRecord>> {
        let since = days_before(now, days)
            .ok_or_else(|| AppError::InvalidQuery(format!("days out of range: {days}")))?;
        let filter = RecordFilter { since: Some(since), ..Default::default() };
        self.query(&filter).await
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Drops every record and recreates the schema from the migrations.
    pub async fn reset(&self) -> Result<()> {
        warn!("[STORE] resetting device_data");
        sqlx::query("DROP TABLE IF EXISTS device_data").execute(&self.pool).await?;
        sqlx::query("DROP TABLE IF EXISTS _sqlx_migrations").execute(&self.pool).await?;
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

/// `now` minus `days` whole days; `None` for negative counts or dates chrono cannot represent.
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days < 0 {
        return None;
    }
    now.checked_sub_signed(Duration::try_days(days)?)
}

#[cfg(test)]
pub(crate) async fn memory_storage() -> Storage {
    // A single connection that never expires, so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    Storage::from_pool(pool).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IngestWriter;
    use crate::types::{Condition, DeviceListing};

    fn listing(source: &str, brand: &str, model: &str, condition: Condition, price: f64) -> DeviceListing {
        DeviceListing {
            source: source.to_string(),
            brand: brand.to_string(),
            model: model.to_string(),
            condition,
            price,
        }
    }

    async fn seeded() -> (Storage, DateTime<Utc>) {
        let storage = memory_storage().await;
        let writer = IngestWriter::new(storage.clone());
        let now = Utc::now();
        writer
            .ingest_at(&[listing("Cashify", "Samsung", "Galaxy S21", Condition::Good, 24999.0)], now - Duration::days(10))
            .await;
        writer
            .ingest_at(
                &[
                    listing("Maple", "Apple", "iPhone 13", Condition::Excellent, 41999.0),
                    listing("Quikr", "Apple", "iPhone 11", Condition::Other("Used".into()), 21000.0),
                    listing("Flipkart", "Samsung", "Galaxy M31", Condition::Refurbished, 11499.0),
                ],
                now - Duration::hours(2),
            )
            .await;
        (storage, now)
    }

    #[tokio::test]
    async fn all_records_in_insert_order_with_timestamps() {
        let (storage, now) = seeded().await;
        let records = storage.all_records().await.unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(records[0].model, "Galaxy S21");
        assert_eq!(records[0].condition, Condition::Good);
        assert_eq!(
            records[0].date_scraped.timestamp_millis(),
            (now - Duration::days(10)).timestamp_millis()
        );
        assert_eq!(records[2].condition, Condition::Other("Used".into()));
    }

    #[tokio::test]
    async fn query_filters_combine() {
        let (storage, now) = seeded().await;

        let apple = storage
            .query(&RecordFilter { brand: Some("apple".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(apple.len(), 2);

        let samsung_recent = storage
            .query(&RecordFilter {
                brand: Some("Samsung".into()),
                since: Some(now - Duration::days(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(samsung_recent.len(), 1);
        assert_eq!(samsung_recent[0].source, "Flipkart");

        let by_source = storage
            .query(&RecordFilter {
                sources: vec!["Maple".into(), "Cashify".into()],
                condition: Some("excellent".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_source[0].model, "iPhone 13");

        let old = storage
            .query(&RecordFilter { until: Some(now - Duration::days(1)), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(old.len(), 1);
    }

    #[tokio::test]
    async fn latest_records_window() {
        let (storage, now) = seeded().await;
        assert_eq!(storage.latest_records_at(7, now).await.unwrap().len(), 3);
        assert_eq!(storage.latest_records_at(30, now).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn latest_records_rejects_unrepresentable_windows() {
        let (storage, now) = seeded().await;
        for days in [-1, 100_000_000, i64::MAX] {
            let err = storage.latest_records_at(days, now).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidQuery(_)), "{days}: {err:?}");
        }
    }

    #[test]
    fn days_before_bounds() {
        let now = Utc::now();
        assert_eq!(days_before(now, 0), Some(now));
        assert_eq!(days_before(now, 2), Some(now - Duration::days(2)));
        assert_eq!(days_before(now, 100_000_000), None);
        assert_eq!(days_before(now, 100_000_000_000_000), None);
        assert_eq!(days_before(now, -3), None);
    }

    #[tokio::test]
    async fn reset_empties_and_keeps_schema_usable() {
        let (storage, _) = seeded().await;
        storage.reset().await.unwrap();
        assert_eq!(storage.count().await.unwrap(), 0);

        let writer = IngestWriter::new(storage.clone());
        let inserted = writer
            .ingest(&[listing("Maple", "Apple", "iPhone 13", Condition::Excellent, 41999.0)])
            .await;
        assert_eq!(inserted, 1);
        let records = storage.all_records().await.unwrap();
        assert_eq!(records[0].id, 1);
    }
}
