/// Database row types matching `migrations/0001_device_data.sql`.
/// Used by sqlx for typed queries.
use chrono::{DateTime, Utc};

use crate::types::{Condition, StoredDeviceRecord};

#[derive(Debug, sqlx::FromRow)]
pub struct DeviceRow {
    pub id: i64,
    pub source: String,
    pub brand: String,
    pub model: String,
    pub condition: String,
    pub price: f64,
    /// Unix milliseconds, UTC.
    pub date_scraped: i64,
}

impl From<DeviceRow> for StoredDeviceRecord {
    fn from(row: DeviceRow) -> Self {
        Self {
            id: row.id,
            source: row.source,
            brand: row.brand,
            model: row.model,
            condition: Condition::from(row.condition),
            price: row.price,
            date_scraped: DateTime::<Utc>::from_timestamp_millis(row.date_scraped).unwrap_or_default(),
        }
    }
}
