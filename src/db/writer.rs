use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::config::DEDUP_WINDOW_HOURS;
use crate::db::Storage;
use crate::error::Result;
use crate::types::DeviceListing;

const MS_PER_HOUR: i64 = 3_600_000;

/// Persists scraped listings, skipping any already seen within the dedup window.
///
/// A batch is one transaction: either every novel listing lands or none do.
/// Database failures are logged and reported as zero inserts, never raised.
pub struct IngestWriter {
    storage: Storage,
}

impl IngestWriter {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Returns how many listings were inserted.
    pub async fn ingest(&self, listings: &[DeviceListing]) -> usize {
        self.ingest_at(listings, Utc::now()).await
    }

    /// `ingest` with an explicit clock; `now` becomes every new row's `date_scraped`.
    pub async fn ingest_at(&self, listings: &[DeviceListing], now: DateTime<Utc>) -> usize {
        if listings.is_empty() {
            return 0;
        }
        match self.write_batch(listings, now).await {
            Ok(inserted) => inserted,
            Err(e) => {
                error!("[INGEST] batch of {} rolled back: {e}", listings.len());
                0
            }
        }
    }

    async fn write_batch(&self, listings: &[DeviceListing], now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        let cutoff_ms = now_ms - DEDUP_WINDOW_HOURS * MS_PER_HOUR;

        let mut tx = self.storage.pool().begin().await?;
        let mut inserted = 0usize;
        let mut duplicates = 0usize;
        let mut invalid = 0usize;

        for listing in listings {
            if let Err(reason) = validate(listing) {
                debug!("[INGEST] skipping invalid listing {listing:?}: {reason}");
                invalid += 1;
                continue;
            }
            let condition = listing.condition.as_str();

            // Runs inside the transaction, so rows inserted earlier in this batch count too.
            let seen: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM device_data
                WHERE source = ? AND brand = ? AND model = ? AND condition = ? AND price = ?
                  AND date_scraped >= ?
                LIMIT 1
                "#,
            )
            .bind(&listing.source)
            .bind(&listing.brand)
            .bind(&listing.model)
            .bind(condition)
            .bind(listing.price)
            .bind(cutoff_ms)
            .fetch_optional(&mut *tx)
            .await?;

            if seen.is_some() {
                duplicates += 1;
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO device_data (source, brand, model, condition, price, date_scraped)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&listing.source)
            .bind(&listing.brand)
            .bind(&listing.model)
            .bind(condition)
            .bind(listing.price)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        tx.commit().await?;

        info!(
            inserted,
            duplicates,
            invalid,
            "[INGEST] batch of {}: {inserted} new, {duplicates} duplicates, {invalid} invalid",
            listings.len(),
        );
        Ok(inserted)
    }
}

fn validate(listing: &DeviceListing) -> std::result::Result<(), &'static str> {
    if listing.source.trim().is_empty() {
        return Err("empty source");
    }
    if listing.brand.trim().is_empty() {
        return Err("empty brand");
    }
    if listing.model.trim().is_empty() {
        return Err("empty model");
    }
    if !(listing.price.is_finite() && listing.price > 0.0) {
        return Err("price must be a positive number");
    }
    Ok(())
}
