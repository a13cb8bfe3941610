use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Canonical device condition. Anything outside the fixed grades is kept as a
/// capitalized word (e.g. "Used", "Superb").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Condition {
    Excellent,
    Good,
    Fair,
    Poor,
    Refurbished,
    Other(String),
}

impl Condition {
    pub fn as_str(&self) -> &str {
        match self {
            Condition::Excellent => "Excellent",
            Condition::Good => "Good",
            Condition::Fair => "Fair",
            Condition::Poor => "Poor",
            Condition::Refurbished => "Refurbished",
            Condition::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads back a stored condition string. Exact canonical names map to their
/// grade; everything else is `Other` verbatim.
impl From<String> for Condition {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Excellent" => Condition::Excellent,
            "Good" => Condition::Good,
            "Fair" => Condition::Fair,
            "Poor" => Condition::Poor,
            "Refurbished" => Condition::Refurbished,
            _ => Condition::Other(s),
        }
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> Self {
        match c {
            Condition::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Listings and stored records
// ---------------------------------------------------------------------------

/// One scraped offer, already normalized. Has no identity until persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceListing {
    pub source: String,
    pub brand: String,
    pub model: String,
    pub condition: Condition,
    pub price: f64,
}

/// A persisted listing. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDeviceRecord {
    pub id: i64,
    pub source: String,
    pub brand: String,
    pub model: String,
    pub condition: Condition,
    pub price: f64,
    pub date_scraped: DateTime<Utc>,
}

/// Filters accepted by `Storage::query`. `None`/empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub brand: Option<String>,
    pub condition: Option<String>,
    pub sources: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.condition.is_none()
            && self.sources.is_empty()
            && self.since.is_none()
            && self.until.is_none()
    }
}

// ---------------------------------------------------------------------------
// Scrape results
// ---------------------------------------------------------------------------

/// Output of one source's `scrape` call.
#[derive(Debug, Clone, Default)]
pub struct SourceScrape {
    pub listings: Vec<DeviceListing>,
    pub pages: usize,
    /// Items found on a page but discarded (missing name/price, bad JSON, ...).
    pub skipped: usize,
}

impl SourceScrape {
    pub fn absorb(&mut self, page: ParsedPage) {
        self.pages += 1;
        self.skipped += page.skipped;
        self.listings.extend(page.listings);
    }
}

/// Listings extracted from a single fetched page.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub listings: Vec<DeviceListing>,
    pub skipped: usize,
}

/// Per-source line of a cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub listings: usize,
    pub pages: usize,
    pub skipped: usize,
    pub error: Option<String>,
}

/// Summary of a full (or single-source) scrape cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub total_listings: usize,
    pub inserted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_string_roundtrip_keeps_other() {
        assert_eq!(Condition::from("Good".to_string()), Condition::Good);
        assert_eq!(
            Condition::from("Superb".to_string()),
            Condition::Other("Superb".to_string())
        );
        assert_eq!(String::from(Condition::Refurbished), "Refurbished");
    }

    #[test]
    fn condition_serializes_as_plain_string() {
        let json = serde_json::to_string(&Condition::Excellent).unwrap();
        assert_eq!(json, "\"Excellent\"");
        let json = serde_json::to_string(&Condition::Other("Used".into())).unwrap();
        assert_eq!(json, "\"Used\"");
    }
}
