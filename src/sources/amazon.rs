use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::fetcher::Fetch;
use crate::normalize::{first_model_segment, parse_price};
use crate::sources::{RawListing, SourceParser};
use crate::types::{ParsedPage, SourceScrape};

const NAME: &str = "AmazonRenewed";

/// Amazon India "Renewed" results, read through the SerpApi search API
/// instead of scraping Amazon directly. One call per cycle.
pub struct AmazonRenewed {
    endpoint: String,
    api_key: String,
}

impl AmazonRenewed {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self { endpoint: endpoint.to_string(), api_key: api_key.to_string() }
    }
}

#[async_trait]
impl SourceParser for AmazonRenewed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.endpoint
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        if self.api_key.is_empty() {
            return Err(AppError::Source("SERPAPI_KEY is not set".to_string()));
        }

        let query = [
            ("engine", "amazon"),
            ("k", "renewed phone"),
            ("amazon_domain", "amazon.in"),
            ("api_key", self.api_key.as_str()),
        ];
        let response = fetcher.fetch_json(&self.endpoint, &query).await?;

        let mut out = SourceScrape::default();
        let Some(page) = parse_response(&response) else {
            warn!("[AMAZON] response has no organic_results");
            return Ok(out);
        };
        info!("[AMAZON] {} listings, {} skipped", page.listings.len(), page.skipped);
        out.absorb(page);
        Ok(out)
    }
}

/// Listings from a SerpApi Amazon response; `None` when `organic_results` is missing.
pub fn parse_response(response: &serde_json::Value) -> Option<ParsedPage> {
    let items = response.get("organic_results")?.as_array()?;

    let mut page = ParsedPage::default();
    for item in items {
        let title = item.get("title").and_then(|t| t.as_str()).unwrap_or("");
        // `price` is display text ("₹12,999"); fall back to the numeric `extracted_price`.
        let price_text = item
            .get("price")
            .and_then(|p| p.as_str())
            .filter(|p| parse_price(p).is_some())
            .map(str::to_string)
            .or_else(|| item.get("extracted_price").and_then(|p| p.as_f64()).map(|p| p.to_string()))
            .unwrap_or_default();

        let raw = RawListing { title, price_text: &price_text, condition_text: None };
        match raw.normalize(NAME, "Renewed") {
            Some(mut listing) => {
                listing.model = first_model_segment(&listing.model);
                if listing.model.is_empty() {
                    page.skipped += 1;
                } else {
                    page.listings.push(listing);
                }
            }
            None => page.skipped += 1,
        }
    }
    Some(page)
}
