use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info};

use crate::error::Result;
use crate::fetcher::{Fetch, Render};
use crate::sources::{css, select_text, RawListing, SourceParser};
use crate::types::{ParsedPage, SourceScrape};

const NAME: &str = "Cashify";

/// Category landing pages scraped each cycle: (path, label).
const CATEGORIES: &[(&str, &str)] = &[
    ("/buy-refurbished-mobile-phones", "Phone"),
    ("/buy-refurbished-tablets", "Tablet"),
    ("/buy-refurbished-laptops", "Laptop"),
    ("/buy-refurbished-smart-watches", "Smartwatch"),
];

/// Catalog source: one rendered page per device category, no sub-pagination.
/// Listings carry no condition grade, so everything is recorded as "Good".
pub struct Cashify {
    base_url: String,
}

impl Cashify {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.to_string() }
    }
}

#[async_trait]
impl SourceParser for Cashify {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        let mut out = SourceScrape::default();
        for (path, label) in CATEGORIES {
            let url = format!("{}{}", self.base_url, path);
            info!("[CASHIFY] scraping category {label}: {url}");
            let html = fetcher.fetch(&url, Render::Dynamic { wait_for: None }).await?;
            let page = parse_page(&html)?;
            debug!("[CASHIFY] {label}: {} listings, {} skipped", page.listings.len(), page.skipped);
            out.absorb(page);
        }
        Ok(out)
    }
}

pub fn parse_page(html: &str) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let card_sel = css(r#"a[href^="/buy-refurbished-"]"#)?;
    let name_sel = css("h3.subtitle3")?;
    let price_sel = css("h3.h3")?;

    let mut page = ParsedPage::default();
    for card in document.select(&card_sel) {
        let title = select_text(card, &name_sel).unwrap_or_default();
        let price_text = select_text(card, &price_sel).unwrap_or_default();
        let raw = RawListing { title: &title, price_text: &price_text, condition_text: None };
        match raw.normalize(NAME, "Good") {
            Some(listing) => page.listings.push(listing),
            None => page.skipped += 1,
        }
    }
    Ok(page)
}
