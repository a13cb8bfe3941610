use async_trait::async_trait;
use scraper::Html;
use tracing::info;

use crate::config::QUIKR_MAX_SCROLLS;
use crate::error::Result;
use crate::fetcher::Fetch;
use crate::normalize::first_model_segment;
use crate::sources::{css, select_text, RawListing, SourceParser};
use crate::types::{ParsedPage, SourceScrape};

const NAME: &str = "Quikr";

/// Classifieds feed with infinite scroll: one page, scrolled until enough cards load.
pub struct Quikr {
    base_url: String,
}

impl Quikr {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.to_string() }
    }
}

#[async_trait]
impl SourceParser for Quikr {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        let html = fetcher.fetch_with_scroll(&self.base_url, None, QUIKR_MAX_SCROLLS).await?;
        let page = parse_page(&html)?;
        info!("[QUIKR] {} listings, {} skipped", page.listings.len(), page.skipped);

        let mut out = SourceScrape::default();
        out.absorb(page);
        Ok(out)
    }
}

pub fn parse_page(html: &str) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let card_sel = css("div.relatedSnbProducts.srpProducts")?;
    let title_sel = css("span.descText")?;
    let price_sel = css(r#"span[itemprop="price"]"#)?;
    let condition_sel = css(r#"span[itemprop="itemcondition"]"#)?;

    let mut page = ParsedPage::default();
    for card in document.select(&card_sel) {
        let title = select_text(card, &title_sel).unwrap_or_default();
        let price_text = select_text(card, &price_sel).unwrap_or_default();
        let condition = select_text(card, &condition_sel);

        let raw = RawListing {
            title: &title,
            price_text: &price_text,
            condition_text: condition.as_deref(),
        };
        // Seller titles trail off into specs and colours after a comma or bracket.
        match raw.normalize(NAME, "Used") {
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
    Ok(page)
}
