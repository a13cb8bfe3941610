use async_trait::async_trait;
use scraper::Html;
use tracing::info;

use crate::error::Result;
use crate::fetcher::{Fetch, Render};
use crate::sources::{css, select_text, RawListing, SourceParser};
use crate::types::{ParsedPage, SourceScrape};

const NAME: &str = "RefitGlobal";

/// Single static collection page; every listing is sold as refurbished.
pub struct RefitGlobal {
    base_url: String,
}

impl RefitGlobal {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.to_string() }
    }
}

#[async_trait]
impl SourceParser for RefitGlobal {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        let url = format!("{}/collections/all-refurbished-mobile-phones", self.base_url);
        let html = fetcher.fetch(&url, Render::Static).await?;
        let page = parse_page(&html)?;
        info!("[REFIT] {} listings, {} skipped", page.listings.len(), page.skipped);

        let mut out = SourceScrape::default();
        out.absorb(page);
        Ok(out)
    }
}

pub fn parse_page(html: &str) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let card_sel = css("div.card-wrapper.product-card-wrapper")?;
    let name_sel = css("h3.card__heading a")?;
    let sale_sel = css("span.price-item--sale")?;
    let regular_sel = css("span.price-item--regular")?;

    let mut page = ParsedPage::default();
    for card in document.select(&card_sel) {
        let title = select_text(card, &name_sel).unwrap_or_default();
        // Sale price wins over the struck-through regular price.
        let price_text = select_text(card, &sale_sel)
            .or_else(|| select_text(card, &regular_sel))
            .unwrap_or_default();

        let raw = RawListing { title: &title, price_text: &price_text, condition_text: None };
        match raw.normalize(NAME, "Refurbished") {
            Some(listing) => page.listings.push(listing),
            None => page.skipped += 1,
        }
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::{FakeFetcher, RenderSeen};
    use crate::types::Condition;

    const COLLECTION: &str = r#"
        <div class="card-wrapper product-card-wrapper">
          <h3 class="card__heading"><a href="/products/a">Samsung Galaxy S20 FE 5G</a></h3>
          <span class="price-item price-item--regular">₹22,000</span>
          <span class="price-item price-item--sale">₹18,499</span>
        </div>
        <div class="card-wrapper product-card-wrapper">
          <h3 class="card__heading"><a href="/products/b">Redmi Note 11 Pro</a></h3>
          <span class="price-item price-item--regular">₹11,999</span>
        </div>
        <div class="card-wrapper product-card-wrapper">
          <h3 class="card__heading"><a href="/products/c">Pixel 6</a></h3>
          <span class="price-item price-item--regular">Sold out</span>
        </div>"#;

    #[test]
    fn prefers_sale_price_and_marks_refurbished() {
        let page = parse_page(COLLECTION).unwrap();
        assert_eq!(page.listings.len(), 2);
        assert_eq!(page.skipped, 1);

        assert_eq!(page.listings[0].price, 18499.0);
        assert_eq!(page.listings[0].brand, "Samsung");
        assert_eq!(page.listings[0].model, "Galaxy S20 FE 5G");
        assert_eq!(page.listings[0].condition, Condition::Refurbished);

        assert_eq!(page.listings[1].brand, "Xiaomi");
        assert_eq!(page.listings[1].model, "Note 11 Pro");
        assert_eq!(page.listings[1].price, 11999.0);
    }

    #[tokio::test]
    async fn fetches_the_single_collection_page() {
        let base = "https://refit.test";
        let mut fetcher = FakeFetcher::new()
            .page(&format!("{base}/collections/all-refurbished-mobile-phones"), COLLECTION);
        let scrape = RefitGlobal::new(base).scrape(&mut fetcher).await.unwrap();
        assert_eq!(fetcher.requested.len(), 1);
        assert_eq!(fetcher.renders, vec![RenderSeen::Static]);
        assert_eq!(scrape.pages, 1);
        assert_eq!(scrape.listings.len(), 2);
    }
}
