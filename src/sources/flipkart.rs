use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info};

use crate::config::{page_delay, FLIPKART_MAX_PAGES};
use crate::error::Result;
use crate::fetcher::{Fetch, Render};
use crate::normalize::{extract_model, first_model_segment, normalize_brand, normalize_condition, parse_price};
use crate::sources::{css, element_text, select_text, SourceParser};
use crate::types::{Condition, DeviceListing, ParsedPage, SourceScrape};

const NAME: &str = "Flipkart";
const RESULT_SELECTOR: &str = "div.cPHDOP";

/// Search results paginated by `page`, capped at a fixed number of pages.
pub struct Flipkart {
    search_url: String,
}

impl Flipkart {
    pub fn new(search_url: &str) -> Self {
        Self { search_url: search_url.to_string() }
    }

    fn page_url(&self, page: u32) -> String {
        let sep = if self.search_url.contains('?') { '&' } else { '?' };
        format!("{}{sep}page={page}", self.search_url)
    }
}

#[async_trait]
impl SourceParser for Flipkart {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.search_url
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        let render = Render::Dynamic { wait_for: Some(RESULT_SELECTOR) };
        let mut out = SourceScrape::default();

        for page_num in 1..=FLIPKART_MAX_PAGES {
            if page_num > 1 {
                fetcher.page_pause(page_delay::FLIPKART_MS).await;
            }
            let url = self.page_url(page_num);
            debug!("[FLIPKART] page {page_num}: {url}");
            let html = fetcher.fetch(&url, render).await?;
            let page = parse_page(&html)?;
            if page.listings.is_empty() {
                info!("[FLIPKART] no listings on page {page_num}; stopping");
                break;
            }
            out.absorb(page);
        }
        Ok(out)
    }
}

/// Flipkart titles put the brand second more often than first
/// ("(Refurbished) SAMSUNG Galaxy ..."), so the second word is used when there is one.
fn brand_guess(title: &str) -> String {
    let cleaned = title.replace(['(', ')'], "");
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let guess = words.get(1).or_else(|| words.first()).copied().unwrap_or_default();
    normalize_brand(guess)
}

pub fn parse_page(html: &str) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let block_sel = css("div.cPHDOP.col-12-12")?;
    let anchor_sel = css("a.CGtC98")?;
    let title_sel = css("div.KzDlHZ")?;
    let price_sel = css("div.Nx9bqj._4b5DiR")?;
    let feature_sel = css(r"li.J\+igdf")?;

    let mut page = ParsedPage::default();
    for block in document.select(&block_sel) {
        // Banner and filter rows share the block class but carry no product link.
        let Some(anchor) = block.select(&anchor_sel).next() else {
            continue;
        };
        let (Some(title), Some(price_text)) =
            (select_text(anchor, &title_sel), select_text(anchor, &price_sel))
        else {
            page.skipped += 1;
            continue;
        };
        let Some(price) = parse_price(&price_text) else {
            debug!("[FLIPKART] unparsable price {price_text:?}");
            page.skipped += 1;
            continue;
        };

        let brand = brand_guess(&title);
        let model = first_model_segment(&extract_model(&title));
        if brand.is_empty() || model.is_empty() {
            page.skipped += 1;
            continue;
        }

        let condition = anchor
            .select(&feature_sel)
            .map(element_text)
            .find(|text| text.contains("Refurbished"))
            .map(|text| normalize_condition(&text))
            .unwrap_or(Condition::Refurbished);

        page.listings.push(DeviceListing {
            source: NAME.to_string(),
            brand,
            model,
            condition,
            price,
        });
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::{FakeFetcher, RenderSeen};

    fn product(title: &str, price: &str, features: &[&str]) -> String {
        let items: String = features.iter().map(|f| format!(r#"<li class="J+igdf">{f}</li>"#)).collect();
        format!(
            r#"<div class="cPHDOP col-12-12"><a class="CGtC98" href="/p/1">
                 <div class="KzDlHZ">{title}</div>
                 <div class="Nx9bqj _4b5DiR">{price}</div>
                 <ul>{items}</ul>
               </a></div>"#
        )
    }

    fn results(products: &[String]) -> String {
        format!(
            r#"<html><body><div class="cPHDOP col-12-12"><span>Filters</span></div>{}</body></html>"#,
            products.concat()
        )
    }

    #[test]
    fn uses_second_word_for_brand_and_feature_condition() {
        let html = results(&[
            product(
                "(Refurbished) SAMSUNG Galaxy S21 FE 5G (Lavender, 128 GB)",
                "₹24,999",
                &["8 GB RAM", "Refurbished - Good"],
            ),
            product("REDMI Note 12 (Blue, 64 GB)", "₹9,499", &[]),
            product("Apple iPhone 11", "₹--", &[]),
        ]);
        let page = parse_page(&html).unwrap();
        assert_eq!(page.listings.len(), 2);
        assert_eq!(page.skipped, 1);

        let s21 = &page.listings[0];
        assert_eq!(s21.brand, "Samsung");
        assert_eq!(s21.model, "Galaxy S21 FE 5G");
        assert_eq!(s21.condition, Condition::Good);
        assert_eq!(s21.price, 24999.0);

        // Second word of "REDMI Note 12" is "Note".
        let note = &page.listings[1];
        assert_eq!(note.brand, "Note");
        assert_eq!(note.model, "Note 12");
        assert_eq!(note.condition, Condition::Refurbished);
    }

    #[test]
    fn page_urls_append_to_existing_query() {
        let f = Flipkart::new("https://fk.test/search?q=refurbished+mobiles");
        assert_eq!(f.page_url(2), "https://fk.test/search?q=refurbished+mobiles&page=2");
        assert_eq!(Flipkart::new("https://fk.test/s").page_url(1), "https://fk.test/s?page=1");
    }

    #[tokio::test]
    async fn stops_at_page_cap() {
        let flipkart = Flipkart::new("https://fk.test/search?q=x");
        let html = results(&[product("Refurbished Apple iPhone 12", "₹30,000", &[])]);
        let mut fetcher = FakeFetcher::new();
        for n in 1..=FLIPKART_MAX_PAGES + 2 {
            fetcher = fetcher.page(&flipkart.page_url(n), &html);
        }

        let scrape = flipkart.scrape(&mut fetcher).await.unwrap();
        assert_eq!(fetcher.requested.len(), FLIPKART_MAX_PAGES as usize);
        assert_eq!(scrape.listings.len(), FLIPKART_MAX_PAGES as usize);
    }

    #[tokio::test]
    async fn stops_on_first_empty_page() {
        let flipkart = Flipkart::new("https://fk.test/search?q=x");
        let mut fetcher = FakeFetcher::new()
            .page(&flipkart.page_url(1), &results(&[product("Apple iPhone 12", "₹30,000", &[])]))
            .page(&flipkart.page_url(2), &results(&[]));

        let scrape = flipkart.scrape(&mut fetcher).await.unwrap();
        assert_eq!(fetcher.requested.len(), 2);
        assert_eq!(fetcher.renders, vec![RenderSeen::dynamic("div.cPHDOP"); 2]);
        assert_eq!(scrape.pages, 1);
    }
}
