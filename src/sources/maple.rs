use async_trait::async_trait;
use scraper::Html;
use tracing::info;

use crate::config::{page_delay, MAPLE_PER_PAGE};
use crate::error::Result;
use crate::fetcher::{Fetch, Render};
use crate::normalize::{extract_model, normalize_brand, normalize_condition, parse_price};
use crate::sources::{css, element_text, select_text, SourceParser};
use crate::types::{DeviceListing, ParsedPage, SourceScrape};

const NAME: &str = "Maple";
const CARD_SELECTOR: &str = "li.card";

/// Apple-only store paginated by `offset`. The page count comes from the
/// pagination control on the first page.
pub struct Maple {
    base_url: String,
}

impl Maple {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.to_string() }
    }

    fn page_url(&self, offset: u32) -> String {
        format!("{}/collection/iphone?offset={offset}&perpage={MAPLE_PER_PAGE}", self.base_url)
    }
}

#[async_trait]
impl SourceParser for Maple {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        let render = Render::Dynamic { wait_for: Some(CARD_SELECTOR) };
        let mut out = SourceScrape::default();

        let first_html = fetcher.fetch(&self.page_url(1), render).await?;
        let total_pages = detect_total_pages(&first_html)?;
        info!("[MAPLE] {total_pages} pages detected");

        let mut html = first_html;
        for offset in 1..=total_pages {
            if offset > 1 {
                fetcher.page_pause(page_delay::MAPLE_MS).await;
                html = fetcher.fetch(&self.page_url(offset), render).await?;
            }
            let page = parse_page(&html)?;
            if page.listings.is_empty() {
                info!("[MAPLE] no listings at offset {offset}; stopping");
                break;
            }
            out.absorb(page);
        }
        Ok(out)
    }
}

/// Highest numeric label in the pagination control; 1 when the control is absent.
pub fn detect_total_pages(html: &str) -> Result<u32> {
    let document = Html::parse_document(html);
    let link_sel = css("ul.Pagination_pagination__WK02Q li.Pagination_pageItem__8Jvhv a")?;
    let max = document
        .select(&link_sel)
        .filter_map(|a| element_text(a).parse::<u32>().ok())
        .max()
        .unwrap_or(1);
    Ok(max.max(1))
}

pub fn parse_page(html: &str) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let card_sel = css(CARD_SELECTOR)?;
    let link_sel = css("a")?;
    let name_sel = css("div.info > h5")?;
    let price_sel = css("span.sell-price")?;
    let detail_sel = css("div.info > p")?;

    let mut page = ParsedPage::default();
    for card in document.select(&card_sel) {
        if card.select(&link_sel).next().is_none() {
            page.skipped += 1;
            continue;
        }
        let Some(name) = select_text(card, &name_sel) else {
            page.skipped += 1;
            continue;
        };
        let Some(price) = select_text(card, &price_sel).as_deref().and_then(parse_price) else {
            page.skipped += 1;
            continue;
        };

        // Detail line looks like "128 GB | Superb | Blue"; the grade is the second segment.
        let condition = select_text(card, &detail_sel)
            .and_then(|detail| detail.split('|').nth(1).map(|s| s.trim().to_string()))
            .unwrap_or_else(|| "Good".to_string());

        let model = extract_model(&name);
        if model.is_empty() {
            page.skipped += 1;
            continue;
        }

        page.listings.push(DeviceListing {
            source: NAME.to_string(),
            brand: normalize_brand("Apple"),
            model,
            condition: normalize_condition(&condition),
            price,
        });
    }
    Ok(page)
}
