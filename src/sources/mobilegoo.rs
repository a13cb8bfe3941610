use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::page_delay;
use crate::error::Result;
use crate::fetcher::{Fetch, Render};
use crate::normalize::{extract_model, normalize_brand, normalize_condition};
use crate::sources::{css, select_text, SourceParser};
use crate::types::{DeviceListing, ParsedPage, SourceScrape};

const NAME: &str = "MobileGoo";

static CURSOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"phcursor=([^&]+)").unwrap());

/// One purchasable variant from the JSON embedded in each product block.
#[derive(Debug, Deserialize)]
struct Variant {
    /// Price in paise.
    #[serde(default)]
    price: f64,
    /// Condition grade, e.g. "Good" or "Superb".
    #[serde(default)]
    option3: Option<String>,
}

/// Apple-only store with cursor pagination. Each product block embeds its
/// variants as JSON, and each variant becomes its own listing.
pub struct MobileGoo {
    base_url: String,
}

impl MobileGoo {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.to_string() }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/mobiles", self.base_url)
    }
}

#[async_trait]
impl SourceParser for MobileGoo {
    fn name(&self) -> &'static str {
        NAME
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape> {
        let base = self.collection_url();
        let mut url = base.clone();
        let mut visited: HashSet<String> = HashSet::new();
        let mut out = SourceScrape::default();

        loop {
            let html = fetcher.fetch(&url, Render::Dynamic { wait_for: None }).await?;
            let (page, next_cursor) = parse_page(&html)?;
            if page.listings.is_empty() {
                info!("[MOBILEGOO] no listings at {url}; stopping");
                break;
            }
            out.absorb(page);

            let Some(cursor) = next_cursor else {
                debug!("[MOBILEGOO] no next cursor; done");
                break;
            };
            if !visited.insert(cursor.clone()) {
                info!("[MOBILEGOO] cursor {cursor} already visited; done");
                break;
            }

            fetcher.page_pause(page_delay::MOBILEGOO_MS).await;
            url = format!("{base}?phcursor={cursor}");
        }
        Ok(out)
    }
}

/// Listings on one page plus the cursor from the "next" link, if any.
pub fn parse_page(html: &str) -> Result<(ParsedPage, Option<String>)> {
    let document = Html::parse_document(html);
    let block_sel = css(r"div.mt-3.lg\:mt-5")?;
    let name_sel = css("h3.block a")?;
    let variants_sel = css(r#"script[type="application/json"]"#)?;
    let next_sel = css("a.pagination__item--next")?;

    let mut page = ParsedPage::default();
    for block in document.select(&block_sel) {
        let Some(name) = select_text(block, &name_sel) else {
            page.skipped += 1;
            continue;
        };
        let Some(script) = block.select(&variants_sel).next() else {
            page.skipped += 1;
            continue;
        };
        let variants: Vec<Variant> = match serde_json::from_str(&script.text().collect::<String>()) {
            Ok(v) => v,
            Err(e) => {
                debug!("[MOBILEGOO] bad variant JSON for {name}: {e}");
                page.skipped += 1;
                continue;
            }
        };

        let model = extract_model(&name);
        if model.is_empty() {
            page.skipped += 1;
            continue;
        }

        for variant in variants {
            let price = variant.price / 100.0;
            if !(price.is_finite() && price > 0.0) {
                page.skipped += 1;
                continue;
            }
            page.listings.push(DeviceListing {
                source: NAME.to_string(),
                brand: normalize_brand("Apple"),
                model: model.clone(),
                condition: normalize_condition(variant.option3.as_deref().unwrap_or_default()),
                price,
            });
        }
    }

    let next_cursor = document
        .select(&next_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| CURSOR_RE.captures(href))
        .map(|caps| caps[1].to_string());

    Ok((page, next_cursor))
}
