//! Marketplace parsers. Each source knows its own URLs, render mode and pagination;
//! everything else (fetching, normalization) is shared.

pub mod amazon;
pub mod cashify;
pub mod flipkart;
pub mod maple;
pub mod mobilegoo;
pub mod quikr;
pub mod refit;

use async_trait::async_trait;
use scraper::{ElementRef, Selector};
use tracing::warn;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetcher::Fetch;
use crate::normalize::{extract_model, normalize_brand, normalize_condition, parse_price};
use crate::types::{DeviceListing, SourceScrape};

/// One marketplace. `scrape` does a full pass over the source's current listings.
///
/// A fetch failure is returned as `Err` and costs the source its whole cycle;
/// per-item problems are counted in `SourceScrape::skipped` instead.
#[async_trait]
pub trait SourceParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn base_url(&self) -> &str;

    async fn scrape(&self, fetcher: &mut dyn Fetch) -> Result<SourceScrape>;
}

/// Source name → parser, in the order a full cycle runs them.
pub struct SourceRegistry {
    parsers: Vec<Box<dyn SourceParser>>,
}

impl SourceRegistry {
    pub fn new(parsers: Vec<Box<dyn SourceParser>>) -> Self {
        Self { parsers }
    }

    /// All known sources, restricted to `cfg.enabled_sources` when that list is non-empty.
    pub fn from_config(cfg: &Config) -> Self {
        let urls = &cfg.sources;
        let all: Vec<Box<dyn SourceParser>> = vec![
            Box::new(cashify::Cashify::new(&urls.cashify)),
            Box::new(maple::Maple::new(&urls.maple)),
            Box::new(refit::RefitGlobal::new(&urls.refit)),
            Box::new(mobilegoo::MobileGoo::new(&urls.mobilegoo)),
            Box::new(amazon::AmazonRenewed::new(&urls.serpapi, &cfg.serpapi_key)),
            Box::new(flipkart::Flipkart::new(&urls.flipkart)),
            Box::new(quikr::Quikr::new(&urls.quikr)),
        ];

        if cfg.enabled_sources.is_empty() {
            return Self::new(all);
        }

        for wanted in &cfg.enabled_sources {
            if !all.iter().any(|p| p.name().eq_ignore_ascii_case(wanted)) {
                warn!("SOURCES lists unknown source `{wanted}`; ignoring it");
            }
        }
        let enabled = all
            .into_iter()
            .filter(|p| cfg.enabled_sources.iter().any(|s| s.eq_ignore_ascii_case(p.name())))
            .collect();
        Self::new(enabled)
    }

    /// Case-insensitive lookup by source name.
    pub fn get(&self, name: &str) -> Option<&dyn SourceParser> {
        self.parsers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .map(|p| p.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn SourceParser> {
        self.parsers.iter().map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

/// Raw fields lifted off a listing card, before normalization.
#[derive(Debug, Clone, Copy)]
pub struct RawListing<'a> {
    pub title: &'a str,
    pub price_text: &'a str,
    pub condition_text: Option<&'a str>,
}

impl RawListing<'_> {
    /// Normalized listing, or `None` when the title or price is unusable.
    /// The brand is taken from the title's first word (after any condition wrapper).
    pub fn normalize(&self, source: &str, fallback_condition: &str) -> Option<DeviceListing> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }
        let price = parse_price(self.price_text)?;
        let brand = normalize_brand(title);
        let model = extract_model(title);
        if brand.is_empty() || model.is_empty() {
            return None;
        }

        Some(DeviceListing {
            source: source.to_string(),
            brand,
            model,
            condition: normalize_condition(self.condition_text.unwrap_or(fallback_condition)),
            price,
        })
    }
}

pub(crate) fn css(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::Selector(format!("{selector}: {e}")))
}

/// Text content of an element with whitespace collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of the first descendant matching `selector`, if it has any.
pub(crate) fn select_text(el: ElementRef<'_>, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::error::{AppError, Result};
    use crate::fetcher::{Fetch, Render};

    /// Owned copy of the [`Render`] mode a page was requested with.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RenderSeen {
        Static,
        Dynamic { wait_for: Option<String> },
    }

    impl RenderSeen {
        pub fn dynamic(wait_for: &str) -> Self {
            RenderSeen::Dynamic { wait_for: Some(wait_for.to_string()) }
        }
    }

    impl From<Render<'_>> for RenderSeen {
        fn from(render: Render<'_>) -> Self {
            match render {
                Render::Static => RenderSeen::Static,
                Render::Dynamic { wait_for } => RenderSeen::Dynamic { wait_for: wait_for.map(str::to_string) },
            }
        }
    }

    /// Serves canned pages by exact URL and records every request.
    #[derive(Default)]
    pub struct FakeFetcher {
        pages: HashMap<String, String>,
        json: HashMap<String, serde_json::Value>,
        pub requested: Vec<String>,
        pub renders: Vec<RenderSeen>,
        pub scrolls: Vec<u32>,
        /// Shared so a test can count closes across fetchers built by a factory.
        pub closes: Arc<AtomicUsize>,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        pub fn json(mut self, url: &str, value: serde_json::Value) -> Self {
            self.json.insert(url.to_string(), value);
            self
        }

        pub fn counting_closes(mut self, closes: Arc<AtomicUsize>) -> Self {
            self.closes = closes;
            self
        }

        fn lookup(&mut self, url: &str) -> Result<String> {
            self.requested.push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::Source(format!("no fixture for {url}")))
        }
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn fetch(&mut self, url: &str, render: Render<'_>) -> Result<String> {
            self.renders.push(render.into());
            self.lookup(url)
        }

        async fn fetch_with_scroll(
            &mut self,
            url: &str,
            wait_for: Option<&str>,
            max_scrolls: u32,
        ) -> Result<String> {
            self.renders.push(Render::Dynamic { wait_for }.into());
            self.scrolls.push(max_scrolls);
            self.lookup(url)
        }

        async fn fetch_json(&mut self, url: &str, _query: &[(&str, &str)]) -> Result<serde_json::Value> {
            self.requested.push(url.to_string());
            self.json
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::Source(format!("no fixture for {url}")))
        }

        async fn page_pause(&mut self, _millis: u64) {}

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
