use std::time::Duration;

use crate::error::{AppError, Result};

pub const CASHIFY_BASE_URL: &str = "https://www.cashify.in";
pub const MAPLE_BASE_URL: &str = "https://www.maplestore.in";
pub const REFIT_BASE_URL: &str = "https://refitglobal.com";
pub const MOBILEGOO_BASE_URL: &str = "https://mobilegoo.shop";
pub const SERPAPI_URL: &str = "https://serpapi.com/search.json";
pub const FLIPKART_BASE_URL: &str = "https://www.flipkart.com/search?q=refurbished+mobiles";
pub const QUIKR_BASE_URL: &str = "https://www.quikr.com/mobiles-tablets/Mobile-Phones+India+y149f";

pub const WEBDRIVER_URL: &str = "http://localhost:4444";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Timeout for plain HTTP requests and for waiting on a page's DOM marker (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 10;

/// Every fetch sleeps a uniform random delay in this range first (milliseconds).
pub const JITTER_MIN_MS: u64 = 1_000;
pub const JITTER_MAX_MS: u64 = 3_000;

/// Delay after each scroll-to-bottom so lazy content can render (milliseconds).
pub const SCROLL_SETTLE_MS: u64 = 2_000;

/// Listings matching the dedup key inside this window are treated as the same observation.
pub const DEDUP_WINDOW_HOURS: i64 = 24;

/// Default interval between full scrape cycles.
pub const SCRAPE_INTERVAL_HOURS: u64 = 24;
/// Longest accepted interval: one year.
pub const MAX_SCRAPE_INTERVAL_HOURS: u64 = 8_760;

/// Source-specific pagination limits.
pub const MAPLE_PER_PAGE: u32 = 8;
pub const FLIPKART_MAX_PAGES: u32 = 5;
pub const QUIKR_MAX_SCROLLS: u32 = 15;

/// Pause between pages of the same source (milliseconds).
pub mod page_delay {
    pub const MAPLE_MS: u64 = 1_000;
    pub const MOBILEGOO_MS: u64 = 1_000;
    pub const FLIPKART_MS: u64 = 1_500;
}

/// Base URLs per source, keyed by the source's registry name.
#[derive(Debug, Clone)]
pub struct SourceUrls {
    pub cashify: String,
    pub maple: String,
    pub refit: String,
    pub mobilegoo: String,
    pub serpapi: String,
    pub flipkart: String,
    pub quikr: String,
}

impl SourceUrls {
    pub fn from_env() -> Self {
        Self {
            cashify: env_or("CASHIFY_BASE_URL", CASHIFY_BASE_URL),
            maple: env_or("MAPLE_BASE_URL", MAPLE_BASE_URL),
            refit: env_or("REFIT_BASE_URL", REFIT_BASE_URL),
            mobilegoo: env_or("MOBILEGOO_BASE_URL", MOBILEGOO_BASE_URL),
            serpapi: env_or("SERPAPI_URL", SERPAPI_URL),
            flipkart: env_or("FLIPKART_BASE_URL", FLIPKART_BASE_URL),
            quikr: env_or("QUIKR_BASE_URL", QUIKR_BASE_URL),
        }
    }
}

impl Default for SourceUrls {
    fn default() -> Self {
        Self {
            cashify: CASHIFY_BASE_URL.to_string(),
            maple: MAPLE_BASE_URL.to_string(),
            refit: REFIT_BASE_URL.to_string(),
            mobilegoo: MOBILEGOO_BASE_URL.to_string(),
            serpapi: SERPAPI_URL.to_string(),
            flipkart: FLIPKART_BASE_URL.to_string(),
            quikr: QUIKR_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub webdriver_url: String,
    /// Hours between scheduled full cycles (SCRAPE_INTERVAL_HOURS)
    pub scrape_interval_hours: u64,
    pub scrape_interval: Duration,
    /// Run one full cycle immediately at startup (RUN_ON_START)
    pub run_on_start: bool,
    /// Registry names of the sources to run (SOURCES, comma-separated). Empty = all.
    pub enabled_sources: Vec<String>,
    /// SerpApi key for the Amazon Renewed source (SERPAPI_KEY)
    pub serpapi_key: String,
    pub sources: SourceUrls,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let scrape_interval_hours = std::env::var("SCRAPE_INTERVAL_HOURS")
            .unwrap_or_else(|_| SCRAPE_INTERVAL_HOURS.to_string())
            .parse::<u64>()
            .map_err(|_| AppError::Config("SCRAPE_INTERVAL_HOURS must be a whole number of hours".to_string()))?;
        let scrape_interval = interval_from_hours(scrape_interval_hours)?;

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "prices.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            webdriver_url: env_or("WEBDRIVER_URL", WEBDRIVER_URL),
            scrape_interval_hours,
            scrape_interval,
            run_on_start: std::env::var("RUN_ON_START")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            enabled_sources: parse_list(&std::env::var("SOURCES").unwrap_or_default()),
            serpapi_key: std::env::var("SERPAPI_KEY").unwrap_or_default(),
            sources: SourceUrls::from_env(),
        })
    }
}

/// `hours` as a `Duration`, within 1..=[`MAX_SCRAPE_INTERVAL_HOURS`].
fn interval_from_hours(hours: u64) -> Result<Duration> {
    if hours == 0 || hours > MAX_SCRAPE_INTERVAL_HOURS {
        return Err(AppError::Config(format!(
            "SCRAPE_INTERVAL_HOURS must be between 1 and {MAX_SCRAPE_INTERVAL_HOURS}, got {hours}"
        )));
    }
    hours
        .checked_mul(3_600)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::Config(format!("SCRAPE_INTERVAL_HOURS out of range: {hours}")))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
impl Config {
    /// Defaults without touching the process environment.
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            webdriver_url: WEBDRIVER_URL.to_string(),
            scrape_interval_hours: SCRAPE_INTERVAL_HOURS,
            scrape_interval: Duration::from_secs(SCRAPE_INTERVAL_HOURS * 3_600),
            run_on_start: false,
            enabled_sources: Vec::new(),
            serpapi_key: String::new(),
            sources: SourceUrls::default(),
        }
    }
}
