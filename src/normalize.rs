//! Pure text normalization shared by every source parser.
//!
//! Marketplace titles arrive as free text ("(Refurbished) Samsung Galaxy S21 (8GB RAM, 128GB)");
//! these helpers reduce them to the canonical brand / model / condition / price fields.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::Condition;

/// Leading condition wrapper on a lower-cased title, e.g. `(refurbished)` or `pre-owned`.
static CONDITION_WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(?(refurbished|renewed|pre[-\s]?owned|used)\)?").unwrap()
});

static QUALIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(refurbished|renewed|pre[-\s]?owned|used)\b").unwrap()
});

static LEADING_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\(.*?\)\s*").unwrap());

static BRAND_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)^({})\s+", MODEL_BRAND_KEYWORDS.join("|"));
    Regex::new(&pattern).unwrap()
});

static OPEN_PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(\s*").unwrap());
static CLOSE_PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\)").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap());

/// Lower-case first token → canonical brand.
const BRAND_ALIASES: &[(&str, &str)] = &[
    ("apple", "Apple"),
    ("samsung", "Samsung"),
    ("oneplus", "OnePlus"),
    ("xiaomi", "Xiaomi"),
    ("redmi", "Xiaomi"),
    ("oppo", "OPPO"),
    ("vivo", "Vivo"),
    ("realme", "Realme"),
    ("google", "Google"),
    ("nothing", "Nothing"),
    ("motorola", "Motorola"),
    ("nokia", "Nokia"),
    ("iqoo", "iQOO"),
    ("lava", "Lava"),
    ("zeno", "Zeno"),
    ("acer", "Acer"),
    ("honor", "HONOR"),
    ("poco", "POCO"),
];

/// Brand words stripped from the front of a model name.
pub const MODEL_BRAND_KEYWORDS: &[&str] = &[
    "Apple", "Samsung", "OnePlus", "Xiaomi", "Redmi", "OPPO", "Vivo", "Realme", "Google",
    "Motorola", "Nokia", "Nothing", "iQOO", "Lava", "Zeno", "Acer", "Honor", "POCO",
];

/// Canonical brand from a title (or a bare brand token).
///
/// Strips any leading condition wrappers, takes the first word and maps it through the
/// alias table; unknown words are title-cased. Returns an empty string when nothing
/// is left after the wrapper. Applying it twice gives the same result.
pub fn normalize_brand(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let mut rest = lowered.as_str();
    // Wrappers can stack: "Refurbished (Renewed) Apple ...".
    while let Some(m) = CONDITION_WRAPPER_RE.find(rest) {
        rest = rest[m.end()..].trim_start();
    }
    let Some(first) = rest.split_whitespace().next() else {
        return String::new();
    };

    BRAND_ALIASES
        .iter()
        .find(|(alias, _)| *alias == first)
        .map(|(_, brand)| brand.to_string())
        .unwrap_or_else(|| title_case(first))
}

/// Canonical condition grade from free text. Blank input means `Good`.
///
/// Substring checks run in priority order, so "Refurbished - Good" is `Good`.
/// "renewed" maps to `Refurbished`.
pub fn normalize_condition(text: &str) -> Condition {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return Condition::Good;
    }

    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    if has(&["excellent", "mint", "like new", "like-new"]) {
        Condition::Excellent
    } else if has(&["good", "great"]) {
        Condition::Good
    } else if has(&["fair", "average", "ok"]) {
        Condition::Fair
    } else if has(&["poor", "damaged"]) {
        Condition::Poor
    } else if has(&["refurbished", "renewed"]) {
        Condition::Refurbished
    } else {
        Condition::Other(capitalize(&lowered))
    }
}

/// Model name with condition qualifiers, leading tags and the brand prefix removed.
pub fn extract_model(name: &str) -> String {
    let name = QUALIFIER_RE.replace_all(name, "");
    let name = LEADING_TAG_RE.replace(&name, "");
    let name = BRAND_PREFIX_RE.replace(
        name.trim_start_matches(|c: char| c.is_whitespace() || c == '-'),
        "",
    );
    let name = OPEN_PAREN_RE.replace_all(&name, " (");
    let name = CLOSE_PAREN_RE.replace_all(&name, ")");
    let name = WHITESPACE_RE.replace_all(&name, " ");

    name.trim_matches(|c: char| c == ' ' || c == '-').trim().to_string()
}

/// Everything before the first `(`, `|` or `,`. Used where titles trail off into RAM, storage and colour details.
pub fn first_model_segment(model: &str) -> String {
    model
        .split(['(', '|', ','])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Numeric price from display text: `"₹24,999"` → `24999.0`.
///
/// Currency symbols and thousands separators are ignored. Returns `None` when no
/// number is present or the value is not a positive amount.
pub fn parse_price(text: &str) -> Option<f64> {
    let raw = PRICE_RE.find(text)?.as_str().replace(',', "");
    raw.parse::<f64>().ok().filter(|p| p.is_finite() && *p > 0.0)
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
