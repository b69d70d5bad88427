use anyhow::Context as AnyhowContext;
use lazy_regex::regex;
use once_cell::sync::Lazy;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use scraper::{Html, Selector};

#[allow(clippy::unwrap_used)]
static LISTING_PRICE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-testid=\"ad-price\"], .price, [itemprop=\"price\"]").unwrap()
});
#[allow(clippy::unwrap_used)]
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Placeholder in the search URL template replaced with the encoded query.
pub const QUERY_PLACEHOLDER: &str = "{query}";

#[derive(Clone)]
pub struct MarketPriceClient {
    client: ClientWithMiddleware,
    search_url: String,
}

impl MarketPriceClient {
    pub fn new(client: ClientWithMiddleware, search_url: impl Into<String>) -> Self {
        Self {
            client,
            search_url: search_url.into(),
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.trim().as_bytes()).collect();
        if self.search_url.contains(QUERY_PLACEHOLDER) {
            self.search_url.replace(QUERY_PLACEHOLDER, &encoded)
        } else {
            format!("{}{encoded}", self.search_url)
        }
    }

    /// Fetches the listings search page for `query` and returns every price
    /// sample found on it. Zero results is not an error.
    pub async fn lookup(&self, query: &str) -> Result<Vec<Decimal>, anyhow::Error> {
        let url = self.search_url(query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Unable to query listings search")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP {status} for {url}"));
        }
        let body = resp.text().await?;
        let prices = extract_prices(&body);
        log::debug!("{} market samples for {query:?}", prices.len());
        Ok(prices)
    }
}

fn parse_amount(int_part: &str, frac_part: Option<&str>) -> Option<Decimal> {
    let digits = int_part
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        return None;
    }
    let raw = match frac_part {
        Some(f) if !f.is_empty() => format!("{digits}.{f}"),
        _ => digits,
    };
    Decimal::from_str_exact(&raw).ok()
}

/// Bare currency-marked numbers from free text: `4 900 грн`, `4900₴`,
/// `₴ 4,900`, `$120.50`. Numbers without a currency mark are ignored.
pub fn extract_prices_from_text(text: &str) -> Vec<Decimal> {
    let suffixed = regex!(
        r"(?i)(\d{1,3}(?:[ \x{A0}\x{202F}]\d{3})+|\d+)(?:[.,](\d{1,2}))?\s?(?:грн|₴|uah|руб|₽|rub)"
    );
    let prefixed = regex!(r"(?:₴|\$|€|₽)\s?(\d{1,3}(?:[ ,\x{A0}]\d{3})+|\d+)(?:\.(\d{1,2}))?");
    let mut res = Vec::new();
    for c in suffixed.captures_iter(text) {
        if let Some(v) = c
            .get(1)
            .and_then(|i| parse_amount(i.as_str(), c.get(2).map(|f| f.as_str())))
        {
            res.push(v);
        }
    }
    for c in prefixed.captures_iter(text) {
        if let Some(v) = c
            .get(1)
            .and_then(|i| parse_amount(i.as_str(), c.get(2).map(|f| f.as_str())))
        {
            res.push(v);
        }
    }
    res
}

/// Prices from a listings page. Dedicated price elements are preferred; the
/// whole body text is scanned when the page has none.
pub fn extract_prices(body: &str) -> Vec<Decimal> {
    let document = Html::parse_document(body);
    let from_elements = document
        .select(&LISTING_PRICE_SELECTOR)
        .flat_map(|e| extract_prices_from_text(&e.text().collect::<Vec<_>>().join(" ")))
        .collect::<Vec<_>>();
    if !from_elements.is_empty() {
        return from_elements;
    }
    document
        .select(&BODY_SELECTOR)
        .next()
        .map(|b| extract_prices_from_text(&b.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_else(|| extract_prices_from_text(body))
}
