use crate::extract::roles::{Role, RoleTable};
use derive_more::{Display, Error};
use encoding_rs::{Encoding, WINDOWS_1251, WINDOWS_1252};
use lazy_regex::regex;
use once_cell::sync::Lazy;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::time::Duration;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[allow(clippy::unwrap_used)]
static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());
#[allow(clippy::unwrap_used)]
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
#[allow(clippy::unwrap_used)]
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td, th").unwrap());
#[allow(clippy::unwrap_used)]
static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").unwrap());
#[allow(clippy::unwrap_used)]
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
#[allow(clippy::unwrap_used)]
static POST_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tgme_widget_message[data-post]").unwrap());
#[allow(clippy::unwrap_used)]
static POST_TEXT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tgme_widget_message_text").unwrap());
#[allow(clippy::unwrap_used)]
static POST_PHOTO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".tgme_widget_message_photo_wrap").unwrap());

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[display("spreadsheet")]
    Spreadsheet,
    #[display("catalog_html")]
    CatalogHtml,
    #[display("chat_channel")]
    ChatChannel,
    #[display("generic_html")]
    GenericHtml,
}

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("Network error: {_0}")]
    Network(reqwest_middleware::Error),
    #[display("Request timed out")]
    Timeout,
    #[display("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error(ignore)]
    #[display("Unable to parse source: {_0}")]
    Parse(String),
    #[display("Source returned an empty body")]
    Empty,
}

impl From<reqwest_middleware::Error> for FetchError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) if e.is_timeout() => FetchError::Timeout,
            err => FetchError::Network(err),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        reqwest_middleware::Error::from(err).into()
    }
}

impl From<csv::Error> for FetchError {
    fn from(err: csv::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TabularGrid {
    pub kind: SourceKind,
    pub url: String,
    pub rows: Vec<Vec<String>>,
}

/// HTTP client used for every outgoing request of a run: transient
/// failures (429, 5xx, connection errors) are retried with backoff.
pub fn build_client(timeout: Duration, retries: u32) -> Result<ClientWithMiddleware, anyhow::Error> {
    let client = reqwest::ClientBuilder::new()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .cookie_store(true)
        .build()?;
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(200), Duration::from_secs(8))
        .build_with_max_retries(retries);
    Ok(ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

/// Rewrites links to their raw tabular form: Google Sheets pages become CSV
/// exports, Telegram channel links become the public preview page.
pub fn normalize_source_url(url: &str) -> String {
    let url = url.trim();
    if let Some(c) = regex!(r"^https?://docs\.google\.com/spreadsheets/d/(e/)?([A-Za-z0-9_-]+)").captures(url) {
        let published = c.get(1).is_some();
        let id = c.get(2).map(|m| m.as_str()).unwrap_or_default();
        let gid = regex!(r"[#&?]gid=(\d+)")
            .captures(url)
            .and_then(|g| g.get(1))
            .map(|g| g.as_str());
        let mut res = if published {
            format!("https://docs.google.com/spreadsheets/d/e/{id}/pub?output=csv")
        } else {
            format!("https://docs.google.com/spreadsheets/d/{id}/export?format=csv")
        };
        if let Some(gid) = gid {
            res.push_str(&format!("&gid={gid}"));
        }
        return res;
    }
    if let Some(c) = regex!(r"^https?://(?:www\.)?t(?:elegram)?\.me/(?:s/)?([A-Za-z0-9_]{4,})/?$").captures(url) {
        let channel = c.get(1).map(|m| m.as_str()).unwrap_or_default();
        return format!("https://t.me/s/{channel}");
    }
    url.to_string()
}

pub fn detect_kind(url: &str, content_type: Option<&str>, body: &str) -> SourceKind {
    let content_type = content_type.unwrap_or_default().to_lowercase();
    let lower_url = url.to_lowercase();
    if content_type.contains("text/csv")
        || lower_url.contains("docs.google.com/spreadsheets")
        || lower_url.ends_with(".csv")
    {
        return SourceKind::Spreadsheet;
    }
    if lower_url.contains("://t.me/") || body.contains("tgme_widget_message") {
        return SourceKind::ChatChannel;
    }
    let head = crate::truncate_chars(body.trim_start(), 512);
    if !head.contains('<') && (head.contains(',') || head.contains(';') || head.contains('\t')) {
        return SourceKind::Spreadsheet;
    }
    if body.contains("<table") || body.contains("<TABLE") {
        SourceKind::CatalogHtml
    } else {
        SourceKind::GenericHtml
    }
}

/// Decodes with the declared charset, otherwise UTF-8 with a windows-1251
/// fallback, then repairs double-encoded lines.
pub fn decode_body(bytes: &[u8], charset: Option<&str>) -> String {
    let declared = charset
        .and_then(|c| Encoding::for_label(c.trim().as_bytes()))
        .filter(|e| *e != encoding_rs::UTF_8);
    let text = match declared {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => match std::str::from_utf8(bytes) {
            Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
            Err(_) => WINDOWS_1251.decode(bytes).0.into_owned(),
        },
    };
    repair_mojibake(&text)
}

fn reencode_as_utf8(line: &str, encoding: &'static Encoding) -> Option<String> {
    let (bytes, _, had_errors) = encoding.encode(line);
    if had_errors || bytes.iter().all(|b| b.is_ascii()) {
        return None;
    }
    let repaired = String::from_utf8(bytes.into_owned()).ok()?;
    (repaired.chars().count() < line.chars().count()).then_some(repaired)
}

/// Undoes UTF-8 text that was decoded as cp1251 (`РљСЂРѕСЃ…`) or cp1252
/// (`Ð¢Ð¾Ð²Ð°Ñ€`). Lines that are not valid UTF-8 once re-encoded are kept.
pub fn repair_mojibake(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            reencode_as_utf8(line, WINDOWS_1251)
                .or_else(|| reencode_as_utf8(line, WINDOWS_1252))
                .unwrap_or_else(|| line.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

pub fn parse_csv(text: &str) -> Result<Vec<Vec<String>>, FetchError> {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let delimiter = [b'\t', b';', b',']
        .into_iter()
        .max_by_key(|d| first_line.matches(*d as char).count())
        .unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let row = record?
            .iter()
            .map(|c| c.trim().to_string())
            .collect::<Vec<_>>();
        if !is_blank_row(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn table_cell(cell: ElementRef) -> String {
    let text = element_text(&cell);
    let label_only = regex!(
        r"(?i)^(?:фото|photo|foto|ссылка|посилання|link|тут|here|смотреть|дивитись|открыть)?\s*\d*$"
    )
    .is_match(&text);
    if !label_only {
        return text;
    }
    let refs = cell
        .select(&IMG_SELECTOR)
        .filter_map(|i| i.value().attr("src"))
        .chain(
            cell.select(&LINK_SELECTOR)
                .filter_map(|a| a.value().attr("href"))
                .filter(|h| h.starts_with("http") || h.starts_with("//")),
        )
        .collect::<Vec<_>>();
    if refs.is_empty() {
        text
    } else {
        refs.join(" ")
    }
}

/// Rows of the largest table on the page.
pub fn parse_html_table(html: &str) -> Vec<Vec<String>> {
    let document = Html::parse_document(html);
    let Some(table) = document
        .select(&TABLE_SELECTOR)
        .max_by_key(|t| t.select(&ROW_SELECTOR).count())
    else {
        return Vec::new();
    };
    table
        .select(&ROW_SELECTOR)
        .map(|tr| tr.select(&CELL_SELECTOR).map(table_cell).collect::<Vec<_>>())
        .filter(|row| !is_blank_row(row))
        .collect()
}

fn post_text(el: &ElementRef) -> String {
    let html = el.inner_html();
    let with_breaks = regex!(r"(?i)<br\s*/?>").replace_all(&html, "\n");
    Html::parse_fragment(&with_breaks)
        .root_element()
        .text()
        .collect::<String>()
}

fn background_image(style: &str) -> Option<String> {
    regex!(r#"background-image:\s*url\(['"]?([^'")]+)['"]?\)"#)
        .captures(style)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// One grid row per channel post. Lines shaped `Key: value` are placed by
/// the column role of the key, the first free line is the title and the
/// first currency-marked amount is the price.
pub fn chat_post_row(text: &str, photos: &[String], permalink: Option<&str>, roles: &RoleTable) -> Vec<String> {
    let mut cells = vec![String::new(); Role::ALL.len()];
    let column = |role: Role| Role::ALL.iter().position(|r| *r == role).unwrap_or_default();
    let mut description = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let keyed = regex!(r"^([^:]{1,30}):\s*(.+)$")
            .captures(line)
            .and_then(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .and_then(|(k, v)| roles.classify(k).map(|m| (m.role, v.trim())));
        if let Some((role, value)) = keyed {
            let cell = &mut cells[column(role)];
            if cell.is_empty() {
                *cell = value.to_string();
            }
            continue;
        }
        let title = &mut cells[column(Role::Title)];
        if title.is_empty() {
            let prices = market_price::extract_prices_from_text(line);
            let stripped = regex!(r"(?i)(?:\d{1,3}(?:[ \x{A0}]\d{3})+|\d+)(?:[.,]\d{1,2})?\s?(?:грн|₴|uah)\.?")
                .replace_all(line, "")
                .trim()
                .to_string();
            if !stripped.is_empty() {
                *title = stripped;
                if let Some(p) = prices.first() {
                    let price = &mut cells[column(Role::WholesalePrice)];
                    if price.is_empty() {
                        *price = p.to_string();
                    }
                }
                continue;
            }
        }
        let price = &mut cells[column(Role::WholesalePrice)];
        if price.is_empty() {
            if let Some(p) = market_price::extract_prices_from_text(line).first() {
                *price = p.to_string();
                continue;
            }
        }
        description.push(line.to_string());
    }
    let mut images = photos.to_vec();
    if images.is_empty() {
        images.extend(permalink.map(ToString::to_string));
    }
    if !images.is_empty() {
        let cell = &mut cells[column(Role::Image)];
        if !cell.is_empty() {
            cell.push(' ');
        }
        cell.push_str(&images.join(" "));
    }
    if !description.is_empty() && cells[column(Role::Description)].is_empty() {
        cells[column(Role::Description)] = description.join("\n");
    }
    cells
}

/// Public channel preview: a synthetic header followed by one row per post.
pub fn parse_chat_channel(html: &str, roles: &RoleTable) -> Vec<Vec<String>> {
    let document = Html::parse_document(html);
    let mut rows = vec![roles.synthetic_header()];
    for post in document.select(&POST_SELECTOR) {
        let text = post
            .select(&POST_TEXT_SELECTOR)
            .next()
            .map(|t| post_text(&t))
            .unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        let photos = post
            .select(&POST_PHOTO_SELECTOR)
            .filter_map(|p| p.value().attr("style"))
            .filter_map(background_image)
            .collect::<Vec<_>>();
        let permalink = post
            .value()
            .attr("data-post")
            .map(|p| format!("https://t.me/{p}"));
        rows.push(chat_post_row(&text, &photos, permalink.as_deref(), roles));
    }
    rows
}

pub fn parse_grid(kind: SourceKind, text: &str, roles: &RoleTable) -> Result<Vec<Vec<String>>, FetchError> {
    let rows = match kind {
        SourceKind::Spreadsheet => parse_csv(text)?,
        SourceKind::CatalogHtml => parse_html_table(text),
        SourceKind::ChatChannel => parse_chat_channel(text, roles),
        SourceKind::GenericHtml => {
            return Err(FetchError::Parse("page contains no table".to_string()));
        }
    };
    if rows.len() < 2 {
        return Err(FetchError::Parse(format!("{kind} source has no data rows")));
    }
    Ok(rows)
}

/// Downloads the source and returns its cells. Transient HTTP failures are
/// retried by the client; anything left is a per-source failure.
pub async fn fetch_grid(
    client: &ClientWithMiddleware,
    source_url: &str,
    roles: &RoleTable,
) -> Result<TabularGrid, FetchError> {
    let url = normalize_source_url(source_url);
    log::debug!("Fetching {url}");
    let resp = client.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url,
        });
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(ToString::to_string);
    let charset = content_type
        .as_deref()
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .and_then(|m| m.get_param(mime::CHARSET).map(|c| c.as_str().to_string()));
    let bytes = resp.bytes().await?;
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(FetchError::Empty);
    }
    let text = decode_body(&bytes, charset.as_deref());
    let kind = detect_kind(&url, content_type.as_deref(), &text);
    let rows = parse_grid(kind, &text, roles)?;
    log::info!("{url}: {kind} with {} rows", rows.len());
    Ok(TabularGrid { kind, url, rows })
}
