use crate::category::CategoryMatcher;
use crate::color::palette_token;
use lazy_regex::regex;
use roles::{Role, RoleTable};
use rust_decimal::Decimal;
use std::collections::HashSet;

pub mod roles;
pub mod sizes;

/// One normalized item from a supplier grid.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogRow {
    /// Index of the row in the source grid.
    pub line: usize,
    pub title: String,
    pub wholesale_price: Decimal,
    pub retail_reference_price: Option<Decimal>,
    pub color_text: Option<String>,
    pub size_text: Option<String>,
    pub stock_text: Option<String>,
    pub image_refs: Vec<String>,
    pub description: Option<String>,
}

const STATUS_ONLY: [&str; 20] = [
    "в наличии",
    "есть в наличии",
    "нет в наличии",
    "есть",
    "нет",
    "под заказ",
    "продано",
    "распродано",
    "закончились",
    "наявність",
    "в наявності",
    "є в наявності",
    "немає",
    "немає в наявності",
    "sold",
    "sold out",
    "in stock",
    "out of stock",
    "new",
    "новинка",
];

/// First number in the cell: `4 900 грн`, `4,900`, `4900,50`, `1.250`.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let text = text.replace(['\u{a0}', '\u{202f}'], " ");
    let c = regex!(r"(\d{1,3}(?:[ ,.]\d{3})+|\d+)(?:[.,](\d{1,2}))?(?:\D|$)").captures(&text)?;
    let int_part = c
        .get(1)?
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    let raw = match c.get(2) {
        Some(frac) => format!("{int_part}.{}", frac.as_str()),
        None => int_part,
    };
    Decimal::from_str_exact(&raw).ok()
}

/// URL-like tokens of an image cell; numbers, short words and other noise
/// are dropped.
pub fn parse_image_refs(cell: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    cell.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|'))
        .map(|t| t.trim_matches(|c: char| matches!(c, '"' | '\'' | '(' | ')' | '<' | '>')))
        .filter(|t| t.len() >= 8 && t.contains('.'))
        .filter_map(|t| {
            if t.starts_with("http://") || t.starts_with("https://") {
                Some(t.to_string())
            } else if let Some(rest) = t.strip_prefix("//") {
                Some(format!("https://{rest}"))
            } else if t.starts_with("www.") || t.starts_with("t.me/") {
                Some(format!("https://{t}"))
            } else {
                None
            }
        })
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CleanTitle {
    pub title: String,
    pub color: Option<String>,
    pub sizes: Option<String>,
}

fn strip_trailing<'a>(title: &'a str, re: &regex::Regex) -> Option<(&'a str, &'a str)> {
    let c = re.captures(title)?;
    let whole = c.get(0)?;
    let rest = title[..whole.start()].trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | '/'));
    if rest.trim().is_empty() {
        return None;
    }
    Some((rest, c.get(1)?.as_str()))
}

fn strip_trailing_color(title: &str) -> Option<(String, String)> {
    let (head, last) = title.trim_end_matches(['.', ',', ')']).rsplit_once(char::is_whitespace)?;
    let last = last.trim_start_matches('(');
    palette_token(last)?;
    let head = head.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | '/' | '('));
    (!head.trim().is_empty()).then(|| (head.to_string(), last.to_string()))
}

fn strip_trailing_sizes(title: &str, footwear: bool) -> Option<(String, String)> {
    let letters = regex!(
        r"\s\(?((?:XXS|XS|S|M|L|XL|XXL|XXXL|[2-5]XL)(?:\s*[-–,/]\s*(?:XXS|XS|S|M|L|XL|XXL|XXXL|[2-5]XL))+)\)?\s*$"
    );
    if let Some((rest, sizes)) = strip_trailing(title, letters) {
        return Some((rest.to_string(), sizes.to_string()));
    }
    if !footwear {
        return None;
    }
    let numeric = regex!(
        r"\s\(?(\d{2}(?:[.,]5)?(?:\s*[-–]\s*\d{2}(?:[.,]5)?|(?:\s*[,;/]\s*\d{2}(?:[.,]5)?)+))\)?\s*$"
    );
    if let Some((rest, sizes)) = strip_trailing(title, numeric) {
        return Some((rest.to_string(), sizes.to_string()));
    }
    let single = regex!(r"\s(\d{2}(?:[.,]5)?)\s*$");
    let (rest, size) = strip_trailing(title, single)?;
    let value: f32 = size.replace(',', ".").parse().ok()?;
    (33.0..=48.0)
        .contains(&value)
        .then(|| (rest.to_string(), size.to_string()))
}

/// Separates what suppliers glue onto titles: article codes, explicitly
/// marked size lists, trailing sizes and a trailing palette color. Bare
/// trailing numbers become sizes only for footwear.
pub fn clean_title(raw: &str, footwear: bool) -> CleanTitle {
    let mut title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    title = title
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_string();
    title = regex!(r"(?i)(?:^|\s)\(?(?:арт\.?|артикул|код|sku|art\.?)\s*[:#№]?\s*[\w\-/.]+\)?")
        .replace_all(&title, "")
        .to_string();
    let mut sizes = None;
    let marked = regex!(
        r"(?i)[\s,(]*(?:\bразмеры?|\bрозміри?|\bразм\.?|\bр-р|\bр\.|\bsizes?)\s*[:\-]?\s*((?:\d{2,3}(?:[.,]5)?|[2-5]?X{0,3}[SML]\b)(?:\s*[-–,;/]\s*(?:\d{2,3}(?:[.,]5)?|[2-5]?X{0,3}[SML]\b)|\s*\(\d+\s*шт\.?\))*)\)?"
    );
    if let Some(c) = marked.captures(&title) {
        if let (Some(whole), Some(list)) = (c.get(0), c.get(1)) {
            let rest = format!("{} {}", &title[..whole.start()], &title[whole.end()..]);
            if !rest.trim().is_empty() {
                sizes = Some(list.as_str().trim().to_string());
                title = rest;
            }
        }
    }
    title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut color = None;
    for _ in 0..2 {
        if color.is_none() {
            if let Some((rest, c)) = strip_trailing_color(&title) {
                title = rest;
                color = Some(c);
            }
        }
        if sizes.is_none() {
            if let Some((rest, s)) = strip_trailing_sizes(&title, footwear) {
                title = rest;
                sizes = Some(s);
            }
        }
    }
    CleanTitle {
        title: title.trim().to_string(),
        color,
        sizes,
    }
}

fn is_status_only(title: &str) -> bool {
    let normalized = crate::normalize_key(title);
    normalized.is_empty()
        || !normalized.chars().any(|c| c.is_alphabetic())
        || STATUS_ONLY.contains(&normalized.as_str())
}

/// Turns a raw grid into catalog rows. Rows without a title, without a
/// plausible wholesale price or with a status-only title are skipped.
pub fn extract_rows(
    grid: &[Vec<String>],
    table: &RoleTable,
    categories: &CategoryMatcher,
    min_price: Decimal,
) -> Vec<CatalogRow> {
    let header = table.find_header(grid);
    let roles = match header {
        Some(i) => table.resolve(&grid[i]),
        None => table.resolve(&[]),
    };
    let first_data = header.map(|i| i + 1).unwrap_or(0);
    let mut skipped = 0usize;
    let mut rows = Vec::new();
    for (line, cells) in grid.iter().enumerate().skip(first_data) {
        let Some(raw_title) = roles.cell(Role::Title, cells) else {
            skipped += 1;
            continue;
        };
        let Some(wholesale_price) = roles
            .cell(Role::WholesalePrice, cells)
            .and_then(parse_price)
            .filter(|p| *p > Decimal::ONE && *p >= min_price)
        else {
            skipped += 1;
            continue;
        };
        let cleaned = clean_title(raw_title, categories.is_footwear(raw_title));
        if is_status_only(&cleaned.title) {
            skipped += 1;
            continue;
        }
        let own = |role: Role| roles.cell(role, cells).map(ToString::to_string);
        rows.push(CatalogRow {
            line,
            title: cleaned.title,
            wholesale_price,
            retail_reference_price: roles
                .cell(Role::RetailReferencePrice, cells)
                .and_then(parse_price)
                .filter(|p| *p > Decimal::ONE),
            color_text: own(Role::Color).or(cleaned.color),
            size_text: own(Role::Size).or(cleaned.sizes),
            stock_text: own(Role::Stock),
            image_refs: roles
                .cell(Role::Image, cells)
                .map(parse_image_refs)
                .unwrap_or_default(),
            description: own(Role::Description),
        });
    }
    if skipped > 0 {
        log::debug!("Skipped {skipped} rows without title or price");
    }
    rows
}
