use lazy_regex::regex;
use std::collections::HashSet;

/// Letter sizes in ascending order; ranges like `S-XL` expand over it.
pub const LETTER_SCALE: [&str; 10] = ["XXS", "XS", "S", "M", "L", "XL", "XXL", "XXXL", "4XL", "5XL"];

/// Longest range expanded; anything wider is treated as noise.
const MAX_RANGE_LEN: usize = 20;

pub const ONE_SIZE: &str = "ONE SIZE";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeEntry {
    pub label: String,
    pub quantity: Option<u32>,
}

impl SizeEntry {
    fn new(label: String) -> Self {
        Self { label, quantity: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeNotation {
    Empty,
    Single,
    /// A bare range such as `41-45`: the domain of sizes, not availability.
    Range,
    List,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeSpec {
    pub entries: Vec<SizeEntry>,
    pub notation: SizeNotation,
}

impl SizeSpec {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            notation: SizeNotation::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    pub fn has_quantities(&self) -> bool {
        self.entries.iter().any(|e| e.quantity.is_some())
    }
}

/// Uppercases letter sizes, folds `2XL` into `XXL` and drops `.0`.
pub fn normalize_label(raw: &str) -> String {
    let raw = raw.trim().replace(',', ".").to_uppercase();
    let raw = match raw.as_str() {
        "2XL" => "XXL".to_string(),
        "3XL" => "XXXL".to_string(),
        _ => raw,
    };
    match raw.strip_suffix(".0") {
        Some(whole) if whole.chars().all(|c| c.is_ascii_digit()) => whole.to_string(),
        _ => raw,
    }
}

fn expand_numeric(from: &str, to: &str) -> Option<Vec<String>> {
    let from: f32 = from.parse().ok()?;
    let to: f32 = to.parse().ok()?;
    let half = from.fract() != 0.0 || to.fract() != 0.0;
    let step = if half { 0.5 } else { 1.0 };
    if from >= to || ((to - from) / step) as usize + 1 > MAX_RANGE_LEN {
        return None;
    }
    let mut res = Vec::new();
    let mut cur = from;
    while cur <= to + f32::EPSILON {
        res.push(normalize_label(&format!("{cur}")));
        cur += step;
    }
    Some(res)
}

fn expand_letters(from: &str, to: &str) -> Option<Vec<String>> {
    let from = LETTER_SCALE.iter().position(|s| *s == from)?;
    let to = LETTER_SCALE.iter().position(|s| *s == to)?;
    (from < to).then(|| LETTER_SCALE[from..=to].iter().map(ToString::to_string).collect())
}

fn is_numeric(label: &str) -> bool {
    !label.is_empty() && label.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Parses size text: lists (`S, M, L`, `40;41`), ranges (`41-45`, `S-XL`),
/// per-size quantities (`42(3шт)`) and half sizes (`42,5`).
pub fn parse_sizes(text: &str) -> SizeSpec {
    let text = text.trim();
    if text.is_empty() {
        return SizeSpec::empty();
    }
    if regex!(r"(?i)^(?:one\s*size|onesize|os|универсальн\w*|універсальн\w*|єдиний)$").is_match(text) {
        return SizeSpec {
            entries: vec![SizeEntry::new(ONE_SIZE.to_string())],
            notation: SizeNotation::Single,
        };
    }
    let text = text.replace(['–', '—'], "-");
    let text = regex!(r"(\d{2}),5\b").replace_all(&text, "$1.5");
    let item = regex!(
        r"(?i)\b(\d{1,3}(?:\.5)?|[2-5]?X{0,3}[SML])\b(?:\s*-\s*\b(\d{1,3}(?:\.5)?|[2-5]?X{0,3}[SML])\b)?(?:\s*\(\s*(\d+)\s*[^)]*\))?"
    );
    let mut entries: Vec<SizeEntry> = Vec::new();
    let mut seen = HashSet::new();
    let mut ranges = 0usize;
    let mut singles = 0usize;
    let mut push = |entry: SizeEntry, entries: &mut Vec<SizeEntry>| {
        if seen.insert(entry.label.clone()) {
            entries.push(entry);
        }
    };
    for c in item.captures_iter(&text) {
        let Some(first) = c.get(1).map(|m| normalize_label(m.as_str())) else {
            continue;
        };
        let quantity = c.get(3).and_then(|q| q.as_str().parse::<u32>().ok());
        if let Some(second) = c.get(2).map(|m| normalize_label(m.as_str())) {
            let expanded = if is_numeric(&first) && is_numeric(&second) {
                expand_numeric(&first, &second)
            } else {
                expand_letters(&first, &second)
            };
            if let Some(expanded) = expanded {
                ranges += 1;
                for label in expanded {
                    push(SizeEntry::new(label), &mut entries);
                }
                continue;
            }
            singles += 2;
            push(SizeEntry::new(first), &mut entries);
            push(
                SizeEntry {
                    label: second,
                    quantity,
                },
                &mut entries,
            );
            continue;
        }
        singles += 1;
        push(
            SizeEntry {
                label: first,
                quantity,
            },
            &mut entries,
        );
    }
    let notation = match (ranges, singles) {
        (0, 0) => SizeNotation::Empty,
        (0, 1) => SizeNotation::Single,
        (1, 0) => SizeNotation::Range,
        _ => SizeNotation::List,
    };
    SizeSpec { entries, notation }
}
