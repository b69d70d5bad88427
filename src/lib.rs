#![deny(clippy::unwrap_used)]

use itertools::Itertools;
use serde::Deserialize;

pub mod catalog;
pub mod category;
pub mod color;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod gallery;
pub mod price;
pub mod reconcile;
pub mod report;
pub mod service;

pub fn normalize_key(input: &str) -> String {
    input
        .to_lowercase()
        .replace(['_', '/', '\\', '—', '-', '–'], " ")
        .replace(|c: char| !c.is_alphanumeric() && !c.is_whitespace(), " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn truncate_chars(input: &str, max: usize) -> &str {
    if input.is_empty() || input.len() <= max {
        return input;
    }
    let mut end = 0usize;
    let mut count = 0usize;
    for (idx, ch) in input.char_indices() {
        if count >= max {
            break;
        }
        end = idx + ch.len_utf8();
        count += 1;
    }
    &input[..end]
}

/// Compact elapsed time for run logs, e.g. `1h 2m 5s`. Sub-second spans are
/// shown in milliseconds.
pub fn format_duration(duration: &std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.subsec_millis());
    }
    [(secs / 3600, 'h'), (secs / 60 % 60, 'm'), (secs % 60, 's')]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n}{unit}"))
        .join(" ")
}

pub fn parse_duration(duration: &str) -> Result<std::time::Duration, anyhow::Error> {
    let duration = duration
        .to_lowercase()
        .replace('.', "")
        .replace("сек", "s")
        .replace('с', "s")
        .replace("мин", "m")
        .replace('м', "m")
        .replace("час", "h")
        .replace('ч', "h");
    duration_str::parse(duration).map_err(|dur| anyhow::anyhow!("Unable to parse duration {dur}"))
}

pub fn deserialize_duration<'de, D>(de: D) -> Result<std::time::Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
pub mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn normalizes_keys() {
        assert_eq!("цена дроп", normalize_key("Цена/Дроп:"));
        assert_eq!("photo 1", normalize_key("photo_1"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!("Крос", truncate_chars("Кроссовки", 4));
        assert_eq!("abc", truncate_chars("abc", 10));
    }

    #[test]
    fn parses_durations() {
        assert_eq!(Duration::from_secs(30), parse_duration("30сек").unwrap());
        assert_eq!(Duration::from_secs(120), parse_duration("2m").unwrap());
    }

    #[test]
    fn formats_durations() {
        assert_eq!("1m 5s", format_duration(&Duration::from_secs(65)));
        assert_eq!("1h 2s", format_duration(&Duration::from_secs(3602)));
        assert_eq!("1s", format_duration(&Duration::from_millis(1500)));
        assert_eq!("250ms", format_duration(&Duration::from_millis(250)));
    }
}
