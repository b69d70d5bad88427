use crate::{normalize_key, truncate_chars};
use regex::Regex;
use serde::{Deserialize, Serialize};

const HAYSTACK_DESC_LIMIT: usize = 800;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub footwear: bool,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Model lines and brand literals, consulted when no keyword matched.
    #[serde(default)]
    pub brands: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryGuess {
    pub name: String,
    pub footwear: bool,
    /// Matched by a brand/model literal rather than a category keyword.
    pub by_brand: bool,
}

pub fn build_haystack(title: &str, description: &str) -> String {
    let desc = truncate_chars(description.trim(), HAYSTACK_DESC_LIMIT);
    let mut out = String::with_capacity(title.len() + 1 + desc.len());
    out.push_str(title);
    if !desc.is_empty() {
        out.push('\n');
        out.push_str(desc);
    }
    out
}

#[derive(Clone, Debug)]
struct PreparedCategory {
    name: String,
    footwear: bool,
    regex: Option<Regex>,
    brands: Vec<String>,
}

pub struct CategoryMatcher {
    ordered: Vec<PreparedCategory>,
    default: String,
}

impl CategoryMatcher {
    pub fn new(rules: &[CategoryRule], default: &str) -> Self {
        let ordered = rules
            .iter()
            .map(|r| {
                let regex = if r.patterns.is_empty() {
                    None
                } else {
                    let pattern = format!("(?i)(?:{})", r.patterns.join("|"));
                    Regex::new(&pattern)
                        .map_err(|err| log::warn!("Invalid patterns for category {}: {err}", r.name))
                        .ok()
                };
                PreparedCategory {
                    name: r.name.clone(),
                    footwear: r.footwear,
                    regex,
                    brands: r.brands.iter().map(|b| normalize_key(b)).filter(|b| !b.is_empty()).collect(),
                }
            })
            .collect();
        Self {
            ordered,
            default: default.to_string(),
        }
    }

    fn find(&self, haystack: &str) -> Option<(&PreparedCategory, bool)> {
        let haystack = haystack.trim();
        if haystack.is_empty() {
            return None;
        }
        if let Some(c) = self
            .ordered
            .iter()
            .find(|c| c.regex.as_ref().map(|re| re.is_match(haystack)).unwrap_or(false))
        {
            return Some((c, false));
        }
        let normalized = format!(" {} ", normalize_key(haystack));
        self.ordered
            .iter()
            .find(|c| c.brands.iter().any(|b| normalized.contains(&format!(" {b}"))))
            .map(|c| (c, true))
    }

    /// Category for a row; rows no rule recognizes land in the default one.
    pub fn guess(&self, title: &str, description: Option<&str>) -> CategoryGuess {
        let haystack = build_haystack(title, description.unwrap_or_default());
        match self.find(&haystack) {
            Some((c, by_brand)) => CategoryGuess {
                name: c.name.clone(),
                footwear: c.footwear,
                by_brand,
            },
            None => CategoryGuess {
                name: self.default.clone(),
                footwear: false,
                by_brand: false,
            },
        }
    }

    pub fn is_footwear(&self, title: &str) -> bool {
        self.find(title).map(|(c, _)| c.footwear).unwrap_or(false)
    }
}

/// Whether the title names one of the configured footwear brands.
pub fn is_known_brand(title: &str, brands: &[String]) -> bool {
    let normalized = format!(" {} ", normalize_key(title));
    brands
        .iter()
        .map(|b| normalize_key(b))
        .filter(|b| !b.is_empty())
        .any(|b| normalized.contains(&format!(" {b} ")))
}

/// Query for the listings search: the title, plus the category name when
/// the title itself carries no category keyword.
pub fn market_query(title: &str, guess: &CategoryGuess) -> String {
    let title = title.trim();
    if guess.by_brand {
        format!("{} {title}", guess.name.to_lowercase())
    } else {
        title.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;

    fn matcher() -> CategoryMatcher {
        let config = ImportConfig::default();
        CategoryMatcher::new(&config.categories, &config.default_category)
    }

    #[test]
    fn matches_keywords_first() {
        let m = matcher();
        assert_eq!("Обувь", m.guess("Кроссовки Nike Air Max 90", None).name);
        assert_eq!("Одежда", m.guess("Nike худи оверсайз", None).name);
        assert_eq!("Аксессуары", m.guess("Кепка Jordan", None).name);
        assert!(!m.guess("Кроссовки Nike", None).by_brand);
    }

    #[test]
    fn falls_back_to_brand_literals() {
        let m = matcher();
        let guess = m.guess("Nike Dunk Low Panda", None);
        assert_eq!("Обувь", guess.name);
        assert!(guess.footwear && guess.by_brand);
        assert!(m.is_footwear("New Balance 550"));
        assert!(!m.is_footwear("Model X"));
    }

    #[test]
    fn uses_description_and_default() {
        let m = matcher();
        assert_eq!("Сумки", m.guess("Model Y", Some("Вместительный рюкзак")).name);
        assert_eq!("Разное", m.guess("Model X", None).name);
    }

    #[test]
    fn detects_known_brands() {
        let brands = ImportConfig::default().price.footwear_brands;
        assert!(is_known_brand("Кроссовки Nike Air Max", &brands));
        assert!(is_known_brand("NEW BALANCE 2002R", &brands));
        assert!(!is_known_brand("Nikelab-like noname", &brands));
    }

    #[test]
    fn builds_market_query() {
        let m = matcher();
        assert_eq!("обувь Nike Dunk Low", market_query("Nike Dunk Low", &m.guess("Nike Dunk Low", None)));
        assert_eq!("Кроссовки Nike", market_query("Кроссовки Nike", &m.guess("Кроссовки Nike", None)));
    }
}
