use crate::extract::sizes::{parse_sizes, SizeEntry, SizeNotation, SizeSpec};
use lazy_regex::regex;
use std::collections::BTreeMap;

/// What a row's stock cell says.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StockSignal {
    /// Sizes listed as available, optionally with quantities.
    PerSize(Vec<SizeEntry>),
    /// One number for the whole row.
    Total(u32),
    /// Availability phrase without sizes or numbers.
    Available,
    Unavailable,
    Unknown,
}

pub fn parse_stock(text: Option<&str>, domain: &SizeSpec) -> StockSignal {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return StockSignal::Unknown;
    };
    let lower = text.to_lowercase();
    let negative = regex!(
        r"(?i)^(?:нет|нема|немає|отсутству\w*|продано|распродано|закончил\w*|sold(?:\s*out)?|out\s+of\s+stock|no)\b"
    );
    let bare = lower.trim_end_matches(['.', '!']);
    // a leading negation covers whatever sizes follow it
    if negative.is_match(bare) || matches!(bare, "0" | "-" | "—" | "❌" | "✖" | "✖️") {
        return StockSignal::Unavailable;
    }
    let positive = regex!(
        r"(?i)(?:\b(?:есть в наличии|в наличии|наличие|в наявності|є в наявності|наявність|есть|є|in stock|available|да|yes)\b|\+|✅|✔️?)\s*:?"
    );
    let has_phrase = positive.is_match(&lower);
    let rest = positive.replace_all(&lower, " ");
    let rest = rest.trim();
    if rest.chars().any(|c| c.is_ascii_digit()) || regex!(r"(?i)\b[2-5]?X{0,3}[SML]\b").is_match(rest) {
        if let Some(n) = regex!(r"^(\d+)\s*(?:шт\.?|pcs|пар[аы]?)?$")
            .captures(rest)
            .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
        {
            let label = n.to_string();
            if !domain.contains(&label) {
                return StockSignal::Total(n);
            }
        }
        let listed = parse_sizes(rest);
        if listed.notation == SizeNotation::Range {
            // a range only bounds the sizes, it says nothing about stock
            return if has_phrase {
                StockSignal::Available
            } else {
                StockSignal::Unknown
            };
        }
        let known = domain.is_empty() || listed.entries.iter().all(|e| domain.contains(&e.label));
        if !listed.is_empty() && known {
            return StockSignal::PerSize(listed.entries);
        }
        return StockSignal::Unknown;
    }
    if has_phrase {
        StockSignal::Available
    } else {
        StockSignal::Unknown
    }
}

/// Per-size stock decided for one row. `None` stands for the variant
/// without a size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StockPlan {
    /// Mentioned sizes get their quantity, every other size in scope is
    /// zeroed.
    Explicit(BTreeMap<Option<String>, u32>),
    /// One total spread over every size and color variant of the row,
    /// remainder to the first ones. Sizes outside are zeroed.
    Split {
        sizes: Vec<Option<String>>,
        colors: usize,
        total: u32,
    },
    /// Listed sizes get a quantity, nothing else is touched.
    Inferred(BTreeMap<Option<String>, u32>),
    Keep,
}

impl StockPlan {
    /// Quantity for the variant of `size` and the row's `color`-th color.
    /// `None` keeps whatever is stored (zero for new variants).
    pub fn quantity(&self, size: Option<&str>, color: usize) -> Option<u32> {
        let key = size.map(ToString::to_string);
        match self {
            StockPlan::Explicit(q) => Some(q.get(&key).copied().unwrap_or(0)),
            StockPlan::Split { sizes, colors, total } => {
                let Some(idx) = sizes.iter().position(|s| *s == key) else {
                    return Some(0);
                };
                let colors = (*colors).max(1);
                let n = (sizes.len() * colors) as u32;
                let i = (idx * colors + color.min(colors - 1)) as u32;
                Some(total / n + u32::from(i < total % n))
            }
            StockPlan::Inferred(q) => q.get(&key).copied(),
            StockPlan::Keep => None,
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, StockPlan::Explicit(_) | StockPlan::Split { .. })
    }

    pub fn mentioned(&self) -> Vec<Option<&str>> {
        match self {
            StockPlan::Explicit(q) | StockPlan::Inferred(q) => q.keys().map(Option::as_deref).collect(),
            StockPlan::Split { sizes, .. } => sizes.iter().map(Option::as_deref).collect(),
            StockPlan::Keep => Vec::new(),
        }
    }
}

fn keys(sizes: &SizeSpec) -> Vec<Option<String>> {
    if sizes.is_empty() {
        vec![None]
    } else {
        sizes.entries.iter().map(|e| Some(e.label.clone())).collect()
    }
}

/// Sizes the row's variants are built for. The stock cell can name the
/// sizes when the size cell is empty.
pub fn size_domain(sizes: &SizeSpec, signal: &StockSignal) -> Vec<String> {
    match signal {
        StockSignal::PerSize(entries) if sizes.is_empty() => entries.iter().map(|e| e.label.clone()).collect(),
        _ => sizes.labels().into_iter().map(ToString::to_string).collect(),
    }
}

/// Resolves stock with a strict precedence: explicit per-size list, then a
/// single total split across the row's `colors` x sizes variants, then
/// availability phrases or supplier defaults for listed sizes. Plain ranges
/// never mark sizes as available.
pub fn plan_stock(
    sizes: &SizeSpec,
    signal: &StockSignal,
    colors: usize,
    defaults_available: bool,
    default_quantity: u32,
) -> StockPlan {
    match signal {
        StockSignal::PerSize(entries) => StockPlan::Explicit(
            entries
                .iter()
                .map(|e| (Some(e.label.clone()), e.quantity.unwrap_or(default_quantity)))
                .collect(),
        ),
        _ if sizes.has_quantities() => StockPlan::Explicit(
            sizes
                .entries
                .iter()
                .map(|e| (Some(e.label.clone()), e.quantity.unwrap_or(default_quantity)))
                .collect(),
        ),
        StockSignal::Total(total) => StockPlan::Split {
            sizes: keys(sizes),
            colors: colors.max(1),
            total: *total,
        },
        StockSignal::Unavailable => StockPlan::Explicit(BTreeMap::new()),
        StockSignal::Available | StockSignal::Unknown
            if matches!(signal, StockSignal::Available) || defaults_available =>
        {
            match sizes.notation {
                SizeNotation::Range => StockPlan::Keep,
                _ => StockPlan::Inferred(keys(sizes).into_iter().map(|k| (k, default_quantity)).collect()),
            }
        }
        StockSignal::Available | StockSignal::Unknown => StockPlan::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(size_text: &str, stock: Option<&str>, colors: usize, defaults: bool) -> (Vec<String>, StockPlan) {
        let sizes = parse_sizes(size_text);
        let signal = parse_stock(stock, &sizes);
        (size_domain(&sizes, &signal), plan_stock(&sizes, &signal, colors, defaults, 1))
    }

    fn in_stock(domain: &[String], plan: &StockPlan) -> Vec<String> {
        domain
            .iter()
            .filter(|s| plan.quantity(Some(s), 0).unwrap_or(0) > 0)
            .cloned()
            .collect()
    }

    fn listed(signal: StockSignal) -> Vec<String> {
        match signal {
            StockSignal::PerSize(e) => e.into_iter().map(|e| e.label).collect(),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn classifies_stock_cells() {
        let domain = parse_sizes("41-45");
        assert_eq!(StockSignal::Unknown, parse_stock(None, &domain));
        assert_eq!(StockSignal::Unknown, parse_stock(Some("  "), &domain));
        assert_eq!(StockSignal::Unavailable, parse_stock(Some("Нет"), &domain));
        assert_eq!(StockSignal::Unavailable, parse_stock(Some("0"), &domain));
        assert_eq!(StockSignal::Unavailable, parse_stock(Some("Sold out!"), &domain));
        assert_eq!(StockSignal::Available, parse_stock(Some("В наличии"), &domain));
        assert_eq!(StockSignal::Available, parse_stock(Some("є"), &domain));
        assert_eq!(StockSignal::Total(3), parse_stock(Some("3 шт"), &domain));
        assert_eq!(vec!["42"], listed(parse_stock(Some("42"), &domain)));
        assert_eq!(vec!["42", "43"], listed(parse_stock(Some("в наличии: 42, 43"), &domain)));
        assert_eq!(StockSignal::Unknown, parse_stock(Some("41-45"), &domain));
        assert_eq!(StockSignal::Available, parse_stock(Some("есть 41-45"), &domain));
        assert_eq!(StockSignal::Unknown, parse_stock(Some("38, 39"), &domain));
    }

    #[test]
    fn negated_sizes_are_not_in_stock() {
        let domain = parse_sizes("41-45");
        for cell in ["нет 42", "немає 42", "продано 41, 42", "нет: 42", "Нема 43", "out of stock 44"] {
            assert_eq!(StockSignal::Unavailable, parse_stock(Some(cell), &domain), "{cell}");
        }
        let (domain, plan) = planned("41-45", Some("немає 42"), 1, true);
        assert!(plan.is_explicit());
        assert!(in_stock(&domain, &plan).is_empty());
    }

    #[test]
    fn bare_range_marks_nothing_in_stock() {
        let (domain, plan) = planned("41-45", None, 1, false);
        assert_eq!(5, domain.len());
        assert_eq!(StockPlan::Keep, plan);
        assert!(in_stock(&domain, &plan).is_empty());
        let (_, plan) = planned("41-45", Some("в наличии"), 1, true);
        assert_eq!(StockPlan::Keep, plan);
    }

    #[test]
    fn explicit_subset_zeroes_the_rest() {
        let (domain, plan) = planned("41-45", Some("42, 44"), 1, false);
        assert!(plan.is_explicit());
        assert_eq!(vec!["42", "44"], in_stock(&domain, &plan));
        assert_eq!(Some(0), plan.quantity(Some("41"), 0));
        assert_eq!(Some(0), plan.quantity(Some("46"), 0));
    }

    #[test]
    fn single_stock_size_in_range() {
        let (domain, plan) = planned("41-45", Some("42"), 1, false);
        assert_eq!(vec!["42"], in_stock(&domain, &plan));
    }

    #[test]
    fn quantities_from_size_cell() {
        let (domain, plan) = planned("41(2шт), 42(3шт)", None, 1, false);
        assert_eq!(vec!["41", "42"], domain);
        assert_eq!(Some(3), plan.quantity(Some("42"), 0));
        assert_eq!(Some(0), plan.quantity(Some("43"), 0));
    }

    #[test]
    fn total_is_split_across_sizes() {
        let (_, plan) = planned("S, M, L", Some("4"), 1, false);
        assert_eq!(Some(2), plan.quantity(Some("S"), 0));
        assert_eq!(Some(1), plan.quantity(Some("M"), 0));
        assert_eq!(Some(1), plan.quantity(Some("L"), 0));
        assert_eq!(Some(0), plan.quantity(Some("XL"), 0));
        let (_, plan) = planned("", Some("7"), 1, false);
        assert_eq!(Some(7), plan.quantity(None, 0));
    }

    #[test]
    fn total_is_split_across_colors() {
        let (domain, plan) = planned("40, 41", Some("4 шт"), 2, false);
        let per_variant = domain
            .iter()
            .flat_map(|s| (0..2).map(|c| plan.quantity(Some(s), c).unwrap_or(0)).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(vec![1, 1, 1, 1], per_variant);

        let (domain, plan) = planned("40, 41", Some("5"), 2, false);
        let total: u32 = domain
            .iter()
            .flat_map(|s| (0..2).map(|c| plan.quantity(Some(s), c).unwrap_or(0)).collect::<Vec<_>>())
            .sum();
        assert_eq!(5, total);
        assert_eq!(Some(2), plan.quantity(Some("40"), 0));
        assert_eq!(Some(1), plan.quantity(Some("41"), 1));
    }

    #[test]
    fn listed_sizes_use_availability_defaults() {
        let (domain, plan) = planned("40, 41, 42", Some("есть"), 1, false);
        assert_eq!(vec!["40", "41", "42"], in_stock(&domain, &plan));
        assert!(!plan.is_explicit());
        assert_eq!(None, plan.quantity(Some("43"), 0));

        let (domain, plan) = planned("40, 41, 42", None, 1, true);
        assert_eq!(3, in_stock(&domain, &plan).len());
        let (_, plan) = planned("40, 41, 42", None, 1, false);
        assert_eq!(StockPlan::Keep, plan);
    }

    #[test]
    fn stock_cell_names_sizes_when_size_cell_is_empty() {
        let (domain, plan) = planned("", Some("в наличии: 40, 41"), 1, false);
        assert_eq!(vec!["40", "41"], domain);
        assert_eq!(vec!["40", "41"], in_stock(&domain, &plan));
    }

    #[test]
    fn unavailable_zeroes_everything() {
        let (_, plan) = planned("40, 41", Some("нет в наличии"), 1, true);
        assert_eq!(Some(0), plan.quantity(Some("40"), 0));
        assert_eq!(Some(0), plan.quantity(None, 0));
    }
}
