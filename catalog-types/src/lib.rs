use derive_more::Display;
use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod dictionary;
pub mod product;
pub mod source;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[repr(u8)]
pub enum Availability {
    #[display("Нет в наличии")]
    NotAvailable = 0,
    #[display("В наличии")]
    Available = 1,
}

impl From<u32> for Availability {
    fn from(qty: u32) -> Self {
        match qty {
            0 => Self::NotAvailable,
            _ => Self::Available,
        }
    }
}

fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'ґ' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "e",
        'є' => "ye",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'і' => "i",
        'ї' => "yi",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' => "",
        'ы' => "y",
        'ь' => "",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    })
}

/// Lowercases, folds `ё` and collapses punctuation and whitespace runs into
/// single spaces. Two titles that differ only in casing or separators
/// normalize to the same string.
pub fn normalize_title(input: &str) -> String {
    input
        .to_lowercase()
        .replace('ё', "е")
        .replace(|c: char| !c.is_alphanumeric() && !c.is_whitespace() && c != '.', " ")
        .split_whitespace()
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// ASCII slug with cyrillic transliteration: `Кроссовки Nike 90` -> `krossovki-nike-90`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if let Some(t) = transliterate(ch) {
            if !t.is_empty() {
                out.push_str(t);
                last_dash = false;
            }
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Picks the first of `base`, `base-2`, `base-3`… rejected by `taken`.
pub fn unique_slug(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let base = if base.is_empty() { "item" } else { base };
    if !taken(base) {
        return base.to_string();
    }
    (2usize..)
        .map(|n| format!("{base}-{n}"))
        .find(|s| !taken(s))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_cyrillic() {
        assert_eq!("krossovki-nike-air-max-90", slugify("Кроссовки Nike Air-Max 90"));
        assert_eq!("futbolka-chorna", slugify("  Футболка  (чорна)! "));
    }

    #[test]
    fn normalizes_titles() {
        assert_eq!("nike air max 90", normalize_title("NIKE  Air-Max/90"));
        assert_eq!("черный худи", normalize_title("Чёрный, худи"));
    }

    #[test]
    fn picks_free_slug() {
        let taken = ["model-x", "model-x-2"];
        assert_eq!("model-x-3", unique_slug("model-x", |s| taken.contains(&s)));
        assert_eq!("model-y", unique_slug("model-y", |s| taken.contains(&s)));
    }
}
