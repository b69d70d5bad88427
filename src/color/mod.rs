use derive_more::Display;
use lazy_regex::regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub mod classify;
pub mod kmeans;
pub mod lab;

pub use classify::{ColorVerdict, DominantColor};
pub use lab::Lab;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[serde(rename_all = "snake_case")]
pub enum ColorName {
    #[display("black")]
    Black,
    #[display("white")]
    White,
    #[display("gray")]
    Gray,
    #[display("beige")]
    Beige,
    #[display("brown")]
    Brown,
    #[display("red")]
    Red,
    #[display("orange")]
    Orange,
    #[display("yellow")]
    Yellow,
    #[display("green")]
    Green,
    #[display("blue")]
    Blue,
    #[display("purple")]
    Purple,
    #[display("pink")]
    Pink,
}

impl ColorName {
    pub const ALL: [ColorName; 12] = [
        ColorName::Black,
        ColorName::White,
        ColorName::Gray,
        ColorName::Beige,
        ColorName::Brown,
        ColorName::Red,
        ColorName::Orange,
        ColorName::Yellow,
        ColorName::Green,
        ColorName::Blue,
        ColorName::Purple,
        ColorName::Pink,
    ];

    pub fn is_neutral(&self) -> bool {
        matches!(self, ColorName::Black | ColorName::White | ColorName::Gray)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ColorName::Black => "Черный",
            ColorName::White => "Белый",
            ColorName::Gray => "Серый",
            ColorName::Beige => "Бежевый",
            ColorName::Brown => "Коричневый",
            ColorName::Red => "Красный",
            ColorName::Orange => "Оранжевый",
            ColorName::Yellow => "Желтый",
            ColorName::Green => "Зеленый",
            ColorName::Blue => "Синий",
            ColorName::Purple => "Фиолетовый",
            ColorName::Pink => "Розовый",
        }
    }

    fn stems(&self) -> &'static [&'static str] {
        match self {
            ColorName::Black => &["черн", "чорн", "black", "chern", "chorn", "noir"],
            ColorName::White => &[
                "бел", "біл", "молочн", "white", "ivory", "belyy", "belyi", "belaya", "beloe", "bilyi", "bilyy",
            ],
            ColorName::Gray => &[
                "сер", "сір", "графит", "графіт", "антрацит", "пепельн", "grey", "gray", "graphite", "silver",
                "seryy", "seryi", "seraya", "siryi",
            ],
            ColorName::Beige => &[
                "беж", "крем", "песоч", "пісоч", "капучино", "нюд", "beige", "cream", "sand", "nude", "bezh",
            ],
            ColorName::Brown => &[
                "корич", "шоколад", "кофе", "коньяч", "мокко", "кэмел", "brown", "chocolate", "coffee", "camel",
                "tan", "mocha", "korich",
            ],
            ColorName::Red => &[
                "красн", "червон", "бордо", "бордов", "вишн", "марсал", "алый", "red", "burgundy", "maroon",
                "cherry", "krasn", "chervon",
            ],
            ColorName::Orange => &[
                "оранж", "помаранч", "терракот", "корал", "orange", "coral", "terracotta", "oranzh",
            ],
            ColorName::Yellow => &[
                "желт", "жовт", "горчич", "гірчич", "лимон", "золот", "yellow", "mustard", "lemon", "gold",
                "zhelt", "zhovt",
            ],
            ColorName::Green => &[
                "зелен", "хаки", "олив", "мят", "м'ят", "изумруд", "салат", "green", "khaki", "olive", "mint",
                "emerald", "zelen",
            ],
            ColorName::Blue => &[
                "син", "голуб", "блакит", "бирюз", "бірюз", "индиго", "джинс", "blue", "navy", "denim", "teal",
                "turquoise", "indigo", "siniy", "sinij", "sinii", "golub",
            ],
            ColorName::Purple => &[
                "фиолет", "фіолет", "сирен", "бузков", "лилов", "лаванд", "purple", "violet", "lilac",
                "lavender", "fiolet",
            ],
            ColorName::Pink => &[
                "розов", "рожев", "фукси", "пудр", "малин", "pink", "fuchsia", "magenta", "rozov", "rozhev",
            ],
        }
    }
}

/// A palette color or `multi` for items in several distinct colors.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[serde(rename_all = "snake_case")]
pub enum ColorLabel {
    #[display("{_0}")]
    Named(ColorName),
    #[display("multi")]
    Multi,
}

impl ColorLabel {
    pub fn slug(&self) -> String {
        self.to_string()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ColorLabel::Named(name) => name.display_name(),
            ColorLabel::Multi => "Мульти",
        }
    }
}

const MULTI_STEMS: [&str; 9] = [
    "мульти", "разноцв", "різнокол", "цветн", "кольоров", "multi", "colorful", "mix", "микс",
];

const MODIFIERS: [&str; 10] = [
    "темно", "светло", "світло", "ярко", "яскраво", "dark", "light", "bright", "матов", "neon",
];

fn token_color(token: &str) -> Option<ColorName> {
    ColorName::ALL
        .iter()
        .copied()
        .find(|c| c.stems().iter().any(|s| token.starts_with(s)))
}

/// Maps free color text (RU/UA/EN, transliterated) onto the palette. Text
/// naming two or more palette colors is `multi`; unknown text is `None`.
pub fn canonicalize(text: &str) -> Option<ColorLabel> {
    let normalized = text.trim().to_lowercase().replace('ё', "е");
    let mut colors = BTreeSet::new();
    let mut multi = false;
    for token in normalized
        .split(|c: char| !c.is_alphabetic() && c != '\'')
        .filter(|t| !t.is_empty())
    {
        if MODIFIERS.iter().any(|m| token == *m) {
            continue;
        }
        if MULTI_STEMS.iter().any(|m| token.starts_with(m)) {
            multi = true;
            continue;
        }
        if let Some(color) = token_color(token) {
            colors.insert(color);
        }
    }
    match (multi, colors.len()) {
        (true, _) => Some(ColorLabel::Multi),
        (false, 0) => None,
        (false, 1) => colors.into_iter().next().map(ColorLabel::Named),
        _ => Some(ColorLabel::Multi),
    }
}

/// Exact palette word forms, used to peel a trailing color off a title
/// without eating model names that merely start like a color.
pub fn palette_token(token: &str) -> Option<ColorLabel> {
    let token = token.trim().to_lowercase().replace('ё', "е");
    let russian = regex!(
        r"^(?:темно|светло|світло)?-?(?:черн|чорн|бел|біл|сер|сір|бежев|коричнев|красн|червон|оранжев|помаранчев|желт|жовт|зелен|син|голуб|блакитн|фиолетов|фіолетов|розов|рожев|бордов|хаки|мультиколор)(?:ый|ий|ая|яя|ое|ее|ые|ие|ой|ої|ій|а|е|і|я)?$"
    );
    let english = regex!(
        r"^(?:dark-|light-)?(?:black|white|grey|gray|beige|brown|red|orange|yellow|green|blue|navy|purple|violet|pink|khaki|olive|multi|multicolor)$"
    );
    if russian.is_match(&token) || english.is_match(&token) {
        canonicalize(&token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(c: ColorName) -> Option<ColorLabel> {
        Some(ColorLabel::Named(c))
    }

    #[test]
    fn canonicalizes_synonyms() {
        assert_eq!(named(ColorName::Black), canonicalize("Чёрный"));
        assert_eq!(named(ColorName::Black), canonicalize("чорний"));
        assert_eq!(named(ColorName::Black), canonicalize("chernyy"));
        assert_eq!(named(ColorName::Blue), canonicalize("темно-синий"));
        assert_eq!(named(ColorName::Blue), canonicalize("Navy"));
        assert_eq!(named(ColorName::Red), canonicalize("бордовый"));
        assert_eq!(named(ColorName::Green), canonicalize("хаки"));
        assert_eq!(named(ColorName::Beige), canonicalize("бежевий"));
        assert_eq!(Some(ColorLabel::Multi), canonicalize("черный/белый"));
        assert_eq!(Some(ColorLabel::Multi), canonicalize("мультиколор"));
        assert_eq!(None, canonicalize("как на фото"));
        assert_eq!(None, canonicalize(""));
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for text in ["Чёрный", "біла", "light grey", "бордо", "pink", "мульти", "Оливковый", "sand"] {
            let first = canonicalize(text).unwrap();
            assert_eq!(Some(first), canonicalize(&first.to_string()), "{text}");
        }
        for name in ColorName::ALL {
            assert_eq!(named(name), canonicalize(&name.to_string()));
            assert_eq!(named(name), canonicalize(name.display_name()));
        }
    }

    #[test]
    fn matches_exact_palette_words() {
        assert_eq!(named(ColorName::Black), palette_token("черные"));
        assert_eq!(named(ColorName::Blue), palette_token("темно-синяя"));
        assert_eq!(named(ColorName::White), palette_token("White"));
        assert_eq!(None, palette_token("Redline"));
        assert_eq!(None, palette_token("серия"));
        assert_eq!(None, palette_token("90"));
    }
}
