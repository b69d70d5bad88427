use crate::{normalize_title, slugify};
use serde::{Deserialize, Serialize};
use typesafe_repository::macros::Id;
use typesafe_repository::{GetIdentity, Identity, RefIdentity};
use uuid::Uuid;

/// Lookup dictionaries (categories, colors, sizes) share the same shape and
/// are resolved get-or-create by slug.
pub trait DictionaryEntry: Clone {
    fn create(name: &str) -> Self;
    fn entry_id(&self) -> Uuid;
    fn slug(&self) -> &str;
}

pub fn dictionary_slug(name: &str) -> String {
    let slug = slugify(&normalize_title(name));
    if slug.is_empty() {
        name.trim().to_lowercase()
    } else {
        slug
    }
}

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct Category {
    #[id]
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct Color {
    #[id]
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct Size {
    #[id]
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

macro_rules! dictionary_entry {
    ($t:ty, $slug:path) => {
        impl DictionaryEntry for $t {
            fn create(name: &str) -> Self {
                Self {
                    id: Uuid::new_v4(),
                    name: name.trim().to_string(),
                    slug: $slug(name),
                }
            }
            fn entry_id(&self) -> Uuid {
                self.id
            }
            fn slug(&self) -> &str {
                &self.slug
            }
        }
    };
}

dictionary_entry!(Category, dictionary_slug);
dictionary_entry!(Color, dictionary_slug);
dictionary_entry!(Size, Size::slug_for);

impl Size {
    /// Sizes are kept as written by suppliers; the slug of `42,5` and
    /// `42.5` is the same so both resolve to one entry.
    pub fn slug_for(name: &str) -> String {
        let name = name.trim().replace(',', ".");
        if name.chars().all(|c| c.is_ascii_digit() || c == '.') {
            name
        } else {
            dictionary_slug(&name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_entries_with_slugs() {
        let c = Color::create(" Черный ");
        assert_eq!("Черный", c.name);
        assert_eq!("chernyy", c.slug);
        assert_eq!("xl", Size::create("XL").slug);
        assert_eq!("42.5", Size::create("42,5").slug);
    }

    #[test]
    fn half_sizes_share_slug() {
        assert_eq!(Size::slug_for("42,5"), Size::slug_for("42.5"));
        assert_eq!("42.5", Size::slug_for("42.5"));
    }
}
