use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use typesafe_repository::async_ops::{Get, List, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{SelectBy, Selector};
use uuid::Uuid;

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct SupplierSource {
    #[id]
    pub id: Uuid,
    pub source_url: String,
    pub supplier_name: String,
    pub active: bool,
}

impl SupplierSource {
    pub fn new(source_url: impl Into<String>, supplier_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_url: source_url.into().trim().to_string(),
            supplier_name: supplier_name.into().trim().to_string(),
            active: true,
        }
    }

    /// `Best Shoes UA` -> `best_shoes_ua`; used to look up supplier specific tuning.
    pub fn supplier_key(&self) -> String {
        supplier_key(&self.supplier_name)
    }
}

pub fn supplier_key(raw: &str) -> String {
    let mut out = String::new();
    let mut last_sep = false;
    for ch in raw.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_sep = false;
        } else if (ch == '-' || ch == '_' || ch.is_whitespace()) && !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

pub struct ActiveSelector;

impl Selector for ActiveSelector {}
impl SelectBy<ActiveSelector> for SupplierSource {}

#[async_trait]
pub trait SupplierSourceRepository:
    Repository<SupplierSource, Error = anyhow::Error>
    + Save<SupplierSource>
    + Get<SupplierSource>
    + List<SupplierSource>
    + Select<SupplierSource, ActiveSelector>
    + Send
    + Sync
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_supplier_key() {
        assert_eq!("best_shoes_ua", supplier_key(" Best  Shoes-UA "));
        assert_eq!("обувь_опт", supplier_key("Обувь (опт)"));
    }
}
