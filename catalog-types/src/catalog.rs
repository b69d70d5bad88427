use crate::dictionary::{Category, Color, Size};
use crate::product::{Product, ProductVariant};
use async_trait::async_trait;
use typesafe_repository::prelude::*;

/// Everything the reconciler needs to match incoming rows, loaded once per run.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    pub categories: Vec<Category>,
    pub colors: Vec<Color>,
    pub sizes: Vec<Size>,
    pub products: Vec<Product>,
    pub variants: Vec<ProductVariant>,
}

/// Upserts accumulated by one reconciliation pass. Applied atomically.
#[derive(Clone, Debug, Default)]
pub struct Changeset {
    pub categories: Vec<Category>,
    pub colors: Vec<Color>,
    pub sizes: Vec<Size>,
    pub products: Vec<Product>,
    pub variants: Vec<ProductVariant>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
            && self.colors.is_empty()
            && self.sizes.is_empty()
            && self.products.is_empty()
            && self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
            + self.colors.len()
            + self.sizes.len()
            + self.products.len()
            + self.variants.len()
    }
}

#[async_trait]
pub trait CatalogRepository:
    Repository<Product, Error = anyhow::Error>
    + Repository<ProductVariant, Error = anyhow::Error>
    + Send
    + Sync
{
    async fn snapshot(&self) -> Result<CatalogSnapshot, anyhow::Error>;

    /// Writes every entity of the changeset inside a single transaction.
    async fn apply(&self, changes: Changeset) -> Result<(), anyhow::Error>;
}
