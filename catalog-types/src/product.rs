use crate::dictionary::{Category, Color, Size};
use crate::Availability;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use typesafe_repository::macros::Id;
use typesafe_repository::{GetIdentity, Identity, IdentityOf, RefIdentity};
use uuid::Uuid;

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[Id(ref_id, get_id)]
pub struct Product {
    #[id]
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub base_price: Decimal,
    pub category_id: Option<IdentityOf<Category>>,
    pub default_image: Option<String>,
    pub images: Vec<String>,
    pub import_source_url: Option<String>,
    pub import_supplier_name: Option<String>,
    pub visible: bool,
    pub last_imported: OffsetDateTime,
}

impl Product {
    pub fn normalized_title(&self) -> String {
        crate::normalize_title(&self.title)
    }

    pub fn images_csv(&self) -> String {
        self.images.join(",")
    }

    pub fn images_from_csv<S: AsRef<str>>(s: S) -> Vec<String> {
        s.as_ref()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    pub fn from_supplier(&self, supplier: &str) -> bool {
        self.import_supplier_name
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case(supplier.trim()))
            .unwrap_or(false)
    }
}

/// `(product, size, color)`; a variant is unique per key.
pub type VariantKey = (
    IdentityOf<Product>,
    Option<IdentityOf<Size>>,
    Option<IdentityOf<Color>>,
);

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[Id(ref_id, get_id)]
pub struct ProductVariant {
    #[id]
    pub id: Uuid,
    pub product_id: IdentityOf<Product>,
    pub size_id: Option<IdentityOf<Size>>,
    pub color_id: Option<IdentityOf<Color>>,
    pub price: Decimal,
    pub stock_quantity: u32,
    pub images: Vec<String>,
}

impl ProductVariant {
    pub fn key(&self) -> VariantKey {
        (self.product_id, self.size_id, self.color_id)
    }

    pub fn availability(&self) -> Availability {
        self.stock_quantity.into()
    }
}
