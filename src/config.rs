use crate::category::CategoryRule;
use crate::extract::roles::RoleRule;
use anyhow::Context;
use derive_more::Display;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ROLES: &str = include_str!("../rules/roles.yaml");
const DEFAULT_CATEGORIES: &str = include_str!("../rules/categories.yaml");

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum PricingPolicy {
    #[display("markup")]
    Markup,
    #[display("market")]
    Market,
}

impl FromStr for PricingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markup" => Ok(Self::Markup),
            "market" => Ok(Self::Market),
            other => Err(anyhow::anyhow!("Unknown pricing policy {other}")),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PriceConfig {
    pub policy: PricingPolicy,
    pub markup: Decimal,
    /// The market estimate is replaced by the markup price when it falls
    /// below `wholesale * min_markup`.
    pub min_markup: Decimal,
    pub reference_discount: Decimal,
    pub ending: u32,
    /// Rows with a wholesale price below this are treated as placeholders.
    pub min_plausible_price: Decimal,
    /// Listings search URL; `{query}` is replaced with the encoded title.
    pub market_search_url: Option<String>,
    pub footwear_brands: Vec<String>,
    pub footwear_min_price: Decimal,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            policy: PricingPolicy::Markup,
            markup: dec!(1.5),
            min_markup: dec!(1.1),
            reference_discount: dec!(100),
            ending: 99,
            min_plausible_price: dec!(10),
            market_search_url: None,
            footwear_brands: [
                "nike",
                "adidas",
                "jordan",
                "yeezy",
                "new balance",
                "asics",
                "puma",
                "reebok",
                "converse",
                "vans",
                "salomon",
                "balenciaga",
            ]
            .into_iter()
            .map(ToString::to_string)
            .collect(),
            footwear_min_price: dec!(1500),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ImageConfig {
    pub min_side: u32,
    pub max_aspect_ratio: f32,
    pub min_entropy: f32,
    pub max_probe_bytes: usize,
    /// Page fetches (gallery pages, chat posts) allowed per run.
    pub max_expansions: usize,
    pub max_images_per_page: usize,
    pub max_gallery: usize,
    pub cluster_link_distance: u32,
    pub cluster_outlier_distance: u32,
    pub similarity_threshold: u32,
    pub match_distance: u32,
    /// Supplier key -> number of leading frames that may be cover images.
    pub cover_frames: HashMap<String, usize>,
    pub cover_min_gallery: usize,
    pub cover_min_likelihood: f32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            min_side: 600,
            max_aspect_ratio: 3.0,
            min_entropy: 1.0,
            max_probe_bytes: 8 * 1024 * 1024,
            max_expansions: 40,
            max_images_per_page: 10,
            max_gallery: 12,
            cluster_link_distance: 10,
            cluster_outlier_distance: 20,
            similarity_threshold: 8,
            match_distance: 6,
            cover_frames: HashMap::new(),
            cover_min_gallery: 4,
            cover_min_likelihood: 0.5,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ColorConfig {
    pub clusters: usize,
    pub max_iterations: usize,
    pub sample_limit: usize,
    /// Gallery size that forces a single winning color instead of `multi`.
    pub forced_single_at: Option<usize>,
    pub multi_ratio: f32,
    pub multi_min_share: f32,
    pub min_confidence: f32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            max_iterations: 20,
            sample_limit: 1600,
            forced_single_at: Some(5),
            multi_ratio: 0.75,
            multi_min_share: 0.3,
            min_confidence: 0.35,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StockConfig {
    /// Suppliers whose listed sizes are in stock unless stated otherwise.
    pub default_available_suppliers: Vec<String>,
    pub default_quantity: u32,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            default_available_suppliers: Vec::new(),
            default_quantity: 1,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MatchConfig {
    pub same_supplier_similarity: f32,
    pub cross_supplier_similarity: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            same_supplier_similarity: 0.85,
            cross_supplier_similarity: 0.9,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ImportConfig {
    pub price: PriceConfig,
    pub image: ImageConfig,
    pub color: ColorConfig,
    pub stock: StockConfig,
    pub matching: MatchConfig,
    pub roles: Vec<RoleRule>,
    pub categories: Vec<CategoryRule>,
    pub default_category: String,
    #[serde(deserialize_with = "crate::deserialize_duration")]
    pub fetch_timeout: Duration,
    pub retries: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            price: PriceConfig::default(),
            image: ImageConfig::default(),
            color: ColorConfig::default(),
            stock: StockConfig::default(),
            matching: MatchConfig::default(),
            roles: default_roles(),
            categories: default_categories(),
            default_category: "Разное".to_string(),
            fetch_timeout: Duration::from_secs(30),
            retries: 2,
        }
    }
}

#[allow(clippy::unwrap_used)]
fn default_roles() -> Vec<RoleRule> {
    serde_yaml::from_str(DEFAULT_ROLES).unwrap()
}

#[allow(clippy::unwrap_used)]
fn default_categories() -> Vec<CategoryRule> {
    serde_yaml::from_str(DEFAULT_CATEGORIES).unwrap()
}

impl ImportConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, anyhow::Error> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub async fn read(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Unable to read config {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    /// Defaults, then `IMPORT_CONFIG` file, then individual env overrides.
    pub async fn load() -> Result<Self, anyhow::Error> {
        let mut config = match envmnt::get_or("IMPORT_CONFIG", "") {
            path if path.is_empty() => Self::default(),
            path => Self::read(path).await?,
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), anyhow::Error> {
        if envmnt::exists("IMPORT_MARKUP") {
            self.price.markup = envmnt::get_parse("IMPORT_MARKUP")
                .map_err(|err| anyhow::anyhow!("Invalid IMPORT_MARKUP: {err:?}"))?;
        }
        if envmnt::exists("IMPORT_MAX_EXPANSIONS") {
            self.image.max_expansions = envmnt::get_parse("IMPORT_MAX_EXPANSIONS")
                .map_err(|err| anyhow::anyhow!("Invalid IMPORT_MAX_EXPANSIONS: {err:?}"))?;
        }
        if envmnt::exists("IMPORT_PRICING_POLICY") {
            self.price.policy = envmnt::get_or("IMPORT_PRICING_POLICY", "markup").parse()?;
        }
        if envmnt::exists("IMPORT_MARKET_SEARCH_URL") {
            self.price.market_search_url = Some(envmnt::get_or("IMPORT_MARKET_SEARCH_URL", ""))
                .filter(|u| !u.is_empty());
        }
        Ok(())
    }

    pub fn supplier_defaults_available(&self, supplier_key: &str) -> bool {
        self.stock
            .default_available_suppliers
            .iter()
            .any(|s| catalog_types::source::supplier_key(s) == supplier_key)
    }

    pub fn cover_frames(&self, supplier_key: &str) -> usize {
        self.image
            .cover_frames
            .iter()
            .find(|(k, _)| catalog_types::source::supplier_key(k) == supplier_key)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
