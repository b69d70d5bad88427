use crate::report::{CatalogCounters, EntityCounts};
use catalog_types::catalog::{CatalogSnapshot, Changeset};
use catalog_types::dictionary::{Category, Color, DictionaryEntry, Size};
use catalog_types::normalize_title;
use catalog_types::product::{Product, ProductVariant, VariantKey};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Get-or-create lookup over one dictionary table.
pub struct Dictionary<T> {
    by_slug: HashMap<String, T>,
    created: Vec<T>,
}

impl<T: DictionaryEntry> Dictionary<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self {
            by_slug: entries.into_iter().map(|e| (e.slug().to_string(), e)).collect(),
            created: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<Uuid> {
        let probe = T::create(name);
        self.by_slug.get(probe.slug()).map(DictionaryEntry::entry_id)
    }

    pub fn resolve(&mut self, name: &str) -> Uuid {
        let entry = T::create(name);
        if let Some(existing) = self.by_slug.get(entry.slug()) {
            return existing.entry_id();
        }
        let id = entry.entry_id();
        self.by_slug.insert(entry.slug().to_string(), entry.clone());
        self.created.push(entry);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.by_slug.values().find(|e| e.entry_id() == id)
    }

    fn take_created(&mut self) -> Vec<T> {
        std::mem::take(&mut self.created)
    }
}

struct Tracked<T> {
    value: T,
    /// Last persisted state; `None` for entities created in this session.
    original: Option<T>,
}

impl<T: Clone + PartialEq> Tracked<T> {
    fn loaded(value: T) -> Self {
        Self {
            original: Some(value.clone()),
            value,
        }
    }

    fn created(value: T) -> Self {
        Self { value, original: None }
    }

    fn is_dirty(&self) -> bool {
        self.original.as_ref() != Some(&self.value)
    }

    /// Marks the current value as persisted and reports what it was.
    fn checkpoint(&mut self, counts: &mut EntityCounts) -> Option<T> {
        if !self.is_dirty() {
            return None;
        }
        match self.original {
            None => counts.created += 1,
            Some(_) => counts.updated += 1,
        }
        self.original = Some(self.value.clone());
        Some(self.value.clone())
    }
}

type TitleKey = (String, Option<Uuid>);

/// In-memory unit of work over the catalog. Rows are reconciled against it
/// and the accumulated changes are handed to the repository in one piece.
pub struct CatalogSession {
    categories: Dictionary<Category>,
    colors: Dictionary<Color>,
    sizes: Dictionary<Size>,
    products: HashMap<Uuid, Tracked<Product>>,
    order: Vec<Uuid>,
    by_slug: HashMap<String, Uuid>,
    by_title: HashMap<TitleKey, Uuid>,
    variants: HashMap<VariantKey, Tracked<ProductVariant>>,
    variants_by_product: HashMap<Uuid, Vec<VariantKey>>,
}

fn title_key(p: &Product) -> TitleKey {
    (p.normalized_title(), p.category_id)
}

impl CatalogSession {
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut session = Self {
            categories: Dictionary::new(snapshot.categories),
            colors: Dictionary::new(snapshot.colors),
            sizes: Dictionary::new(snapshot.sizes),
            products: HashMap::new(),
            order: Vec::new(),
            by_slug: HashMap::new(),
            by_title: HashMap::new(),
            variants: HashMap::new(),
            variants_by_product: HashMap::new(),
        };
        for p in snapshot.products {
            session.index_product(&p);
            session.order.push(p.id);
            session.products.insert(p.id, Tracked::loaded(p));
        }
        for v in snapshot.variants {
            session.variants_by_product.entry(v.product_id).or_default().push(v.key());
            session.variants.insert(v.key(), Tracked::loaded(v));
        }
        session
    }

    fn index_product(&mut self, p: &Product) {
        self.by_slug.insert(p.slug.clone(), p.id);
        self.by_title.entry(title_key(p)).or_insert(p.id);
    }

    pub fn category(&mut self, name: &str) -> Uuid {
        self.categories.resolve(name)
    }

    pub fn color(&mut self, name: &str) -> Uuid {
        self.colors.resolve(name)
    }

    pub fn size(&mut self, label: &str) -> Uuid {
        self.sizes.resolve(label)
    }

    pub fn find_size(&self, label: &str) -> Option<Uuid> {
        self.sizes.find(label)
    }

    pub fn size_name(&self, id: Uuid) -> Option<&str> {
        self.sizes.get(id).map(|s| s.name.as_str())
    }

    pub fn product(&self, id: Uuid) -> Option<&Product> {
        self.products.get(&id).map(|t| &t.value)
    }

    /// Products in load/creation order.
    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.order.iter().filter_map(|id| self.product(*id))
    }

    pub fn by_slug(&self, slug: &str) -> Option<&Product> {
        self.by_slug.get(slug).and_then(|id| self.product(*id))
    }

    pub fn by_title(&self, title: &str, category: Option<Uuid>) -> Option<&Product> {
        self.by_title
            .get(&(normalize_title(title), category))
            .and_then(|id| self.product(*id))
    }

    pub fn slug_taken(&self, slug: &str) -> bool {
        self.by_slug.contains_key(slug)
    }

    pub fn insert_product(&mut self, product: Product) {
        self.index_product(&product);
        self.order.push(product.id);
        self.products.insert(product.id, Tracked::created(product));
    }

    pub fn update_product(&mut self, id: Uuid, f: impl FnOnce(&mut Product)) -> bool {
        let Some(tracked) = self.products.get_mut(&id) else {
            return false;
        };
        let before = title_key(&tracked.value);
        f(&mut tracked.value);
        let after = title_key(&tracked.value);
        let slug = tracked.value.slug.clone();
        if before != after {
            if self.by_title.get(&before) == Some(&id) {
                self.by_title.remove(&before);
            }
            self.by_title.entry(after).or_insert(id);
        }
        self.by_slug.insert(slug, id);
        true
    }

    pub fn variants_of(&self, product_id: Uuid) -> Vec<&ProductVariant> {
        self.variants_by_product
            .get(&product_id)
            .map(|keys| keys.iter().filter_map(|k| self.variants.get(k)).map(|t| &t.value).collect())
            .unwrap_or_default()
    }

    /// Creates the variant when the key is new; `f` receives `true` then.
    pub fn upsert_variant(&mut self, key: VariantKey, f: impl FnOnce(&mut ProductVariant, bool)) {
        if let Some(tracked) = self.variants.get_mut(&key) {
            f(&mut tracked.value, false);
            return;
        }
        let (product_id, size_id, color_id) = key;
        let mut variant = ProductVariant {
            id: Uuid::new_v4(),
            product_id,
            size_id,
            color_id,
            price: Decimal::ZERO,
            stock_quantity: 0,
            images: Vec::new(),
        };
        f(&mut variant, true);
        self.variants_by_product.entry(product_id).or_default().push(key);
        self.variants.insert(key, Tracked::created(variant));
    }

    /// Applies `f` to every stored variant of the product it selects.
    pub fn update_variants(
        &mut self,
        product_id: Uuid,
        mut select: impl FnMut(&ProductVariant) -> bool,
        mut f: impl FnMut(&mut ProductVariant),
    ) -> usize {
        let Some(keys) = self.variants_by_product.get(&product_id) else {
            return 0;
        };
        let mut touched = 0;
        for key in keys {
            if let Some(tracked) = self.variants.get_mut(key) {
                if select(&tracked.value) {
                    f(&mut tracked.value);
                    touched += 1;
                }
            }
        }
        touched
    }

    /// Everything changed since the last call, with the matching counters.
    pub fn take_changes(&mut self) -> (Changeset, CatalogCounters) {
        let mut counters = CatalogCounters::default();
        let categories = self.categories.take_created();
        let colors = self.colors.take_created();
        let sizes = self.sizes.take_created();
        counters.categories_created = categories.len();
        counters.colors_created = colors.len();
        counters.sizes_created = sizes.len();
        let mut products = Vec::new();
        for id in &self.order {
            if let Some(p) = self.products.get_mut(id).and_then(|t| t.checkpoint(&mut counters.products)) {
                products.push(p);
            }
        }
        let mut variants = Vec::new();
        for id in &self.order {
            for key in self.variants_by_product.get(id).into_iter().flatten() {
                if let Some(v) = self.variants.get_mut(key).and_then(|t| t.checkpoint(&mut counters.variants)) {
                    variants.push(v);
                }
            }
        }
        let changes = Changeset {
            categories,
            colors,
            sizes,
            products,
            variants,
        };
        (changes, counters)
    }
}
