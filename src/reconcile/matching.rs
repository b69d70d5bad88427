use super::session::CatalogSession;
use crate::config::MatchConfig;
use crate::gallery::{ImageSignature, SignatureIndex};
use catalog_types::normalize_title;
use catalog_types::product::Product;
use derive_more::Display;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    #[display("slug")]
    Slug,
    #[display("title+category")]
    TitleCategory,
    #[display("same supplier")]
    SameSupplier,
    #[display("cross supplier")]
    CrossSupplier,
    #[display("image")]
    Image,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProductMatch {
    pub product_id: Uuid,
    pub kind: MatchKind,
    pub score: f32,
}

/// Dice coefficient over title tokens, 0..=1.
pub fn title_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    let a = a.split_whitespace().collect::<HashSet<_>>();
    let b = b.split_whitespace().collect::<HashSet<_>>();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = a.intersection(&b).count();
    2.0 * common as f32 / (a.len() + b.len()) as f32
}

/// Images seen during the run, by exact URL and by perceptual signature.
/// Rebuilt for every run.
#[derive(Default)]
pub struct ImageCatalog {
    by_url: HashMap<String, Uuid>,
    signatures: SignatureIndex<Uuid>,
}

impl ImageCatalog {
    pub fn from_products<'a>(products: impl Iterator<Item = &'a Product>) -> Self {
        let mut catalog = Self::default();
        for p in products {
            for url in p.images.iter().chain(p.default_image.iter()) {
                catalog.by_url.entry(url.clone()).or_insert(p.id);
            }
        }
        catalog
    }

    pub fn remember(&mut self, product_id: Uuid, urls: &[String], signatures: Vec<ImageSignature>) {
        for url in urls {
            self.by_url.entry(url.clone()).or_insert(product_id);
        }
        for s in signatures {
            self.signatures.insert(product_id, s);
        }
    }

    #[cfg(test)]
    fn known_urls(&self) -> usize {
        self.by_url.len()
    }

    fn find(&self, urls: &[String], signatures: &[ImageSignature], max_distance: u32) -> Option<Uuid> {
        if let Some(id) = urls.iter().find_map(|u| self.by_url.get(u)) {
            return Some(*id);
        }
        signatures
            .iter()
            .filter_map(|s| self.signatures.query(s, max_distance).into_iter().next())
            .min_by(|a, b| a.distance.cmp(&b.distance).then(b.similarity.total_cmp(&a.similarity)))
            .map(|m| *m.key)
    }
}

/// What is known about an incoming row when looking for its product.
pub struct MatchQuery<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub category_id: Uuid,
    pub supplier: &'a str,
    pub images: &'a [String],
    pub signatures: &'a [ImageSignature],
}

fn best_fuzzy<'a>(
    candidates: impl Iterator<Item = &'a Product>,
    title: &str,
    threshold: f32,
    supplier: &str,
) -> Option<(&'a Product, f32)> {
    candidates
        .map(|p| (p, title_similarity(title, &p.title)))
        .filter(|(_, score)| *score >= threshold)
        .fold(None::<(&'a Product, f32)>, |best, (p, score)| match best {
            Some((b, bs))
                if bs > score || (bs == score && (b.from_supplier(supplier) || !p.from_supplier(supplier))) =>
            {
                Some((b, bs))
            }
            _ => Some((p, score)),
        })
}

/// Looks the row up in order of decreasing specificity: slug, exact title
/// within the category, fuzzy title from the same supplier, fuzzy title
/// from any supplier within the category, and finally the row's images.
pub fn find_match(
    session: &CatalogSession,
    images: &ImageCatalog,
    query: &MatchQuery,
    config: &MatchConfig,
    max_distance: u32,
) -> Option<ProductMatch> {
    let found = |p: &Product, kind: MatchKind, score: f32| ProductMatch {
        product_id: p.id,
        kind,
        score,
    };
    if let Some(p) = session.by_slug(query.slug) {
        return Some(found(p, MatchKind::Slug, 1.0));
    }
    if let Some(p) = session.by_title(query.title, Some(query.category_id)) {
        return Some(found(p, MatchKind::TitleCategory, 1.0));
    }
    let same_supplier = session.products().filter(|p| p.from_supplier(query.supplier));
    if let Some((p, score)) = best_fuzzy(
        same_supplier,
        query.title,
        config.same_supplier_similarity,
        query.supplier,
    ) {
        return Some(found(p, MatchKind::SameSupplier, score));
    }
    let in_category = session
        .products()
        .filter(|p| p.category_id == Some(query.category_id));
    if let Some((p, score)) = best_fuzzy(
        in_category,
        query.title,
        config.cross_supplier_similarity,
        query.supplier,
    ) {
        return Some(found(p, MatchKind::CrossSupplier, score));
    }
    images
        .find(query.images, query.signatures, max_distance)
        .and_then(|id| session.product(id))
        .map(|p| found(p, MatchKind::Image, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::session::tests::product;
    use catalog_types::catalog::CatalogSnapshot;

    fn supplied(title: &str, category: Uuid, supplier: &str) -> Product {
        Product {
            import_supplier_name: Some(supplier.to_string()),
            ..product(title, Some(category))
        }
    }

    fn query<'a>(title: &'a str, slug: &'a str, category_id: Uuid, supplier: &'a str) -> MatchQuery<'a> {
        MatchQuery {
            title,
            slug,
            category_id,
            supplier,
            images: &[],
            signatures: &[],
        }
    }

    #[test]
    fn measures_title_similarity() {
        assert_eq!(1.0, title_similarity("Nike Air Max 90", "nike air-max 90"));
        let s = title_similarity("Nike Air Max 90", "Nike Air Max 95");
        assert!((s - 0.75).abs() < 1e-6, "{s}");
        assert_eq!(0.0, title_similarity("", "Nike"));
    }

    #[test]
    fn prefers_most_specific_signal() {
        let shoes = Uuid::new_v4();
        let a = supplied("Nike Air Max 90 Black", shoes, "Best Shoes");
        let b = supplied("Nike Air Max 90 Black edition", shoes, "Other");
        let session = CatalogSession::from_snapshot(CatalogSnapshot {
            products: vec![a.clone(), b.clone()],
            ..Default::default()
        });
        let images = ImageCatalog::default();
        let config = MatchConfig::default();

        let m = find_match(&session, &images, &query("x", &a.slug, Uuid::new_v4(), "x"), &config, 6).unwrap();
        assert_eq!((a.id, MatchKind::Slug), (m.product_id, m.kind));

        let m = find_match(&session, &images, &query("NIKE air max 90 black", "-", shoes, "x"), &config, 6).unwrap();
        assert_eq!((a.id, MatchKind::TitleCategory), (m.product_id, m.kind));

        let m = find_match(
            &session,
            &images,
            &query("Nike Air Max 90 Black new", "-", Uuid::new_v4(), "best shoes"),
            &config,
            6,
        )
        .unwrap();
        assert_eq!((a.id, MatchKind::SameSupplier), (m.product_id, m.kind));

        let m = find_match(
            &session,
            &images,
            &query("Nike Air Max 90 Black edition x", "-", shoes, "third"),
            &config,
            6,
        )
        .unwrap();
        assert_eq!((b.id, MatchKind::CrossSupplier), (m.product_id, m.kind));

        assert!(find_match(
            &session,
            &images,
            &query("Nike Air Max 90 Black edition x", "-", Uuid::new_v4(), "third"),
            &config,
            6
        )
        .is_none());
    }

    #[test]
    fn falls_back_to_images() {
        let p = product("Model X", None);
        let session = CatalogSession::from_snapshot(CatalogSnapshot {
            products: vec![Product {
                images: vec!["https://cdn.example/x1.jpg".to_string()],
                ..p.clone()
            }],
            ..Default::default()
        });
        let mut images = ImageCatalog::from_products(session.products());
        assert_eq!(1, images.known_urls());
        let config = MatchConfig::default();
        let urls = vec!["https://cdn.example/x1.jpg".to_string()];
        let q = MatchQuery {
            images: &urls,
            ..query("Totally different", "-", Uuid::new_v4(), "x")
        };
        let m = find_match(&session, &images, &q, &config, 6).unwrap();
        assert_eq!((p.id, MatchKind::Image), (m.product_id, m.kind));

        images.remember(
            p.id,
            &[],
            vec![ImageSignature {
                url: "https://cdn.example/x2.jpg".to_string(),
                perceptual_hash: 0b1111,
                dominant_color: None,
            }],
        );
        let near = vec![ImageSignature {
            url: "https://other.example/y.jpg".to_string(),
            perceptual_hash: 0b0111,
            dominant_color: None,
        }];
        let far = vec![ImageSignature {
            perceptual_hash: u64::MAX,
            ..near[0].clone()
        }];
        let q = MatchQuery {
            signatures: &near,
            ..query("Totally different", "-", Uuid::new_v4(), "x")
        };
        assert_eq!(Some(p.id), find_match(&session, &images, &q, &config, 6).map(|m| m.product_id));
        let q = MatchQuery {
            signatures: &far,
            ..query("Totally different", "-", Uuid::new_v4(), "x")
        };
        assert!(find_match(&session, &images, &q, &config, 6).is_none());
    }
}
