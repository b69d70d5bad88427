use crate::category::{is_known_brand, market_query, CategoryGuess, CategoryMatcher};
use crate::color::classify::vote;
use crate::color::canonicalize;
use crate::config::{ImportConfig, PricingPolicy};
use crate::extract::roles::RoleTable;
use crate::extract::sizes::{parse_sizes, SizeSpec};
use crate::extract::{extract_rows, CatalogRow};
use crate::fetch::{build_client, fetch_grid, FetchError};
use crate::gallery::{Gallery, GalleryResolver};
use crate::price::{justified_base_price, retail_price};
use crate::report::{RunReport, SourceReport};
use anyhow::anyhow;
use catalog_types::catalog::CatalogRepository;
use catalog_types::product::Product;
use catalog_types::source::{ActiveSelector, SupplierSource, SupplierSourceRepository};
use catalog_types::{normalize_title, slugify, unique_slug};
use indicatif::{ProgressBar, ProgressStyle};
use log_error::LogError;
use market_price::MarketPriceClient;
use matching::{find_match, ImageCatalog, MatchQuery};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use session::CatalogSession;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stock::{parse_stock, plan_stock, size_domain};
use time::OffsetDateTime;
use uuid::Uuid;

pub mod matching;
pub mod session;
pub mod stock;

/// Parameters of one import run.
#[derive(Clone, Debug, Default)]
pub struct ImportRequest {
    /// Sources to import; empty means every active source.
    pub source_ids: Vec<Uuid>,
    pub item_limit: Option<usize>,
    pub fetch_timeout: Option<Duration>,
    /// Visibility of products created by the run.
    pub publish_visible: bool,
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOutcome {
    Created,
    Updated,
}

fn merge_images(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    existing
        .iter()
        .chain(incoming)
        .filter(|img| seen.insert(img.as_str()))
        .cloned()
        .collect()
}

/// Run-scoped state: the catalog session and every cache, rebuilt from
/// scratch for each run.
pub struct RunContext {
    config: Arc<ImportConfig>,
    client: ClientWithMiddleware,
    roles: RoleTable,
    categories: CategoryMatcher,
    gallery: GalleryResolver,
    market: Option<MarketPriceClient>,
    market_cache: HashMap<String, Vec<Decimal>>,
    images: ImageCatalog,
    session: CatalogSession,
    publish_visible: bool,
}

impl RunContext {
    pub fn new(
        config: Arc<ImportConfig>,
        client: ClientWithMiddleware,
        session: CatalogSession,
        publish_visible: bool,
    ) -> Self {
        let market = match (&config.price.policy, &config.price.market_search_url) {
            (PricingPolicy::Market, Some(url)) => Some(MarketPriceClient::new(client.clone(), url.clone())),
            _ => None,
        };
        Self {
            roles: RoleTable::new(&config.roles),
            categories: CategoryMatcher::new(&config.categories, &config.default_category),
            gallery: GalleryResolver::new(
                client.clone(),
                Arc::new(config.image.clone()),
                Arc::new(config.color.clone()),
            ),
            images: ImageCatalog::from_products(session.products()),
            market,
            market_cache: HashMap::new(),
            session,
            client,
            config,
            publish_visible,
        }
    }

    pub fn session(&self) -> &CatalogSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CatalogSession {
        &mut self.session
    }

    fn reload(&mut self, session: CatalogSession) {
        self.images = ImageCatalog::from_products(session.products());
        self.session = session;
    }

    async fn market_samples(&mut self, title: &str, guess: &CategoryGuess) -> Option<Vec<Decimal>> {
        let client = self.market.as_ref()?;
        let query = market_query(title, guess);
        if let Some(cached) = self.market_cache.get(&query) {
            return Some(cached.clone());
        }
        let samples = client
            .lookup(&query)
            .await
            .log_error("Market price lookup failed")
            .unwrap_or_default();
        self.market_cache.insert(query, samples.clone());
        Some(samples)
    }

    /// Color names for the row: its own color text when it names palette
    /// colors, otherwise the classifier's verdict over the gallery, otherwise
    /// the text as written.
    fn resolve_colors(&self, row: &CatalogRow, gallery: &Gallery) -> Vec<String> {
        let parts = row
            .color_text
            .as_deref()
            .map(|t| {
                t.split([',', ';'])
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let mut named = Vec::new();
        for label in parts.iter().filter_map(|p| canonicalize(p)) {
            let name = label.display_name().to_string();
            if !named.contains(&name) {
                named.push(name);
            }
        }
        if !named.is_empty() {
            return named;
        }
        let dominants = gallery.probes.iter().filter_map(|p| p.dominant).collect::<Vec<_>>();
        if let Some(verdict) = vote(&dominants, &self.config.color)
            .filter(|v| v.confidence >= self.config.color.min_confidence)
        {
            log::debug!(
                "{}: classified as {} ({:.2})",
                row.title,
                verdict.label,
                verdict.confidence
            );
            return vec![verdict.label.display_name().to_string()];
        }
        let mut raw = Vec::new();
        for name in parts.iter().map(|p| normalize_title(p)).filter(|p| !p.is_empty()) {
            if !raw.contains(&name) {
                raw.push(name);
            }
        }
        raw
    }

    /// Reconciles one row into the session. Problems with single images are
    /// recorded on the report without failing the row.
    pub async fn reconcile_row(
        &mut self,
        source: &SupplierSource,
        row: &CatalogRow,
        report: &mut SourceReport,
    ) -> Result<RowOutcome, anyhow::Error> {
        let config = self.config.clone();
        let supplier_key = source.supplier_key();
        let guess = self.categories.guess(&row.title, row.description.as_deref());
        let category_id = self.session.category(&guess.name);
        let footwear_guard = guess.footwear && is_known_brand(&row.title, &config.price.footwear_brands);

        let samples = self.market_samples(&row.title, &guess).await;
        let retail = retail_price(
            Some(row.wholesale_price),
            row.retail_reference_price,
            samples.as_deref(),
            &config.price,
        )
        .ok_or_else(|| anyhow!("No usable price for {}", row.title))?;

        let gallery = self
            .gallery
            .resolve(&row.image_refs, config.cover_frames(&supplier_key))
            .await;
        for rejected in &gallery.rejected {
            report.record_error(&format!("row {} image", row.line), &rejected.clone().into());
        }
        let colors = self.resolve_colors(row, &gallery);

        let slug = slugify(&row.title);
        let signatures = gallery.signatures();
        let query = MatchQuery {
            title: &row.title,
            slug: &slug,
            category_id,
            supplier: &source.supplier_name,
            images: &gallery.images,
            signatures: &signatures,
        };
        let found = find_match(
            &self.session,
            &self.images,
            &query,
            &config.matching,
            config.image.match_distance,
        );
        let now = OffsetDateTime::now_utc();
        let (product_id, outcome) = match found {
            Some(m) => {
                log::debug!("{} matched {} by {} ({:.2})", row.title, m.product_id, m.kind, m.score);
                self.session.update_product(m.product_id, |p| {
                    p.base_price = justified_base_price(p.base_price, retail.amount, footwear_guard, &config.price);
                    p.images = merge_images(&p.images, &gallery.images);
                    if p.default_image.is_none() {
                        p.default_image = p.images.first().cloned();
                    }
                    if p.category_id.is_none() {
                        p.category_id = Some(category_id);
                    }
                    p.last_imported = now;
                });
                (m.product_id, RowOutcome::Updated)
            }
            None => {
                let slug = unique_slug(&slug, |s| self.session.slug_taken(s));
                let product = Product {
                    id: Uuid::new_v4(),
                    title: row.title.clone(),
                    slug,
                    base_price: retail.amount,
                    category_id: Some(category_id),
                    default_image: gallery.images.first().cloned(),
                    images: gallery.images.clone(),
                    import_source_url: Some(source.source_url.clone()),
                    import_supplier_name: Some(source.supplier_name.clone()),
                    visible: self.publish_visible,
                    last_imported: now,
                };
                let id = product.id;
                self.session.insert_product(product);
                (id, RowOutcome::Created)
            }
        };
        self.images.remember(product_id, &gallery.images, signatures);

        let sizes = row
            .size_text
            .as_deref()
            .map(parse_sizes)
            .unwrap_or_else(SizeSpec::empty);
        let signal = parse_stock(row.stock_text.as_deref(), &sizes);
        let domain = size_domain(&sizes, &signal);
        let size_ids = if domain.is_empty() {
            vec![(None, None)]
        } else {
            domain
                .iter()
                .map(|label| (Some(label.as_str()), Some(self.session.size(label))))
                .collect()
        };
        let color_ids = if colors.is_empty() {
            vec![None]
        } else {
            colors.iter().map(|c| Some(self.session.color(c))).collect()
        };
        let plan = plan_stock(
            &sizes,
            &signal,
            color_ids.len(),
            config.supplier_defaults_available(&supplier_key),
            config.stock.default_quantity,
        );
        for (label, size_id) in &size_ids {
            for (ci, color_id) in color_ids.iter().enumerate() {
                let quantity = plan.quantity(*label, ci);
                self.session
                    .upsert_variant((product_id, *size_id, *color_id), |v, created| {
                        v.price = if created {
                            retail.amount
                        } else {
                            justified_base_price(v.price, retail.amount, footwear_guard, &config.price)
                        };
                        if let Some(q) = quantity {
                            v.stock_quantity = q;
                        }
                        if color_id.is_some() && !gallery.images.is_empty() {
                            v.images = merge_images(&v.images, &gallery.images);
                        }
                    });
            }
        }

        if plan.is_explicit() {
            let mentioned = plan
                .mentioned()
                .into_iter()
                .map(|label| label.and_then(|l| self.session.find_size(l)))
                .collect::<HashSet<_>>();
            // unresolved color scopes the reset to the whole product
            let scope = (!colors.is_empty()).then(|| color_ids.iter().copied().collect::<HashSet<_>>());
            let zeroed = self.session.update_variants(
                product_id,
                |v| {
                    v.stock_quantity > 0
                        && !mentioned.contains(&v.size_id)
                        && scope.as_ref().map(|s| s.contains(&v.color_id)).unwrap_or(true)
                },
                |v| v.stock_quantity = 0,
            );
            if zeroed > 0 {
                log::debug!("{}: {zeroed} unlisted variant(s) set out of stock", row.title);
            }
        }
        Ok(outcome)
    }
}

/// Drives import runs: resolves sources, fetches and extracts them in
/// order and commits each source's changes atomically.
pub struct Reconciler {
    catalog: Arc<dyn CatalogRepository>,
    sources: Arc<dyn SupplierSourceRepository>,
    config: Arc<ImportConfig>,
    progress: Option<ProgressStyle>,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        sources: Arc<dyn SupplierSourceRepository>,
        config: Arc<ImportConfig>,
        progress: Option<ProgressStyle>,
    ) -> Self {
        Self {
            catalog,
            sources,
            config,
            progress,
        }
    }

    async fn resolve_sources(
        &self,
        ids: &[Uuid],
        report: &mut RunReport,
    ) -> Result<Vec<SupplierSource>, anyhow::Error> {
        if ids.is_empty() {
            return self.sources.select(&ActiveSelector).await;
        }
        let mut found = Vec::new();
        for id in ids {
            match self.sources.get_one(id).await? {
                Some(source) => found.push(source),
                None => {
                    log::warn!("Unknown supplier source {id}");
                    let mut missing = SourceReport::new(*id, "", "");
                    missing.record_failure("source", &anyhow!("Supplier source {id} not found"));
                    report.sources.push(missing);
                }
            }
        }
        Ok(found)
    }

    /// Runs the import. Only failing to reach the catalog itself is an error;
    /// source and row failures end up in the report.
    pub async fn run(&self, request: ImportRequest) -> Result<RunReport, anyhow::Error> {
        let started = Instant::now();
        let mut report = RunReport::new(request.dry_run);
        let sources = self.resolve_sources(&request.source_ids, &mut report).await?;
        let timeout = request.fetch_timeout.unwrap_or(self.config.fetch_timeout);
        let client = build_client(timeout, self.config.retries)?;
        let session = CatalogSession::from_snapshot(self.catalog.snapshot().await?);
        let mut ctx = RunContext::new(self.config.clone(), client, session, request.publish_visible);
        log::info!("Importing {} source(s)", sources.len());
        for source in &sources {
            let mut source_report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
            self.import_source(&mut ctx, source, &request, &mut source_report, &mut report)
                .await;
            log::info!(
                "{}: {} imported, {} error(s)",
                source.supplier_name,
                source_report.imported_count,
                source_report.error_count
            );
            report.sources.push(source_report);
        }
        log::info!(
            "Import finished in {}: {}",
            crate::format_duration(&started.elapsed()),
            report.summary()
        );
        Ok(report)
    }

    async fn import_source(
        &self,
        ctx: &mut RunContext,
        source: &SupplierSource,
        request: &ImportRequest,
        source_report: &mut SourceReport,
        report: &mut RunReport,
    ) {
        let grid = match fetch_grid(&ctx.client, &source.source_url, &ctx.roles).await {
            Ok(grid) => grid,
            Err(err) => {
                let err = anyhow::Error::from(err);
                log::error!("Unable to fetch {}: {err:#}", source.source_url);
                source_report.record_failure("fetch", &err);
                return;
            }
        };
        log::debug!("{}: {} row(s) of {}", grid.url, grid.rows.len(), grid.kind);
        let rows = extract_rows(&grid.rows, &ctx.roles, &ctx.categories, self.config.price.min_plausible_price);
        if rows.is_empty() {
            let err = FetchError::Parse(format!("No catalog rows in {} grid row(s)", grid.rows.len()));
            source_report.record_error("extract", &err.into());
        }
        let rows = rows
            .into_iter()
            .take(request.item_limit.unwrap_or(usize::MAX))
            .collect::<Vec<_>>();
        let pb = self.progress.as_ref().map(|style| {
            ProgressBar::new(rows.len() as u64)
                .with_style(style.clone())
                .with_message(source.supplier_name.clone())
        });
        for row in &rows {
            match ctx.reconcile_row(source, row, source_report).await {
                Ok(RowOutcome::Created) => source_report.record_created(),
                Ok(RowOutcome::Updated) => source_report.record_updated(),
                Err(err) => {
                    log::warn!("{}: row {} failed: {err:#}", source.supplier_name, row.line);
                    let context = format!("row {} ({})", row.line, crate::truncate_chars(&row.title, 60));
                    source_report.record_error(&context, &err);
                }
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let (changes, counters) = ctx.session.take_changes();
        if request.dry_run {
            log::info!("Dry run, discarding {} change(s) of {}", changes.len(), source.supplier_name);
            report.add_counters(counters);
            return;
        }
        if changes.is_empty() {
            return;
        }
        match self.catalog.apply(changes).await {
            Ok(()) => report.add_counters(counters),
            Err(err) => {
                log::error!("Unable to commit {}: {err:#}", source.supplier_name);
                source_report.record_failure("commit", &err);
                if let Some(snapshot) = self.catalog.snapshot().await.log_error("Unable to reload catalog") {
                    ctx.reload(CatalogSession::from_snapshot(snapshot));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_types::catalog::CatalogSnapshot;
    use catalog_types::product::ProductVariant;
    use rust_decimal_macros::dec;

    fn context(config: ImportConfig) -> RunContext {
        let client = build_client(Duration::from_secs(1), 0).unwrap();
        RunContext::new(
            Arc::new(config),
            client,
            CatalogSession::from_snapshot(CatalogSnapshot::default()),
            false,
        )
    }

    fn source() -> SupplierSource {
        SupplierSource::new("https://feeds.example/best.csv", "Best Shoes")
    }

    fn row(title: &str, price: Decimal, size: &str, stock: Option<&str>) -> CatalogRow {
        CatalogRow {
            line: 1,
            title: title.to_string(),
            wholesale_price: price,
            retail_reference_price: None,
            color_text: None,
            size_text: Some(size.to_string()),
            stock_text: stock.map(ToString::to_string),
            image_refs: Vec::new(),
            description: None,
        }
    }

    fn stock_by_size(ctx: &RunContext, product: Uuid) -> Vec<(String, u32)> {
        let mut res = ctx
            .session()
            .variants_of(product)
            .into_iter()
            .map(|v: &ProductVariant| {
                let size = v.size_id.and_then(|id| ctx.session().size_name(id)).unwrap_or("-");
                (size.to_string(), v.stock_quantity)
            })
            .collect::<Vec<_>>();
        res.sort();
        res
    }

    #[test]
    fn merges_images_keeping_order() {
        let existing = vec!["a".to_string(), "b".to_string()];
        let incoming = vec!["b".to_string(), "c".to_string(), "c".to_string()];
        assert_eq!(vec!["a", "b", "c"], merge_images(&existing, &incoming));
    }

    #[tokio::test]
    async fn creates_size_grid_with_explicit_stock() {
        let mut ctx = context(ImportConfig::default());
        let source = source();
        let mut report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
        let outcome = ctx
            .reconcile_row(&source, &row("Model X", dec!(4900), "41-45", Some("42")), &mut report)
            .await
            .unwrap();
        assert_eq!(RowOutcome::Created, outcome);
        let product = ctx.session().by_slug("model-x").unwrap().clone();
        assert_eq!(dec!(7399), product.base_price);
        assert!(!product.visible);
        assert_eq!(
            vec![
                ("41".to_string(), 0),
                ("42".to_string(), 1),
                ("43".to_string(), 0),
                ("44".to_string(), 0),
                ("45".to_string(), 0),
            ],
            stock_by_size(&ctx, product.id)
        );

        let outcome = ctx
            .reconcile_row(&source, &row("Model X", dec!(4900), "41-45", Some("42")), &mut report)
            .await
            .unwrap();
        assert_eq!(RowOutcome::Updated, outcome);
        assert_eq!(1, ctx.session().products().count());
        assert_eq!(5, ctx.session().variants_of(product.id).len());
        assert_eq!(("42".to_string(), 1), stock_by_size(&ctx, product.id)[1]);
        assert_eq!(0, report.error_count);
    }

    #[tokio::test]
    async fn bare_range_keeps_stock_untouched() {
        let mut ctx = context(ImportConfig::default());
        let source = source();
        let mut report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
        ctx.reconcile_row(&source, &row("Model Y", dec!(1000), "41-43", Some("42")), &mut report)
            .await
            .unwrap();
        ctx.reconcile_row(&source, &row("Model Y", dec!(1000), "41-43", None), &mut report)
            .await
            .unwrap();
        let id = ctx.session().by_slug("model-y").unwrap().id;
        assert_eq!(
            vec![("41".to_string(), 0), ("42".to_string(), 1), ("43".to_string(), 0)],
            stock_by_size(&ctx, id)
        );
    }

    #[tokio::test]
    async fn best_offer_wins() {
        let mut ctx = context(ImportConfig::default());
        let source = source();
        let other = SupplierSource::new("https://feeds.example/other.csv", "Other");
        let mut report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
        ctx.reconcile_row(&source, &row("Model Z", dec!(2000), "", None), &mut report)
            .await
            .unwrap();
        ctx.reconcile_row(&other, &row("Model Z", dec!(3000), "", None), &mut report)
            .await
            .unwrap();
        let p = ctx.session().by_slug("model-z").unwrap();
        assert_eq!(dec!(2999), p.base_price);
        assert_eq!(Some("Best Shoes"), p.import_supplier_name.as_deref());
        ctx.reconcile_row(&other, &row("Model Z", dec!(1000), "", None), &mut report)
            .await
            .unwrap();
        assert_eq!(dec!(1499), ctx.session().by_slug("model-z").unwrap().base_price);
    }

    #[tokio::test]
    async fn explicit_stock_is_scoped_to_row_colors() {
        let mut ctx = context(ImportConfig::default());
        let source = source();
        let mut report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
        let colored = |color: &str, stock: &str| CatalogRow {
            color_text: Some(color.to_string()),
            ..row("Model C", dec!(1000), "40, 41", Some(stock))
        };
        ctx.reconcile_row(&source, &colored("черный", "40, 41"), &mut report)
            .await
            .unwrap();
        ctx.reconcile_row(&source, &colored("белый", "40, 41"), &mut report)
            .await
            .unwrap();
        ctx.reconcile_row(&source, &colored("черный", "нет"), &mut report)
            .await
            .unwrap();
        let id = ctx.session().by_slug("model-c").unwrap().id;
        let black = ctx.session_mut().color("Черный");
        let variants = ctx.session().variants_of(id);
        assert_eq!(4, variants.len());
        for v in variants {
            let expected = if v.color_id == Some(black) { 0 } else { 1 };
            assert_eq!(expected, v.stock_quantity);
        }

        ctx.reconcile_row(&source, &row("Model C", dec!(1000), "", Some("нет")), &mut report)
            .await
            .unwrap();
        assert!(ctx.session().variants_of(id).iter().all(|v| v.stock_quantity == 0));
    }

    #[tokio::test]
    async fn total_stock_is_split_across_colors() {
        let mut ctx = context(ImportConfig::default());
        let source = source();
        let mut report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
        let row = CatalogRow {
            color_text: Some("черный, белый".to_string()),
            ..row("Model T", dec!(1000), "40, 41", Some("4 шт"))
        };
        ctx.reconcile_row(&source, &row, &mut report).await.unwrap();
        let id = ctx.session().by_slug("model-t").unwrap().id;
        let variants = ctx.session().variants_of(id);
        assert_eq!(4, variants.len());
        assert!(variants.iter().all(|v| v.stock_quantity == 1));
        assert_eq!(4, variants.iter().map(|v| v.stock_quantity).sum::<u32>());
    }

    #[tokio::test]
    async fn unknown_color_text_is_kept_normalized() {
        let mut ctx = context(ImportConfig::default());
        let source = source();
        let mut report = SourceReport::new(source.id, &source.source_url, &source.supplier_name);
        let row = CatalogRow {
            color_text: Some("Как на фото".to_string()),
            ..row("Model K", dec!(1000), "", None)
        };
        ctx.reconcile_row(&source, &row, &mut report).await.unwrap();
        let (changes, counters) = ctx.session_mut().take_changes();
        assert_eq!(vec!["как на фото"], changes.colors.iter().map(|c| c.name.as_str()).collect::<Vec<_>>());
        assert_eq!(1, counters.products.created);
        assert_eq!(1, counters.variants.created);
        assert_eq!(1, counters.categories_created);
    }
}
