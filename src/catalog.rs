use async_trait::async_trait;
use catalog_types::catalog::{CatalogRepository, CatalogSnapshot, Changeset};
use catalog_types::dictionary::{Category, Color, Size};
use catalog_types::product::{Product, ProductVariant};
use catalog_types::source::{ActiveSelector, SupplierSource, SupplierSourceRepository};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use rust_decimal::Decimal;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Save, Select};
use typesafe_repository::prelude::*;
use typesafe_repository::IdentityOf;

const PRODUCT_COLUMNS: &str = "id, title, slug, base_price, category_id, default_image, images, \
    import_source_url, import_supplier_name, visible, last_imported";
const VARIANT_COLUMNS: &str = "id, product_id, size_id, color_id, price, stock_quantity, images";

fn decimal(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    Decimal::from_str_exact(&row.get::<_, String>(idx)?)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn product_from_row(row: &Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        base_price: decimal(row, 3)?,
        category_id: row.get(4)?,
        default_image: row.get(5)?,
        images: Product::images_from_csv(row.get::<_, String>(6)?),
        import_source_url: row.get(7)?,
        import_supplier_name: row.get(8)?,
        visible: row.get(9)?,
        last_imported: row.get(10)?,
    })
}

fn variant_from_row(row: &Row) -> rusqlite::Result<ProductVariant> {
    Ok(ProductVariant {
        id: row.get(0)?,
        product_id: row.get(1)?,
        size_id: row.get(2)?,
        color_id: row.get(3)?,
        price: decimal(row, 4)?,
        stock_quantity: row.get(5)?,
        images: Product::images_from_csv(row.get::<_, String>(6)?),
    })
}

macro_rules! select_dictionary {
    ($conn:expr, $table:literal, $t:ident) => {{
        let mut stmt = $conn.prepare(concat!("SELECT id, name, slug FROM ", $table, " ORDER BY name"))?;
        let items = stmt
            .query_map([], |row| {
                Ok($t {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    slug: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        items
    }};
}

macro_rules! upsert_dictionary {
    ($tx:expr, $table:literal, $items:expr) => {
        for e in $items {
            $tx.execute(
                concat!(
                    "INSERT INTO ",
                    $table,
                    " (id, name, slug) VALUES (?1, ?2, ?3) ON CONFLICT(id) DO UPDATE SET name=?2, slug=?3"
                ),
                params![e.id, e.name, e.slug],
            )?;
        }
    };
}

pub struct SqliteCatalogRepository {
    conn: Connection,
}

impl SqliteCatalogRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS category (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS color (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS size (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS product (
                    id BLOB PRIMARY KEY,
                    title TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    base_price TEXT NOT NULL,
                    category_id BLOB,
                    default_image TEXT,
                    images TEXT NOT NULL DEFAULT '',
                    import_source_url TEXT,
                    import_supplier_name TEXT,
                    visible INTEGER NOT NULL DEFAULT 0,
                    last_imported TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS product_variant (
                    id BLOB PRIMARY KEY,
                    product_id BLOB NOT NULL,
                    size_id BLOB,
                    color_id BLOB,
                    price TEXT NOT NULL,
                    stock_quantity INTEGER NOT NULL DEFAULT 0,
                    images TEXT NOT NULL DEFAULT ''
                );
                CREATE UNIQUE INDEX IF NOT EXISTS product_variant_key
                    ON product_variant (product_id, IFNULL(size_id, ''), IFNULL(color_id, ''));
                CREATE INDEX IF NOT EXISTS product_variant_product ON product_variant (product_id);",
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl Repository<Product> for SqliteCatalogRepository {
    type Error = anyhow::Error;
}

impl Repository<ProductVariant> for SqliteCatalogRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn snapshot(&self) -> Result<CatalogSnapshot, anyhow::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let categories = select_dictionary!(conn, "category", Category);
                let colors = select_dictionary!(conn, "color", Color);
                let sizes = select_dictionary!(conn, "size", Size);
                let mut stmt = conn.prepare(&format!("SELECT {PRODUCT_COLUMNS} FROM product"))?;
                let products = stmt
                    .query_map([], product_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                let mut stmt = conn.prepare(&format!("SELECT {VARIANT_COLUMNS} FROM product_variant"))?;
                let variants = stmt
                    .query_map([], variant_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CatalogSnapshot {
                    categories,
                    colors,
                    sizes,
                    products,
                    variants,
                })
            })
            .await?)
    }

    async fn apply(&self, changes: Changeset) -> Result<(), anyhow::Error> {
        if changes.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                upsert_dictionary!(tx, "category", &changes.categories);
                upsert_dictionary!(tx, "color", &changes.colors);
                upsert_dictionary!(tx, "size", &changes.sizes);
                for p in &changes.products {
                    tx.execute(
                        "INSERT INTO product
                        (id, title, slug, base_price, category_id, default_image, images,
                         import_source_url, import_supplier_name, visible, last_imported)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                        ON CONFLICT(id) DO UPDATE SET title=?2, slug=?3, base_price=?4, category_id=?5,
                        default_image=?6, images=?7, import_source_url=?8, import_supplier_name=?9,
                        visible=?10, last_imported=?11",
                        params![
                            p.id,
                            p.title,
                            p.slug,
                            p.base_price.to_string(),
                            p.category_id,
                            p.default_image,
                            p.images_csv(),
                            p.import_source_url,
                            p.import_supplier_name,
                            p.visible,
                            p.last_imported,
                        ],
                    )?;
                }
                for v in &changes.variants {
                    tx.execute(
                        "INSERT INTO product_variant
                        (id, product_id, size_id, color_id, price, stock_quantity, images)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        ON CONFLICT(id) DO UPDATE SET product_id=?2, size_id=?3, color_id=?4,
                        price=?5, stock_quantity=?6, images=?7",
                        params![
                            v.id,
                            v.product_id,
                            v.size_id,
                            v.color_id,
                            v.price.to_string(),
                            v.stock_quantity,
                            v.images.join(","),
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

pub struct SqliteSupplierSourceRepository {
    conn: Connection,
}

impl SqliteSupplierSourceRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS supplier_source (
                    id BLOB PRIMARY KEY,
                    source_url TEXT NOT NULL,
                    supplier_name TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn source_from_row(row: &Row) -> rusqlite::Result<SupplierSource> {
    Ok(SupplierSource {
        id: row.get(0)?,
        source_url: row.get(1)?,
        supplier_name: row.get(2)?,
        active: row.get(3)?,
    })
}

impl Repository<SupplierSource> for SqliteSupplierSourceRepository {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<SupplierSource> for SqliteSupplierSourceRepository {
    async fn save(&self, s: SupplierSource) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO supplier_source (id, source_url, supplier_name, active)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET source_url=?2, supplier_name=?3, active=?4",
                    params![s.id, s.source_url, s.supplier_name, s.active],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<SupplierSource> for SqliteSupplierSourceRepository {
    async fn get_one(&self, id: &IdentityOf<SupplierSource>) -> Result<Option<SupplierSource>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, source_url, supplier_name, active FROM supplier_source WHERE id = ?1",
                )?;
                let mut rows = stmt.query([id])?;
                let row = match rows.next()? {
                    Some(r) => r,
                    None => return Ok(None),
                };
                Ok(Some(source_from_row(row)?))
            })
            .await?)
    }
}

#[async_trait]
impl List<SupplierSource> for SqliteSupplierSourceRepository {
    async fn list(&self) -> Result<Vec<SupplierSource>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, source_url, supplier_name, active FROM supplier_source ORDER BY supplier_name",
                )?;
                let items = stmt
                    .query_map([], source_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

#[async_trait]
impl Select<SupplierSource, ActiveSelector> for SqliteSupplierSourceRepository {
    async fn select(&self, _: &ActiveSelector) -> Result<Vec<SupplierSource>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, source_url, supplier_name, active FROM supplier_source
                     WHERE active = 1 ORDER BY supplier_name",
                )?;
                let items = stmt
                    .query_map([], source_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?)
    }
}

impl SupplierSourceRepository for SqliteSupplierSourceRepository {}
