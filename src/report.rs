use crate::fetch::FetchError;
use crate::gallery::ImageError;
use derive_more::Display;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MAX_ERROR_SAMPLES: usize = 3;
pub const MAX_MESSAGE_CHARS: usize = 300;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[serde(rename_all = "snake_case")]
pub enum ImportErrorCode {
    #[display("network_timeout")]
    NetworkTimeout,
    #[display("invalid_image")]
    InvalidImage,
    #[display("parse_failed")]
    ParseFailed,
    #[display("db_conflict")]
    DbConflict,
    #[display("unknown")]
    Unknown,
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn classify_reqwest(err: &reqwest::Error) -> ImportErrorCode {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return ImportErrorCode::NetworkTimeout;
    }
    match err.status().map(|s| s.as_u16()) {
        Some(429) | Some(408) | Some(500..=599) => ImportErrorCode::NetworkTimeout,
        _ => ImportErrorCode::Unknown,
    }
}

impl ImportErrorCode {
    /// Walks the error chain looking for a known cause; falls back to the
    /// message text for errors that only carry a description.
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<FetchError>() {
                return match e {
                    FetchError::Network(_) | FetchError::Timeout => Self::NetworkTimeout,
                    FetchError::Status { status, .. } => match status {
                        429 | 408 | 500..=599 => Self::NetworkTimeout,
                        _ => Self::Unknown,
                    },
                    FetchError::Parse(_) | FetchError::Empty => Self::ParseFailed,
                };
            }
            if cause.downcast_ref::<ImageError>().is_some() {
                return Self::InvalidImage;
            }
            if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
                return classify_reqwest(e);
            }
            if let Some(e) = cause.downcast_ref::<reqwest_middleware::Error>() {
                return match e {
                    reqwest_middleware::Error::Reqwest(e) => classify_reqwest(e),
                    reqwest_middleware::Error::Middleware(_) => Self::NetworkTimeout,
                };
            }
            if let Some(tokio_rusqlite::Error::Rusqlite(e)) = cause.downcast_ref::<tokio_rusqlite::Error>() {
                if is_constraint_violation(e) {
                    return Self::DbConflict;
                }
            }
            if let Some(e) = cause.downcast_ref::<rusqlite::Error>() {
                if is_constraint_violation(e) {
                    return Self::DbConflict;
                }
            }
            if cause.downcast_ref::<csv::Error>().is_some() {
                return Self::ParseFailed;
            }
            if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
                return Self::NetworkTimeout;
            }
            if let Some(e) = cause.downcast_ref::<std::io::Error>() {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    return Self::NetworkTimeout;
                }
            }
        }
        let msg = err.to_string().to_lowercase();
        if msg.contains("timed out")
            || msg.contains("timeout")
            || msg.contains("too many requests")
            || msg.contains("429")
        {
            Self::NetworkTimeout
        } else if msg.contains("unique constraint") || msg.contains("constraint failed") {
            Self::DbConflict
        } else if msg.contains("content-type") || msg.contains("not an image") {
            Self::InvalidImage
        } else {
            Self::Unknown
        }
    }
}

/// Collapses whitespace and cuts the message to a bounded length.
pub fn normalize_message(msg: &str) -> String {
    let collapsed = msg.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated = crate::truncate_chars(&collapsed, MAX_MESSAGE_CHARS);
    if truncated.len() < collapsed.len() {
        format!("{truncated}…")
    } else {
        collapsed
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
}

impl EntityCounts {
    pub fn merge(&mut self, other: EntityCounts) {
        self.created += other.created;
        self.updated += other.updated;
    }
}

/// Catalog mutations made while importing one source.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounters {
    pub categories_created: usize,
    pub colors_created: usize,
    pub sizes_created: usize,
    pub products: EntityCounts,
    pub variants: EntityCounts,
}

impl CatalogCounters {
    pub fn merge(&mut self, other: CatalogCounters) {
        self.categories_created += other.categories_created;
        self.colors_created += other.colors_created;
        self.sizes_created += other.sizes_created;
        self.products.merge(other.products);
        self.variants.merge(other.variants);
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source_id: Uuid,
    pub url: String,
    pub supplier: String,
    pub imported_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub error_count: usize,
    pub error_codes: BTreeMap<ImportErrorCode, usize>,
    pub error_samples: Vec<String>,
    pub last_error_message: Option<String>,
    /// The source could not be fetched or committed as a whole.
    pub failed: bool,
}

impl SourceReport {
    pub fn new(source_id: Uuid, url: impl Into<String>, supplier: impl Into<String>) -> Self {
        Self {
            source_id,
            url: url.into(),
            supplier: supplier.into(),
            imported_count: 0,
            created_count: 0,
            updated_count: 0,
            error_count: 0,
            error_codes: BTreeMap::new(),
            error_samples: Vec::new(),
            last_error_message: None,
            failed: false,
        }
    }

    pub fn record_created(&mut self) {
        self.imported_count += 1;
        self.created_count += 1;
    }

    pub fn record_updated(&mut self) {
        self.imported_count += 1;
        self.updated_count += 1;
    }

    /// Counts the error under its code and keeps the first few messages.
    /// `context` identifies the row or stage, e.g. `row 12 (Model X)`.
    pub fn record_error(&mut self, context: &str, err: &anyhow::Error) -> ImportErrorCode {
        let code = ImportErrorCode::classify(err);
        let message = normalize_message(&format!("{context}: {err:#}"));
        self.error_count += 1;
        *self.error_codes.entry(code).or_default() += 1;
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(message.clone());
        }
        self.last_error_message = Some(message);
        code
    }

    /// The whole source failed (fetch or commit); nothing of it was kept.
    pub fn record_failure(&mut self, context: &str, err: &anyhow::Error) -> ImportErrorCode {
        self.failed = true;
        self.imported_count = 0;
        self.created_count = 0;
        self.updated_count = 0;
        self.record_error(context, err)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub dry_run: bool,
    pub categories_created: usize,
    pub colors_created: usize,
    pub sizes_created: usize,
    pub products: EntityCounts,
    pub variants: EntityCounts,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            categories_created: 0,
            colors_created: 0,
            sizes_created: 0,
            products: EntityCounts::default(),
            variants: EntityCounts::default(),
            sources: Vec::new(),
        }
    }

    pub fn add_counters(&mut self, counters: CatalogCounters) {
        self.categories_created += counters.categories_created;
        self.colors_created += counters.colors_created;
        self.sizes_created += counters.sizes_created;
        self.products.merge(counters.products);
        self.variants.merge(counters.variants);
    }

    pub fn error_count(&self) -> usize {
        self.sources.iter().map(|s| s.error_count).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} sources, products +{} ~{}, variants +{} ~{}, categories +{}, {} errors{}",
            self.sources.len(),
            self.products.created,
            self.products.updated,
            self.variants.created,
            self.variants.updated,
            self.categories_created,
            self.error_count(),
            if self.dry_run { " (dry run)" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_typed_errors() {
        let err = anyhow::Error::from(FetchError::Status {
            status: 429,
            url: "http://x".to_string(),
        });
        assert_eq!(ImportErrorCode::NetworkTimeout, ImportErrorCode::classify(&err));
        let err = anyhow::Error::from(FetchError::Parse("no rows".to_string()));
        assert_eq!(ImportErrorCode::ParseFailed, ImportErrorCode::classify(&err));
        let err = anyhow::Error::from(ImageError::NotAnImage("text/html".to_string()))
            .context("Unable to probe image");
        assert_eq!(ImportErrorCode::InvalidImage, ImportErrorCode::classify(&err));
    }

    #[test]
    fn classifies_constraint_violations() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: 2067,
            },
            Some("UNIQUE constraint failed: product.slug".to_string()),
        );
        let err = anyhow::Error::from(tokio_rusqlite::Error::Rusqlite(err));
        assert_eq!(ImportErrorCode::DbConflict, ImportErrorCode::classify(&err));
    }

    #[test]
    fn classifies_by_message() {
        let err = anyhow::anyhow!("operation timed out");
        assert_eq!(ImportErrorCode::NetworkTimeout, ImportErrorCode::classify(&err));
        let err = anyhow::anyhow!("something odd");
        assert_eq!(ImportErrorCode::Unknown, ImportErrorCode::classify(&err));
    }

    #[test]
    fn keeps_three_samples() {
        let mut report = SourceReport::new(Uuid::nil(), "http://x", "S");
        for i in 0..5 {
            report.record_error(&format!("row {i}"), &anyhow::anyhow!("bad   \n price"));
        }
        assert_eq!(5, report.error_count);
        assert_eq!(3, report.error_samples.len());
        assert_eq!(Some(&5), report.error_codes.get(&ImportErrorCode::Unknown));
        assert_eq!(Some("row 4: bad price".to_string()), report.last_error_message);
    }

    #[test]
    fn truncates_messages() {
        let long = "x".repeat(1000);
        let msg = normalize_message(&long);
        assert_eq!(MAX_MESSAGE_CHARS + 1, msg.chars().count());
        assert_eq!("a b c", normalize_message(" a\t b\n\nc "));
    }

    #[test]
    fn serializes_codes_as_snake_case() {
        let mut report = SourceReport::new(Uuid::nil(), "u", "s");
        report.record_error("row 1", &anyhow::anyhow!("timeout"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(1, json["error_codes"]["network_timeout"]);
    }
}
