use crate::config::{ColorConfig, ImageConfig};
use anyhow::Context;
use derive_more::{Display, Error};
use log_error::LogError;
use reqwest_middleware::ClientWithMiddleware;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub mod expand;
pub mod probe;
pub mod signature;

pub use expand::{is_direct_image_url, ExpansionBudget};
pub use probe::ImageProbe;
pub use signature::{ImageSignature, SignatureIndex};

#[derive(Clone, Debug, Display, Error)]
pub enum ImageError {
    #[error(ignore)]
    #[display("Not an image: {_0}")]
    NotAnImage(String),
    #[error(ignore)]
    #[display("Unable to decode image {_0}")]
    Undecodable(String),
    #[error(ignore)]
    #[display("Image is too large ({_0} bytes)")]
    TooLarge(usize),
}

/// Resolved, filtered and ordered images of one row.
#[derive(Clone, Debug, Default)]
pub struct Gallery {
    pub images: Vec<String>,
    /// Probes of the kept images, same order; missing for unprobed ones.
    pub probes: Vec<ImageProbe>,
    /// Candidates that turned out not to be usable images.
    pub rejected: Vec<ImageError>,
}

#[derive(Clone, Debug)]
enum ProbeFailure {
    Invalid(ImageError),
    Unreachable,
}

impl Gallery {
    pub fn signatures(&self) -> Vec<ImageSignature> {
        self.probes.iter().filter_map(ImageProbe::signature).collect()
    }
}

/// Turns raw image references into galleries. Holds the run-scoped probe
/// and expansion caches and the expansion budget.
pub struct GalleryResolver {
    client: ClientWithMiddleware,
    image: Arc<ImageConfig>,
    color: Arc<ColorConfig>,
    budget: ExpansionBudget,
    expanded: HashMap<String, Vec<String>>,
    probes: HashMap<String, Result<ImageProbe, ProbeFailure>>,
}

impl GalleryResolver {
    pub fn new(client: ClientWithMiddleware, image: Arc<ImageConfig>, color: Arc<ColorConfig>) -> Self {
        Self {
            client,
            budget: ExpansionBudget::new(image.max_expansions),
            image,
            color,
            expanded: HashMap::new(),
            probes: HashMap::new(),
        }
    }

    pub fn remaining_expansions(&self) -> usize {
        self.budget.remaining()
    }

    async fn expand(&mut self, page: &str) -> Result<Vec<String>, anyhow::Error> {
        if let Some(found) = self.expanded.get(page) {
            return Ok(found.clone());
        }
        if !self.budget.try_spend() {
            log::debug!("Expansion budget exhausted, skipping {page}");
            return Ok(Vec::new());
        }
        let url = expand::expansion_url(page);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let html = resp.text().await?;
        let found = expand::extract_page_images(&html, &url, self.image.max_images_per_page);
        log::debug!("{page}: {} image(s)", found.len());
        self.expanded.insert(page.to_string(), found.clone());
        Ok(found)
    }

    async fn download(&self, url: &str) -> Result<ImageProbe, anyhow::Error> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .and_then(|ct| ct.parse::<mime::Mime>().ok());
        if let Some(ct) = &content_type {
            if ct.type_() != mime::IMAGE && ct.essence_str() != "application/octet-stream" {
                return Err(ImageError::NotAnImage(format!("{url} ({ct})")).into());
            }
        }
        if let Some(len) = resp.content_length() {
            if len as usize > self.image.max_probe_bytes {
                return Err(ImageError::TooLarge(len as usize).into());
            }
        }
        let bytes = resp.bytes().await?;
        let (url, image, color) = (url.to_string(), self.image.clone(), self.color.clone());
        let probe = tokio::task::spawn_blocking(move || probe::analyze(&url, &bytes, &image, &color))
            .await
            .context("Image analysis panicked")??;
        Ok(probe)
    }

    /// Probe results are cached per URL for the whole run, failures included.
    async fn probe(&mut self, url: &str) -> Result<ImageProbe, ProbeFailure> {
        if let Some(cached) = self.probes.get(url) {
            return cached.clone();
        }
        let probe = self.download(url).await.map_err(|err| {
            log::warn!("Unable to probe {url}: {err:#}");
            match err.downcast_ref::<ImageError>() {
                Some(invalid) => ProbeFailure::Invalid(invalid.clone()),
                None => ProbeFailure::Unreachable,
            }
        });
        self.probes.insert(url.to_string(), probe.clone());
        probe
    }

    /// Direct URLs pass through, pages are expanded while the budget lasts.
    pub async fn candidates(&mut self, refs: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for r in refs {
            let found = if is_direct_image_url(r) {
                vec![r.clone()]
            } else {
                self.expand(r)
                    .await
                    .with_context(|| format!("Unable to expand {r}"))
                    .log_error("Gallery expansion failed")
                    .unwrap_or_default()
            };
            out.extend(found.into_iter().filter(|u| seen.insert(u.clone())));
        }
        out
    }

    /// Full gallery pipeline for one row: expansion, probing, the quality
    /// gate, outlier clusters and supplier cover frames.
    pub async fn resolve(&mut self, refs: &[String], cover_frames: usize) -> Gallery {
        let candidates = self.candidates(refs).await;
        let mut probed = Vec::new();
        let mut rejected = Vec::new();
        let mut unprobed = Vec::new();
        for url in candidates.iter().take(self.image.max_gallery * 2) {
            match self.probe(url).await {
                Ok(p) => probed.push(p),
                Err(ProbeFailure::Invalid(err)) => rejected.push(err),
                Err(ProbeFailure::Unreachable) => unprobed.push(url.clone()),
            }
        }
        if probed.is_empty() {
            let images = unprobed
                .into_iter()
                .take(self.image.max_gallery)
                .collect::<Vec<_>>();
            return Gallery {
                images,
                probes: Vec::new(),
                rejected,
            };
        }
        let gated = probe::quality_filter(&probed, &self.image)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let mut kept = self.drop_outlier_frames(gated);
        self.drop_cover_frames(&mut kept, cover_frames);
        kept.truncate(self.image.max_gallery);
        Gallery {
            images: kept.iter().map(|p| p.url.clone()).collect(),
            probes: kept,
            rejected,
        }
    }

    fn drop_outlier_frames(&self, probes: Vec<ImageProbe>) -> Vec<ImageProbe> {
        let (hashed, plain): (Vec<_>, Vec<_>) = probes.into_iter().partition(|p| p.hash.is_some());
        let hashes = hashed.iter().filter_map(|p| p.hash).collect::<Vec<_>>();
        let keep = signature::drop_outliers(
            &hashes,
            self.image.cluster_link_distance,
            self.image.cluster_outlier_distance,
        );
        let mut out = hashed
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, p)| p)
            .collect::<Vec<_>>();
        out.extend(plain);
        out
    }

    fn drop_cover_frames(&self, probes: &mut Vec<ImageProbe>, cover_frames: usize) {
        if cover_frames == 0 || probes.len() < self.image.cover_min_gallery.max(cover_frames + 1) {
            return;
        }
        let rest = probes[cover_frames..]
            .iter()
            .filter_map(|p| p.hash)
            .collect::<Vec<_>>();
        let mut index = 0;
        probes.retain(|p| {
            let leading = index < cover_frames;
            index += 1;
            if !leading {
                return true;
            }
            let likelihood = p
                .hash
                .map(|h| signature::product_likelihood(h, &rest, self.image.cluster_outlier_distance))
                .unwrap_or(0.0);
            let keep = likelihood >= self.image.cover_min_likelihood && p.passes_gate(&self.image);
            if !keep {
                log::debug!("Dropping cover frame {} ({likelihood:.2})", p.url);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::probe::tests::probe;
    use super::*;

    fn resolver(config: ImageConfig) -> GalleryResolver {
        let client = crate::fetch::build_client(std::time::Duration::from_secs(1), 0).unwrap();
        GalleryResolver::new(client, Arc::new(config), Arc::new(ColorConfig::default()))
    }

    fn hashed(url: &str, hash: u64) -> ImageProbe {
        ImageProbe {
            hash: Some(hash),
            ..probe(url, 900, 900, 3.0)
        }
    }

    #[test]
    fn drops_outlier_cluster() {
        let r = resolver(ImageConfig::default());
        let probes = vec![
            hashed("a", 0),
            hashed("b", 0b1),
            hashed("logo", u64::MAX),
            hashed("c", 0b11),
        ];
        let kept = r.drop_outlier_frames(probes);
        assert_eq!(vec!["a", "b", "c"], kept.iter().map(|p| p.url.as_str()).collect::<Vec<_>>());
    }

    #[test]
    fn drops_leading_cover_frames_for_configured_suppliers() {
        let r = resolver(ImageConfig::default());
        let gallery = || {
            vec![
                hashed("cover", u64::MAX),
                hashed("a", 0),
                hashed("b", 0b1),
                hashed("c", 0b11),
            ]
        };
        let mut probes = gallery();
        r.drop_cover_frames(&mut probes, 1);
        assert_eq!(vec!["a", "b", "c"], probes.iter().map(|p| p.url.as_str()).collect::<Vec<_>>());

        let mut probes = gallery();
        r.drop_cover_frames(&mut probes, 0);
        assert_eq!(4, probes.len());

        let mut probes = gallery();
        probes.truncate(3);
        r.drop_cover_frames(&mut probes, 1);
        assert_eq!(3, probes.len());

        let mut probes = gallery();
        probes[0].hash = Some(0b111);
        r.drop_cover_frames(&mut probes, 1);
        assert_eq!(4, probes.len());
    }

    #[test]
    fn collects_signatures() {
        let gallery = Gallery {
            images: vec!["a".into(), "b".into()],
            probes: vec![hashed("a", 1), ImageProbe { hash: None, ..hashed("b", 0) }],
            rejected: Vec::new(),
        };
        assert_eq!(1, gallery.signatures().len());
    }
}
