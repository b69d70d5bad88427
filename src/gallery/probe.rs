use super::signature::{average_hash, ImageSignature};
use super::ImageError;
use crate::color::classify::{dominant_color, sample_pixels};
use crate::color::DominantColor;
use crate::config::{ColorConfig, ImageConfig};
use serde::Serialize;

/// What the quality gate and the color classifier need to know about one
/// downloaded image.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ImageProbe {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    pub entropy: f32,
    pub hash: Option<u64>,
    pub dominant: Option<DominantColor>,
}

impl ImageProbe {
    pub fn signature(&self) -> Option<ImageSignature> {
        Some(ImageSignature {
            url: self.url.clone(),
            perceptual_hash: self.hash?,
            dominant_color: self.dominant.map(|d| d.lab),
        })
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (long, short) = (self.width.max(self.height), self.width.min(self.height));
        long as f32 / short.max(1) as f32
    }

    /// Too small, banner-shaped or flat images are most likely logos.
    pub fn passes_gate(&self, config: &ImageConfig) -> bool {
        self.width.min(self.height) >= config.min_side
            && self.aspect_ratio() <= config.max_aspect_ratio
            && self.entropy >= config.min_entropy
    }
}

/// Shannon entropy of the luminance histogram, in bits.
pub fn luminance_entropy(rgba: &[u8]) -> f32 {
    let mut histogram = [0u32; 256];
    let mut total = 0u32;
    for px in rgba.chunks_exact(4) {
        let y = (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32).round();
        histogram[y.clamp(0.0, 255.0) as usize] += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    histogram
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f32 / total as f32;
            -p * p.log2()
        })
        .sum()
}

/// Decodes the payload and measures it. Blocking; run it off the runtime.
pub fn analyze(
    url: &str,
    bytes: &[u8],
    image: &ImageConfig,
    color: &ColorConfig,
) -> Result<ImageProbe, ImageError> {
    if bytes.len() > image.max_probe_bytes {
        return Err(ImageError::TooLarge(bytes.len()));
    }
    let decoded = photon_rs::native::open_image_from_bytes(bytes)
        .map_err(|err| ImageError::Undecodable(format!("{url}: {err}")))?;
    let (width, height) = (decoded.get_width(), decoded.get_height());
    let pixels = decoded.get_raw_pixels();
    let samples = sample_pixels(&pixels, width, height, color.sample_limit);
    Ok(ImageProbe {
        url: url.to_string(),
        width,
        height,
        bytes: bytes.len(),
        entropy: luminance_entropy(&pixels),
        hash: average_hash(&pixels, width, height),
        dominant: dominant_color(&samples, color),
    })
}

/// Quality-gated subset of the probes, in order. When the gate rejects
/// everything the full list is returned instead of nothing.
pub fn quality_filter<'a>(probes: &'a [ImageProbe], config: &ImageConfig) -> Vec<&'a ImageProbe> {
    let passing = probes
        .iter()
        .filter(|p| p.passes_gate(config))
        .collect::<Vec<_>>();
    if passing.is_empty() {
        if !probes.is_empty() {
            log::debug!("No image passed the quality gate, keeping {} candidate(s)", probes.len());
        }
        probes.iter().collect()
    } else {
        passing
    }
}
