use crate::color::Lab;
use serde::Serialize;

const HASH_SIDE: usize = 8;

/// Coarse fingerprint of an image, kept for the duration of a run.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ImageSignature {
    pub url: String,
    pub perceptual_hash: u64,
    pub dominant_color: Option<Lab>,
}

fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

/// 8x8 average hash of an RGBA buffer: block means of the luminance, one
/// bit per block set when it is brighter than the mean of all blocks.
pub fn average_hash(rgba: &[u8], width: u32, height: u32) -> Option<u64> {
    let (w, h) = (width as usize, height as usize);
    if w < HASH_SIDE || h < HASH_SIDE || rgba.len() < w * h * 4 {
        return None;
    }
    let mut blocks = [0f32; HASH_SIDE * HASH_SIDE];
    for (by, row) in blocks.chunks_mut(HASH_SIDE).enumerate() {
        let (y0, y1) = (by * h / HASH_SIDE, (by + 1) * h / HASH_SIDE);
        for (bx, block) in row.iter_mut().enumerate() {
            let (x0, x1) = (bx * w / HASH_SIDE, (bx + 1) * w / HASH_SIDE);
            let mut sum = 0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    let i = (y * w + x) * 4;
                    sum += luma(&rgba[i..i + 3]);
                }
            }
            *block = sum / ((y1 - y0) * (x1 - x0)) as f32;
        }
    }
    let mean = blocks.iter().sum::<f32>() / blocks.len() as f32;
    Some(
        blocks
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > mean)
            .fold(0u64, |hash, (i, _)| hash | (1 << i)),
    )
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub fn is_similar(a: u64, b: u64, threshold: u32) -> bool {
    hamming(a, b) <= threshold
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut i = i;
    while parent[i] != root {
        let next = parent[i];
        parent[i] = root;
        i = next;
    }
    root
}

/// Groups hashes whose pairwise distance is within `link_distance`
/// (single linkage). Clusters are returned largest first, members in
/// input order.
pub fn cluster(hashes: &[u64], link_distance: u32) -> Vec<Vec<usize>> {
    let mut parent = (0..hashes.len()).collect::<Vec<_>>();
    for i in 0..hashes.len() {
        for j in i + 1..hashes.len() {
            if is_similar(hashes[i], hashes[j], link_distance) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut roots = Vec::new();
    for i in 0..hashes.len() {
        let root = find(&mut parent, i);
        match roots.iter().position(|r| *r == root) {
            Some(c) => clusters[c].push(i),
            None => {
                roots.push(root);
                clusters.push(vec![i]);
            }
        }
    }
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    clusters
}

/// Indices to keep after dropping minority clusters that are farther than
/// `outlier_distance` from every member of the majority cluster.
pub fn drop_outliers(hashes: &[u64], link_distance: u32, outlier_distance: u32) -> Vec<usize> {
    let clusters = cluster(hashes, link_distance);
    let Some(major) = clusters.first() else {
        return Vec::new();
    };
    // no majority to compare against
    if clusters.len() > 1 && clusters[1].len() == major.len() {
        return (0..hashes.len()).collect();
    }
    let mut keep = major.clone();
    for minor in clusters.iter().skip(1) {
        let distance = minor
            .iter()
            .flat_map(|i| major.iter().map(move |j| hamming(hashes[*i], hashes[*j])))
            .min()
            .unwrap_or(u32::MAX);
        if distance <= outlier_distance {
            keep.extend(minor);
        } else {
            log::debug!("Dropping {} outlier frame(s) at distance {distance}", minor.len());
        }
    }
    keep.sort_unstable();
    keep
}

/// How much a frame looks like the rest of the gallery, `0..=1`.
pub fn product_likelihood(hash: u64, others: &[u64], outlier_distance: u32) -> f32 {
    let Some(nearest) = others.iter().map(|o| hamming(hash, *o)).min() else {
        return 1.0;
    };
    let span = (outlier_distance * 2).max(1) as f32;
    (1.0 - nearest.saturating_sub(outlier_distance / 2) as f32 / span).clamp(0.0, 1.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignatureMatch<'a, K> {
    pub key: &'a K,
    pub url: &'a str,
    pub distance: u32,
    /// Secondary score from the dominant colors, `0..=1`.
    pub similarity: f32,
}

/// Run-scoped index of signatures for near-duplicate lookups.
#[derive(Clone, Debug)]
pub struct SignatureIndex<K> {
    entries: Vec<(K, ImageSignature)>,
}

impl<K> Default for SignatureIndex<K> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

fn color_similarity(a: Option<Lab>, b: Option<Lab>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => 1.0 / (1.0 + a.delta_e(&b) / 10.0),
        _ => 0.0,
    }
}

impl<K: PartialEq> SignatureIndex<K> {
    pub fn insert(&mut self, key: K, signature: ImageSignature) {
        let duplicate = self
            .entries
            .iter()
            .any(|(k, s)| *k == key && s.url == signature.url);
        if !duplicate {
            self.entries.push((key, signature));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries within `max_distance`, nearest first; equal distances are
    /// ordered by color similarity.
    pub fn query(&self, signature: &ImageSignature, max_distance: u32) -> Vec<SignatureMatch<'_, K>> {
        let mut found = self
            .entries
            .iter()
            .filter_map(|(key, s)| {
                let distance = hamming(s.perceptual_hash, signature.perceptual_hash);
                (distance <= max_distance).then(|| SignatureMatch {
                    key,
                    url: &s.url,
                    distance,
                    similarity: color_similarity(s.dominant_color, signature.dominant_color),
                })
            })
            .collect::<Vec<_>>();
        found.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then(b.similarity.total_cmp(&a.similarity))
        });
        found
    }
}
