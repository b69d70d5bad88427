use super::kmeans::kmeans;
use super::lab::{rgb_to_hsl, Lab};
use super::{ColorLabel, ColorName};
use crate::config::ColorConfig;
use serde::Serialize;

/// Clusters closer than this count as the same color when measuring the
/// dominant share.
const SAME_COLOR_DELTA_E: f32 = 12.0;

/// Dark blue regions with chroma inside this band keep the previous label.
const BLUE_BAND: (f32, f32) = (0.05, 0.10);
/// Light warm regions with chroma inside this band keep the previous label.
const YELLOW_BAND: (f32, f32) = (0.30, 0.45);
const NEUTRAL_CHROMA: f32 = 0.08;

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct DominantColor {
    pub lab: Lab,
    /// Fraction of sampled pixels belonging to the dominant color.
    pub share: f32,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ColorVerdict {
    pub label: ColorLabel,
    pub confidence: f32,
}

fn is_background([r, g, b, a]: [u8; 4]) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    a < 128 || (min > 225 && max - min < 20) || max < 18
}

/// Center-weighted pixel sample of an RGBA buffer: every grid point inside
/// the central box, one in three outside of it. Background-like pixels are
/// dropped unless nothing else is left.
pub fn sample_pixels(rgba: &[u8], width: u32, height: u32, limit: usize) -> Vec<Lab> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || rgba.len() < w * h * 4 {
        return Vec::new();
    }
    let step = (((w * h) as f32 / limit.max(1) as f32).sqrt().floor() as usize).max(1);
    let (x0, x1) = (w / 5, w - w / 5);
    let (y0, y1) = (h / 5, h - h / 5);
    let mut kept = Vec::new();
    let mut center = Vec::new();
    for (gy, y) in (0..h).step_by(step).enumerate() {
        for (gx, x) in (0..w).step_by(step).enumerate() {
            let inside = (x0..x1).contains(&x) && (y0..y1).contains(&y);
            if !inside && (gx + gy) % 3 != 0 {
                continue;
            }
            let i = (y * w + x) * 4;
            let px = [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]];
            let lab = Lab::from_rgb(px[0], px[1], px[2]);
            if inside {
                center.push(lab);
            }
            if !is_background(px) {
                kept.push(lab);
            }
        }
    }
    if kept.len() * 20 < center.len() {
        center
    } else {
        kept
    }
}

pub fn dominant_color(samples: &[Lab], config: &ColorConfig) -> Option<DominantColor> {
    let clusters = kmeans(samples, config.clusters, config.max_iterations);
    let top = clusters.first()?;
    let same = clusters
        .iter()
        .filter(|c| c.centroid.delta_e(&top.centroid) < SAME_COLOR_DELTA_E)
        .map(|c| c.size)
        .sum::<usize>();
    Some(DominantColor {
        lab: top.centroid,
        share: same as f32 / samples.len() as f32,
    })
}

fn neutral(l: f32) -> ColorName {
    if l < 0.2 {
        ColorName::Black
    } else if l > 0.85 {
        ColorName::White
    } else {
        ColorName::Gray
    }
}

/// Names a Lab color. `prior` is the label currently leading for the item;
/// inside the hysteresis bands it decides instead of a hard threshold.
pub fn classify_lab(lab: Lab, prior: Option<ColorName>) -> ColorName {
    let hsl = rgb_to_hsl(lab.to_rgb());
    let (h, l, c) = (hsl.h, hsl.l, hsl.c);

    if (190.0..265.0).contains(&h) && l < 0.4 && c < BLUE_BAND.1 {
        let blue = if c < BLUE_BAND.0 {
            false
        } else {
            match prior {
                Some(ColorName::Blue) => true,
                Some(p) if p.is_neutral() => false,
                _ => c >= (BLUE_BAND.0 + BLUE_BAND.1) / 2.0,
            }
        };
        return if blue { ColorName::Blue } else { neutral(l) };
    }
    if c < NEUTRAL_CHROMA || l < 0.08 || l > 0.96 {
        return neutral(l);
    }
    if (20.0..70.0).contains(&h) && l >= 0.55 {
        if c <= YELLOW_BAND.0 {
            return ColorName::Beige;
        }
        if h >= 40.0 && c < YELLOW_BAND.1 {
            return match prior {
                Some(ColorName::Yellow) => ColorName::Yellow,
                Some(ColorName::Beige) => ColorName::Beige,
                _ if c >= (YELLOW_BAND.0 + YELLOW_BAND.1) / 2.0 => ColorName::Yellow,
                _ => ColorName::Beige,
            };
        }
    }
    match h {
        h if !(15.0..345.0).contains(&h) => {
            if l > 0.7 {
                ColorName::Pink
            } else {
                ColorName::Red
            }
        }
        h if h < 45.0 => {
            if l < 0.45 || c < 0.25 {
                ColorName::Brown
            } else {
                ColorName::Orange
            }
        }
        h if h < 70.0 => {
            if l < 0.3 {
                ColorName::Green
            } else {
                ColorName::Yellow
            }
        }
        h if h < 170.0 => ColorName::Green,
        h if h < 265.0 => ColorName::Blue,
        h if h < 290.0 => ColorName::Purple,
        h if h < 320.0 => {
            if l > 0.7 {
                ColorName::Pink
            } else {
                ColorName::Purple
            }
        }
        _ => ColorName::Pink,
    }
}

#[derive(Clone, Copy, Debug)]
struct Tally {
    name: ColorName,
    weight: f32,
}

fn rank(tallies: &mut [Tally]) {
    tallies.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.name.is_neutral().cmp(&b.name.is_neutral()))
            .then(a.name.cmp(&b.name))
    });
}

/// Combines per-image dominant colors into one verdict. Each image votes
/// with the share of its dominant color.
pub fn vote(images: &[DominantColor], config: &ColorConfig) -> Option<ColorVerdict> {
    let mut tallies: Vec<Tally> = Vec::new();
    let mut prior = None;
    for image in images {
        let name = classify_lab(image.lab, prior);
        let weight = image.share.clamp(0.05, 1.0);
        match tallies.iter_mut().find(|t| t.name == name) {
            Some(t) => t.weight += weight,
            None => tallies.push(Tally { name, weight }),
        }
        rank(&mut tallies);
        prior = tallies.first().map(|t| t.name);
    }
    let top = *tallies.first()?;
    let total = tallies.iter().map(|t| t.weight).sum::<f32>();
    let n = images.len() as f32;

    if config.forced_single_at == Some(images.len()) {
        let winner = match tallies.get(1) {
            Some(second)
                if top.name.is_neutral()
                    && !second.name.is_neutral()
                    && top.weight - second.weight <= 0.1 * total =>
            {
                *second
            }
            _ => top,
        };
        return Some(ColorVerdict {
            label: ColorLabel::Named(winner.name),
            confidence: winner.weight / n,
        });
    }
    if let Some(second) = tallies.get(1) {
        if second.weight >= config.multi_ratio * top.weight
            && top.weight / total >= config.multi_min_share
            && second.weight / total >= config.multi_min_share
        {
            return Some(ColorVerdict {
                label: ColorLabel::Multi,
                confidence: (top.weight + second.weight) / n,
            });
        }
    }
    Some(ColorVerdict {
        label: ColorLabel::Named(top.name),
        confidence: top.weight / n,
    })
}
