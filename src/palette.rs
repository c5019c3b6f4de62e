//! Six-swatch colour palette extraction from cover art.
//!
//! Pixels are bucketed on a 5-bit-per-channel grid, each bucket becomes a
//! candidate swatch, and each named target picks the unused candidate whose
//! saturation, luma and population score best against the target's ideal.

use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Palette {
    pub vibrant: Option<String>,
    pub muted: Option<String>,
    pub dark_vibrant: Option<String>,
    pub dark_muted: Option<String>,
    pub light_vibrant: Option<String>,
    pub light_muted: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Swatch {
    rgb: [u8; 3],
    population: u32,
    saturation: f64,
    luma: f64,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Vibrant,
    LightVibrant,
    DarkVibrant,
    Muted,
    LightMuted,
    DarkMuted,
}

struct Target {
    slot: Slot,
    luma: (f64, f64, f64),
    saturation: (f64, f64, f64),
}

const SATURATION_WEIGHT: f64 = 3.0;
const LUMA_WEIGHT: f64 = 6.5;
const POPULATION_WEIGHT: f64 = 0.5;

const TARGETS: [Target; 6] = [
    Target { slot: Slot::Vibrant, luma: (0.3, 0.5, 0.7), saturation: (0.35, 1.0, 1.0) },
    Target { slot: Slot::LightVibrant, luma: (0.55, 0.74, 1.0), saturation: (0.35, 1.0, 1.0) },
    Target { slot: Slot::DarkVibrant, luma: (0.0, 0.26, 0.45), saturation: (0.35, 1.0, 1.0) },
    Target { slot: Slot::Muted, luma: (0.3, 0.5, 0.7), saturation: (0.0, 0.3, 0.4) },
    Target { slot: Slot::LightMuted, luma: (0.55, 0.74, 1.0), saturation: (0.0, 0.3, 0.4) },
    Target { slot: Slot::DarkMuted, luma: (0.0, 0.26, 0.45), saturation: (0.0, 0.3, 0.4) },
];

/// Decode an image and compute its palette.
pub fn extract(bytes: &[u8]) -> Result<Palette, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let small = img.thumbnail(96, 96).to_rgb8();
    Ok(from_pixels(small.pixels().map(|p| p.0)))
}

/// Compute a palette from raw RGB pixels.
pub fn from_pixels(pixels: impl Iterator<Item = [u8; 3]>) -> Palette {
    let swatches = quantize(pixels);
    let max_population = swatches.iter().map(|s| s.population).max().unwrap_or(0);
    let mut used = vec![false; swatches.len()];
    let mut palette = Palette::default();

    for target in &TARGETS {
        let best = swatches
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                !used[*i]
                    && in_range(s.luma, target.luma)
                    && in_range(s.saturation, target.saturation)
            })
            .map(|(i, s)| (i, score(s, target, max_population)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((idx, _)) = best else { continue };
        used[idx] = true;
        let hex = Some(to_hex(swatches[idx].rgb));
        match target.slot {
            Slot::Vibrant => palette.vibrant = hex,
            Slot::LightVibrant => palette.light_vibrant = hex,
            Slot::DarkVibrant => palette.dark_vibrant = hex,
            Slot::Muted => palette.muted = hex,
            Slot::LightMuted => palette.light_muted = hex,
            Slot::DarkMuted => palette.dark_muted = hex,
        }
    }
    palette
}

fn quantize(pixels: impl Iterator<Item = [u8; 3]>) -> Vec<Swatch> {
    let mut buckets: HashMap<u16, ([u64; 3], u32)> = HashMap::new();
    for [r, g, b] in pixels {
        let key = (u16::from(r >> 3) << 10) | (u16::from(g >> 3) << 5) | u16::from(b >> 3);
        let entry = buckets.entry(key).or_insert(([0; 3], 0));
        entry.0[0] += u64::from(r);
        entry.0[1] += u64::from(g);
        entry.0[2] += u64::from(b);
        entry.1 += 1;
    }

    let mut swatches: Vec<Swatch> = buckets
        .into_values()
        .map(|(sum, count)| {
            let n = u64::from(count);
            let rgb = [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8];
            let (saturation, luma) = saturation_luma(rgb);
            Swatch { rgb, population: count, saturation, luma }
        })
        // Near-black and near-white carry no colour information.
        .filter(|s| s.luma > 0.05 && s.luma < 0.95)
        .collect();
    // HashMap order is random; keep ties deterministic.
    swatches.sort_by(|a, b| b.population.cmp(&a.population).then(a.rgb.cmp(&b.rgb)));
    swatches
}

/// HSL saturation and lightness in `0.0..=1.0`.
fn saturation_luma([r, g, b]: [u8; 3]) -> (f64, f64) {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let luma = (max + min) / 2.0;
    let delta = max - min;
    if delta == 0.0 {
        return (0.0, luma);
    }
    let saturation = delta / (1.0 - (2.0 * luma - 1.0).abs());
    (saturation.clamp(0.0, 1.0), luma)
}

fn in_range(value: f64, (min, _, max): (f64, f64, f64)) -> bool {
    value >= min && value <= max
}

fn score(swatch: &Swatch, target: &Target, max_population: u32) -> f64 {
    let population = if max_population == 0 {
        0.0
    } else {
        f64::from(swatch.population) / f64::from(max_population)
    };
    let weighted = (1.0 - (swatch.saturation - target.saturation.1).abs()) * SATURATION_WEIGHT
        + (1.0 - (swatch.luma - target.luma.1).abs()) * LUMA_WEIGHT
        + population * POPULATION_WEIGHT;
    weighted / (SATURATION_WEIGHT + LUMA_WEIGHT + POPULATION_WEIGHT)
}

fn to_hex([r, g, b]: [u8; 3]) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}
