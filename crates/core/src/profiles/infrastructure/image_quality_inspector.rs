//! Profile image heuristics on top of the `image` crate.
//!
//! Quality is scored out of 100: up to 40 points for sharpness (variance of
//! the 4-neighbour Laplacian, saturating at 500), 30 for exposure (mean
//! brightness near mid-gray) and 30 for contrast (luma standard deviation,
//! saturating at 80).
use std::path::Path;

use image::imageops::FilterType;

use crate::profiles::domain::image_inspector::ImageInspector;
use crate::shared::frame::Frame;

const SHARPNESS_POINTS: f64 = 40.0;
const SHARPNESS_FULL_VARIANCE: f64 = 500.0;
const EXPOSURE_POINTS: f64 = 30.0;
const MID_GRAY: f64 = 127.0;
const CONTRAST_POINTS: f64 = 30.0;
const CONTRAST_FULL_STD: f64 = 80.0;

const HASH_SIZE: u32 = 8;

pub struct ImageQualityInspector;

impl ImageQualityInspector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageQualityInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageInspector for ImageQualityInspector {
    fn is_valid_image(&self, path: &Path) -> bool {
        matches!(image::image_dimensions(path), Ok((w, h)) if w > 0 && h > 0)
    }

    fn assess_quality(&self, frame: &Frame) -> f64 {
        let luma = luma_plane(frame);
        if luma.is_empty() {
            return 0.0;
        }
        let (mean, std) = mean_and_std(&luma);
        let sharpness = laplacian_variance(&luma, frame.width() as usize, frame.height() as usize);

        let sharpness_score = (sharpness / SHARPNESS_FULL_VARIANCE).min(1.0) * SHARPNESS_POINTS;
        let exposure_score = (1.0 - (mean - MID_GRAY).abs() / MID_GRAY).max(0.0) * EXPOSURE_POINTS;
        let contrast_score = (std / CONTRAST_FULL_STD).min(1.0) * CONTRAST_POINTS;
        sharpness_score + exposure_score + contrast_score
    }

    /// 8x8 average hash as 16 hex digits, most significant bit first.
    fn perceptual_hash(&self, frame: &Frame) -> String {
        if frame.width() == 0 || frame.height() == 0 {
            return String::new();
        }
        let Some(gray) = gray_image(frame) else {
            return String::new();
        };
        let small = image::imageops::resize(&gray, HASH_SIZE, HASH_SIZE, FilterType::Lanczos3);
        let pixels: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();
        let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
        let bits = pixels
            .iter()
            .fold(0u64, |acc, &p| (acc << 1) | u64::from(p > mean));
        format!("{bits:016x}")
    }
}

fn luma_plane(frame: &Frame) -> Vec<f64> {
    let mut out = Vec::with_capacity(frame.width() as usize * frame.height() as usize);
    for y in 0..frame.height() {
        for x in 0..frame.width() {
            out.push(frame.luma_at(x, y));
        }
    }
    out
}

fn gray_image(frame: &Frame) -> Option<image::GrayImage> {
    let luma: Vec<u8> = luma_plane(frame)
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    image::GrayImage::from_raw(frame.width(), frame.height(), luma)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(luma: &[f64], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }
    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let c = luma[y * width + x];
            let sum = luma[(y - 1) * width + x]
                + luma[(y + 1) * width + x]
                + luma[y * width + x - 1]
                + luma[y * width + x + 1];
            responses.push(sum - 4.0 * c);
        }
    }
    mean_and_std(&responses).1.powi(2)
}
