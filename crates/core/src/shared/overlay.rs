use std::time::{Duration, Instant};

use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::glyphs;
use crate::shared::region::FaceRegion;

const LABEL_SCALE: u32 = 2;
const LABEL_PADDING: u32 = 3;

#[derive(Error, Debug, PartialEq)]
pub enum OverlayError {
    #[error("overlay is {overlay:?} but frame is {frame:?}")]
    DimensionMismatch {
        frame: (u32, u32),
        overlay: (u32, u32),
    },
    #[error("cannot composite onto a {0}-channel frame")]
    UnsupportedChannels(u8),
}

/// Transparent RGBA layer with recognition results, the same size as the
/// frame it was computed from.
#[derive(Clone, Debug)]
pub struct Overlay {
    data: Vec<u8>,
    width: u32,
    height: u32,
    frame_index: usize,
    created_at: Instant,
}

impl Overlay {
    pub fn transparent(width: u32, height: u32, frame_index: usize) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
            frame_index,
            created_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Index of the frame the overlay was computed from.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// RGBA value at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let o = self.offset(x, y);
        [
            self.data[o],
            self.data[o + 1],
            self.data[o + 2],
            self.data[o + 3],
        ]
    }

    pub fn is_blank(&self) -> bool {
        self.data.chunks_exact(4).all(|px| px[3] == 0)
    }

    /// Fills a rectangle, clipped to the overlay bounds.
    pub fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: [u8; 3]) {
        let x0 = x.max(0) as u32;
        let y0 = y.max(0) as u32;
        let x1 = (x + width).clamp(0, self.width as i32) as u32;
        let y1 = (y + height).clamp(0, self.height as i32) as u32;
        for py in y0..y1 {
            for px in x0..x1 {
                self.set(px, py, color);
            }
        }
    }

    /// Draws the outline of `region` with the given stroke thickness.
    pub fn draw_box(&mut self, region: &FaceRegion, color: [u8; 3], thickness: i32) {
        let t = thickness.max(1).min(region.width.min(region.height).max(1));
        self.fill_rect(region.x, region.y, region.width, t, color);
        self.fill_rect(region.x, region.bottom() - t, region.width, t, color);
        self.fill_rect(region.x, region.y, t, region.height, color);
        self.fill_rect(region.right() - t, region.y, t, region.height, color);
    }

    pub fn draw_text(&mut self, x: i32, y: i32, text: &str, color: [u8; 3], scale: u32) {
        for (dx, dy) in glyphs::text_pixels(text, scale) {
            let px = x + dx as i32;
            let py = y + dy as i32;
            if px >= 0 && py >= 0 && (px as u32) < self.width && (py as u32) < self.height {
                self.set(px as u32, py as u32, color);
            }
        }
    }

    /// Draws a filled name bar along the bottom edge of `region`.
    pub fn draw_label(
        &mut self,
        region: &FaceRegion,
        text: &str,
        background: [u8; 3],
        foreground: [u8; 3],
    ) {
        let (text_w, text_h) = glyphs::text_size(text, LABEL_SCALE);
        let bar_h = (text_h + 2 * LABEL_PADDING) as i32;
        let bar_w = region.width.max((text_w + 2 * LABEL_PADDING) as i32);
        let bar_y = region.bottom() - bar_h;
        self.fill_rect(region.x, bar_y, bar_w, bar_h, background);
        self.draw_text(
            region.x + LABEL_PADDING as i32,
            bar_y + LABEL_PADDING as i32,
            text,
            foreground,
            LABEL_SCALE,
        );
    }

    /// Alpha-blends the overlay onto `frame` in place, scaling each
    /// overlay pixel's own alpha by `alpha`.
    pub fn composite_onto(&self, frame: &mut Frame, alpha: f32) -> Result<(), OverlayError> {
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(OverlayError::DimensionMismatch {
                frame: (frame.width(), frame.height()),
                overlay: (self.width, self.height),
            });
        }
        let channels = frame.channels() as usize;
        if channels < 3 {
            return Err(OverlayError::UnsupportedChannels(frame.channels()));
        }
        let alpha = alpha.clamp(0.0, 1.0);
        for (dst, src) in frame
            .data_mut()
            .chunks_exact_mut(channels)
            .zip(self.data.chunks_exact(4))
        {
            if src[3] == 0 {
                continue;
            }
            let a = src[3] as f32 / 255.0 * alpha;
            for c in 0..3 {
                let blended = dst[c] as f32 * (1.0 - a) + src[c] as f32 * a;
                dst[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(())
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn set(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let o = self.offset(x, y);
        self.data[o..o + 3].copy_from_slice(&color);
        self.data[o + 3] = 255;
    }
}

/// Draws `text` directly onto an RGB frame, clipped to its bounds.
pub fn stamp_text(frame: &mut Frame, x: i32, y: i32, text: &str, color: [u8; 3], scale: u32) {
    let width = frame.width();
    let height = frame.height();
    let channels = frame.channels() as usize;
    if channels < 3 {
        return;
    }
    let data = frame.data_mut();
    for (dx, dy) in glyphs::text_pixels(text, scale) {
        let px = x + dx as i32;
        let py = y + dy as i32;
        if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
            continue;
        }
        let o = (py as usize * width as usize + px as usize) * channels;
        data[o..o + 3].copy_from_slice(&color);
    }
}
