use std::path::Path;

use crate::shared::frame::Frame;

/// Heuristics used to decide whether a profile image is worth keeping.
pub trait ImageInspector: Send + Sync {
    /// Whether the file decodes as an image at all.
    fn is_valid_image(&self, path: &Path) -> bool;

    /// Quality score in `[0, 100]`; higher is sharper, better exposed and
    /// more contrasted.
    fn assess_quality(&self, frame: &Frame) -> f64;

    /// Hash that is equal for visually identical images.
    fn perceptual_hash(&self, frame: &Frame) -> String;
}
