use std::path::Path;

use crate::recognition::domain::face_encoding::FaceEncoding;

/// Turns one profile image into a named face encoding.
pub trait ProfileEncoder: Send {
    /// `Ok(None)` when the image holds no detectable face.
    fn encode_file(&mut self, path: &Path) -> Result<Option<FaceEncoding>, Box<dyn std::error::Error>>;
}
