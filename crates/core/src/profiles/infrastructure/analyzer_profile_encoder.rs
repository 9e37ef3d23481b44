use std::path::Path;
use std::sync::PoisonError;

use crate::profiles::domain::profile_encoder::ProfileEncoder;
use crate::recognition::domain::face_analyzer::SharedFaceAnalyzer;
use crate::recognition::domain::face_encoding::FaceEncoding;
use crate::video::domain::image_reader::ImageReader;

/// Encodes the first face found in a profile image and names it after the
/// file stem (`alice.jpg` becomes `alice`).
pub struct AnalyzerProfileEncoder {
    reader: Box<dyn ImageReader>,
    analyzer: SharedFaceAnalyzer,
}

impl AnalyzerProfileEncoder {
    pub fn new(reader: Box<dyn ImageReader>, analyzer: SharedFaceAnalyzer) -> Self {
        Self { reader, analyzer }
    }
}

impl ProfileEncoder for AnalyzerProfileEncoder {
    fn encode_file(&mut self, path: &Path) -> Result<Option<FaceEncoding>, Box<dyn std::error::Error>> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| format!("{} has no file name", path.display()))?;
        let frame = self.reader.read(path)?;

        let mut analyzer = self.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
        let regions = analyzer.detect(&frame)?;
        let Some(first) = regions.into_iter().next() else {
            return Ok(None);
        };
        let vector = analyzer
            .encode(&frame, std::slice::from_ref(&first))?
            .into_iter()
            .next()
            .ok_or("analyzer returned no encoding for a detected face")?;
        Ok(Some(FaceEncoding::new(vector, name)))
    }
}
