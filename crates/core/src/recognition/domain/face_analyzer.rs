use crate::shared::frame::Frame;
use crate::shared::region::FaceRegion;

/// Domain interface for face detection and identity encoding.
///
/// Implementations hold model sessions and may keep scratch state between
/// calls, hence `&mut self`.
pub trait FaceAnalyzer: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, Box<dyn std::error::Error>>;

    /// One encoding per region, in the same order.
    fn encode(
        &mut self,
        frame: &Frame,
        regions: &[FaceRegion],
    ) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>>;
}

/// One analyzer shared by collaborators that run on the same thread, such
/// as profile cleanup and profile encoding.
pub type SharedFaceAnalyzer = std::sync::Arc<std::sync::Mutex<dyn FaceAnalyzer>>;
