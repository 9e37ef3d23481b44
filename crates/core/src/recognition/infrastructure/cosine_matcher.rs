use crate::recognition::domain::face_matcher::FaceMatcher;
use crate::recognition::infrastructure::math;

/// Matches when cosine similarity is at least `1 - tolerance`.
///
/// Suited to L2-normalized ArcFace embeddings. Confidence is the similarity
/// itself.
pub struct CosineMatcher {
    tolerance: f64,
}

impl CosineMatcher {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        math::cosine_similarity(a, b)
    }
}

impl FaceMatcher for CosineMatcher {
    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        math::cosine_distance(a, b)
    }

    fn accepts(&self, distance: f64) -> bool {
        1.0 - distance >= 1.0 - self.tolerance
    }

    fn confidence(&self, distance: f64) -> f64 {
        (1.0 - distance).clamp(0.0, 1.0)
    }
}
