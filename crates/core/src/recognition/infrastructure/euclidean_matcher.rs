use crate::recognition::domain::face_matcher::FaceMatcher;
use crate::recognition::infrastructure::math;

/// Matches when the Euclidean distance is within `tolerance`. Confidence
/// falls linearly from 1 at distance 0 to 0 at the tolerance.
pub struct EuclideanMatcher {
    tolerance: f64,
}

impl EuclideanMatcher {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Distance mapped onto `[0, 1]`, higher is more similar.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        self.confidence(self.distance(a, b))
    }
}

impl FaceMatcher for EuclideanMatcher {
    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        math::euclidean_distance(a, b)
    }

    fn accepts(&self, distance: f64) -> bool {
        distance <= self.tolerance
    }

    fn confidence(&self, distance: f64) -> f64 {
        if self.tolerance <= 0.0 {
            return if distance <= 0.0 { 1.0 } else { 0.0 };
        }
        (1.0 - distance / self.tolerance).max(0.0)
    }
}
