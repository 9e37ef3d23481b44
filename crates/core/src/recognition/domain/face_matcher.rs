use crate::recognition::domain::face_encoding::FaceEncoding;

/// Best match for a probe encoding among the known faces.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceMatch {
    pub name: String,
    /// Index into the known-face slice.
    pub index: usize,
    pub distance: f64,
    /// In `[0, 1]`, higher is more certain.
    pub confidence: f64,
}

/// Domain interface for comparing encodings.
pub trait FaceMatcher: Send + Sync {
    /// Distance between two encodings under this matcher's metric.
    fn distance(&self, a: &[f32], b: &[f32]) -> f64;

    /// Whether `distance` is close enough to count as the same person.
    fn accepts(&self, distance: f64) -> bool;

    fn confidence(&self, distance: f64) -> f64;

    /// Closest accepted known face. Ties keep the earliest entry.
    fn best_match(&self, probe: &[f32], known: &[FaceEncoding]) -> Option<FaceMatch> {
        let mut best: Option<(usize, f64)> = None;
        for (i, face) in known.iter().enumerate() {
            let d = self.distance(probe, face.vector());
            if !self.accepts(d) {
                continue;
            }
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best.map(|(index, distance)| FaceMatch {
            name: known[index].name().to_string(),
            index,
            distance,
            confidence: self.confidence(distance),
        })
    }

    fn batch_match(&self, probes: &[Vec<f32>], known: &[FaceEncoding]) -> Vec<Option<FaceMatch>> {
        probes.iter().map(|p| self.best_match(p, known)).collect()
    }
}
