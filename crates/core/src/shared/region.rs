/// A detected face bounding box in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Detector confidence in `[0, 1]`; 1.0 when the source has no score.
    pub confidence: f64,
}

impl FaceRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Builds a region from corner coordinates, clamped to the frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn from_corners(
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        frame_w: u32,
        frame_h: u32,
        confidence: f64,
    ) -> Option<Self> {
        let left = x1.max(0.0).round() as i32;
        let top = y1.max(0.0).round() as i32;
        let right = x2.min(frame_w as f64).round() as i32;
        let bottom = y2.min(frame_h as f64).round() as i32;
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
            confidence,
        })
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn iou(&self, other: &FaceRegion) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());

        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        let area_a = self.width as f64 * self.height as f64;
        let area_b = other.width as f64 * other.height as f64;
        inter / (area_a + area_b - inter)
    }
}
