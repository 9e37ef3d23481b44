/// Face analyzer backed by two ONNX Runtime sessions: a YOLO face detector
/// and an ArcFace embedder.
///
/// Detection letterboxes the frame, filters by confidence and applies NMS.
/// Encoding crops each region, resizes it to 112x112 and L2-normalizes the
/// embedding.
use std::path::Path;

use crate::recognition::domain::face_analyzer::FaceAnalyzer;
use crate::recognition::infrastructure::execution_provider::build_session;
use crate::recognition::infrastructure::math::l2_normalize;
use crate::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use crate::shared::frame::Frame;
use crate::shared::model_resolver::ModelResolver;
use crate::shared::region::FaceRegion;

/// Used when the detector's input shape is dynamic.
const DEFAULT_INPUT_SIZE: u32 = 640;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const NMS_IOU_THRESH: f64 = 0.45;

const EMBED_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

/// Letterbox padding uses YOLO's gray.
const PAD_VALUE: f32 = 114.0 / 255.0;

pub struct OnnxFaceAnalyzer {
    detector: ort::session::Session,
    embedder: ort::session::Session,
    input_size: u32,
    confidence: f64,
}

impl OnnxFaceAnalyzer {
    pub fn new(
        detector_path: &Path,
        embedder_path: &Path,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let detector = build_session(detector_path)?;
        let input_size = detector
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);
        let embedder = build_session(embedder_path)?;

        log::info!(
            "Face analyzer ready (detector input {input_size}px, confidence {confidence:.2})"
        );
        Ok(Self {
            detector,
            embedder,
            input_size,
            confidence,
        })
    }

    /// Resolves both models through `resolver`, downloading them if needed.
    pub fn from_resolver(
        resolver: &ModelResolver,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let detector = resolver.resolve(YOLO_MODEL_NAME, YOLO_MODEL_URL, None)?;
        let embedder = resolver.resolve(EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, None)?;
        Self::new(&detector, &embedder, confidence)
    }

    fn embed(&mut self, crop: &[u8], width: u32, height: u32) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = embedding_input(crop, width, height);
        let input = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.embedder.run(ort::inputs![input])?;
        if outputs.len() == 0 {
            return Err("embedding model produced no outputs".into());
        }
        let array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = array
            .as_slice()
            .ok_or("embedding output is not contiguous")?
            .to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, Box<dyn std::error::Error>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (tensor, letterbox) = letterbox(frame, self.input_size);
        let input = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.detector.run(ort::inputs![input])?;
        if outputs.len() == 0 {
            return Err("YOLO model produced no outputs".into());
        }
        let output = outputs[0].try_extract_array::<f32>()?;
        let shape = output.shape().to_vec();
        let data = output.as_slice().ok_or("YOLO output is not contiguous")?;

        let mut candidates = parse_detections(data, &shape, self.confidence, &letterbox)?;
        let kept = nms(&mut candidates, NMS_IOU_THRESH);
        Ok(kept
            .into_iter()
            .filter_map(|d| {
                FaceRegion::from_corners(d.x1, d.y1, d.x2, d.y2, frame.width(), frame.height(), d.confidence)
            })
            .collect())
    }

    fn encode(
        &mut self,
        frame: &Frame,
        regions: &[FaceRegion],
    ) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>> {
        let mut encodings = Vec::with_capacity(regions.len());
        for region in regions {
            let (crop, w, h) = crop_rgb(frame, region).ok_or("face region lies outside the frame")?;
            encodings.push(self.embed(&crop, w, h)?);
        }
        Ok(encodings)
    }
}

/// Mapping from letterboxed model coordinates back to frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

/// Resizes `frame` into a `target` x `target` NCHW tensor, preserving aspect
/// ratio and padding the remainder.
fn letterbox(frame: &Frame, target: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let scale = (target as f64 / fw).min(target as f64 / fh);
    let new_w = ((fw * scale).round() as u32).min(target);
    let new_h = ((fh * scale).round() as u32).min(target);
    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let size = target as usize;
    let mut tensor = ndarray::Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    let src = frame.as_ndarray();
    let channels = frame.channels() as usize;
    let max_y = frame.height() as usize - 1;
    let max_x = frame.width() as usize - 1;

    for y in 0..new_h as usize {
        let sy = ((y as f64 / scale) as usize).min(max_y);
        for x in 0..new_w as usize {
            let sx = ((x as f64 / scale) as usize).min(max_x);
            for c in 0..3 {
                let value = src[[sy, sx, c.min(channels - 1)]];
                tensor[[0, c, pad_y as usize + y, pad_x as usize + x]] = value as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

#[derive(Clone, Debug)]
struct Candidate {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
}

/// Reads `[cx, cy, w, h, conf, ...]` rows from a `[1, features, boxes]` or
/// `[1, boxes, features]` output.
fn parse_detections(
    data: &[f32],
    shape: &[usize],
    min_confidence: f64,
    letterbox: &Letterbox,
) -> Result<Vec<Candidate>, Box<dyn std::error::Error>> {
    if shape.len() != 3 {
        return Err(format!("unexpected YOLO output shape {shape:?}").into());
    }
    // Features are fewer than boxes, so the smaller axis is the feature axis.
    let transposed = shape[1] < shape[2];
    let (boxes, features) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if features < 5 || data.len() < boxes * features {
        return Ok(Vec::new());
    }
    let at = |i: usize, f: usize| -> f64 {
        if transposed {
            data[f * boxes + i] as f64
        } else {
            data[i * features + f] as f64
        }
    };

    let mut out = Vec::new();
    for i in 0..boxes {
        let confidence = at(i, 4);
        if confidence < min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);
        out.push(Candidate {
            x1,
            y1,
            x2,
            y2,
            confidence,
        });
    }
    Ok(out)
}

/// Greedy NMS, highest confidence first.
fn nms(candidates: &mut [Candidate], iou_thresh: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates.iter() {
        if keep.iter().all(|k| box_iou(k, c) <= iou_thresh) {
            keep.push(c.clone());
        }
    }
    keep
}

fn box_iou(a: &Candidate, b: &Candidate) -> f64 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = w * h;
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    inter / (area_a + area_b - inter)
}

/// Copies the RGB pixels under `region`, clipped to the frame.
fn crop_rgb(frame: &Frame, region: &FaceRegion) -> Option<(Vec<u8>, u32, u32)> {
    let x0 = region.x.max(0) as u32;
    let y0 = region.y.max(0) as u32;
    let x1 = (region.right().max(0) as u32).min(frame.width());
    let y1 = (region.bottom().max(0) as u32).min(frame.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let channels = frame.channels() as usize;
    let stride = frame.width() as usize * channels;
    let data = frame.data();
    let mut crop = Vec::with_capacity(((x1 - x0) * (y1 - y0) * 3) as usize);
    for y in y0..y1 {
        let row = y as usize * stride;
        for x in x0..x1 {
            let o = row + x as usize * channels;
            for c in 0..3 {
                crop.push(data[o + c.min(channels - 1)]);
            }
        }
    }
    Some((crop, x1 - x0, y1 - y0))
}

/// Resizes an RGB crop to 112x112 and normalizes to `[-1, 1]`, NCHW.
fn embedding_input(rgb: &[u8], width: u32, height: u32) -> ndarray::Array4<f32> {
    let src_w = width as usize;
    let src_h = height as usize;
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, EMBED_SIZE, EMBED_SIZE));
    if src_w == 0 || src_h == 0 {
        return tensor;
    }
    for y in 0..EMBED_SIZE {
        let sy = (((y as f64 + 0.5) * src_h as f64 / EMBED_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..EMBED_SIZE {
            let sx = (((x as f64 + 0.5) * src_w as f64 / EMBED_SIZE as f64) as usize).min(src_w - 1);
            let o = (sy * src_w + sx) * 3;
            if o + 2 < rgb.len() {
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (rgb[o + c] as f32 - NORM_MEAN) / NORM_STD;
                }
            }
        }
    }
    tensor
}
