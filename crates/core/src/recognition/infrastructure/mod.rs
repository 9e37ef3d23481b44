pub mod cosine_matcher;
pub mod euclidean_matcher;
mod execution_provider;
pub mod math;
pub mod onnx_face_analyzer;
