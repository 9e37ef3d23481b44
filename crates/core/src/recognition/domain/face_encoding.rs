use std::time::{Instant, SystemTime};

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RecognitionError {
    #[error("got {encodings} encodings but {names} names")]
    MismatchedLengths { encodings: usize, names: usize },
    #[error("encoding for {name:?} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// Identity feature vector for one face, tagged with its owner.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceEncoding {
    vector: Vec<f32>,
    name: String,
    created_at: SystemTime,
}

impl FaceEncoding {
    pub fn new(vector: Vec<f32>, name: impl Into<String>) -> Self {
        Self {
            vector,
            name: name.into(),
            created_at: SystemTime::now(),
        }
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// The faces recognition matches against.
///
/// Built whole and never edited: a new profile scan produces a new set that
/// replaces the previous one.
#[derive(Clone, Debug)]
pub struct KnownFaceSet {
    faces: Vec<FaceEncoding>,
    generation: u64,
    updated_at: Instant,
}

impl KnownFaceSet {
    pub fn empty() -> Self {
        Self {
            faces: Vec::new(),
            generation: 0,
            updated_at: Instant::now(),
        }
    }

    /// Pairs `encodings[i]` with `names[i]`. Every vector must have the same
    /// length.
    pub fn from_parallel(
        encodings: Vec<Vec<f32>>,
        names: Vec<String>,
        generation: u64,
    ) -> Result<Self, RecognitionError> {
        if encodings.len() != names.len() {
            return Err(RecognitionError::MismatchedLengths {
                encodings: encodings.len(),
                names: names.len(),
            });
        }

        let expected = encodings.first().map(Vec::len).unwrap_or(0);
        let mut faces = Vec::with_capacity(encodings.len());
        for (vector, name) in encodings.into_iter().zip(names) {
            if vector.len() != expected {
                return Err(RecognitionError::DimensionMismatch {
                    name,
                    expected,
                    found: vector.len(),
                });
            }
            faces.push(FaceEncoding::new(vector, name));
        }

        Ok(Self {
            faces,
            generation,
            updated_at: Instant::now(),
        })
    }

    pub fn faces(&self) -> &[FaceEncoding] {
        &self.faces
    }

    /// First encoding registered under `name`.
    pub fn get(&self, name: &str) -> Option<&FaceEncoding> {
        self.faces.iter().find(|f| f.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.faces.iter().map(FaceEncoding::name)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Incremented on every replacement; 0 for the initial empty set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }
}

impl Default for KnownFaceSet {
    fn default() -> Self {
        Self::empty()
    }
}
