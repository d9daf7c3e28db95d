use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-subject similarity threshold on the normalized [0, 1] scale.
///
/// On this scale orthogonal vectors score 0.5, so 0.70 already demands a
/// strongly aligned match. Deployments override via configuration; subjects
/// override per template row.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.70;

/// Rectangular face region reported by the feature extractor, in pixel
/// coordinates of the source image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

/// Feature vector produced by the external extractor.
///
/// Opaque fixed-length numeric data: two embeddings are only ever compared
/// through [`similarity`](Self::similarity), never structurally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity normalized to [0, 1].
    ///
    /// `(dot / (‖a‖·‖b‖) + 1) / 2` — 1.0 for vectors pointing the same
    /// direction, 0.5 for orthogonal, 0.0 for exactly opposite. A zero-norm
    /// operand yields 0.0 rather than NaN. The result is clamped: float
    /// rounding can push the raw cosine a hair past ±1.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            ((dot / denom + 1.0) / 2.0).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// One persisted enrollment sample: a feature vector plus its monotonically
/// increasing sample id.
#[derive(Debug, Clone)]
pub struct StoredSample {
    pub sample_id: i64,
    pub embedding: Embedding,
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    /// The extractor could not be reached or did not answer in time.
    #[error("feature extractor unavailable: {0}")]
    Unavailable(String),
    /// The extractor answered but could not produce a usable result.
    #[error("feature extraction failed: {0}")]
    Failed(String),
}

/// External feature-extraction collaborator.
///
/// Given an image, reports zero or more detected face regions; given an
/// image (optionally narrowed to a region), produces a fixed-dimension
/// embedding. Implementations run on the engine thread and may block.
pub trait FeatureExtractor: Send {
    fn detect_regions(&mut self, image: &[u8]) -> Result<Vec<FaceRegion>, ExtractorError>;

    fn extract(
        &mut self,
        image: &[u8],
        region: Option<&FaceRegion>,
    ) -> Result<Embedding, ExtractorError>;
}
