//! Similarity search over a subject's stored feature vectors.

use crate::types::{Embedding, StoredSample};

/// Fixed high-confidence short-circuit: once a stored vector scores at or
/// above this, the scan stops early. Independent of the subject threshold.
pub const EARLY_EXIT_SIMILARITY: f32 = 0.95;

/// Outcome of matching a probe against a subject's stored vectors.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub verified: bool,
    /// Best normalized similarity observed, in [0, 1].
    pub similarity: f32,
    /// Sample id of the best-scoring stored vector, if any were scanned.
    pub best_sample_id: Option<i64>,
}

/// Scan the gallery for the best match against `probe`.
///
/// Tracks the maximum normalized similarity, exiting early at
/// [`EARLY_EXIT_SIMILARITY`]. `verified` compares the maximum against the
/// subject's configured threshold. An empty gallery yields similarity 0.0
/// and no match; callers treat that state as corrupt when the subject is
/// nominally trained.
pub fn best_match(probe: &Embedding, gallery: &[StoredSample], threshold: f32) -> MatchOutcome {
    let mut best_similarity = 0.0f32;
    let mut best_sample_id = None;

    for sample in gallery {
        let similarity = probe.similarity(&sample.embedding);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_sample_id = Some(sample.sample_id);
        }
        if best_similarity >= EARLY_EXIT_SIMILARITY {
            break;
        }
    }

    MatchOutcome {
        verified: best_similarity >= threshold,
        similarity: best_similarity,
        best_sample_id,
    }
}
