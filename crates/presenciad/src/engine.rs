//! Biometric engine: feature extraction and similarity search on a
//! dedicated OS thread.
//!
//! Extraction is CPU-bound (and may block on the external extractor), so it
//! never runs on the async runtime. Requests flow over a bounded channel;
//! the handle enforces per-request deadlines and reports a stuck engine as
//! [`EngineError::Timeout`] instead of hanging the caller. Processing is
//! sequential; requests queue behind the one in flight.

use presencia_core::matcher::{self, MatchOutcome};
use presencia_core::types::{Embedding, ExtractorError, FaceRegion, FeatureExtractor, StoredSample};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no face detected in the provided image")]
    NoFaceDetected,
    #[error("feature extraction failed: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("biometric engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("biometric engine thread exited")]
    ChannelClosed,
}

/// Result of extracting an enrollment batch. Per-image failures are counted,
/// never fatal; the caller decides what an empty batch means.
#[derive(Debug)]
pub struct EnrollExtraction {
    pub embeddings: Vec<Embedding>,
    pub rejected: usize,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Enroll {
        images: Vec<Vec<u8>>,
        reply: oneshot::Sender<Result<EnrollExtraction, EngineError>>,
    },
    Verify {
        probe: Vec<u8>,
        gallery: Vec<StoredSample>,
        threshold: f32,
        reply: oneshot::Sender<Result<MatchOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    per_image_timeout: Duration,
    max_enroll_batch: usize,
}

impl EngineHandle {
    /// Extract embeddings for an enrollment batch.
    ///
    /// The batch is capped at `max_enroll_batch`; overflow images count as
    /// rejected without being processed. The deadline scales with the number
    /// of images actually processed.
    pub async fn enroll(&self, mut images: Vec<Vec<u8>>) -> Result<EnrollExtraction, EngineError> {
        let overflow = images.len().saturating_sub(self.max_enroll_batch);
        if overflow > 0 {
            tracing::warn!(
                overflow,
                cap = self.max_enroll_batch,
                "enrollment batch over cap; extra images rejected"
            );
            images.truncate(self.max_enroll_batch);
        }

        let deadline = self.per_image_timeout * images.len().max(1) as u32;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { images, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        let mut extraction = await_reply(reply_rx, deadline).await??;
        extraction.rejected += overflow;
        Ok(extraction)
    }

    /// Extract the probe embedding and scan the gallery for the best match.
    pub async fn verify(
        &self,
        probe: Vec<u8>,
        gallery: Vec<StoredSample>,
        threshold: f32,
    ) -> Result<MatchOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                probe,
                gallery,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        await_reply(reply_rx, self.per_image_timeout).await?
    }
}

async fn await_reply<T>(
    reply_rx: oneshot::Receiver<T>,
    deadline: Duration,
) -> Result<T, EngineError> {
    match tokio::time::timeout(deadline, reply_rx).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(_)) => Err(EngineError::ChannelClosed),
        Err(_) => Err(EngineError::Timeout(deadline)),
    }
}

/// Spawn the engine on a dedicated OS thread.
pub fn spawn_engine(
    mut extractor: Box<dyn FeatureExtractor>,
    strict_face_detection: bool,
    per_image_timeout: Duration,
    max_enroll_batch: usize,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("presencia-engine".into())
        .spawn(move || {
            tracing::info!(strict_face_detection, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { images, reply } => {
                        let result =
                            run_enroll(extractor.as_mut(), &images, strict_face_detection);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        probe,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let result = run_verify(
                            extractor.as_mut(),
                            &probe,
                            &gallery,
                            threshold,
                            strict_face_detection,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        per_image_timeout,
        max_enroll_batch,
    }
}

/// Pick the region to embed for one image.
///
/// Permissive mode falls back to the whole image when detection finds
/// nothing (or fails); strict mode turns that into a per-image rejection.
fn select_region(
    extractor: &mut dyn FeatureExtractor,
    image: &[u8],
    strict: bool,
) -> Result<Option<FaceRegion>, EngineError> {
    let regions = match extractor.detect_regions(image) {
        Ok(regions) => regions,
        Err(e) if strict => return Err(e.into()),
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed; using whole image");
            return Ok(None);
        }
    };

    let best = regions
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    match best {
        Some(region) => Ok(Some(region)),
        None if strict => Err(EngineError::NoFaceDetected),
        None => {
            tracing::debug!("no face detected; using whole image");
            Ok(None)
        }
    }
}

/// Extract one embedding per usable image; count the rest as rejected.
fn run_enroll(
    extractor: &mut dyn FeatureExtractor,
    images: &[Vec<u8>],
    strict: bool,
) -> Result<EnrollExtraction, EngineError> {
    let mut embeddings = Vec::new();
    let mut rejected = 0usize;

    for (i, image) in images.iter().enumerate() {
        let region = match select_region(extractor, image, strict) {
            Ok(region) => region,
            Err(e) => {
                tracing::warn!(image = i, error = %e, "enrollment sample rejected");
                rejected += 1;
                continue;
            }
        };
        match extractor.extract(image, region.as_ref()) {
            Ok(embedding) => embeddings.push(embedding),
            Err(e) => {
                tracing::warn!(image = i, error = %e, "embedding extraction failed");
                rejected += 1;
            }
        }
    }

    tracing::debug!(saved = embeddings.len(), rejected, "enrollment batch extracted");
    Ok(EnrollExtraction { embeddings, rejected })
}

fn run_verify(
    extractor: &mut dyn FeatureExtractor,
    probe: &[u8],
    gallery: &[StoredSample],
    threshold: f32,
    strict: bool,
) -> Result<MatchOutcome, EngineError> {
    let region = select_region(extractor, probe, strict)?;
    let embedding = extractor.extract(probe, region.as_ref())?;
    let outcome = matcher::best_match(&embedding, gallery, threshold);
    tracing::debug!(
        similarity = outcome.similarity,
        verified = outcome.verified,
        "probe matched against gallery"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Extractor fake: embeds each image as the f32 value of its first byte.
    struct ByteExtractor {
        detect_face: bool,
        fail_detection: bool,
        delay: Option<Duration>,
    }

    impl ByteExtractor {
        fn new() -> Self {
            Self {
                detect_face: true,
                fail_detection: false,
                delay: None,
            }
        }
    }

    impl FeatureExtractor for ByteExtractor {
        fn detect_regions(&mut self, _image: &[u8]) -> Result<Vec<FaceRegion>, ExtractorError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail_detection {
                return Err(ExtractorError::Failed("detector crashed".into()));
            }
            if self.detect_face {
                Ok(vec![FaceRegion { x: 0, y: 0, width: 10, height: 10, confidence: 0.9 }])
            } else {
                Ok(vec![])
            }
        }

        fn extract(
            &mut self,
            image: &[u8],
            _region: Option<&FaceRegion>,
        ) -> Result<Embedding, ExtractorError> {
            match image.first() {
                Some(&b) => Ok(Embedding { values: vec![b as f32, 1.0] }),
                None => Err(ExtractorError::Failed("empty image".into())),
            }
        }
    }

    fn handle(extractor: ByteExtractor, strict: bool) -> EngineHandle {
        spawn_engine(Box::new(extractor), strict, Duration::from_secs(2), 4)
    }

    #[tokio::test]
    async fn enroll_extracts_one_embedding_per_image() {
        let engine = handle(ByteExtractor::new(), false);
        let result = engine
            .enroll(vec![vec![10u8], vec![20u8], vec![30u8]])
            .await
            .unwrap();
        assert_eq!(result.embeddings.len(), 3);
        assert_eq!(result.rejected, 0);
    }

    #[tokio::test]
    async fn enroll_counts_failed_images_without_aborting() {
        let engine = handle(ByteExtractor::new(), false);
        let result = engine
            .enroll(vec![vec![10u8], vec![], vec![30u8]])
            .await
            .unwrap();
        assert_eq!(result.embeddings.len(), 2);
        assert_eq!(result.rejected, 1);
    }

    #[tokio::test]
    async fn batch_over_cap_rejects_overflow() {
        let engine = handle(ByteExtractor::new(), false);
        let images = (0..6).map(|i| vec![i as u8]).collect();
        let result = engine.enroll(images).await.unwrap();
        // Cap is 4: four processed, two rejected unseen.
        assert_eq!(result.embeddings.len(), 4);
        assert_eq!(result.rejected, 2);
    }

    #[tokio::test]
    async fn permissive_mode_embeds_whole_image_without_face() {
        let mut extractor = ByteExtractor::new();
        extractor.detect_face = false;
        let engine = handle(extractor, false);
        let result = engine.enroll(vec![vec![42u8]]).await.unwrap();
        assert_eq!(result.embeddings.len(), 1);
        assert_eq!(result.rejected, 0);
    }

    #[tokio::test]
    async fn strict_mode_rejects_faceless_samples() {
        let mut extractor = ByteExtractor::new();
        extractor.detect_face = false;
        let engine = handle(extractor, true);
        let result = engine.enroll(vec![vec![42u8]]).await.unwrap();
        assert!(result.embeddings.is_empty());
        assert_eq!(result.rejected, 1);
    }

    #[tokio::test]
    async fn detection_failure_falls_back_when_permissive() {
        let mut extractor = ByteExtractor::new();
        extractor.fail_detection = true;
        let engine = handle(extractor, false);
        let result = engine.enroll(vec![vec![42u8]]).await.unwrap();
        assert_eq!(result.embeddings.len(), 1);
    }

    #[tokio::test]
    async fn verify_matches_enrolled_byte() {
        let engine = handle(ByteExtractor::new(), false);
        let gallery = vec![StoredSample {
            sample_id: 1,
            embedding: Embedding { values: vec![42.0, 1.0] },
        }];
        let outcome = engine.verify(vec![42u8], gallery, 0.90).await.unwrap();
        assert!(outcome.verified);
        assert!((outcome.similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn strict_verify_without_face_is_no_face_detected() {
        let mut extractor = ByteExtractor::new();
        extractor.detect_face = false;
        let engine = handle(extractor, true);
        let err = engine.verify(vec![1u8], vec![], 0.5).await.unwrap_err();
        assert!(matches!(err, EngineError::NoFaceDetected));
    }

    #[tokio::test]
    async fn stuck_extractor_times_out() {
        let mut extractor = ByteExtractor::new();
        extractor.delay = Some(Duration::from_millis(200));
        let engine = spawn_engine(Box::new(extractor), false, Duration::from_millis(20), 4);
        let err = engine.verify(vec![1u8], vec![], 0.5).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }
}
