//! D-Bus client for the external feature-extraction service.
//!
//! The daemon never runs inference itself: detection and embedding belong
//! to a separate extractor process reachable on the system bus. The
//! blocking proxy lives on the engine thread, with a method timeout so a
//! wedged extractor surfaces as an error instead of a hang.

use presencia_core::types::{Embedding, ExtractorError, FaceRegion, FeatureExtractor};
use std::time::Duration;

// `#[zbus::proxy]` generates both `ExtractorProxy` (async) and
// `ExtractorProxyBlocking`. Only the blocking variant is used here.
#[zbus::proxy(
    interface = "org.presencia.Extractor1",
    default_service = "org.presencia.Extractor1",
    default_path = "/org/presencia/Extractor1"
)]
trait Extractor {
    /// Detect face regions in an encoded image. Returns a JSON array of
    /// `{x, y, width, height, confidence}` objects; empty when no face.
    async fn detect_faces(&self, image: &[u8]) -> zbus::Result<String>;

    /// Compute the feature vector for an image, optionally narrowed to a
    /// region (JSON object, or "" for the whole image).
    async fn extract(&self, image: &[u8], region: &str) -> zbus::Result<Vec<f64>>;
}

/// [`FeatureExtractor`] backed by the D-Bus extractor service.
pub struct DbusExtractor {
    proxy: ExtractorProxyBlocking<'static>,
}

impl DbusExtractor {
    /// Connect to the extractor on the system bus. Fails fast so the daemon
    /// refuses to start without its collaborator.
    pub fn connect(method_timeout: Duration) -> Result<Self, ExtractorError> {
        let conn = zbus::blocking::connection::Builder::system()
            .and_then(|b| b.method_timeout(method_timeout).build())
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        let proxy = ExtractorProxyBlocking::new(&conn)
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        Ok(Self { proxy })
    }
}

impl FeatureExtractor for DbusExtractor {
    fn detect_regions(&mut self, image: &[u8]) -> Result<Vec<FaceRegion>, ExtractorError> {
        let payload = self
            .proxy
            .detect_faces(image)
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        serde_json::from_str(&payload)
            .map_err(|e| ExtractorError::Failed(format!("bad detection payload: {e}")))
    }

    fn extract(
        &mut self,
        image: &[u8],
        region: Option<&FaceRegion>,
    ) -> Result<Embedding, ExtractorError> {
        let region_json = match region {
            Some(r) => serde_json::to_string(r)
                .map_err(|e| ExtractorError::Failed(format!("bad region: {e}")))?,
            None => String::new(),
        };
        let values = self
            .proxy
            .extract(image, &region_json)
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        if values.is_empty() {
            return Err(ExtractorError::Failed("extractor returned an empty vector".into()));
        }
        Ok(Embedding {
            values: values.into_iter().map(|v| v as f32).collect(),
        })
    }
}
