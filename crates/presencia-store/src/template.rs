//! Biometric template persistence.
//!
//! One template row per subject plus one row per enrollment sample.
//! Re-enrollment replaces the whole sample set inside a single transaction,
//! so a concurrent verification sees either the old set or the new one,
//! never a mixture. Sample ids are monotonically increasing and never
//! reused (AUTOINCREMENT).

use crate::{Store, StoreError};
use chrono::{DateTime, Utc};
use presencia_core::types::{Embedding, StoredSample};
use rusqlite::{params, OptionalExtension};

/// Template metadata without the vectors themselves.
#[derive(Debug, Clone)]
pub struct TemplateMeta {
    pub subject_id: String,
    pub confidence_threshold: f32,
    pub trained: bool,
    pub sample_count: u32,
    pub enrolled_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Replace the subject's entire vector set.
    ///
    /// Creates the template row on first enrollment with `default_threshold`;
    /// a re-enrollment keeps the subject's configured threshold. `trained`
    /// follows whether any vector was saved.
    pub async fn replace_template(
        &self,
        subject_id: &str,
        embeddings: Vec<Embedding>,
        default_threshold: f32,
    ) -> Result<(), StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();
            let trained = !embeddings.is_empty();

            tx.execute(
                "INSERT INTO biometric_template
                     (subject_id, confidence_threshold, trained, sample_count, enrolled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (subject_id) DO UPDATE SET
                     trained = excluded.trained,
                     sample_count = excluded.sample_count,
                     enrolled_at = excluded.enrolled_at",
                params![
                    subject_id,
                    default_threshold,
                    trained,
                    embeddings.len() as u32,
                    now
                ],
            )?;

            tx.execute(
                "DELETE FROM template_sample WHERE subject_id = ?1",
                params![subject_id],
            )?;
            for embedding in &embeddings {
                tx.execute(
                    "INSERT INTO template_sample (subject_id, embedding, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![subject_id, embedding_to_blob(embedding), now],
                )?;
            }

            tx.commit()?;
            tracing::debug!(subject = %subject_id, samples = embeddings.len(), "template replaced");
            Ok(())
        })
        .await
    }

    pub async fn template_meta(
        &self,
        subject_id: &str,
    ) -> Result<Option<TemplateMeta>, StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT subject_id, confidence_threshold, trained, sample_count, enrolled_at
                 FROM biometric_template WHERE subject_id = ?1",
                params![subject_id],
                |row| {
                    Ok(TemplateMeta {
                        subject_id: row.get(0)?,
                        confidence_threshold: row.get(1)?,
                        trained: row.get(2)?,
                        sample_count: row.get(3)?,
                        enrolled_at: row
                            .get::<_, Option<String>>(4)?
                            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                            .map(|dt| dt.with_timezone(&Utc)),
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// All stored vectors for the subject, in sample-id order.
    pub async fn template_samples(
        &self,
        subject_id: &str,
    ) -> Result<Vec<StoredSample>, StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sample_id, embedding FROM template_sample
                 WHERE subject_id = ?1 ORDER BY sample_id",
            )?;
            let rows = stmt
                .query_map(params![subject_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(sample_id, blob)| {
                    Ok(StoredSample {
                        sample_id,
                        embedding: embedding_from_blob(&blob)?,
                    })
                })
                .collect()
        })
        .await
    }

    /// Per-subject threshold override.
    pub async fn set_confidence_threshold(
        &self,
        subject_id: &str,
        threshold: f32,
    ) -> Result<bool, StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE biometric_template SET confidence_threshold = ?1
                 WHERE subject_id = ?2",
                params![threshold, subject_id],
            )?;
            Ok(updated == 1)
        })
        .await
    }
}

/// Little-endian f32 array, one vector per sample row.
fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.values.len() * 4);
    for v in &embedding.values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn embedding_from_blob(blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec() }
    }

    #[test]
    fn blob_codec_round_trips() {
        let original = embedding(&[0.25, -1.5, 3.75, f32::MIN_POSITIVE]);
        let decoded = embedding_from_blob(&embedding_to_blob(&original)).unwrap();
        assert_eq!(decoded.values, original.values);
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        assert!(matches!(
            embedding_from_blob(&[0u8, 1, 2]),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn enrollment_creates_trained_template() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .replace_template("s1", vec![embedding(&[1.0, 0.0])], 0.70)
            .await
            .unwrap();

        let meta = store.template_meta("s1").await.unwrap().unwrap();
        assert!(meta.trained);
        assert_eq!(meta.sample_count, 1);
        assert!((meta.confidence_threshold - 0.70).abs() < 1e-6);
        assert!(meta.enrolled_at.is_some());

        let samples = store.template_samples("s1").await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].embedding.values, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn reenrollment_replaces_not_appends() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .replace_template("s1", vec![embedding(&[1.0, 0.0]), embedding(&[0.0, 1.0])], 0.70)
            .await
            .unwrap();
        let first_ids: Vec<i64> = store
            .template_samples("s1")
            .await
            .unwrap()
            .iter()
            .map(|s| s.sample_id)
            .collect();

        store
            .replace_template("s1", vec![embedding(&[0.5, 0.5])], 0.70)
            .await
            .unwrap();

        let samples = store.template_samples("s1").await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].embedding.values, vec![0.5, 0.5]);
        // Sample ids keep increasing across replacements.
        assert!(samples[0].sample_id > *first_ids.iter().max().unwrap());

        let meta = store.template_meta("s1").await.unwrap().unwrap();
        assert_eq!(meta.sample_count, 1);
    }

    #[tokio::test]
    async fn reenrollment_preserves_subject_threshold() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .replace_template("s1", vec![embedding(&[1.0])], 0.70)
            .await
            .unwrap();
        assert!(store.set_confidence_threshold("s1", 0.85).await.unwrap());

        store
            .replace_template("s1", vec![embedding(&[0.9])], 0.70)
            .await
            .unwrap();
        let meta = store.template_meta("s1").await.unwrap().unwrap();
        assert!((meta.confidence_threshold - 0.85).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_replacement_marks_untrained() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .replace_template("s1", vec![embedding(&[1.0])], 0.70)
            .await
            .unwrap();
        store.replace_template("s1", vec![], 0.70).await.unwrap();

        let meta = store.template_meta("s1").await.unwrap().unwrap();
        assert!(!meta.trained);
        assert_eq!(meta.sample_count, 0);
        assert!(store.template_samples("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_template_is_none() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.template_meta("ghost").await.unwrap().is_none());
        assert!(store.template_samples("ghost").await.unwrap().is_empty());
    }
}
