//! Attendance service: wires the area directory, storage, and biometric
//! engine behind the five public operations.
//!
//! All status derivation happens in `presencia-core`; this layer owns
//! persistence ordering, the create-or-transition conflict retry, and the
//! post-write reconciliation hook. The hook runs inline after a
//! successful write, never on storage triggers.

use crate::areas::AreaDirectory;
use crate::engine::{EngineError, EngineHandle};
use chrono::{Days, NaiveDate, NaiveDateTime};
use presencia_core::attendance::{
    evaluate_check_in, evaluate_check_out, AttendanceError, AttendanceRecord, CheckInDecision,
};
use presencia_core::geofence::Coordinates;
use presencia_store::{NewAttendanceRow, Store, StoreError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error("unknown area: {0}")]
    UnknownArea(String),
    #[error("area {0} is inactive")]
    InactiveArea(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("subject {0} has no enrolled biometric template")]
    NotEnrolled(String),
    #[error("no face detected in the provided image(s)")]
    NoFaceDetected,
    #[error("subject {0} is marked trained but has no stored embeddings")]
    NoEmbeddingsFound(String),
    #[error("biometric matcher unavailable: {0}")]
    MatcherUnavailable(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ServiceError {
    /// Stable machine-readable kind for wire payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Attendance(e) => e.kind(),
            ServiceError::UnknownArea(_) | ServiceError::InactiveArea(_) => "validation",
            ServiceError::Validation(_) => "validation",
            ServiceError::NotEnrolled(_) => "not_enrolled",
            ServiceError::NoFaceDetected => "no_face_detected",
            ServiceError::NoEmbeddingsFound(_) => "no_embeddings_found",
            ServiceError::MatcherUnavailable(_) => "matcher_unavailable",
            ServiceError::Storage(_) => "storage",
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NoFaceDetected => ServiceError::NoFaceDetected,
            other => ServiceError::MatcherUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    CheckedIn,
    CheckedOut,
}

/// Wire payload for a successful attendance transition.
#[derive(Debug, Serialize)]
pub struct AttendanceOutcome {
    pub action: AttendanceAction,
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub hours_worked: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct EnrollOutcome {
    pub saved: usize,
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
pub struct ReconcileOutcome {
    pub updated: u64,
}

pub struct AttendanceService {
    areas: AreaDirectory,
    store: Store,
    engine: EngineHandle,
    default_threshold: f32,
    sweep_back_days: u32,
}

impl AttendanceService {
    pub fn new(
        areas: AreaDirectory,
        store: Store,
        engine: EngineHandle,
        default_threshold: f32,
        sweep_back_days: u32,
    ) -> Self {
        Self {
            areas,
            store,
            engine,
            default_threshold,
            sweep_back_days,
        }
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    fn area(&self, area_id: &str) -> Result<&presencia_core::Area, ServiceError> {
        let area = self
            .areas
            .get(area_id)
            .ok_or_else(|| ServiceError::UnknownArea(area_id.to_string()))?;
        if !area.active {
            return Err(ServiceError::InactiveArea(area_id.to_string()));
        }
        Ok(area)
    }

    /// Record a check-in presence event.
    ///
    /// An event against an already-open record is routed into check-out, so
    /// the caller needs no separate verb. Two racing first check-ins are
    /// arbitrated by the storage uniqueness constraint: the loser re-reads
    /// the winner's record and is routed or rejected from there.
    pub async fn mark_check_in(
        &self,
        subject_id: &str,
        area_id: &str,
        when: NaiveDateTime,
        coords: Option<Coordinates>,
        face_verified: bool,
    ) -> Result<AttendanceOutcome, ServiceError> {
        if subject_id.is_empty() {
            return Err(ServiceError::Validation("subject id must not be empty".into()));
        }
        let area = self.area(area_id)?;
        let date = when.date();
        let mut lost_race = false;

        loop {
            let existing = self.store.fetch_record(subject_id, date).await?;
            match evaluate_check_in(area, existing.as_ref(), when, coords)? {
                CheckInDecision::Create(new) => {
                    let row = NewAttendanceRow {
                        subject_id: subject_id.to_string(),
                        area_id: area_id.to_string(),
                        date,
                        check_in: when.time(),
                        status: new.status,
                        expected_check_in: new.expected_check_in,
                        expected_check_out: new.expected_check_out,
                        latitude: coords.map(|c| c.latitude),
                        longitude: coords.map(|c| c.longitude),
                        face_verified,
                    };
                    match self.store.insert_check_in(row).await {
                        Ok(()) => {
                            tracing::info!(
                                subject = subject_id,
                                area = area_id,
                                status = new.status.as_str(),
                                face_verified,
                                "checked in"
                            );
                            let record = self
                                .store
                                .fetch_record(subject_id, date)
                                .await?
                                .ok_or_else(|| {
                                    StoreError::Corrupt("record vanished after insert".into())
                                })?;
                            self.post_write_sweep(date).await;
                            return Ok(outcome(AttendanceAction::CheckedIn, record));
                        }
                        Err(StoreError::InsertConflict { .. }) if !lost_race => {
                            tracing::debug!(
                                subject = subject_id,
                                %date,
                                "check-in lost creation race; re-reading"
                            );
                            lost_race = true;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                CheckInDecision::RouteToCheckOut => {
                    // evaluate_check_in only routes when a record exists.
                    let record = existing.ok_or_else(|| {
                        StoreError::Corrupt("routed to check-out without a record".into())
                    })?;
                    return self.complete_check_out(record, when).await;
                }
            }
        }
    }

    /// Record an explicit check-out.
    pub async fn mark_check_out(
        &self,
        subject_id: &str,
        area_id: &str,
        when: NaiveDateTime,
    ) -> Result<AttendanceOutcome, ServiceError> {
        self.area(area_id)?;
        let record = self
            .store
            .fetch_record(subject_id, when.date())
            .await?
            .ok_or(AttendanceError::NotCheckedIn)?;
        self.complete_check_out(record, when).await
    }

    async fn complete_check_out(
        &self,
        record: AttendanceRecord,
        when: NaiveDateTime,
    ) -> Result<AttendanceOutcome, ServiceError> {
        evaluate_check_out(&record, when)?;

        let updated = self
            .store
            .set_check_out(&record.subject_id, record.date, when.time())
            .await?;
        if !updated {
            // Raced with another check-out or the sweeper.
            return Err(AttendanceError::AlreadyComplete.into());
        }

        tracing::info!(
            subject = record.subject_id,
            area = record.area_id,
            status = record.status.as_str(),
            "checked out"
        );
        let mut record = record;
        record.check_out = Some(when.time());
        self.post_write_sweep(record.date).await;
        Ok(outcome(AttendanceAction::CheckedOut, record))
    }

    /// Enroll biometric samples for a subject, replacing any prior template.
    pub async fn enroll(
        &self,
        subject_id: &str,
        images: Vec<Vec<u8>>,
    ) -> Result<EnrollOutcome, ServiceError> {
        if subject_id.is_empty() {
            return Err(ServiceError::Validation("subject id must not be empty".into()));
        }
        if images.is_empty() {
            return Err(ServiceError::Validation("at least one image is required".into()));
        }

        let extraction = self.engine.enroll(images).await?;
        if extraction.embeddings.is_empty() {
            tracing::warn!(
                subject = subject_id,
                rejected = extraction.rejected,
                "enrollment batch produced no usable samples"
            );
            return Err(ServiceError::NoFaceDetected);
        }

        let saved = extraction.embeddings.len();
        self.store
            .replace_template(subject_id, extraction.embeddings, self.default_threshold)
            .await?;
        tracing::info!(
            subject = subject_id,
            saved,
            rejected = extraction.rejected,
            "template enrolled"
        );
        Ok(EnrollOutcome {
            saved,
            rejected: extraction.rejected,
        })
    }

    /// Verify a probe image against the subject's enrolled template.
    pub async fn verify(
        &self,
        subject_id: &str,
        probe: Vec<u8>,
    ) -> Result<VerifyOutcome, ServiceError> {
        let meta = self
            .store
            .template_meta(subject_id)
            .await?
            .filter(|m| m.trained)
            .ok_or_else(|| ServiceError::NotEnrolled(subject_id.to_string()))?;

        let samples = self.store.template_samples(subject_id).await?;
        if samples.is_empty() {
            return Err(ServiceError::NoEmbeddingsFound(subject_id.to_string()));
        }

        let result = self
            .engine
            .verify(probe, samples, meta.confidence_threshold)
            .await?;
        tracing::info!(
            subject = subject_id,
            verified = result.verified,
            similarity = result.similarity,
            "probe verified"
        );
        Ok(VerifyOutcome {
            verified: result.verified,
            similarity: result.similarity,
        })
    }

    /// Explicit sweep: one date, or the configured trailing window ending
    /// yesterday relative to `today`.
    pub async fn reconcile(
        &self,
        date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let updated = match date {
            Some(date) => self.sweep_date(date).await,
            None => {
                let mut total = 0u64;
                for back in 1..=self.sweep_back_days {
                    if let Some(d) = today.checked_sub_days(Days::new(back as u64)) {
                        total += self.sweep_date(d).await;
                    }
                }
                total
            }
        };
        Ok(ReconcileOutcome { updated })
    }

    /// Close out one date's stale open records. Per-record failures are
    /// logged and skipped; the sweep always visits every candidate.
    async fn sweep_date(&self, date: NaiveDate) -> u64 {
        let subjects = match self.store.open_subjects(date).await {
            Ok(subjects) => subjects,
            Err(e) => {
                tracing::error!(%date, error = %e, "cannot list open records for sweep");
                return 0;
            }
        };

        let mut updated = 0u64;
        for subject in subjects {
            match self.store.mark_absent(&subject, date).await {
                Ok(true) => {
                    tracing::info!(subject, %date, "stale open record marked absent");
                    updated += 1;
                }
                Ok(false) => {} // completed or swept since we listed it
                Err(e) => {
                    tracing::warn!(subject, %date, error = %e, "sweep skipped record");
                }
            }
        }
        updated
    }

    /// Post-transition hook: close out the previous day after any
    /// successful attendance write.
    async fn post_write_sweep(&self, date: NaiveDate) {
        if let Some(previous) = date.pred_opt() {
            let updated = self.sweep_date(previous).await;
            if updated > 0 {
                tracing::info!(%previous, updated, "post-write sweep closed stale records");
            }
        }
    }
}

fn outcome(action: AttendanceAction, record: AttendanceRecord) -> AttendanceOutcome {
    let hours_worked = record.hours_worked();
    AttendanceOutcome {
        action,
        record,
        hours_worked,
    }
}
