use crate::service::{AttendanceService, ServiceError};
use chrono::{Local, NaiveDate, NaiveDateTime};
use presencia_core::geofence::Coordinates;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.presencia.Presencia1
/// Object path: /org/presencia/Presencia1
///
/// All methods return JSON strings. Errors carry a stable
/// `kind: message` payload so clients can branch without parsing prose.
pub struct PresenciaService {
    service: Arc<AttendanceService>,
}

impl PresenciaService {
    pub fn new(service: Arc<AttendanceService>) -> Self {
        Self { service }
    }
}

fn to_fdo(e: ServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {e}", e.kind()))
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| zbus::fdo::Error::Failed(format!("storage: cannot encode reply: {e}")))
}

/// Parse "YYYY-MM-DDTHH:MM:SS", or take the local wall clock when empty.
fn parse_timestamp(ts: &str) -> zbus::fdo::Result<NaiveDateTime> {
    if ts.is_empty() {
        return Ok(Local::now().naive_local());
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad timestamp {ts:?}: {e}")))
}

#[interface(name = "org.presencia.Presencia1")]
impl PresenciaService {
    /// Record a presence event for a subject at an area. Routed into a
    /// check-out automatically when the subject already has an open record.
    ///
    /// `has_location` distinguishes "no fix" from coordinates (0, 0).
    async fn check_in(
        &self,
        subject_id: &str,
        area_id: &str,
        timestamp: &str,
        has_location: bool,
        latitude: f64,
        longitude: f64,
        face_verified: bool,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(subject_id, area_id, "check_in requested");
        let when = parse_timestamp(timestamp)?;
        let coords = has_location.then_some(Coordinates {
            latitude,
            longitude,
        });
        let outcome = self
            .service
            .mark_check_in(subject_id, area_id, when, coords, face_verified)
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Close the subject's open record for the timestamp's date.
    async fn check_out(
        &self,
        subject_id: &str,
        area_id: &str,
        timestamp: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(subject_id, area_id, "check_out requested");
        let when = parse_timestamp(timestamp)?;
        let outcome = self
            .service
            .mark_check_out(subject_id, area_id, when)
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Enroll a batch of face images for a subject, replacing any prior
    /// template.
    async fn enroll(&self, subject_id: &str, images: Vec<Vec<u8>>) -> zbus::fdo::Result<String> {
        tracing::info!(subject_id, batch = images.len(), "enroll requested");
        let outcome = self
            .service
            .enroll(subject_id, images)
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Verify one probe image against the subject's enrolled template.
    async fn verify(&self, subject_id: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(subject_id, "verify requested");
        let outcome = self
            .service
            .verify(subject_id, image)
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Sweep stale open records. `date` is "YYYY-MM-DD" for a single day,
    /// or "" for the configured trailing window ending yesterday.
    async fn reconcile(&self, date: &str) -> zbus::fdo::Result<String> {
        tracing::info!(date, "reconcile requested");
        let target = if date.is_empty() {
            None
        } else {
            Some(
                NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
                    zbus::fdo::Error::InvalidArgs(format!("bad date {date:?}: {e}"))
                })?,
            )
        };
        let today = Local::now().date_naive();
        let outcome = self
            .service
            .reconcile(target, today)
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "areas": self.service.area_count(),
        })
        .to_string())
    }
}
