//! Per-day attendance lifecycle: the single authoritative place where a
//! record's status is derived from time, schedule, and geofence inputs.
//!
//! States per (subject, date): `NoRecord → CheckedIn{Present|Late} →
//! Completed{Present|Late}`. The terminal `Absent` state is reachable only
//! through the reconciliation sweep, never from a user action.

use crate::area::Area;
use crate::geofence::{self, Coordinates};
use crate::schedule;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One subject's attendance record for one calendar date.
///
/// At most one exists per (subject, date); the storage layer enforces the
/// uniqueness. Records are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub subject_id: String,
    pub area_id: String,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: AttendanceStatus,
    /// Expected window snapshotted at creation time, so later schedule edits
    /// never re-judge a past day.
    pub expected_check_in: Option<NaiveTime>,
    pub expected_check_out: Option<NaiveTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub face_verified: bool,
}

impl AttendanceRecord {
    pub fn is_complete(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_some()
    }

    /// Checked in, not yet checked out.
    pub fn is_open(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_none()
    }

    /// Hours between check-in and check-out, rounded to two decimals.
    pub fn hours_worked(&self) -> Option<f64> {
        let (check_in, check_out) = (self.check_in?, self.check_out?);
        let seconds = (check_out - check_in).num_seconds() as f64;
        Some((seconds / 3600.0 * 100.0).round() / 100.0)
    }
}

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{date} is not a working day for {area}")]
    NotWorkDay { area: String, date: NaiveDate },
    #[error("location unavailable: coordinates are required to check in")]
    LocationUnavailable,
    #[error("you must be within {radius_m}m of {area} (you are {distance_m:.0}m away)")]
    LocationOutOfRange {
        area: String,
        distance_m: f64,
        radius_m: u32,
    },
    #[error("the work window closed at {expected_end}; entry is no longer allowed")]
    TooLateForEntry { expected_end: NaiveTime },
    #[error("check-out not allowed before {expected_end} ({remaining_minutes}m remaining)")]
    PrematureCheckOut {
        expected_end: NaiveTime,
        remaining_minutes: i64,
    },
    #[error("attendance for this day is already complete")]
    AlreadyComplete,
    #[error("no open check-in found for this day")]
    NotCheckedIn,
}

impl AttendanceError {
    /// Stable machine-readable kind for wire payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AttendanceError::Validation(_) => "validation",
            AttendanceError::NotWorkDay { .. } => "not_work_day",
            AttendanceError::LocationUnavailable => "location_unavailable",
            AttendanceError::LocationOutOfRange { .. } => "location_out_of_range",
            AttendanceError::TooLateForEntry { .. } => "too_late_for_entry",
            AttendanceError::PrematureCheckOut { .. } => "premature_check_out",
            AttendanceError::AlreadyComplete => "already_complete",
            AttendanceError::NotCheckedIn => "not_checked_in",
        }
    }
}

/// Field values for a record about to be created by a first check-in.
#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub status: AttendanceStatus,
    pub expected_check_in: Option<NaiveTime>,
    pub expected_check_out: Option<NaiveTime>,
}

/// What a check-in presence event should do.
#[derive(Debug, Clone)]
pub enum CheckInDecision {
    /// No record for the day: create one.
    Create(NewCheckIn),
    /// An open record already exists: the event is really a check-out.
    RouteToCheckOut,
}

/// Authorize a check-in for (subject, date of `now`) against `area`.
///
/// Ordering is load-bearing: day and location gates run before any look at
/// the existing record, so a rejection never depends on prior state.
pub fn evaluate_check_in(
    area: &Area,
    existing: Option<&AttendanceRecord>,
    now: NaiveDateTime,
    coords: Option<Coordinates>,
) -> Result<CheckInDecision, AttendanceError> {
    if !schedule::is_work_day(area, now.date()) && area.schedule.is_some() {
        return Err(AttendanceError::NotWorkDay {
            area: area.name.clone(),
            date: now.date(),
        });
    }

    let probe = coords.ok_or(AttendanceError::LocationUnavailable)?;
    let check = geofence::within_fence(probe, area);
    if !check.ok {
        return Err(AttendanceError::LocationOutOfRange {
            area: area.name.clone(),
            distance_m: check.distance_m,
            radius_m: area.radius_m,
        });
    }

    if let Some(record) = existing {
        if record.is_complete() {
            return Err(AttendanceError::AlreadyComplete);
        }
        if record.is_open() {
            return Ok(CheckInDecision::RouteToCheckOut);
        }
        // Swept-absent records are terminal.
        return Err(AttendanceError::AlreadyComplete);
    }

    let Some((expected_start, expected_end)) = schedule::resolve(area, now.date()) else {
        // No schedule: every arrival is on time, no snapshot to keep.
        return Ok(CheckInDecision::Create(NewCheckIn {
            status: AttendanceStatus::Present,
            expected_check_in: None,
            expected_check_out: None,
        }));
    };

    let t = now.time();
    if t > expected_end {
        return Err(AttendanceError::TooLateForEntry { expected_end });
    }

    let on_time_limit = expected_start + schedule::grace_period(area);
    let status = if t <= on_time_limit {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Late
    };

    Ok(CheckInDecision::Create(NewCheckIn {
        status,
        expected_check_in: Some(expected_start),
        expected_check_out: Some(expected_end),
    }))
}

/// Authorize a check-out against an existing record.
///
/// Early exits are never granted: before the snapshotted expected end the
/// attempt is rejected with the remaining wait. Status carries through from
/// check-in unchanged.
pub fn evaluate_check_out(
    record: &AttendanceRecord,
    now: NaiveDateTime,
) -> Result<(), AttendanceError> {
    let Some(check_in) = record.check_in else {
        return Err(AttendanceError::NotCheckedIn);
    };
    if record.status == AttendanceStatus::Absent {
        return Err(AttendanceError::NotCheckedIn);
    }
    if record.is_complete() {
        return Err(AttendanceError::AlreadyComplete);
    }
    if now.time() < check_in {
        return Err(AttendanceError::Validation(format!(
            "check-out at {} precedes check-in at {check_in}",
            now.time()
        )));
    }

    if let Some(expected_end) = record.expected_check_out {
        let t = now.time();
        if t < expected_end {
            let remaining_seconds = (expected_end - t).num_seconds();
            return Err(AttendanceError::PrematureCheckOut {
                expected_end,
                // Round up so "29m59s" reads as 30m, matching user clocks.
                remaining_minutes: (remaining_seconds + 59) / 60,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::WorkSchedule;

    fn area() -> Area {
        Area {
            id: "main".into(),
            name: "Main Office".into(),
            latitude: 0.0,
            longitude: 0.0,
            radius_m: 150,
            active: true,
            schedule: Some(WorkSchedule::weekdays_default()),
        }
    }

    fn center() -> Option<Coordinates> {
        Some(Coordinates { latitude: 0.0, longitude: 0.0 })
    }

    fn monday_at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn open_record(status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            subject_id: "s1".into(),
            area_id: "main".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            check_in: NaiveTime::from_hms_opt(8, 0, 0),
            check_out: None,
            status,
            expected_check_in: NaiveTime::from_hms_opt(8, 0, 0),
            expected_check_out: NaiveTime::from_hms_opt(17, 0, 0),
            latitude: Some(0.0),
            longitude: Some(0.0),
            face_verified: true,
        }
    }

    #[test]
    fn check_in_at_expected_start_is_present() {
        let decision = evaluate_check_in(&area(), None, monday_at(8, 0), center()).unwrap();
        match decision {
            CheckInDecision::Create(new) => {
                assert_eq!(new.status, AttendanceStatus::Present);
                assert_eq!(new.expected_check_in, NaiveTime::from_hms_opt(8, 0, 0));
                assert_eq!(new.expected_check_out, NaiveTime::from_hms_opt(17, 0, 0));
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn check_in_at_grace_limit_is_present() {
        let decision = evaluate_check_in(&area(), None, monday_at(8, 15), center()).unwrap();
        assert!(matches!(
            decision,
            CheckInDecision::Create(NewCheckIn { status: AttendanceStatus::Present, .. })
        ));
    }

    #[test]
    fn check_in_past_grace_is_late() {
        let decision = evaluate_check_in(&area(), None, monday_at(8, 16), center()).unwrap();
        assert!(matches!(
            decision,
            CheckInDecision::Create(NewCheckIn { status: AttendanceStatus::Late, .. })
        ));
    }

    #[test]
    fn check_in_after_window_close_is_rejected() {
        let err = evaluate_check_in(&area(), None, monday_at(17, 5), center()).unwrap_err();
        assert!(matches!(err, AttendanceError::TooLateForEntry { .. }));
        assert_eq!(err.kind(), "too_late_for_entry");
    }

    #[test]
    fn check_in_at_exact_window_close_is_allowed_late() {
        // t > expected_end rejects; t == expected_end is the last valid second.
        let decision = evaluate_check_in(&area(), None, monday_at(17, 0), center()).unwrap();
        assert!(matches!(
            decision,
            CheckInDecision::Create(NewCheckIn { status: AttendanceStatus::Late, .. })
        ));
    }

    #[test]
    fn non_work_day_rejected() {
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let err = evaluate_check_in(&area(), None, saturday, center()).unwrap_err();
        assert!(matches!(err, AttendanceError::NotWorkDay { .. }));
    }

    #[test]
    fn missing_coordinates_is_location_unavailable() {
        let err = evaluate_check_in(&area(), None, monday_at(8, 0), None).unwrap_err();
        assert!(matches!(err, AttendanceError::LocationUnavailable));
    }

    #[test]
    fn outside_fence_is_rejected_with_distance() {
        let far = Some(Coordinates { latitude: 0.01, longitude: 0.0 }); // ~1.1 km
        let err = evaluate_check_in(&area(), None, monday_at(8, 0), far).unwrap_err();
        match err {
            AttendanceError::LocationOutOfRange { distance_m, radius_m, .. } => {
                assert_eq!(radius_m, 150);
                assert!(distance_m > 1000.0);
            }
            other => panic!("expected LocationOutOfRange, got {other}"),
        }
    }

    #[test]
    fn open_record_routes_to_check_out() {
        let record = open_record(AttendanceStatus::Present);
        let decision =
            evaluate_check_in(&area(), Some(&record), monday_at(17, 30), center()).unwrap();
        assert!(matches!(decision, CheckInDecision::RouteToCheckOut));
    }

    #[test]
    fn complete_record_rejects_further_events() {
        let mut record = open_record(AttendanceStatus::Present);
        record.check_out = NaiveTime::from_hms_opt(17, 10, 0);
        let err =
            evaluate_check_in(&area(), Some(&record), monday_at(17, 30), center()).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyComplete));
    }

    #[test]
    fn no_schedule_means_present_without_snapshot() {
        let mut a = area();
        a.schedule = None;
        let decision = evaluate_check_in(&a, None, monday_at(23, 50), center()).unwrap();
        match decision {
            CheckInDecision::Create(new) => {
                assert_eq!(new.status, AttendanceStatus::Present);
                assert!(new.expected_check_in.is_none());
                assert!(new.expected_check_out.is_none());
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn premature_check_out_carries_remaining_minutes() {
        let record = open_record(AttendanceStatus::Present);
        let err = evaluate_check_out(&record, monday_at(16, 30)).unwrap_err();
        match err {
            AttendanceError::PrematureCheckOut { remaining_minutes, expected_end } => {
                assert_eq!(remaining_minutes, 30);
                assert_eq!(expected_end, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
            }
            other => panic!("expected PrematureCheckOut, got {other}"),
        }
    }

    #[test]
    fn check_out_at_expected_end_is_accepted() {
        let record = open_record(AttendanceStatus::Late);
        assert!(evaluate_check_out(&record, monday_at(17, 0)).is_ok());
    }

    #[test]
    fn check_out_after_expected_end_is_accepted() {
        let record = open_record(AttendanceStatus::Present);
        assert!(evaluate_check_out(&record, monday_at(19, 45)).is_ok());
    }

    #[test]
    fn check_out_without_snapshot_is_unrestricted() {
        let mut record = open_record(AttendanceStatus::Present);
        record.expected_check_out = None;
        assert!(evaluate_check_out(&record, monday_at(9, 0)).is_ok());
    }

    #[test]
    fn check_out_before_check_in_is_rejected() {
        // Without the guard a schedule-less record would accept the stale
        // timestamp and report negative hours worked.
        let mut record = open_record(AttendanceStatus::Present);
        record.expected_check_out = None;
        let err = evaluate_check_out(&record, monday_at(7, 30)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn swept_record_rejects_check_out() {
        let record = open_record(AttendanceStatus::Absent);
        let err = evaluate_check_out(&record, monday_at(18, 0)).unwrap_err();
        assert!(matches!(err, AttendanceError::NotCheckedIn));
    }

    #[test]
    fn hours_worked_rounds_to_two_decimals() {
        let mut record = open_record(AttendanceStatus::Present);
        record.check_out = NaiveTime::from_hms_opt(16, 50, 0);
        assert_eq!(record.hours_worked(), Some(8.83));
        record.check_out = None;
        assert_eq!(record.hours_worked(), None);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::Late,
            AttendanceStatus::Absent,
        ] {
            assert_eq!(AttendanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttendanceStatus::parse("half_day"), None);
    }
}
