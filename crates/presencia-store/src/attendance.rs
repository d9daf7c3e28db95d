//! Attendance record persistence.
//!
//! The `(subject_id, date)` UNIQUE constraint is the arbiter for concurrent
//! first check-ins: the losing insert surfaces as [`StoreError::InsertConflict`]
//! and the caller re-reads the winner's record.

use crate::{date_from_sql, date_to_sql, time_from_sql, time_to_sql, Store, StoreError};
use chrono::{NaiveDate, NaiveTime, Utc};
use presencia_core::attendance::{AttendanceRecord, AttendanceStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Fields for a record created by a first check-in.
#[derive(Debug, Clone)]
pub struct NewAttendanceRow {
    pub subject_id: String,
    pub area_id: String,
    pub date: NaiveDate,
    pub check_in: NaiveTime,
    pub status: AttendanceStatus,
    pub expected_check_in: Option<NaiveTime>,
    pub expected_check_out: Option<NaiveTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub face_verified: bool,
}

impl Store {
    /// Insert the day's record. A uniqueness violation maps to
    /// [`StoreError::InsertConflict`]; everything else is a storage error.
    pub async fn insert_check_in(&self, row: NewAttendanceRow) -> Result<(), StoreError> {
        self.call(move |conn| insert_check_in_sync(conn, &row)).await
    }

    pub async fn fetch_record(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| fetch_record_sync(conn, &subject_id, date))
            .await
    }

    /// Set the check-out time on the day's open record. Returns `false`
    /// when no open record matched (already complete, swept, or absent).
    pub async fn set_check_out(
        &self,
        subject_id: &str,
        date: NaiveDate,
        check_out: NaiveTime,
    ) -> Result<bool, StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE attendance
                 SET check_out = ?1, updated_at = ?2
                 WHERE subject_id = ?3 AND date = ?4
                   AND check_in IS NOT NULL AND check_out IS NULL",
                params![
                    time_to_sql(check_out),
                    Utc::now().to_rfc3339(),
                    subject_id,
                    date_to_sql(date)
                ],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    /// Subjects with a stale open record on `date`: checked in, never
    /// checked out, still marked present or late.
    pub async fn open_subjects(&self, date: NaiveDate) -> Result<Vec<String>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT subject_id FROM attendance
                 WHERE date = ?1
                   AND check_in IS NOT NULL AND check_out IS NULL
                   AND status IN ('present', 'late')
                 ORDER BY subject_id",
            )?;
            let subjects = stmt
                .query_map(params![date_to_sql(date)], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(subjects)
        })
        .await
    }

    /// Transition one stale open record to absent. Returns `false` when the
    /// record no longer qualifies (already swept or completed meanwhile).
    pub async fn mark_absent(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let subject_id = subject_id.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE attendance
                 SET status = 'absent', updated_at = ?1
                 WHERE subject_id = ?2 AND date = ?3
                   AND check_in IS NOT NULL AND check_out IS NULL
                   AND status IN ('present', 'late')",
                params![Utc::now().to_rfc3339(), subject_id, date_to_sql(date)],
            )?;
            Ok(updated == 1)
        })
        .await
    }
}

fn insert_check_in_sync(conn: &Connection, row: &NewAttendanceRow) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let result = conn.execute(
        "INSERT INTO attendance (
             subject_id, area_id, date, check_in, status,
             expected_check_in, expected_check_out,
             latitude, longitude, face_verified, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.subject_id,
            row.area_id,
            date_to_sql(row.date),
            time_to_sql(row.check_in),
            row.status.as_str(),
            row.expected_check_in.map(time_to_sql),
            row.expected_check_out.map(time_to_sql),
            row.latitude,
            row.longitude,
            row.face_verified,
            now,
            now
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(StoreError::InsertConflict {
            subject_id: row.subject_id.clone(),
            date: row.date,
        }),
        Err(e) => Err(e.into()),
    }
}

fn fetch_record_sync(
    conn: &Connection,
    subject_id: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>, StoreError> {
    conn.query_row(
        "SELECT subject_id, area_id, date, check_in, check_out, status,
                expected_check_in, expected_check_out,
                latitude, longitude, face_verified
         FROM attendance WHERE subject_id = ?1 AND date = ?2",
        params![subject_id, date_to_sql(date)],
        record_from_row,
    )
    .optional()?
    .transpose()
}

/// Decode a full record row. Status and date/time text that fails to parse
/// is corrupt, not absent.
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Result<AttendanceRecord, StoreError>> {
    fn opt_time(v: Option<String>) -> Result<Option<NaiveTime>, StoreError> {
        v.map(|s| time_from_sql(&s)).transpose()
    }

    let status_text: String = row.get(5)?;
    let record = (|| {
        let status = AttendanceStatus::parse(&status_text)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status_text:?}")))?;
        Ok(AttendanceRecord {
            subject_id: row.get(0)?,
            area_id: row.get(1)?,
            date: date_from_sql(&row.get::<_, String>(2)?)?,
            check_in: opt_time(row.get(3)?)?,
            check_out: opt_time(row.get(4)?)?,
            status,
            expected_check_in: opt_time(row.get(6)?)?,
            expected_check_out: opt_time(row.get(7)?)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
            face_verified: row.get(10)?,
        })
    })();
    Ok(record)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}
