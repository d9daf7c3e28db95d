//! Weekday-scoped work schedules and their resolution against calendar dates.

use crate::area::Area;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minutes of tolerance after the expected start during which a check-in
/// still counts as on-time.
pub const DEFAULT_GRACE_MINUTES: u32 = 15;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("{weekday} is active but missing start or end time")]
    MissingTimes { weekday: Weekday },
    #[error("{weekday}: start {start} is not before end {end}")]
    StartNotBeforeEnd {
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    },
}

/// One weekday's working window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub start: Option<NaiveTime>,
    #[serde(default)]
    pub end: Option<NaiveTime>,
}

impl DaySchedule {
    pub fn window(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            active: true,
            start: Some(start),
            end: Some(end),
        }
    }

    fn expected_times(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.active {
            return None;
        }
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

/// Weekly work schedule for an area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSchedule {
    #[serde(default)]
    pub monday: DaySchedule,
    #[serde(default)]
    pub tuesday: DaySchedule,
    #[serde(default)]
    pub wednesday: DaySchedule,
    #[serde(default)]
    pub thursday: DaySchedule,
    #[serde(default)]
    pub friday: DaySchedule,
    #[serde(default)]
    pub saturday: DaySchedule,
    #[serde(default)]
    pub sunday: DaySchedule,
    #[serde(default = "default_grace")]
    pub grace_minutes: u32,
}

fn default_grace() -> u32 {
    DEFAULT_GRACE_MINUTES
}

impl WorkSchedule {
    /// Canonical Monday–Friday 08:00–17:00 schedule with the default grace.
    pub fn weekdays_default() -> Self {
        let start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        Self {
            monday: DaySchedule::window(start, end),
            tuesday: DaySchedule::window(start, end),
            wednesday: DaySchedule::window(start, end),
            thursday: DaySchedule::window(start, end),
            friday: DaySchedule::window(start, end),
            saturday: DaySchedule::default(),
            sunday: DaySchedule::default(),
            grace_minutes: DEFAULT_GRACE_MINUTES,
        }
    }

    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    /// An active day must carry both times, with start strictly before end.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        const WEEKDAYS: [Weekday; 7] = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        for weekday in WEEKDAYS {
            let day = self.day(weekday);
            if !day.active {
                continue;
            }
            match (day.start, day.end) {
                (Some(start), Some(end)) => {
                    if start >= end {
                        return Err(ScheduleError::StartNotBeforeEnd { weekday, start, end });
                    }
                }
                _ => return Err(ScheduleError::MissingTimes { weekday }),
            }
        }
        Ok(())
    }
}

/// Expected start/end for `date`, if the area has a schedule and that
/// weekday is active.
pub fn resolve(area: &Area, date: NaiveDate) -> Option<(NaiveTime, NaiveTime)> {
    area.schedule
        .as_ref()
        .and_then(|s| s.day(date.weekday()).expected_times())
}

pub fn is_work_day(area: &Area, date: NaiveDate) -> bool {
    resolve(area, date).is_some()
}

/// The area's grace period, or the fixed default when it has no schedule.
pub fn grace_period(area: &Area) -> Duration {
    let minutes = area
        .schedule
        .as_ref()
        .map(|s| s.grace_minutes)
        .unwrap_or(DEFAULT_GRACE_MINUTES);
    Duration::minutes(minutes as i64)
}
