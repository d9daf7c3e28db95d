use crate::schedule::WorkSchedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_RADIUS_M: u32 = 10;
pub const MAX_RADIUS_M: u32 = 10_000;

#[derive(Error, Debug)]
pub enum AreaError {
    #[error("area {id}: latitude {latitude} out of range [-90, 90]")]
    LatitudeOutOfRange { id: String, latitude: f64 },
    #[error("area {id}: longitude {longitude} out of range [-180, 180]")]
    LongitudeOutOfRange { id: String, longitude: f64 },
    #[error("area {id}: radius {radius_m}m outside [{MIN_RADIUS_M}, {MAX_RADIUS_M}]")]
    RadiusOutOfRange { id: String, radius_m: u32 },
    #[error("area {id}: invalid schedule: {source}")]
    InvalidSchedule {
        id: String,
        source: crate::schedule::ScheduleError,
    },
}

/// Geofenced work area: a circular boundary plus an optional weekly schedule.
///
/// Read-only to the engine; supplied by the area directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub schedule: Option<WorkSchedule>,
}

fn default_active() -> bool {
    true
}

impl Area {
    pub fn validate(&self) -> Result<(), AreaError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AreaError::LatitudeOutOfRange {
                id: self.id.clone(),
                latitude: self.latitude,
            });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AreaError::LongitudeOutOfRange {
                id: self.id.clone(),
                longitude: self.longitude,
            });
        }
        if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&self.radius_m) {
            return Err(AreaError::RadiusOutOfRange {
                id: self.id.clone(),
                radius_m: self.radius_m,
            });
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate().map_err(|source| AreaError::InvalidSchedule {
                id: self.id.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
