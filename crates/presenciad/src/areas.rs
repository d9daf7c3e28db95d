//! Read-only area directory, loaded once at startup from a TOML file.
//!
//! Times are quoted strings (`"08:00:00"`) rather than bare TOML times so
//! they deserialize straight into `chrono::NaiveTime`.
//!
//! ```toml
//! [[areas]]
//! id = "main"
//! name = "Main Office"
//! latitude = 10.491
//! longitude = -66.902
//! radius_m = 150
//!
//! [areas.schedule]
//! grace_minutes = 15
//! monday = { active = true, start = "08:00:00", end = "17:00:00" }
//! ```

use presencia_core::area::{Area, AreaError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AreasError {
    #[error("cannot read area directory {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse area directory: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate area id {0:?}")]
    DuplicateId(String),
    #[error(transparent)]
    Invalid(#[from] AreaError),
}

#[derive(Deserialize)]
struct AreasFile {
    #[serde(default)]
    areas: Vec<Area>,
}

/// All configured areas, keyed by id.
pub struct AreaDirectory {
    areas: HashMap<String, Area>,
}

impl AreaDirectory {
    pub fn load(path: &Path) -> Result<Self, AreasError> {
        let text = std::fs::read_to_string(path).map_err(|source| AreasError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, AreasError> {
        let file: AreasFile = toml::from_str(text)?;
        let mut areas = HashMap::new();
        for area in file.areas {
            area.validate()?;
            if areas.contains_key(&area.id) {
                return Err(AreasError::DuplicateId(area.id));
            }
            areas.insert(area.id.clone(), area);
        }
        Ok(Self { areas })
    }

    pub fn get(&self, id: &str) -> Option<&Area> {
        self.areas.get(id)
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[areas]]
        id = "main"
        name = "Main Office"
        latitude = 10.491
        longitude = -66.902
        radius_m = 150

        [areas.schedule]
        grace_minutes = 20
        monday = { active = true, start = "08:00:00", end = "17:00:00" }
        tuesday = { active = true, start = "08:00:00", end = "17:00:00" }

        [[areas]]
        id = "warehouse"
        name = "Warehouse"
        latitude = 10.5
        longitude = -66.95
        radius_m = 300
        active = false
    "#;

    #[test]
    fn parses_areas_with_and_without_schedule() {
        let dir = AreaDirectory::parse(SAMPLE).unwrap();
        assert_eq!(dir.len(), 2);

        let main = dir.get("main").unwrap();
        assert!(main.active);
        let schedule = main.schedule.as_ref().unwrap();
        assert_eq!(schedule.grace_minutes, 20);
        assert!(schedule.monday.active);
        assert!(!schedule.wednesday.active);

        let warehouse = dir.get("warehouse").unwrap();
        assert!(!warehouse.active);
        assert!(warehouse.schedule.is_none());
    }

    #[test]
    fn rejects_invalid_radius() {
        let bad = r#"
            [[areas]]
            id = "tiny"
            name = "Tiny"
            latitude = 0.0
            longitude = 0.0
            radius_m = 5
        "#;
        assert!(matches!(
            AreaDirectory::parse(bad),
            Err(AreasError::Invalid(AreaError::RadiusOutOfRange { .. }))
        ));
    }

    #[test]
    fn rejects_invalid_schedule() {
        let bad = r#"
            [[areas]]
            id = "x"
            name = "X"
            latitude = 0.0
            longitude = 0.0
            radius_m = 100

            [areas.schedule]
            monday = { active = true, start = "17:00:00", end = "08:00:00" }
        "#;
        assert!(matches!(
            AreaDirectory::parse(bad),
            Err(AreasError::Invalid(AreaError::InvalidSchedule { .. }))
        ));
    }

    #[test]
    fn unknown_id_is_none() {
        let dir = AreaDirectory::parse(SAMPLE).unwrap();
        assert!(dir.get("nope").is_none());
    }
}
