//! presencia-core — Attendance validation and biometric matching engine.
//!
//! Pure domain logic: work-schedule resolution, geofence arithmetic, the
//! per-day attendance transition functions, and similarity search over
//! stored feature vectors. No I/O lives here.

pub mod area;
pub mod attendance;
pub mod geofence;
pub mod matcher;
pub mod schedule;
pub mod types;

pub use area::Area;
pub use attendance::{AttendanceError, AttendanceRecord, AttendanceStatus};
pub use geofence::Coordinates;
pub use types::{Embedding, FaceRegion, FeatureExtractor, StoredSample};
