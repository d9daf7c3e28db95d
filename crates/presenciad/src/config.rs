use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the TOML area directory (geofences + schedules).
    pub areas_path: PathBuf,
    /// Deployment-wide default similarity threshold for new templates.
    pub confidence_threshold: f32,
    /// Reject samples with no detected face instead of falling back to the
    /// whole image.
    pub strict_face_detection: bool,
    /// Per-image budget for extraction work; enrollment scales with batch size.
    pub per_image_timeout_secs: u64,
    /// Maximum images accepted per enrollment batch; extras count as rejected.
    pub max_enroll_batch: usize,
    /// How many days back an explicit reconcile sweep reaches.
    pub sweep_back_days: u32,
}

impl Config {
    /// Load configuration from `PRESENCIA_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presencia");

        let db_path = std::env::var("PRESENCIA_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let areas_path = std::env::var("PRESENCIA_AREAS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/presencia/areas.toml"));

        Self {
            db_path,
            areas_path,
            confidence_threshold: env_f32(
                "PRESENCIA_CONFIDENCE_THRESHOLD",
                presencia_core::types::DEFAULT_CONFIDENCE_THRESHOLD,
            ),
            strict_face_detection: std::env::var("PRESENCIA_STRICT_FACE_DETECTION")
                .map(|v| v == "1")
                .unwrap_or(false),
            per_image_timeout_secs: env_u64("PRESENCIA_PER_IMAGE_TIMEOUT_SECS", 10),
            max_enroll_batch: env_usize("PRESENCIA_MAX_ENROLL_BATCH", 15),
            sweep_back_days: env_u64("PRESENCIA_SWEEP_BACK_DAYS", 7) as u32,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
