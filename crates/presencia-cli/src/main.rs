use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.presencia.Presencia1",
    default_service = "org.presencia.Presencia1",
    default_path = "/org/presencia/Presencia1"
)]
trait Presencia {
    #[allow(clippy::too_many_arguments)]
    async fn check_in(
        &self,
        subject_id: &str,
        area_id: &str,
        timestamp: &str,
        has_location: bool,
        latitude: f64,
        longitude: f64,
        face_verified: bool,
    ) -> zbus::Result<String>;

    async fn check_out(
        &self,
        subject_id: &str,
        area_id: &str,
        timestamp: &str,
    ) -> zbus::Result<String>;

    async fn enroll(&self, subject_id: &str, images: Vec<Vec<u8>>) -> zbus::Result<String>;

    async fn verify(&self, subject_id: &str, image: Vec<u8>) -> zbus::Result<String>;

    async fn reconcile(&self, date: &str) -> zbus::Result<String>;

    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "presencia", about = "Presencia attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a check-in (or close an open record for the day)
    CheckIn {
        /// Subject (employee) identifier
        subject: String,
        /// Area identifier
        area: String,
        /// Event timestamp, "YYYY-MM-DDTHH:MM:SS" (default: now)
        #[arg(short, long, default_value = "")]
        timestamp: String,
        /// Reported latitude
        #[arg(long, requires = "longitude")]
        latitude: Option<f64>,
        /// Reported longitude
        #[arg(long, requires = "latitude")]
        longitude: Option<f64>,
        /// Path to a face image to verify before marking
        #[arg(short, long)]
        face: Option<PathBuf>,
    },
    /// Record an explicit check-out
    CheckOut {
        subject: String,
        area: String,
        /// Event timestamp, "YYYY-MM-DDTHH:MM:SS" (default: now)
        #[arg(short, long, default_value = "")]
        timestamp: String,
    },
    /// Enroll face images for a subject
    Enroll {
        subject: String,
        /// One or more image files
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Verify a face image against a subject's template
    Verify {
        subject: String,
        image: PathBuf,
    },
    /// Mark stale open records absent
    Reconcile {
        /// Date to sweep, "YYYY-MM-DD" (default: the trailing window)
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// Show daemon status
    Status,
}

fn read_image(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

/// Pretty-print a JSON reply, falling back to the raw string.
fn print_reply(reply: &str) {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
        Err(_) => println!("{reply}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("connecting to the system bus")?;
    let proxy = PresenciaProxy::new(&conn)
        .await
        .context("connecting to presenciad")?;

    let reply = match cli.command {
        Commands::CheckIn {
            subject,
            area,
            timestamp,
            latitude,
            longitude,
            face,
        } => {
            let face_verified = match face {
                Some(path) => {
                    let image = read_image(&path)?;
                    let verdict = proxy.verify(&subject, image).await?;
                    let value: serde_json::Value = serde_json::from_str(&verdict)
                        .context("daemon returned malformed verification result")?;
                    let verified = value["verified"].as_bool().unwrap_or(false);
                    if !verified {
                        anyhow::bail!("face verification failed: {verdict}");
                    }
                    true
                }
                None => false,
            };
            let has_location = latitude.is_some();
            proxy
                .check_in(
                    &subject,
                    &area,
                    &timestamp,
                    has_location,
                    latitude.unwrap_or(0.0),
                    longitude.unwrap_or(0.0),
                    face_verified,
                )
                .await?
        }
        Commands::CheckOut {
            subject,
            area,
            timestamp,
        } => proxy.check_out(&subject, &area, &timestamp).await?,
        Commands::Enroll { subject, images } => {
            let payloads = images
                .iter()
                .map(read_image)
                .collect::<Result<Vec<_>>>()?;
            proxy.enroll(&subject, payloads).await?
        }
        Commands::Verify { subject, image } => {
            proxy.verify(&subject, read_image(&image)?).await?
        }
        Commands::Reconcile { date } => proxy.reconcile(&date).await?,
        Commands::Status => proxy.status().await?,
    };

    print_reply(&reply);
    Ok(())
}
