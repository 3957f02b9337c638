use faceballot::{
    common::{opencv_cascade_dirs, system_config_file, system_models_dir, user_config_file},
    core::PresenceVerdict,
    service::{EnrollmentRequest, TargetRequest},
    storage::TargetDetails,
    BallotError, BallotService, Config, DevMode, FileStore, HaarCascade, OnnxFaceCapability,
    Registry, Stores,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceballot")]
#[command(about = "Face-identified, one-vote-per-person ballot")]
struct Cli {
    /// Enable development mode (keeps all data under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to configs/faceballot.toml, then the user and system configs)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory that relative model paths are resolved against
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run only the presence gate on an image
    CheckFace { image: PathBuf },
    /// Enroll a new identity
    Enroll {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        contact: String,
        #[arg(short, long)]
        image: PathBuf,
        /// Confirms the person accepted the data-processing terms
        #[arg(long)]
        consent: bool,
    },
    /// Create a target that actions are counted against
    AddTarget {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        label: String,
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Replace a target's labels and image, keeping its count
    UpdateTarget {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        label: String,
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Delete a target
    DeleteTarget {
        #[arg(short, long)]
        key: String,
    },
    /// List targets
    Targets,
    /// Identify the person in an image
    Identify { image: PathBuf },
    /// Identify the person in an image and record their vote
    Vote {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        target: String,
    },
    /// Show targets ordered by count
    Results,
    /// Show enrollment and voting activity
    Report,
    /// Clear every identity's vote flag
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = load_config(cli.config.as_deref())?;
    let store_dir = dev_mode.store_dir(config.storage.data_dir.as_deref());
    let store = FileStore::open(&store_dir)?;
    let stores = Stores::from_store(&store);
    let registry = Registry::new(stores);

    match cli.command {
        Commands::Enroll { key, name, contact, image, consent } => {
            let identity = registry.enroll(EnrollmentRequest {
                key,
                name,
                contact,
                face_image: read_image(&image)?,
                consent,
            })?;
            println!("Enrolled {} ({})", identity.name, identity.key);
        }
        Commands::AddTarget { key, group, label, image } => {
            let image = match image {
                Some(path) => read_image(&path)?,
                None => Vec::new(),
            };
            let target = registry.add_target(TargetRequest {
                key,
                group_label: group,
                sub_label: label,
                image,
            })?;
            println!("Created target {}", target.key);
        }
        Commands::UpdateTarget { key, group, label, image } => {
            let image = match image {
                Some(path) => read_image(&path)?,
                None => Vec::new(),
            };
            let target = registry.update_target(
                &key,
                TargetDetails { group_label: group, sub_label: label, image },
            )?;
            println!("Updated target {} ({} votes kept)", target.key, target.action_count);
        }
        Commands::DeleteTarget { key } => {
            registry.delete_target(&key)?;
            println!("Deleted target {}", key);
        }
        Commands::Targets => {
            for target in registry.targets()? {
                println!("{}\t{}\t{}", target.key, target.group_label, target.sub_label);
            }
        }
        Commands::Results => {
            println!("{}", serde_json::to_string_pretty(&registry.results()?)?);
        }
        Commands::Report => {
            println!("{}", serde_json::to_string_pretty(&registry.report()?)?);
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset without --yes");
            }
            let cleared = registry.reset()?;
            println!("Cleared {} vote flag(s)", cleared);
        }
        Commands::CheckFace { image } => {
            let image = read_image(&image)?;
            with_service(&config, cli.models, &dev_mode, stores, |service| {
                match service.check_face(&image)? {
                    PresenceVerdict::Primary { regions } => {
                        println!("Face present ({} cascade region(s))", regions)
                    }
                    PresenceVerdict::Fallback(face) => println!(
                        "Face present (fallback {}x{}, confidence {:.2})",
                        face.width, face.height, face.confidence
                    ),
                    PresenceVerdict::Rejected => println!("No face detected"),
                }
                Ok(())
            })?;
        }
        Commands::Identify { image } => {
            let image = read_image(&image)?;
            with_service(&config, cli.models, &dev_mode, stores, |service| {
                match service.identify(&image) {
                    Ok(identification) => {
                        println!("{}", serde_json::to_string_pretty(&identification)?)
                    }
                    Err(BallotError::NoFaceDetected) => {
                        println!("No face detected. Position your face in the frame and try again.")
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(())
            })?;
        }
        Commands::Vote { image, target } => {
            let image = read_image(&image)?;
            with_service(&config, cli.models, &dev_mode, stores, |service| {
                match service.cast(&image, &target) {
                    Ok((person, _record)) => {
                        println!("Vote recorded for {} ({})", person.name, person.key)
                    }
                    Err(e) if e.is_recapture() => println!("{}. Please capture again.", e),
                    Err(e) => return Err(e.into()),
                }
                Ok(())
            })?;
        }
    }

    Ok(())
}

/// Loads the models, which may fail with `CapabilityUnavailable`, and hands a
/// ready service to `run`.
fn with_service<F>(
    config: &Config,
    models: Option<PathBuf>,
    dev_mode: &DevMode,
    stores: Stores<'_>,
    run: F,
) -> Result<()>
where
    F: FnOnce(&BallotService<'_, OnnxFaceCapability>) -> Result<()>,
{
    let models_base = models.unwrap_or_else(|| {
        if dev_mode.is_enabled() {
            PathBuf::from("./models")
        } else {
            system_models_dir()
        }
    });

    let capability = OnnxFaceCapability::new(config, &models_base)?;
    let cascade_path = resolve_cascade_path(config, &models_base);
    let cascade = HaarCascade::load(&cascade_path, config.cascade.clone())?;
    let service = BallotService::new(config, &capability, &cascade, stores)?;

    run(&service)
}

/// The configured cascade, or the file of the same name from a system OpenCV
/// install when a relative path is not present under `models_base`.
fn resolve_cascade_path(config: &Config, models_base: &Path) -> PathBuf {
    let configured = config.model_path(&config.models.cascade_path, models_base);
    if configured.exists() || config.models.cascade_path.is_absolute() {
        return configured;
    }
    match opencv_cascade_dirs()
        .iter()
        .map(|dir| dir.join(&config.models.cascade_path))
        .find(|path| path.exists())
    {
        Some(path) => {
            tracing::info!("Using OpenCV cascade {}", path.display());
            path
        }
        None => configured,
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Ok(Config::load_from_path(path)?);
    }
    if Path::new("configs/faceballot.toml").exists() {
        return Ok(Config::load()?);
    }
    if let Some(user) = user_config_file().filter(|p| p.exists()) {
        return Ok(Config::load_from_path(&user)?);
    }
    let system = system_config_file();
    if system.exists() {
        return Ok(Config::load_from_path(&system)?);
    }
    tracing::info!("No config file found; using defaults");
    Ok(Config::default())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
