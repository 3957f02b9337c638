use thiserror::Error;

#[derive(Error, Debug)]
pub enum BallotError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("No enrolled identity matched the probe")]
    NoMatchFound,

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Identity {0} has already authorized its action")]
    AlreadyAuthorized(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Identity already enrolled: {0}")]
    DuplicateIdentity(String),

    #[error("Target already exists: {0}")]
    DuplicateTarget(String),

    #[error("Consent is required before enrollment")]
    ConsentRequired,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid key '{key}': {message}")]
    InvalidKey { key: String, message: String },

    #[error("Face capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl BallotError {
    /// Errors the caller should answer by asking for a new capture.
    pub fn is_recapture(&self) -> bool {
        matches!(self, BallotError::NoFaceDetected | BallotError::NoMatchFound)
    }
}

pub type Result<T> = std::result::Result<T, BallotError>;
