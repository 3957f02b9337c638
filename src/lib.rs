// Core modules
pub mod common;
pub mod core;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use common::{BallotError, Config, DevMode, Result};
pub use crate::core::{
    AuthorizationLedger, Decision, FaceCapability, HaarCascade, IdentificationEngine,
    MatchPolicy, MatchResult, OnnxFaceCapability, PresenceGate, RegionDetector,
};
pub use service::{BallotService, Identification, Registry, Stores};
pub use storage::{ActionLog, FileStore, IdentityStore, MemoryStore, TargetStore};
