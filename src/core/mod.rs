pub mod capability;
pub mod cascade;
pub mod detector;
pub mod engine;
pub mod gate;
pub mod ledger;
pub mod onnx;
pub mod opencv_cascade;
pub mod policy;
pub mod recognizer;
mod session;

pub use capability::{CompareOptions, Comparison, DistanceMetric, FaceCandidate, FaceCapability};
pub use cascade::{CascadeModel, HaarCascade, Region, RegionDetector};
pub use detector::{FaceBox, FaceDetector};
pub use engine::{BestMatch, IdentificationEngine, MatchResult, SkipReason, SkippedIdentity};
pub use gate::{PresenceGate, PresenceVerdict};
pub use ledger::{AuthorizationLedger, AuthorizationState};
pub use onnx::OnnxFaceCapability;
pub use policy::{Decision, MatchPolicy};
pub use recognizer::{cosine_similarity, Embedding, FaceRecognizer};
