use crate::common::{BallotError, Result};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder};
use std::path::Path;
use std::sync::Arc;

/// Builds an ONNX session for `model_path`. Any failure here means the
/// capability cannot be brought up at all, so it surfaces as
/// [`BallotError::CapabilityUnavailable`].
pub(crate) fn load_session(
    name: &str,
    model_path: &Path,
    optimization_level: u32,
) -> Result<(Arc<Environment>, Session)> {
    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .build()
            .map_err(|e| {
                BallotError::CapabilityUnavailable(format!("Failed to create environment: {}", e))
            })?,
    );

    if !model_path.exists() {
        return Err(BallotError::CapabilityUnavailable(format!(
            "{} model not found at: {:?}",
            name, model_path
        )));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(&environment)
        .and_then(|builder| builder.with_optimization_level(opt_level))
        .and_then(|builder| builder.with_model_from_file(model_path))
        .map_err(|e| {
            BallotError::CapabilityUnavailable(format!(
                "Failed to load {} model {:?}: {}",
                name, model_path, e
            ))
        })?;

    Ok((environment, session))
}
