use crate::common::{BallotError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STORAGE_VERSION: u32 = 1;
const MAX_KEY_LEN: usize = 64;

/// An enrolled person. `action_taken` only moves false -> true outside of
/// an administrative reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub version: u32,
    pub key: String,
    pub name: String,
    pub contact: String,
    /// Encoded reference image exactly as enrolled.
    pub face_image: Vec<u8>,
    #[serde(default)]
    pub action_taken: bool,
    pub created_at: DateTime<Utc>,
    pub consent: bool,
    #[serde(default)]
    pub consent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub version: u32,
    pub key: String,
    pub group_label: String,
    pub sub_label: String,
    #[serde(default)]
    pub image: Vec<u8>,
    #[serde(default)]
    pub action_count: u64,
    pub created_at: DateTime<Utc>,
}

/// The editable part of a target. Counter and creation time are not.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDetails {
    pub group_label: String,
    pub sub_label: String,
    pub image: Vec<u8>,
}

impl Target {
    pub fn apply(&mut self, details: &TargetDetails) {
        self.group_label = details.group_label.clone();
        self.sub_label = details.sub_label.clone();
        self.image = details.image.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub identity_key: String,
    pub target_key: String,
    pub timestamp: DateTime<Utc>,
}

/// Keys double as file names, so only a conservative alphabet is allowed.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |message: &str| BallotError::InvalidKey {
        key: key.to_string(),
        message: message.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid("key is longer than 64 characters"));
    }
    if key.starts_with('.') {
        return Err(invalid("key must not start with '.'"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(invalid("only ASCII letters, digits, '.', '-' and '_' are allowed"));
    }
    Ok(())
}
