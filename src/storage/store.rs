use crate::common::Result;
use crate::storage::records::{ActionRecord, Identity, Target, TargetDetails};

/// Enrolled identities. Each call is atomic on its own; nothing spans calls.
pub trait IdentityStore: Send + Sync {
    /// All identities in a stable enumeration order (enrollment order).
    fn list_identities(&self) -> Result<Vec<Identity>>;

    fn find_identity(&self, key: &str) -> Result<Option<Identity>>;

    /// Inserts unless the key is taken; returns whether the insert happened.
    fn insert_identity(&self, identity: &Identity) -> Result<bool>;

    /// Compare-and-set of the action flag from false to true. Returns
    /// `Ok(false)` when the flag was already set and
    /// `IdentityNotFound` when the key is unknown.
    fn mark_authorized(&self, key: &str) -> Result<bool>;

    /// Clears every action flag and returns how many were set.
    fn reset_authorizations(&self) -> Result<usize>;
}

pub trait TargetStore: Send + Sync {
    fn list_targets(&self) -> Result<Vec<Target>>;

    fn find_target(&self, key: &str) -> Result<Option<Target>>;

    fn insert_target(&self, target: &Target) -> Result<bool>;

    /// Replaces the target's details, keeping its counter. `None` when the key is unknown.
    fn update_target(&self, key: &str, details: &TargetDetails) -> Result<Option<Target>>;

    /// Returns whether a target was removed.
    fn remove_target(&self, key: &str) -> Result<bool>;

    /// Adds one to the target's counter and returns the new value.
    fn increment_counter(&self, key: &str) -> Result<u64>;
}

/// Append-only record of authorized actions.
pub trait ActionLog: Send + Sync {
    fn append(&self, record: &ActionRecord) -> Result<()>;

    fn records(&self) -> Result<Vec<ActionRecord>>;
}
