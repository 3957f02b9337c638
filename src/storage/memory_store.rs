use crate::common::{BallotError, Result};
use crate::storage::records::{ActionRecord, Identity, Target, TargetDetails};
use crate::storage::store::{ActionLog, IdentityStore, TargetStore};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    identities: Vec<Identity>,
    targets: Vec<Target>,
    actions: Vec<ActionRecord>,
}

/// Process-local store implementing all three storage traits.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| BallotError::StorageUnavailable("memory store lock poisoned".into()))
    }
}

impl IdentityStore for MemoryStore {
    fn list_identities(&self) -> Result<Vec<Identity>> {
        Ok(self.lock()?.identities.clone())
    }

    fn find_identity(&self, key: &str) -> Result<Option<Identity>> {
        Ok(self.lock()?.identities.iter().find(|i| i.key == key).cloned())
    }

    fn insert_identity(&self, identity: &Identity) -> Result<bool> {
        let mut state = self.lock()?;
        if state.identities.iter().any(|i| i.key == identity.key) {
            return Ok(false);
        }
        state.identities.push(identity.clone());
        Ok(true)
    }

    fn mark_authorized(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let identity = state
            .identities
            .iter_mut()
            .find(|i| i.key == key)
            .ok_or_else(|| BallotError::IdentityNotFound(key.to_string()))?;
        if identity.action_taken {
            return Ok(false);
        }
        identity.action_taken = true;
        Ok(true)
    }

    fn reset_authorizations(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let mut cleared = 0;
        for identity in state.identities.iter_mut().filter(|i| i.action_taken) {
            identity.action_taken = false;
            cleared += 1;
        }
        Ok(cleared)
    }
}

impl TargetStore for MemoryStore {
    fn list_targets(&self) -> Result<Vec<Target>> {
        Ok(self.lock()?.targets.clone())
    }

    fn find_target(&self, key: &str) -> Result<Option<Target>> {
        Ok(self.lock()?.targets.iter().find(|t| t.key == key).cloned())
    }

    fn insert_target(&self, target: &Target) -> Result<bool> {
        let mut state = self.lock()?;
        if state.targets.iter().any(|t| t.key == target.key) {
            return Ok(false);
        }
        state.targets.push(target.clone());
        Ok(true)
    }

    fn update_target(&self, key: &str, details: &TargetDetails) -> Result<Option<Target>> {
        let mut state = self.lock()?;
        Ok(state.targets.iter_mut().find(|t| t.key == key).map(|target| {
            target.apply(details);
            target.clone()
        }))
    }

    fn remove_target(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.targets.len();
        state.targets.retain(|t| t.key != key);
        Ok(state.targets.len() != before)
    }

    fn increment_counter(&self, key: &str) -> Result<u64> {
        let mut state = self.lock()?;
        let target = state
            .targets
            .iter_mut()
            .find(|t| t.key == key)
            .ok_or_else(|| BallotError::TargetNotFound(key.to_string()))?;
        target.action_count += 1;
        Ok(target.action_count)
    }
}

impl ActionLog for MemoryStore {
    fn append(&self, record: &ActionRecord) -> Result<()> {
        self.lock()?.actions.push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<ActionRecord>> {
        Ok(self.lock()?.actions.clone())
    }
}
