use crate::common::{BallotError, Result};
use crate::storage::{ActionLog, ActionRecord, IdentityStore, TargetStore};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Unauthorized,
    Authorized,
}

/// Turns an identification into a one-time action: an identity authorizes
/// at most one action over its lifetime.
pub struct AuthorizationLedger<'a> {
    identities: &'a dyn IdentityStore,
    targets: &'a dyn TargetStore,
    actions: &'a dyn ActionLog,
}

impl<'a> AuthorizationLedger<'a> {
    pub fn new(
        identities: &'a dyn IdentityStore,
        targets: &'a dyn TargetStore,
        actions: &'a dyn ActionLog,
    ) -> Self {
        Self { identities, targets, actions }
    }

    pub fn state(&self, identity_key: &str) -> Result<AuthorizationState> {
        let identity = self
            .identities
            .find_identity(identity_key)?
            .ok_or_else(|| BallotError::IdentityNotFound(identity_key.to_string()))?;
        Ok(if identity.action_taken {
            AuthorizationState::Authorized
        } else {
            AuthorizationState::Unauthorized
        })
    }

    /// Records one action of `identity_key` against `target_key`.
    ///
    /// The flag flip is a compare-and-set in the identity store, so of several
    /// concurrent calls for one identity exactly one gets past it; the others
    /// see `AlreadyAuthorized`. The record append and counter increment only
    /// happen after a successful flip.
    pub fn authorize(&self, identity_key: &str, target_key: &str) -> Result<ActionRecord> {
        let identity = self
            .identities
            .find_identity(identity_key)?
            .ok_or_else(|| BallotError::IdentityNotFound(identity_key.to_string()))?;
        if identity.action_taken {
            return Err(BallotError::AlreadyAuthorized(identity_key.to_string()));
        }

        if self.targets.find_target(target_key)?.is_none() {
            return Err(BallotError::TargetNotFound(target_key.to_string()));
        }

        if !self.identities.mark_authorized(identity_key)? {
            tracing::warn!("Concurrent authorization for {} lost the race", identity_key);
            return Err(BallotError::AlreadyAuthorized(identity_key.to_string()));
        }

        let record = ActionRecord {
            identity_key: identity_key.to_string(),
            target_key: target_key.to_string(),
            timestamp: Utc::now(),
        };
        // Past this point the identity stays authorized even if a write fails,
        // which can undercount but never double count.
        if let Err(e) = self.actions.append(&record) {
            tracing::error!("Action for {} -> {} not recorded: {}", identity_key, target_key, e);
            return Err(e);
        }
        let count = match self.targets.increment_counter(target_key) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Counter for {} not incremented: {}", target_key, e);
                return Err(e);
            }
        };

        tracing::info!(
            "Authorized {} for target {} (target count now {})",
            identity_key,
            target_key,
            count
        );
        Ok(record)
    }

    /// Administrative reset back to `Unauthorized` for every identity.
    /// Existing action records and counters are left alone.
    pub fn reset_all(&self) -> Result<usize> {
        let cleared = self.identities.reset_authorizations()?;
        tracing::warn!("Reset authorization flag on {} identities", cleared);
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Identity, MemoryStore, Target, STORAGE_VERSION};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_identity(&Identity {
                version: STORAGE_VERSION,
                key: "111".into(),
                name: "Ana".into(),
                contact: "555-0100".into(),
                face_image: Vec::new(),
                action_taken: false,
                created_at: now,
                consent: true,
                consent_at: Some(now),
            })
            .unwrap();
        for key in ["stand-1", "stand-2"] {
            store
                .insert_target(&Target {
                    version: STORAGE_VERSION,
                    key: key.into(),
                    group_label: "3A".into(),
                    sub_label: "Robotics".into(),
                    image: Vec::new(),
                    action_count: 0,
                    created_at: now,
                })
                .unwrap();
        }
        store
    }

    fn count(store: &MemoryStore, key: &str) -> u64 {
        store.find_target(key).unwrap().unwrap().action_count
    }

    #[test]
    fn second_authorization_is_refused() {
        let store = seeded_store();
        let ledger = AuthorizationLedger::new(&store, &store, &store);

        let record = ledger.authorize("111", "stand-1").unwrap();
        assert_eq!(record.target_key, "stand-1");
        assert_eq!(ledger.state("111").unwrap(), AuthorizationState::Authorized);
        assert_eq!(count(&store, "stand-1"), 1);

        let err = ledger.authorize("111", "stand-2").unwrap_err();
        assert!(matches!(err, BallotError::AlreadyAuthorized(_)));
        assert_eq!(count(&store, "stand-1"), 1);
        assert_eq!(count(&store, "stand-2"), 0);
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn unknown_target_changes_nothing() {
        let store = seeded_store();
        let ledger = AuthorizationLedger::new(&store, &store, &store);

        let err = ledger.authorize("111", "stand-9").unwrap_err();
        assert!(matches!(err, BallotError::TargetNotFound(_)));
        assert_eq!(ledger.state("111").unwrap(), AuthorizationState::Unauthorized);
        assert_eq!(count(&store, "stand-1"), 0);
        assert_eq!(count(&store, "stand-2"), 0);
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn unknown_identity_is_reported() {
        let store = seeded_store();
        let ledger = AuthorizationLedger::new(&store, &store, &store);
        assert!(matches!(
            ledger.authorize("999", "stand-1"),
            Err(BallotError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn concurrent_authorizations_succeed_once() {
        let store = seeded_store();
        let ledger = AuthorizationLedger::new(&store, &store, &store);
        const CALLS: usize = 16;

        let results: Vec<Result<ActionRecord>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLS)
                .map(|i| {
                    let ledger = &ledger;
                    let target = if i % 2 == 0 { "stand-1" } else { "stand-2" };
                    scope.spawn(move || ledger.authorize("111", target))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(BallotError::AlreadyAuthorized(_))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(refused, CALLS - 1);
        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(count(&store, "stand-1") + count(&store, "stand-2"), 1);
    }

    #[test]
    fn reset_reopens_identities() {
        let store = seeded_store();
        let ledger = AuthorizationLedger::new(&store, &store, &store);
        ledger.authorize("111", "stand-1").unwrap();

        assert_eq!(ledger.reset_all().unwrap(), 1);
        assert_eq!(ledger.state("111").unwrap(), AuthorizationState::Unauthorized);
    }
}
