//! Request-level operations: everything a front end needs, built from the
//! presence gate, the identification engine and the authorization ledger.

use crate::common::{BallotError, Config, Result};
use crate::core::capability::FaceCapability;
use crate::core::cascade::RegionDetector;
use crate::core::engine::IdentificationEngine;
use crate::core::gate::{PresenceGate, PresenceVerdict};
use crate::core::ledger::AuthorizationLedger;
use crate::storage::{
    validate_key, ActionLog, ActionRecord, Identity, IdentityStore, Target, TargetDetails,
    TargetStore, STORAGE_VERSION,
};
use chrono::{Timelike, Utc};
use image::DynamicImage;
use serde::Serialize;

/// Borrowed handles to the three stores.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub identities: &'a dyn IdentityStore,
    pub targets: &'a dyn TargetStore,
    pub actions: &'a dyn ActionLog,
}

impl<'a> Stores<'a> {
    pub fn from_store<S: IdentityStore + TargetStore + ActionLog>(store: &'a S) -> Self {
        Self { identities: store, targets: store, actions: store }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifiedPerson {
    pub key: String,
    pub name: String,
    pub contact: String,
    pub action_taken: bool,
}

impl From<&Identity> for IdentifiedPerson {
    fn from(identity: &Identity) -> Self {
        Self {
            key: identity.key.clone(),
            name: identity.name.clone(),
            contact: identity.contact.clone(),
            action_taken: identity.action_taken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentifiedPerson>,
}

#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub key: String,
    pub name: String,
    pub contact: String,
    pub face_image: Vec<u8>,
    pub consent: bool,
}

#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub key: String,
    pub group_label: String,
    pub sub_label: String,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetTally {
    pub key: String,
    pub group_label: String,
    pub sub_label: String,
    pub action_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Results {
    pub total_actions: u64,
    pub targets: Vec<TargetTally>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyActions {
    /// Hour of day, UTC.
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub total_identities: usize,
    pub total_actions: u64,
    pub peak_hour: Option<HourlyActions>,
    /// Busiest hour first; hours without actions are left out.
    pub actions_per_hour: Vec<HourlyActions>,
    pub top_targets: Vec<TargetTally>,
}

const REPORT_TOP_TARGETS: usize = 5;

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| BallotError::InvalidImage(e.to_string()))
}

pub struct BallotService<'a, C: FaceCapability + Sync + ?Sized> {
    gate: PresenceGate<'a, C>,
    engine: IdentificationEngine<'a, C>,
    ledger: AuthorizationLedger<'a>,
    stores: Stores<'a>,
}

impl<'a, C: FaceCapability + Sync + ?Sized> BallotService<'a, C> {
    pub fn new(
        config: &Config,
        capability: &'a C,
        primary: &'a dyn RegionDetector,
        stores: Stores<'a>,
    ) -> Result<Self> {
        Ok(Self {
            gate: PresenceGate::new(primary, capability, config.fallback.clone()),
            engine: IdentificationEngine::new(capability, &config.policy, &config.recognizer.model_name)?,
            ledger: AuthorizationLedger::new(stores.identities, stores.targets, stores.actions),
            stores,
        })
    }

    pub fn check_face(&self, image: &[u8]) -> Result<PresenceVerdict> {
        Ok(self.gate.inspect(&decode(image)?))
    }

    /// Gate, then a full scan of the enrolled population.
    pub fn identify(&self, probe: &[u8]) -> Result<Identification> {
        let probe = decode(probe)?;
        if !self.gate.has_face(&probe) {
            return Err(BallotError::NoFaceDetected);
        }

        let identities = self.stores.identities.list_identities()?;
        let result = self.engine.identify_parallel(&probe, &identities);

        Ok(match result.accepted() {
            Some(identity) => Identification {
                found: true,
                identity: Some(IdentifiedPerson::from(identity)),
            },
            None => Identification { found: false, identity: None },
        })
    }

    pub fn authorize(&self, identity_key: &str, target_key: &str) -> Result<ActionRecord> {
        self.ledger.authorize(identity_key, target_key)
    }

    /// Identify the probe and spend the matched identity's action on `target_key`.
    pub fn cast(&self, probe: &[u8], target_key: &str) -> Result<(IdentifiedPerson, ActionRecord)> {
        let person = self.identify(probe)?.identity.ok_or(BallotError::NoMatchFound)?;
        let record = self.ledger.authorize(&person.key, target_key)?;
        Ok((person, record))
    }
}

/// Administrative operations that only touch the stores.
pub struct Registry<'a> {
    stores: Stores<'a>,
}

impl<'a> Registry<'a> {
    pub fn new(stores: Stores<'a>) -> Self {
        Self { stores }
    }

    pub fn enroll(&self, request: EnrollmentRequest) -> Result<Identity> {
        if !request.consent {
            return Err(BallotError::ConsentRequired);
        }
        validate_key(&request.key)?;
        if request.name.trim().is_empty() {
            return Err(BallotError::InvalidKey {
                key: request.key,
                message: "name must not be empty".into(),
            });
        }
        decode(&request.face_image)?;

        let now = Utc::now();
        let identity = Identity {
            version: STORAGE_VERSION,
            key: request.key,
            name: request.name,
            contact: request.contact,
            face_image: request.face_image,
            action_taken: false,
            created_at: now,
            consent: true,
            consent_at: Some(now),
        };

        if !self.stores.identities.insert_identity(&identity)? {
            return Err(BallotError::DuplicateIdentity(identity.key));
        }
        tracing::info!("Enrolled identity {} ({})", identity.key, identity.name);
        Ok(identity)
    }

    pub fn add_target(&self, request: TargetRequest) -> Result<Target> {
        validate_key(&request.key)?;
        if !request.image.is_empty() {
            decode(&request.image)?;
        }

        let target = Target {
            version: STORAGE_VERSION,
            key: request.key,
            group_label: request.group_label,
            sub_label: request.sub_label,
            image: request.image,
            action_count: 0,
            created_at: Utc::now(),
        };

        if !self.stores.targets.insert_target(&target)? {
            return Err(BallotError::DuplicateTarget(target.key));
        }
        tracing::info!("Created target {} ({} / {})", target.key, target.group_label, target.sub_label);
        Ok(target)
    }

    pub fn targets(&self) -> Result<Vec<Target>> {
        self.stores.targets.list_targets()
    }

    /// Replaces labels and image; the target's count is untouched.
    pub fn update_target(&self, key: &str, details: TargetDetails) -> Result<Target> {
        if !details.image.is_empty() {
            decode(&details.image)?;
        }
        let target = self
            .stores
            .targets
            .update_target(key, &details)?
            .ok_or_else(|| BallotError::TargetNotFound(key.to_string()))?;
        tracing::info!("Updated target {} ({} / {})", target.key, target.group_label, target.sub_label);
        Ok(target)
    }

    /// Removes a target. Action records that reference it are kept.
    pub fn delete_target(&self, key: &str) -> Result<()> {
        if !self.stores.targets.remove_target(key)? {
            return Err(BallotError::TargetNotFound(key.to_string()));
        }
        tracing::warn!("Deleted target {}", key);
        Ok(())
    }

    /// Targets by descending count; equal counts keep creation order.
    pub fn results(&self) -> Result<Results> {
        let mut targets: Vec<TargetTally> = self
            .stores
            .targets
            .list_targets()?
            .into_iter()
            .map(|t| TargetTally {
                key: t.key,
                group_label: t.group_label,
                sub_label: t.sub_label,
                action_count: t.action_count,
            })
            .collect();
        targets.sort_by(|a, b| b.action_count.cmp(&a.action_count));

        Ok(Results {
            total_actions: targets.iter().map(|t| t.action_count).sum(),
            targets,
        })
    }

    /// Enrollment and activity summary built from the action log.
    pub fn report(&self) -> Result<Report> {
        let total_identities = self.stores.identities.list_identities()?.len();
        let records = self.stores.actions.records()?;

        let mut per_hour = [0u64; 24];
        for record in &records {
            per_hour[record.timestamp.hour() as usize] += 1;
        }
        let mut actions_per_hour: Vec<HourlyActions> = (0u32..)
            .zip(per_hour)
            .filter(|(_, count)| *count > 0)
            .map(|(hour, count)| HourlyActions { hour, count })
            .collect();
        actions_per_hour.sort_by(|a, b| b.count.cmp(&a.count));

        let mut top_targets = self.results()?.targets;
        top_targets.truncate(REPORT_TOP_TARGETS);

        Ok(Report {
            total_identities,
            total_actions: records.len() as u64,
            peak_hour: actions_per_hour.first().copied(),
            actions_per_hour,
            top_targets,
        })
    }

    pub fn reset(&self) -> Result<usize> {
        AuthorizationLedger::new(self.stores.identities, self.stores.targets, self.stores.actions)
            .reset_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn target(registry: &Registry<'_>, key: &str) {
        registry
            .add_target(TargetRequest {
                key: key.into(),
                group_label: "3A".into(),
                sub_label: format!("Project {key}"),
                image: Vec::new(),
            })
            .unwrap();
    }

    fn action(store: &MemoryStore, identity: &str, target: &str, hour: u32, minute: u32) {
        store
            .append(&ActionRecord {
                identity_key: identity.into(),
                target_key: target.into(),
                timestamp: Utc.with_ymd_and_hms(2024, 9, 14, hour, minute, 0).unwrap(),
            })
            .unwrap();
        store.increment_counter(target).unwrap();
    }

    #[test]
    fn duplicate_target_key_is_reported_as_such() {
        let store = MemoryStore::new();
        let registry = Registry::new(Stores::from_store(&store));
        target(&registry, "stand-1");

        let err = registry
            .add_target(TargetRequest {
                key: "stand-1".into(),
                group_label: "3B".into(),
                sub_label: "Other".into(),
                image: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, BallotError::DuplicateTarget(key) if key == "stand-1"));
    }

    #[test]
    fn update_and_delete_target() {
        let store = MemoryStore::new();
        let registry = Registry::new(Stores::from_store(&store));
        target(&registry, "stand-1");
        action(&store, "111", "stand-1", 9, 0);

        let details = TargetDetails {
            group_label: "3C".into(),
            sub_label: "Water filter".into(),
            image: Vec::new(),
        };
        let updated = registry.update_target("stand-1", details.clone()).unwrap();
        assert_eq!(updated.group_label, "3C");
        assert_eq!(updated.action_count, 1);
        assert!(matches!(
            registry.update_target("ghost", details.clone()),
            Err(BallotError::TargetNotFound(_))
        ));
        let bad_image = TargetDetails { image: b"nope".to_vec(), ..details };
        assert!(matches!(
            registry.update_target("stand-1", bad_image),
            Err(BallotError::InvalidImage(_))
        ));

        registry.delete_target("stand-1").unwrap();
        assert!(registry.targets().unwrap().is_empty());
        assert!(matches!(registry.delete_target("stand-1"), Err(BallotError::TargetNotFound(_))));
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn report_summarises_activity() {
        let store = MemoryStore::new();
        let registry = Registry::new(Stores::from_store(&store));
        for key in ["t1", "t2", "t3", "t4", "t5", "t6"] {
            target(&registry, key);
        }
        action(&store, "a", "t2", 10, 5);
        action(&store, "b", "t2", 10, 40);
        action(&store, "c", "t6", 14, 0);
        action(&store, "d", "t2", 9, 59);
        action(&store, "e", "t6", 10, 59);

        let report = registry.report().unwrap();
        assert_eq!(report.total_identities, 0);
        assert_eq!(report.total_actions, 5);
        assert_eq!(report.peak_hour, Some(HourlyActions { hour: 10, count: 3 }));
        assert_eq!(report.actions_per_hour.len(), 3);
        assert_eq!(report.actions_per_hour.iter().map(|h| h.count).sum::<u64>(), 5);

        let top: Vec<(&str, u64)> = report
            .top_targets
            .iter()
            .map(|t| (t.key.as_str(), t.action_count))
            .collect();
        assert_eq!(top, vec![("t2", 3), ("t6", 2), ("t1", 0), ("t3", 0), ("t4", 0)]);
    }

    #[test]
    fn empty_report_has_no_peak() {
        let store = MemoryStore::new();
        let report = Registry::new(Stores::from_store(&store)).report().unwrap();
        assert_eq!(report.total_actions, 0);
        assert!(report.peak_hour.is_none());
        assert!(report.actions_per_hour.is_empty());
        assert!(report.top_targets.is_empty());
    }
}
