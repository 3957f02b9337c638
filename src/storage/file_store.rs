use crate::common::{BallotError, Result};
use crate::storage::records::{validate_key, ActionRecord, Identity, Target, TargetDetails};
use crate::storage::store::{ActionLog, IdentityStore, TargetStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const ACTION_LOG_FILE: &str = "actions.jsonl";

fn storage_err(context: &str, path: &Path, err: impl std::fmt::Display) -> BallotError {
    BallotError::StorageUnavailable(format!("{} {}: {}", context, path.display(), err))
}

/// On-disk store: one bincode file per identity and per target, plus a
/// JSON-lines action log. Every mutation runs under one writer lock, which
/// is what makes `mark_authorized` a real compare-and-set within a process.
pub struct FileStore {
    identities_dir: PathBuf,
    targets_dir: PathBuf,
    action_log: PathBuf,
    writer: Mutex<()>,
}

impl FileStore {
    pub fn open(root: &Path) -> Result<Self> {
        let identities_dir = root.join("identities");
        let targets_dir = root.join("targets");
        for dir in [&identities_dir, &targets_dir] {
            fs::create_dir_all(dir).map_err(|e| storage_err("failed to create", dir, e))?;
        }
        tracing::debug!("FileStore opened at {:?}", root);

        Ok(Self {
            identities_dir,
            targets_dir,
            action_log: root.join(ACTION_LOG_FILE),
            writer: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| BallotError::StorageUnavailable("file store lock poisoned".into()))
    }

    fn identity_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.identities_dir.join(format!("{}.bincode", key)))
    }

    fn target_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.targets_dir.join(format!("{}.bincode", key)))
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).map_err(|e| storage_err("failed to read", path, e))?;
    let record = bincode::deserialize(&data)
        .map_err(|e| storage_err("failed to deserialize", path, e))?;
    Ok(Some(record))
}

/// Write-then-rename so readers never observe a torn record.
fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let encoded =
        bincode::serialize(record).map_err(|e| storage_err("failed to serialize", path, e))?;
    let tmp = path.with_extension("bincode.tmp");
    fs::write(&tmp, encoded).map_err(|e| storage_err("failed to write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| storage_err("failed to replace", path, e))?;
    Ok(())
}

fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let entries = fs::read_dir(dir).map_err(|e| storage_err("failed to list", dir, e))?;
    let mut records = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| storage_err("failed to list", dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bincode") {
            continue;
        }
        if let Some(record) = read_record(&path)? {
            records.push(record);
        }
    }
    Ok(records)
}

impl IdentityStore for FileStore {
    fn list_identities(&self) -> Result<Vec<Identity>> {
        let mut identities: Vec<Identity> = read_all(&self.identities_dir)?;
        identities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        Ok(identities)
    }

    fn find_identity(&self, key: &str) -> Result<Option<Identity>> {
        read_record(&self.identity_path(key)?)
    }

    fn insert_identity(&self, identity: &Identity) -> Result<bool> {
        let path = self.identity_path(&identity.key)?;
        let _guard = self.lock()?;
        if path.exists() {
            return Ok(false);
        }
        write_record(&path, identity)?;
        Ok(true)
    }

    fn mark_authorized(&self, key: &str) -> Result<bool> {
        let path = self.identity_path(key)?;
        let _guard = self.lock()?;
        let mut identity: Identity = read_record(&path)?
            .ok_or_else(|| BallotError::IdentityNotFound(key.to_string()))?;
        if identity.action_taken {
            return Ok(false);
        }
        identity.action_taken = true;
        write_record(&path, &identity)?;
        Ok(true)
    }

    fn reset_authorizations(&self) -> Result<usize> {
        let _guard = self.lock()?;
        let mut cleared = 0;
        for mut identity in read_all::<Identity>(&self.identities_dir)? {
            if identity.action_taken {
                identity.action_taken = false;
                write_record(&self.identity_path(&identity.key)?, &identity)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

impl TargetStore for FileStore {
    fn list_targets(&self) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = read_all(&self.targets_dir)?;
        targets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        Ok(targets)
    }

    fn find_target(&self, key: &str) -> Result<Option<Target>> {
        read_record(&self.target_path(key)?)
    }

    fn insert_target(&self, target: &Target) -> Result<bool> {
        let path = self.target_path(&target.key)?;
        let _guard = self.lock()?;
        if path.exists() {
            return Ok(false);
        }
        write_record(&path, target)?;
        Ok(true)
    }

    fn update_target(&self, key: &str, details: &TargetDetails) -> Result<Option<Target>> {
        let path = self.target_path(key)?;
        let _guard = self.lock()?;
        let Some(mut target) = read_record::<Target>(&path)? else {
            return Ok(None);
        };
        target.apply(details);
        write_record(&path, &target)?;
        Ok(Some(target))
    }

    fn remove_target(&self, key: &str) -> Result<bool> {
        let path = self.target_path(key)?;
        let _guard = self.lock()?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err("failed to remove", &path, e)),
        }
    }

    fn increment_counter(&self, key: &str) -> Result<u64> {
        let path = self.target_path(key)?;
        let _guard = self.lock()?;
        let mut target: Target =
            read_record(&path)?.ok_or_else(|| BallotError::TargetNotFound(key.to_string()))?;
        target.action_count += 1;
        write_record(&path, &target)?;
        Ok(target.action_count)
    }
}

impl ActionLog for FileStore {
    fn append(&self, record: &ActionRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| storage_err("failed to encode action for", &self.action_log, e))?;
        let _guard = self.lock()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.action_log)
            .map_err(|e| storage_err("failed to open", &self.action_log, e))?;
        writeln!(file, "{}", line).map_err(|e| storage_err("failed to append to", &self.action_log, e))?;
        Ok(())
    }

    fn records(&self) -> Result<Vec<ActionRecord>> {
        if !self.action_log.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.action_log)
            .map_err(|e| storage_err("failed to open", &self.action_log, e))?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| storage_err("failed to read", &self.action_log, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| storage_err("corrupt action in", &self.action_log, e))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::STORAGE_VERSION;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn identity(key: &str, offset_secs: i64) -> Identity {
        let created_at = Utc::now() + Duration::seconds(offset_secs);
        Identity {
            version: STORAGE_VERSION,
            key: key.into(),
            name: format!("Person {key}"),
            contact: "555-0100".into(),
            face_image: vec![1, 2, 3],
            action_taken: false,
            created_at,
            consent: true,
            consent_at: Some(created_at),
        }
    }

    #[test]
    fn insert_is_refused_for_existing_key() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(store.insert_identity(&identity("111", 0)).unwrap());
        assert!(!store.insert_identity(&identity("111", 5)).unwrap());
        assert_eq!(store.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn identities_list_in_enrollment_order() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.insert_identity(&identity("zzz", 0)).unwrap();
        store.insert_identity(&identity("aaa", 10)).unwrap();
        let keys: Vec<String> = store.list_identities().unwrap().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["zzz", "aaa"]);
    }

    #[test]
    fn mark_authorized_flips_once_and_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(tmp.path()).unwrap();
            store.insert_identity(&identity("111", 0)).unwrap();
            assert!(store.mark_authorized("111").unwrap());
            assert!(!store.mark_authorized("111").unwrap());
        }
        let reopened = FileStore::open(tmp.path()).unwrap();
        assert!(reopened.find_identity("111").unwrap().unwrap().action_taken);
        assert_eq!(reopened.reset_authorizations().unwrap(), 1);
        assert!(!reopened.find_identity("111").unwrap().unwrap().action_taken);
    }

    #[test]
    fn mark_authorized_unknown_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(matches!(store.mark_authorized("nobody"), Err(BallotError::IdentityNotFound(_))));
    }

    #[test]
    fn action_log_appends_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        for target in ["t1", "t2"] {
            store
                .append(&ActionRecord {
                    identity_key: "111".into(),
                    target_key: target.into(),
                    timestamp: Utc::now(),
                })
                .unwrap();
        }
        let targets: Vec<String> = store.records().unwrap().into_iter().map(|r| r.target_key).collect();
        assert_eq!(targets, vec!["t1", "t2"]);
    }

    fn target(key: &str) -> Target {
        Target {
            version: STORAGE_VERSION,
            key: key.into(),
            group_label: "3A".into(),
            sub_label: "Robotics".into(),
            image: Vec::new(),
            action_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn records_read_back_exactly_as_written() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        let old = Identity { version: 0, ..identity("111", 0) };
        store.insert_identity(&old).unwrap();

        assert_eq!(store.find_identity("111").unwrap(), Some(old.clone()));
        assert_eq!(store.list_identities().unwrap(), vec![old]);
    }

    #[test]
    fn update_keeps_counter_and_remove_deletes() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        store.insert_target(&target("stand-1")).unwrap();
        store.increment_counter("stand-1").unwrap();

        let details = TargetDetails {
            group_label: "3B".into(),
            sub_label: "Solar car".into(),
            image: vec![9],
        };
        let updated = store.update_target("stand-1", &details).unwrap().unwrap();
        assert_eq!(updated.sub_label, "Solar car");
        assert_eq!(updated.action_count, 1);
        assert_eq!(store.find_target("stand-1").unwrap(), Some(updated));
        assert!(store.update_target("ghost", &details).unwrap().is_none());

        assert!(store.remove_target("stand-1").unwrap());
        assert!(!store.remove_target("stand-1").unwrap());
        assert!(store.find_target("stand-1").unwrap().is_none());
    }

    #[test]
    fn increment_counter_requires_target() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).unwrap();
        assert!(matches!(store.increment_counter("ghost"), Err(BallotError::TargetNotFound(_))));
    }
}
