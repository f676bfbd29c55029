//! Persisted state: the last-applied snapshot of every resource
//!
//! The store is single-writer. An apply run holds a [`StateLock`] for its
//! whole duration; the lock is released when the guard drops, so every
//! exit path (including errors and panics) releases it.

use crate::error::{Error, Result};
use crate::types::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Current on-disk format version
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// State Structures
// ============================================================================

/// Everything known about resources after the last apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Format version
    pub version: u32,
    /// Incremented on every successful save by an apply run
    #[serde(default)]
    pub serial: u64,
    /// Time of the last apply run
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Snapshots keyed by fully-qualified address
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSnapshot>,
}

/// Last-applied record of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Resource type
    pub resource_type: String,
    /// Declared attributes as planned (references unresolved)
    #[serde(default)]
    pub config: Attributes,
    /// Resolved and provider-computed attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Addresses this resource depended on when applied
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Artifact fingerprints the resource was applied with
    #[serde(default)]
    pub artifact_fingerprints: BTreeMap<String, String>,
    /// Set when an update failed part-way; forces replacement
    #[serde(default)]
    pub tainted: bool,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            last_updated: None,
            resources: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    /// Get a resource snapshot by address
    pub fn get(&self, address: &str) -> Option<&ResourceSnapshot> {
        self.resources.get(address)
    }

    /// Insert or replace a resource snapshot
    pub fn insert(&mut self, address: impl Into<String>, snapshot: ResourceSnapshot) {
        self.resources.insert(address.into(), snapshot);
    }

    /// Remove a resource snapshot
    pub fn remove(&mut self, address: &str) -> Option<ResourceSnapshot> {
        self.resources.remove(address)
    }

    /// Mark a resource as tainted, if present
    pub fn taint(&mut self, address: &str) {
        if let Some(snapshot) = self.resources.get_mut(address) {
            snapshot.tainted = true;
        }
    }

    /// Number of tracked resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resources are tracked
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

// ============================================================================
// Store Contract
// ============================================================================

/// Guard for exclusive access to a state store
pub struct StateLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StateLock {
    /// Create a guard that runs `release` when dropped
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Persistence of state snapshots
pub trait StateStore: Send + Sync {
    /// Load the last saved snapshot (empty if none)
    fn load(&self) -> Result<StateSnapshot>;

    /// Persist a snapshot
    fn save(&self, state: &StateSnapshot) -> Result<()>;

    /// Acquire exclusive write access for a run
    fn lock(&self) -> Result<StateLock>;
}

// ============================================================================
// File Store
// ============================================================================

/// JSON state file with a sibling `.lock` file
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store for the given state file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file path
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    /// Backup of the previous state
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "backup")
    }

    /// Remove a stale lock left behind by a killed process
    pub fn force_unlock(&self) -> Result<bool> {
        let lock = self.lock_path();
        match fs::remove_file(&lock) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::state_store(lock, e)),
        }
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateSnapshot> {
        if !self.path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(StateSnapshot::default());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| Error::state_store(&self.path, e))?;
        let state: StateSnapshot =
            serde_json::from_str(&content).map_err(|e| Error::state_store(&self.path, e))?;

        if state.version > STATE_VERSION {
            return Err(Error::state_store(
                &self.path,
                format!(
                    "state format version {} is newer than supported version {}",
                    state.version, STATE_VERSION
                ),
            ));
        }

        log::debug!(
            "Loaded state from {} ({} resources, serial {})",
            self.path.display(),
            state.len(),
            state.serial
        );
        Ok(state)
    }

    fn save(&self, state: &StateSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| Error::state_store(dir, e))?;
        }

        let content =
            serde_json::to_string_pretty(state).map_err(|e| Error::state_store(&self.path, e))?;

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())
                .map_err(|e| Error::state_store(self.backup_path(), e))?;
        }

        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, content + "\n").map_err(|e| Error::state_store(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::state_store(&self.path, e))?;

        log::debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> Result<StateLock> {
        let lock_path = self.lock_path();
        if let Some(dir) = lock_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| Error::state_store(dir, e))?;
        }

        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&lock_path).unwrap_or_default();
                return Err(Error::StateLocked {
                    path: lock_path,
                    holder: holder.trim().to_string(),
                });
            }
            Err(e) => return Err(Error::state_store(lock_path, e)),
        };

        hold_lock(lock_path, file)
    }
}

/// Guard a freshly created lock file, then record the holder in it.
///
/// The guard exists before the write, so a failed write removes the file.
fn hold_lock(lock_path: PathBuf, mut file: impl Write) -> Result<StateLock> {
    let guard_path = lock_path.clone();
    let guard = StateLock::new(move || {
        if let Err(e) = fs::remove_file(&guard_path) {
            log::warn!("Failed to release state lock {}: {}", guard_path.display(), e);
        } else {
            log::debug!("Released state lock {}", guard_path.display());
        }
    });

    let holder = format!("pid {} since {}", std::process::id(), Utc::now().to_rfc3339());
    file.write_all(holder.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| Error::state_store(&lock_path, e))?;
    log::debug!("Acquired state lock {}", lock_path.display());
    Ok(guard)
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store for tests and embedding
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<StateSnapshot>,
    locked: Arc<AtomicBool>,
}

impl MemoryStateStore {
    /// Create a store holding an initial snapshot
    pub fn new(state: StateSnapshot) -> Self {
        Self {
            state: Mutex::new(state),
            locked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateSnapshot> {
        match self.state.lock() {
            Ok(guard) => Ok(guard.clone()),
            Err(poisoned) => Ok(poisoned.into_inner().clone()),
        }
    }

    fn save(&self, state: &StateSnapshot) -> Result<()> {
        match self.state.lock() {
            Ok(mut guard) => *guard = state.clone(),
            Err(poisoned) => *poisoned.into_inner() = state.clone(),
        }
        Ok(())
    }

    fn lock(&self) -> Result<StateLock> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::StateLocked {
                path: PathBuf::from("<memory>"),
                holder: "another run".to_string(),
            });
        }
        let locked = Arc::clone(&self.locked);
        Ok(StateLock::new(move || locked.store(false, Ordering::SeqCst)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> StateSnapshot {
        let mut state = StateSnapshot {
            serial: 3,
            last_updated: Some(Utc::now()),
            ..Default::default()
        };
        state.insert(
            "module.level1.module.level2.aws_lambda_function.this",
            ResourceSnapshot {
                resource_type: "aws_lambda_function".into(),
                config: [("runtime".to_string(), json!("python3.12"))].into(),
                attributes: [
                    ("runtime".to_string(), json!("python3.12")),
                    ("arn".to_string(), json!("arn:aws:lambda:us-east-1:0:function:this")),
                ]
                .into(),
                dependencies: vec!["aws_iam_role.lambda_exec".into()],
                artifact_fingerprints: [("lambda_zip".to_string(), "abc".to_string())].into(),
                tainted: false,
            },
        );
        state
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        let state = store.load().unwrap();
        assert!(state.is_empty());
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state.json"));
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);

        // save(load()) leaves the content unchanged
        let before = fs::read_to_string(store.path()).unwrap();
        store.save(&loaded).unwrap();
        let after = fs::read_to_string(store.path()).unwrap();
        assert_eq!(before, after);
        assert!(store.backup_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::StateStore { .. }));
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99}"#).unwrap();
        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_file_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        let guard = store.lock().unwrap();
        assert!(store.lock_path().exists());
        let err = store.lock().err().unwrap();
        assert!(matches!(err, Error::StateLocked { .. }));

        drop(guard);
        assert!(!store.lock_path().exists());
        assert!(store.lock().is_ok());
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_holder_write_removes_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("stackform.state.json"));
        fs::write(store.lock_path(), "").unwrap();

        let err = hold_lock(store.lock_path(), BrokenWriter).err().unwrap();
        assert!(matches!(err, Error::StateStore { .. }));
        assert!(!store.lock_path().exists());
        // The next run can lock again
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_force_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        let guard = store.lock().unwrap();
        std::mem::forget(guard);

        assert!(store.force_unlock().unwrap());
        assert!(!store.force_unlock().unwrap());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::default();
        let state = sample_state();
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);

        let guard = store.lock().unwrap();
        assert!(store.is_locked());
        assert!(store.lock().is_err());
        drop(guard);
        assert!(!store.is_locked());
    }

    #[test]
    fn test_taint() {
        let mut state = sample_state();
        let address = "module.level1.module.level2.aws_lambda_function.this";
        state.taint(address);
        assert!(state.get(address).unwrap().tainted);
        state.taint("missing.resource");
    }
}
