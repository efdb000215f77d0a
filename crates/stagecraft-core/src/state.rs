//! Deployment state and persisted run records.
//!
//! [`DeploymentState`] is the explicit, mutable progress object a run
//! threads through every stage executor (no module-level globals); it is
//! persisted as JSON after every completed stage so a killed process resumes
//! at the last incomplete stage. [`DeploymentRecord`] is the immutable audit
//! record finalized at the end of every run, successful or not, and stored
//! by [`RecordStore`] as a bounded history plus a "latest" pointer file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Digest;
use crate::predictor::{ComponentId, Identity, Salt};

/// Ordered deployment pipeline stages.
///
/// Stages execute in declaration order; a later stage never observes an
/// unfinished earlier stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Create the storage units.
    DeployStorage,
    /// Create the logic implementations.
    DeployLogicImpls,
    /// Create the proxy-administration front.
    DeployProxyFront,
    /// Create one proxy per logic component.
    DeployProxies,
    /// Bind logic to storage and configure authorized callers.
    WireStorage,
    /// Grant capability roles.
    SetupRoles,
    /// Re-check addresses, existence, and wiring readbacks.
    Verify,
}

impl StageId {
    /// Every stage, in execution order.
    pub const ALL: [Self; 7] = [
        Self::DeployStorage,
        Self::DeployLogicImpls,
        Self::DeployProxyFront,
        Self::DeployProxies,
        Self::WireStorage,
        Self::SetupRoles,
        Self::Verify,
    ];

    /// The stage after this one, or `None` after [`StageId::Verify`].
    #[must_use]
    pub fn next(self) -> Option<Self> {
        let position = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(position + 1).copied()
    }

    /// Stable string form used in logs and file output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeployStorage => "deploy_storage",
            Self::DeployLogicImpls => "deploy_logic_impls",
            Self::DeployProxyFront => "deploy_proxy_front",
            Self::DeployProxies => "deploy_proxies",
            Self::WireStorage => "wire_storage",
            Self::SetupRoles => "setup_roles",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement bookkeeping for one component across a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Human-readable component name.
    pub name: String,

    /// Placement salt.
    pub salt: Salt,

    /// Hash of the creation payload.
    pub payload_hash: Digest,

    /// Predicted placement identifier.
    pub predicted: ComponentId,

    /// Actual identifier after creation. Once set it never changes, and it
    /// must equal `predicted`.
    pub actual: Option<ComponentId>,

    /// Stage that created the component.
    pub stage: StageId,
}

impl ComponentDescriptor {
    /// Returns the created identifier, if creation has happened.
    #[must_use]
    pub const fn address(&self) -> Option<ComponentId> {
        self.actual
    }
}

/// Errors from state persistence and descriptor invariants.
#[derive(Debug, Error)]
pub enum StateError {
    /// I/O failure reading or writing a state or record file.
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A descriptor's actual identifier was set twice with different values.
    #[error("descriptor '{name}' address already set to {existing}, refusing {offered}")]
    AddressAlreadySet {
        /// Component name.
        name: String,
        /// Previously recorded address.
        existing: ComponentId,
        /// The conflicting new address.
        offered: ComponentId,
    },
}

/// Mutable progress of one deployment, owned by the orchestrating run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Identity driving the deployment.
    pub deployer: Identity,

    /// Stages that have fully completed.
    pub completed: BTreeSet<StageId>,

    /// Storage unit descriptors by name.
    pub storage: BTreeMap<String, ComponentDescriptor>,

    /// Logic implementation descriptors by name.
    pub implementations: BTreeMap<String, ComponentDescriptor>,

    /// Proxy descriptors by name (the front included, under its own name).
    pub proxies: BTreeMap<String, ComponentDescriptor>,
}

impl DeploymentState {
    /// Creates an empty state for a deployer.
    #[must_use]
    pub fn new(deployer: Identity) -> Self {
        Self {
            deployer,
            completed: BTreeSet::new(),
            storage: BTreeMap::new(),
            implementations: BTreeMap::new(),
            proxies: BTreeMap::new(),
        }
    }

    /// The first incomplete stage, or `None` once every stage is complete.
    #[must_use]
    pub fn current_stage(&self) -> Option<StageId> {
        StageId::ALL
            .iter()
            .copied()
            .find(|stage| !self.completed.contains(stage))
    }

    /// Whether a stage has completed.
    #[must_use]
    pub fn is_complete(&self, stage: StageId) -> bool {
        self.completed.contains(&stage)
    }

    /// Whether the whole pipeline has completed.
    #[must_use]
    pub fn is_fully_complete(&self) -> bool {
        self.current_stage().is_none()
    }

    /// Marks a stage complete.
    pub fn mark_complete(&mut self, stage: StageId) {
        self.completed.insert(stage);
    }

    /// Records a created component into the given category map.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AddressAlreadySet`] if a descriptor for the
    /// same name already carries a different actual address. The actual
    /// address of a descriptor is write-once.
    pub fn record_component(
        category: &mut BTreeMap<String, ComponentDescriptor>,
        descriptor: ComponentDescriptor,
    ) -> Result<(), StateError> {
        if let Some(existing) = category.get(&descriptor.name) {
            if let (Some(old), Some(new)) = (existing.actual, descriptor.actual) {
                if old != new {
                    return Err(StateError::AddressAlreadySet {
                        name: descriptor.name,
                        existing: old,
                        offered: new,
                    });
                }
            }
        }
        category.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Looks up the created address of a storage unit.
    #[must_use]
    pub fn storage_address(&self, name: &str) -> Option<ComponentId> {
        self.storage.get(name).and_then(ComponentDescriptor::address)
    }

    /// Looks up the created address of a logic implementation.
    #[must_use]
    pub fn implementation_address(&self, name: &str) -> Option<ComponentId> {
        self.implementations
            .get(name)
            .and_then(ComponentDescriptor::address)
    }

    /// Looks up the created address of a proxy (or the front).
    #[must_use]
    pub fn proxy_address(&self, name: &str) -> Option<ComponentId> {
        self.proxies.get(name).and_then(ComponentDescriptor::address)
    }

    /// Persists the state as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Json`] on failure.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads persisted state, or `None` if no state file exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Json`] on failure.
    pub fn load(path: &Path) -> Result<Option<Self>, StateError> {
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

/// Final disposition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Every stage completed.
    Success,
    /// Some stages completed before a failure.
    Partial,
    /// Nothing completed.
    Failed,
}

/// Immutable audit record of one run.
///
/// Written at the end of every run regardless of outcome. Once stored it is
/// never mutated, only superseded by a newer "latest" record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// RFC 3339 timestamp of finalization.
    pub timestamp: String,

    /// Identity that drove the run.
    pub deployer: Identity,

    /// Created storage units, name to address.
    pub storage: BTreeMap<String, ComponentId>,

    /// Created logic implementations, name to address.
    pub implementations: BTreeMap<String, ComponentId>,

    /// Created proxies (front included), name to address.
    pub proxies: BTreeMap<String, ComponentId>,

    /// Metered work, when the environment reports it. Serialized as
    /// `gasUsed` in record files.
    #[serde(rename = "gasUsed", skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,

    /// Final disposition.
    pub status: RecordStatus,

    /// Fatal errors and non-fatal warnings accumulated during the run.
    pub errors: Vec<String>,
}

impl DeploymentRecord {
    /// Builds a record from run state, stamped with the current time.
    #[must_use]
    pub fn from_state(
        state: &DeploymentState,
        status: RecordStatus,
        errors: Vec<String>,
        gas_used: Option<u64>,
    ) -> Self {
        let addresses = |category: &BTreeMap<String, ComponentDescriptor>| {
            category
                .iter()
                .filter_map(|(name, d)| d.address().map(|id| (name.clone(), id)))
                .collect()
        };

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            deployer: state.deployer.clone(),
            storage: addresses(&state.storage),
            implementations: addresses(&state.implementations),
            proxies: addresses(&state.proxies),
            gas_used,
            status,
            errors,
        }
    }
}

/// Maximum run records retained in the history file.
pub const MAX_RECORD_HISTORY: usize = 10;

/// File name of the bounded history.
const HISTORY_FILE: &str = "history.json";

/// File name of the latest-record pointer.
const LATEST_FILE: &str = "latest.json";

/// File-based store of deployment records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    /// Opens (and creates, if missing) a record store directory.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Appends a record, trimming the history to [`MAX_RECORD_HISTORY`]
    /// entries, and rewrites the latest pointer.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Json`] on failure.
    pub fn append(&self, record: &DeploymentRecord) -> Result<(), StateError> {
        let mut history = self.history()?;
        history.push(record.clone());
        if history.len() > MAX_RECORD_HISTORY {
            let excess = history.len() - MAX_RECORD_HISTORY;
            history.drain(..excess);
        }

        fs::write(
            self.dir.join(HISTORY_FILE),
            serde_json::to_string_pretty(&history)?,
        )?;
        fs::write(
            self.dir.join(LATEST_FILE),
            serde_json::to_string_pretty(record)?,
        )?;
        Ok(())
    }

    /// Returns all retained records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Json`] on failure.
    pub fn history(&self) -> Result<Vec<DeploymentRecord>, StateError> {
        let path = self.dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Returns the most recent record, if any run has ever finished.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Json`] on failure.
    pub fn latest(&self) -> Result<Option<DeploymentRecord>, StateError> {
        let path = self.dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::crypto::Digest;
    use crate::predictor::{SaltContext, predict, salt_for};

    fn descriptor(name: &str, stage: StageId, created: bool) -> ComponentDescriptor {
        let deployer = Identity::new("test-deployer");
        let salt = salt_for(name, &SaltContext::deployer_scoped(deployer.clone()));
        let payload_hash = Digest::of(name.as_bytes());
        let predicted = predict(&deployer, &salt, &payload_hash);
        ComponentDescriptor {
            name: name.to_string(),
            salt,
            payload_hash,
            predicted,
            actual: created.then_some(predicted),
            stage,
        }
    }

    #[test]
    fn test_stage_order_is_total() {
        let mut stage = StageId::DeployStorage;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            assert!(next > stage, "stages must be strictly ordered");
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, StageId::ALL);
    }

    #[test]
    fn test_current_stage_advances() {
        let mut state = DeploymentState::new(Identity::new("test-deployer"));
        assert_eq!(state.current_stage(), Some(StageId::DeployStorage));

        state.mark_complete(StageId::DeployStorage);
        assert_eq!(state.current_stage(), Some(StageId::DeployLogicImpls));

        for stage in StageId::ALL {
            state.mark_complete(stage);
        }
        assert_eq!(state.current_stage(), None);
        assert!(state.is_fully_complete());
    }

    #[test]
    fn test_record_component_write_once_address() {
        let mut state = DeploymentState::new(Identity::new("test-deployer"));
        let first = descriptor("node-store", StageId::DeployStorage, true);
        DeploymentState::record_component(&mut state.storage, first.clone()).unwrap();

        // Same address again is allowed (idempotent resume).
        DeploymentState::record_component(&mut state.storage, first).unwrap();

        let mut conflicting = descriptor("node-store", StageId::DeployStorage, true);
        conflicting.actual = Some(ComponentId([7u8; 32]));
        let result = DeploymentState::record_component(&mut state.storage, conflicting);
        assert!(matches!(result, Err(StateError::AddressAlreadySet { .. })));
    }

    #[test]
    fn test_state_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = DeploymentState::new(Identity::new("test-deployer"));
        state.mark_complete(StageId::DeployStorage);
        DeploymentState::record_component(
            &mut state.storage,
            descriptor("node-store", StageId::DeployStorage, true),
        )
        .unwrap();

        state.save(&path).unwrap();
        let loaded = DeploymentState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.completed, state.completed);
        assert_eq!(loaded.storage, state.storage);
        assert_eq!(loaded.current_stage(), Some(StageId::DeployLogicImpls));
    }

    #[test]
    fn test_load_missing_state_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = DeploymentState::load(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_record_store_latest_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        assert!(store.latest().unwrap().is_none());

        let state = DeploymentState::new(Identity::new("test-deployer"));
        let record =
            DeploymentRecord::from_state(&state, RecordStatus::Success, Vec::new(), Some(5));
        store.append(&record).unwrap();

        let latest = store.latest().unwrap().unwrap();
        assert!(matches!(latest.status, RecordStatus::Success));
        assert_eq!(latest.gas_used, Some(5));
        assert_eq!(store.history().unwrap().len(), 1);
    }

    #[test]
    fn test_record_store_bounds_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let state = DeploymentState::new(Identity::new("test-deployer"));

        for i in 0..MAX_RECORD_HISTORY + 3 {
            let record = DeploymentRecord::from_state(
                &state,
                RecordStatus::Success,
                vec![format!("run {i}")],
                None,
            );
            store.append(&record).unwrap();
        }

        let history = store.history().unwrap();
        assert_eq!(history.len(), MAX_RECORD_HISTORY);
        // Oldest records are dropped first.
        assert_eq!(history[0].errors, vec!["run 3".to_string()]);
        assert_eq!(
            store.latest().unwrap().unwrap().errors,
            vec![format!("run {}", MAX_RECORD_HISTORY + 2)]
        );
    }

    #[test]
    fn test_record_field_names() {
        let state = DeploymentState::new(Identity::new("test-deployer"));
        let record =
            DeploymentRecord::from_state(&state, RecordStatus::Partial, Vec::new(), None);
        let json = serde_json::to_value(&record).unwrap();

        for field in ["timestamp", "deployer", "storage", "implementations", "proxies", "status", "errors"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["status"], "partial");
        assert!(json.get("gasUsed").is_none(), "gasUsed omitted when None");

        let metered =
            DeploymentRecord::from_state(&state, RecordStatus::Success, Vec::new(), Some(42));
        let json = serde_json::to_value(&metered).unwrap();
        assert_eq!(json["gasUsed"], 42);
        assert!(json.get("gas_used").is_none());
    }
}
