//! Target-environment registry.
//!
//! The external execution environment is modeled as an append-only registry
//! of components keyed by deterministic identifier. All state-changing calls
//! are blocking and observably finalized when they return; the environment
//! serializes them per caller identity, so the orchestrator needs no
//! in-process locking for ordering.
//!
//! [`Ledger`] is the trait seam; [`MemoryLedger`] is the in-process
//! reference backend used by tests and local dry runs. Remote backends plug
//! in behind the same trait.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Digest;
use crate::predictor::{ComponentId, Identity};

/// Capability roles grantable on components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleId {
    /// Administrative control over a component.
    Admin,
    /// Authorization to repoint proxy delegation targets.
    Upgrader,
    /// Authorization to invoke state-changing operations.
    Writer,
}

impl RoleId {
    /// Stable string form used in logs and warnings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Upgrader => "upgrader",
            Self::Writer => "writer",
        }
    }
}

/// Category of a deployed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A record-keeping storage unit.
    Storage,
    /// A logic implementation (the swappable half of a proxy pair).
    Logic,
    /// A stable-identity proxy delegating to an implementation.
    Proxy,
    /// The proxy-administration front governing upgrades.
    Front,
}

/// The registry entry for one created component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    /// Human-readable component name.
    pub name: String,

    /// Component category.
    pub kind: ComponentKind,

    /// Hash of the immutable creation payload.
    pub payload_hash: Digest,

    /// Identity that created the component.
    pub created_by: Identity,

    /// Administrative front governing this component, if any.
    pub admin: Option<ComponentId>,

    /// Active delegation target (proxies only); the only field an upgrade
    /// may change.
    pub delegate: Option<ComponentId>,

    /// Storage unit this logic implementation reads and writes.
    pub storage_binding: Option<ComponentId>,

    /// The single caller authorized to mutate this storage unit.
    pub authorized_caller: Option<ComponentId>,

    /// Roles granted on this component.
    pub roles: BTreeSet<(RoleId, Identity)>,
}

impl ComponentRecord {
    /// Creates a bare record with no wiring.
    pub fn new(
        name: impl Into<String>,
        kind: ComponentKind,
        payload_hash: Digest,
        created_by: Identity,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            payload_hash,
            created_by,
            admin: None,
            delegate: None,
            storage_binding: None,
            authorized_caller: None,
            roles: BTreeSet::new(),
        }
    }

    /// Sets the governing administrative front (builder pattern).
    #[must_use]
    pub fn with_admin(mut self, admin: ComponentId) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Sets the initial delegation target (builder pattern).
    #[must_use]
    pub fn with_delegate(mut self, delegate: ComponentId) -> Self {
        self.delegate = Some(delegate);
        self
    }
}

/// Errors surfaced by ledger backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// No component exists at the given identifier.
    #[error("component not found: {id}")]
    NotFound {
        /// The identifier that was probed.
        id: ComponentId,
    },

    /// A component already exists at the identifier with a different
    /// payload hash. With a sound addressing scheme this indicates caller
    /// error, not a hash collision.
    #[error("component at {id} already exists with a different payload")]
    PayloadMismatch {
        /// The contested identifier.
        id: ComponentId,
    },

    /// The target component is not of the kind the operation requires.
    #[error("component {id} is a {actual}, operation requires {required}")]
    WrongKind {
        /// The target identifier.
        id: ComponentId,
        /// The kind found.
        actual: &'static str,
        /// The kind required.
        required: &'static str,
    },

    /// The backend rejected or failed the operation.
    #[error("ledger backend error: {message}")]
    Backend {
        /// Description from the backend.
        message: String,
    },
}

/// The external target environment.
///
/// Implementations must provide:
/// 1. Append-only creation: a confirmed create is never rolled back.
/// 2. Idempotent creation: re-creating an identifier with the same payload
///    hash is a no-op success.
/// 3. Idempotent role grants: granting a held role is a no-op, never an
///    error.
/// 4. External serialization: each call returns only once the operation is
///    observably finalized.
pub trait Ledger: Send + Sync {
    /// Probes whether a component exists at the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Backend`] if the environment is unreachable.
    fn exists(&self, id: &ComponentId) -> Result<bool, LedgerError>;

    /// Creates a component at the identifier and returns the identifier the
    /// environment actually placed it at.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PayloadMismatch`] if the identifier is taken
    /// by a component with a different payload hash.
    fn create(&self, id: &ComponentId, record: ComponentRecord)
    -> Result<ComponentId, LedgerError>;

    /// Reads back the full record of a component.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if no component exists there.
    fn component(&self, id: &ComponentId) -> Result<ComponentRecord, LedgerError>;

    /// Repoints a proxy's delegation target. This is the administrative
    /// control surface used by upgrades.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WrongKind`] if the target is not a proxy.
    fn set_delegate(
        &self,
        proxy: &ComponentId,
        implementation: &ComponentId,
    ) -> Result<(), LedgerError>;

    /// Reads back a proxy's active delegation target.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the proxy does not exist.
    fn delegate_of(&self, proxy: &ComponentId) -> Result<Option<ComponentId>, LedgerError>;

    /// Reads back a logic implementation's storage binding.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the component does not exist.
    fn storage_binding(&self, logic: &ComponentId) -> Result<Option<ComponentId>, LedgerError> {
        Ok(self.component(logic)?.storage_binding)
    }

    /// Reads back a storage unit's authorized caller.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the component does not exist.
    fn authorized_caller(
        &self,
        storage: &ComponentId,
    ) -> Result<Option<ComponentId>, LedgerError> {
        Ok(self.component(storage)?.authorized_caller)
    }

    /// Binds a logic implementation to its storage unit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WrongKind`] if `logic` is not a logic
    /// component.
    fn bind_storage(&self, logic: &ComponentId, storage: &ComponentId)
    -> Result<(), LedgerError>;

    /// Configures the single caller authorized to mutate a storage unit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WrongKind`] if `storage` is not a storage
    /// unit.
    fn authorize_caller(
        &self,
        storage: &ComponentId,
        caller: &ComponentId,
    ) -> Result<(), LedgerError>;

    /// Grants a role on a target component. Granting an already-held role is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the target does not exist.
    fn grant_role(
        &self,
        role: RoleId,
        grantee: &Identity,
        target: &ComponentId,
    ) -> Result<(), LedgerError>;

    /// Queries whether a grantee holds a role on a target.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the target does not exist.
    fn has_role(
        &self,
        role: RoleId,
        grantee: &Identity,
        target: &ComponentId,
    ) -> Result<bool, LedgerError>;

    /// Total metered work performed through this handle, if the environment
    /// meters it. Feeds the `gas_used` field of deployment records.
    fn metered_work(&self) -> Option<u64> {
        None
    }
}

/// In-process registry backend.
///
/// Clones share storage, so a test can hold one handle while the
/// orchestrator drives another.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    components: Arc<RwLock<HashMap<ComponentId, ComponentRecord>>>,
    operations: Arc<AtomicU64>,
}

impl MemoryLedger {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of created components.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.read().expect("lock poisoned").len()
    }

    /// Returns true if nothing has been created.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.read().expect("lock poisoned").is_empty()
    }

    fn meter(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    fn with_component<T>(
        &self,
        id: &ComponentId,
        f: impl FnOnce(&mut ComponentRecord) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut components = self.components.write().expect("lock poisoned");
        let record = components
            .get_mut(id)
            .ok_or(LedgerError::NotFound { id: *id })?;
        f(record)
    }
}

impl Clone for MemoryLedger {
    fn clone(&self) -> Self {
        Self {
            components: Arc::clone(&self.components),
            operations: Arc::clone(&self.operations),
        }
    }
}

impl Ledger for MemoryLedger {
    fn exists(&self, id: &ComponentId) -> Result<bool, LedgerError> {
        Ok(self
            .components
            .read()
            .expect("lock poisoned")
            .contains_key(id))
    }

    fn create(
        &self,
        id: &ComponentId,
        record: ComponentRecord,
    ) -> Result<ComponentId, LedgerError> {
        let mut components = self.components.write().expect("lock poisoned");

        if let Some(existing) = components.get(id) {
            if existing.payload_hash != record.payload_hash {
                return Err(LedgerError::PayloadMismatch { id: *id });
            }
            // Idempotent re-create: already finalized, nothing to do.
            return Ok(*id);
        }

        components.insert(*id, record);
        drop(components);
        self.meter();
        Ok(*id)
    }

    fn component(&self, id: &ComponentId) -> Result<ComponentRecord, LedgerError> {
        self.components
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or(LedgerError::NotFound { id: *id })
    }

    fn set_delegate(
        &self,
        proxy: &ComponentId,
        implementation: &ComponentId,
    ) -> Result<(), LedgerError> {
        self.with_component(proxy, |record| {
            if record.kind != ComponentKind::Proxy {
                return Err(LedgerError::WrongKind {
                    id: *proxy,
                    actual: kind_name(record.kind),
                    required: "proxy",
                });
            }
            record.delegate = Some(*implementation);
            Ok(())
        })?;
        self.meter();
        Ok(())
    }

    fn delegate_of(&self, proxy: &ComponentId) -> Result<Option<ComponentId>, LedgerError> {
        Ok(self.component(proxy)?.delegate)
    }

    fn bind_storage(
        &self,
        logic: &ComponentId,
        storage: &ComponentId,
    ) -> Result<(), LedgerError> {
        self.with_component(logic, |record| {
            if record.kind != ComponentKind::Logic {
                return Err(LedgerError::WrongKind {
                    id: *logic,
                    actual: kind_name(record.kind),
                    required: "logic",
                });
            }
            record.storage_binding = Some(*storage);
            Ok(())
        })?;
        self.meter();
        Ok(())
    }

    fn authorize_caller(
        &self,
        storage: &ComponentId,
        caller: &ComponentId,
    ) -> Result<(), LedgerError> {
        self.with_component(storage, |record| {
            if record.kind != ComponentKind::Storage {
                return Err(LedgerError::WrongKind {
                    id: *storage,
                    actual: kind_name(record.kind),
                    required: "storage",
                });
            }
            record.authorized_caller = Some(*caller);
            Ok(())
        })?;
        self.meter();
        Ok(())
    }

    fn grant_role(
        &self,
        role: RoleId,
        grantee: &Identity,
        target: &ComponentId,
    ) -> Result<(), LedgerError> {
        let newly_granted = self.with_component(target, |record| {
            Ok(record.roles.insert((role, grantee.clone())))
        })?;
        if newly_granted {
            self.meter();
        }
        Ok(())
    }

    fn has_role(
        &self,
        role: RoleId,
        grantee: &Identity,
        target: &ComponentId,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .component(target)?
            .roles
            .contains(&(role, grantee.clone())))
    }

    fn metered_work(&self) -> Option<u64> {
        Some(self.operations.load(Ordering::Relaxed))
    }
}

const fn kind_name(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Storage => "storage",
        ComponentKind::Logic => "logic",
        ComponentKind::Proxy => "proxy",
        ComponentKind::Front => "front",
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::predictor::{SaltContext, predict, salt_for};

    fn test_id(name: &str) -> ComponentId {
        let deployer = Identity::new("test-deployer");
        let salt = salt_for(name, &SaltContext::deployer_scoped(deployer.clone()));
        predict(&deployer, &salt, &Digest::of(name.as_bytes()))
    }

    fn test_record(name: &str, kind: ComponentKind) -> ComponentRecord {
        ComponentRecord::new(
            name,
            kind,
            Digest::of(name.as_bytes()),
            Identity::new("test-deployer"),
        )
    }

    #[test]
    fn test_create_and_read_back() {
        let ledger = MemoryLedger::new();
        let id = test_id("node-store");

        let actual = ledger
            .create(&id, test_record("node-store", ComponentKind::Storage))
            .unwrap();
        assert_eq!(actual, id);
        assert!(ledger.exists(&id).unwrap());
        assert_eq!(ledger.component(&id).unwrap().name, "node-store");
    }

    #[test]
    fn test_recreate_same_payload_is_noop() {
        let ledger = MemoryLedger::new();
        let id = test_id("node-store");
        let record = test_record("node-store", ComponentKind::Storage);

        ledger.create(&id, record.clone()).unwrap();
        let before = ledger.metered_work().unwrap();
        ledger.create(&id, record).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.metered_work().unwrap(), before);
    }

    #[test]
    fn test_recreate_different_payload_rejected() {
        let ledger = MemoryLedger::new();
        let id = test_id("node-store");

        ledger
            .create(&id, test_record("node-store", ComponentKind::Storage))
            .unwrap();
        let mut other = test_record("node-store", ComponentKind::Storage);
        other.payload_hash = Digest::of(b"different artifact");

        assert!(matches!(
            ledger.create(&id, other),
            Err(LedgerError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn test_grant_role_idempotent() {
        let ledger = MemoryLedger::new();
        let id = test_id("front");
        ledger
            .create(&id, test_record("front", ComponentKind::Front))
            .unwrap();

        let grantee = Identity::new("operator");
        ledger.grant_role(RoleId::Upgrader, &grantee, &id).unwrap();
        assert!(ledger.has_role(RoleId::Upgrader, &grantee, &id).unwrap());

        let before = ledger.component(&id).unwrap().roles.clone();
        ledger.grant_role(RoleId::Upgrader, &grantee, &id).unwrap();
        assert_eq!(ledger.component(&id).unwrap().roles, before);
    }

    #[test]
    fn test_grant_role_missing_target() {
        let ledger = MemoryLedger::new();
        let result = ledger.grant_role(
            RoleId::Admin,
            &Identity::new("operator"),
            &test_id("missing"),
        );
        assert!(matches!(result, Err(LedgerError::NotFound { .. })));
    }

    #[test]
    fn test_set_delegate_requires_proxy() {
        let ledger = MemoryLedger::new();
        let storage = test_id("node-store");
        ledger
            .create(&storage, test_record("node-store", ComponentKind::Storage))
            .unwrap();

        let result = ledger.set_delegate(&storage, &test_id("node-logic"));
        assert!(matches!(result, Err(LedgerError::WrongKind { .. })));
    }

    #[test]
    fn test_repoint_changes_only_delegate() {
        let ledger = MemoryLedger::new();
        let proxy = test_id("node-proxy");
        let impl_v1 = test_id("node-logic");
        let impl_v2 = test_id("node-logic-v2");

        ledger
            .create(
                &proxy,
                test_record("node-proxy", ComponentKind::Proxy).with_delegate(impl_v1),
            )
            .unwrap();

        ledger.set_delegate(&proxy, &impl_v2).unwrap();

        let record = ledger.component(&proxy).unwrap();
        assert_eq!(record.delegate, Some(impl_v2));
        assert_eq!(record.name, "node-proxy");
        assert_eq!(ledger.delegate_of(&proxy).unwrap(), Some(impl_v2));
    }

    #[test]
    fn test_clone_shares_registry() {
        let ledger = MemoryLedger::new();
        let handle = ledger.clone();
        let id = test_id("node-store");

        ledger
            .create(&id, test_record("node-store", ComponentKind::Storage))
            .unwrap();
        assert!(handle.exists(&id).unwrap());
    }
}
