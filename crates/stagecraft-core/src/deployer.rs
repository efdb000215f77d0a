//! Idempotent content-addressed component creation.
//!
//! The deployer turns a `(salt, payload)` pair into at most one creation
//! event, ever. It predicts the placement identifier, probes for an existing
//! component there, and only creates when the probe misses. After creation
//! it verifies that the environment placed the component exactly where the
//! prediction said it would; a mismatch means the addressing scheme is
//! broken and the whole run must abort.

use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::Digest;
use crate::ledger::{ComponentKind, ComponentRecord, Ledger, LedgerError};
use crate::predictor::{ComponentId, Identity, Salt, predict};

/// Errors from content-addressed deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The environment created the component somewhere other than the
    /// predicted identifier. Fatal and unrecoverable: the addressing scheme
    /// is violated and no further stage may run.
    #[error(
        "creation mismatch for '{name}': predicted {predicted}, environment placed it at {actual}"
    )]
    CreationMismatch {
        /// Component name.
        name: String,
        /// The predicted identifier.
        predicted: ComponentId,
        /// The identifier the environment reported.
        actual: ComponentId,
    },

    /// A component exists at the predicted identifier but was created from a
    /// different payload.
    #[error("component '{name}' at {id} exists with a different payload")]
    PayloadCollision {
        /// Component name.
        name: String,
        /// The occupied identifier.
        id: ComponentId,
    },

    /// The environment failed the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of one deploy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    /// Where the component lives.
    pub id: ComponentId,

    /// Hash of the creation payload.
    pub payload_hash: Digest,

    /// True when the component already existed and no creation event was
    /// issued.
    pub existed: bool,
}

/// Creates components at deterministic, pre-computable locations.
pub struct ContentAddressedDeployer<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    identity: Identity,
}

impl<'a, L: Ledger + ?Sized> ContentAddressedDeployer<'a, L> {
    /// Creates a deployer acting as the given identity.
    pub fn new(ledger: &'a L, identity: Identity) -> Self {
        Self { ledger, identity }
    }

    /// The identity creations are attributed to.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Predicts where a payload would land without touching the environment.
    #[must_use]
    pub fn predict_placement(&self, salt: &Salt, payload: &[u8]) -> ComponentId {
        predict(&self.identity, salt, &Digest::of(payload))
    }

    /// Deploys a component, or reports it already exists at the predicted
    /// identifier.
    ///
    /// At most one creation event is issued per unique `(salt, payload)`
    /// pair; the second and later calls return `existed = true` with the
    /// same identifier.
    ///
    /// # Errors
    ///
    /// - [`DeployError::PayloadCollision`] if the predicted identifier is
    ///   occupied by a component with a different payload hash.
    /// - [`DeployError::CreationMismatch`] if the environment placed the
    ///   component at an identifier other than the prediction. Callers must
    ///   treat this as fatal for the whole run.
    /// - [`DeployError::Ledger`] on environment faults.
    pub fn deploy(
        &self,
        name: &str,
        kind: ComponentKind,
        salt: &Salt,
        payload: &[u8],
    ) -> Result<Deployment, DeployError> {
        let payload_hash = Digest::of(payload);
        let predicted = predict(&self.identity, salt, &payload_hash);

        if self.ledger.exists(&predicted)? {
            let existing = self.ledger.component(&predicted)?;
            if existing.payload_hash != payload_hash {
                return Err(DeployError::PayloadCollision {
                    name: name.to_string(),
                    id: predicted,
                });
            }
            debug!(component = name, id = %predicted.short(), "already deployed, skipping");
            return Ok(Deployment {
                id: predicted,
                payload_hash,
                existed: true,
            });
        }

        let record = ComponentRecord::new(name, kind, payload_hash, self.identity.clone());
        let actual = self.ledger.create(&predicted, record)?;

        if actual != predicted {
            return Err(DeployError::CreationMismatch {
                name: name.to_string(),
                predicted,
                actual,
            });
        }

        info!(component = name, id = %predicted.short(), "deployed");
        Ok(Deployment {
            id: predicted,
            payload_hash,
            existed: false,
        })
    }

    /// Deploys with a pre-built record, preserving wiring fields set by the
    /// caller (proxies carry their initial delegate and governing front).
    ///
    /// # Errors
    ///
    /// Same as [`Self::deploy`]. The `record.payload_hash` field is
    /// recomputed from `payload`; the caller does not need to fill it in
    /// consistently.
    pub fn deploy_with_record(
        &self,
        salt: &Salt,
        payload: &[u8],
        mut record: ComponentRecord,
    ) -> Result<Deployment, DeployError> {
        let payload_hash = Digest::of(payload);
        record.payload_hash = payload_hash;
        record.created_by = self.identity.clone();
        let predicted = predict(&self.identity, salt, &payload_hash);

        if self.ledger.exists(&predicted)? {
            let existing = self.ledger.component(&predicted)?;
            if existing.payload_hash != payload_hash {
                return Err(DeployError::PayloadCollision {
                    name: record.name,
                    id: predicted,
                });
            }
            debug!(component = %record.name, id = %predicted.short(), "already deployed, skipping");
            return Ok(Deployment {
                id: predicted,
                payload_hash,
                existed: true,
            });
        }

        let name = record.name.clone();
        let actual = self.ledger.create(&predicted, record)?;
        if actual != predicted {
            return Err(DeployError::CreationMismatch {
                name,
                predicted,
                actual,
            });
        }

        info!(component = %name, id = %predicted.short(), "deployed");
        Ok(Deployment {
            id: predicted,
            payload_hash,
            existed: false,
        })
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::predictor::{SaltContext, salt_for};

    fn deployer_for(ledger: &MemoryLedger) -> ContentAddressedDeployer<'_, MemoryLedger> {
        ContentAddressedDeployer::new(ledger, Identity::new("test-deployer"))
    }

    #[test]
    fn test_deploy_matches_prediction() {
        let ledger = MemoryLedger::new();
        let deployer = deployer_for(&ledger);
        let salt = salt_for("node-store", &SaltContext::default());

        let predicted = deployer.predict_placement(&salt, b"artifact");
        let deployment = deployer
            .deploy("node-store", ComponentKind::Storage, &salt, b"artifact")
            .unwrap();

        assert_eq!(deployment.id, predicted);
        assert!(!deployment.existed);
        assert!(ledger.exists(&predicted).unwrap());
    }

    #[test]
    fn test_deploy_twice_creates_once() {
        let ledger = MemoryLedger::new();
        let deployer = deployer_for(&ledger);
        let salt = salt_for("node-store", &SaltContext::default());

        let first = deployer
            .deploy("node-store", ComponentKind::Storage, &salt, b"artifact")
            .unwrap();
        let second = deployer
            .deploy("node-store", ComponentKind::Storage, &salt, b"artifact")
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(!first.existed);
        assert!(second.existed);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_payload_collision_detected() {
        let ledger = MemoryLedger::new();
        let salt = salt_for("node-store", &SaltContext::default());

        // Seed a component at the identifier the deployer will predict, but
        // recorded under a different payload hash.
        let deployer = deployer_for(&ledger);
        let predicted = deployer.predict_placement(&salt, b"artifact");
        ledger
            .create(
                &predicted,
                ComponentRecord::new(
                    "node-store",
                    ComponentKind::Storage,
                    Digest::of(b"other artifact"),
                    Identity::new("someone-else"),
                ),
            )
            .unwrap();

        let result = deployer.deploy("node-store", ComponentKind::Storage, &salt, b"artifact");
        assert!(matches!(result, Err(DeployError::PayloadCollision { .. })));
    }

    /// A backend that reports creations at a skewed identifier, simulating a
    /// broken addressing scheme.
    struct SkewedLedger {
        inner: MemoryLedger,
    }

    impl Ledger for SkewedLedger {
        fn exists(&self, id: &ComponentId) -> Result<bool, LedgerError> {
            self.inner.exists(id)
        }

        fn create(
            &self,
            id: &ComponentId,
            record: ComponentRecord,
        ) -> Result<ComponentId, LedgerError> {
            let actual = self.inner.create(id, record)?;
            let mut skewed = *actual.as_bytes();
            skewed[0] ^= 0xff;
            Ok(ComponentId(skewed))
        }

        fn component(&self, id: &ComponentId) -> Result<ComponentRecord, LedgerError> {
            self.inner.component(id)
        }

        fn set_delegate(
            &self,
            proxy: &ComponentId,
            implementation: &ComponentId,
        ) -> Result<(), LedgerError> {
            self.inner.set_delegate(proxy, implementation)
        }

        fn delegate_of(&self, proxy: &ComponentId) -> Result<Option<ComponentId>, LedgerError> {
            self.inner.delegate_of(proxy)
        }

        fn bind_storage(
            &self,
            logic: &ComponentId,
            storage: &ComponentId,
        ) -> Result<(), LedgerError> {
            self.inner.bind_storage(logic, storage)
        }

        fn authorize_caller(
            &self,
            storage: &ComponentId,
            caller: &ComponentId,
        ) -> Result<(), LedgerError> {
            self.inner.authorize_caller(storage, caller)
        }

        fn grant_role(
            &self,
            role: crate::ledger::RoleId,
            grantee: &Identity,
            target: &ComponentId,
        ) -> Result<(), LedgerError> {
            self.inner.grant_role(role, grantee, target)
        }

        fn has_role(
            &self,
            role: crate::ledger::RoleId,
            grantee: &Identity,
            target: &ComponentId,
        ) -> Result<bool, LedgerError> {
            self.inner.has_role(role, grantee, target)
        }
    }

    #[test]
    fn test_creation_mismatch_is_fatal() {
        let ledger = SkewedLedger {
            inner: MemoryLedger::new(),
        };
        let deployer = ContentAddressedDeployer::new(&ledger, Identity::new("test-deployer"));
        let salt = salt_for("node-store", &SaltContext::default());

        let result = deployer.deploy("node-store", ComponentKind::Storage, &salt, b"artifact");
        assert!(matches!(result, Err(DeployError::CreationMismatch { .. })));
    }
}
