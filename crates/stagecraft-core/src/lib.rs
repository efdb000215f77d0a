//! stagecraft-core - deterministic staged deployment and upgrade machinery.
//!
//! This crate deploys and upgrades a small, fixed topology of components
//! (storage units, logic implementations, proxy fronts, and a facade) against
//! an externally-serialized target environment (the [`ledger::Ledger`]
//! trait). The pipeline is built around four properties:
//!
//! - **Determinism**: every component's placement identifier is computed from
//!   `deployer ‖ salt ‖ payload_hash` before anything is created, so
//!   dependents can reference not-yet-created components
//!   ([`predictor`]).
//! - **Idempotency**: creation is content-addressed; re-deploying an existing
//!   `(salt, payload)` pair returns the existing identifier without a second
//!   creation event ([`deployer`]).
//! - **Resumability**: stage completion is persisted after every stage; a
//!   fresh run resumes at the last incomplete stage ([`state`],
//!   [`orchestrator`]).
//! - **Identity preservation**: upgrades deploy a new implementation at a
//!   fresh deterministic location and repoint the proxy's delegation target;
//!   the proxy's external identifier never changes ([`upgrade`]).

pub mod config;
pub mod crypto;
pub mod deployer;
pub mod ledger;
pub mod manager;
pub mod orchestrator;
pub mod predictor;
pub mod stages;
pub mod state;
pub mod topology;
pub mod upgrade;

pub use config::{ConfigError, OrchestratorConfig};
pub use crypto::{Digest, HASH_SIZE, Hash};
pub use deployer::{ContentAddressedDeployer, DeployError, Deployment};
pub use ledger::{ComponentKind, ComponentRecord, Ledger, LedgerError, MemoryLedger, RoleId};
pub use orchestrator::{Orchestrator, RunError};
pub use predictor::{ComponentId, Identity, Salt, SaltContext, predict, salt_for};
pub use stages::{StageError, StageOutcome, Warning};
pub use state::{
    ComponentDescriptor, DeploymentRecord, DeploymentState, RecordStatus, RecordStore, StageId,
    StateError,
};
pub use upgrade::{Authorizer, LedgerAuthorizer, UpgradeController, UpgradeError, UpgradeRecord};
