//! Storage unit creation.

use tracing::info;

use super::{StageError, StageOutcome};
use crate::deployer::ContentAddressedDeployer;
use crate::ledger::{ComponentKind, Ledger};
use crate::predictor::{SaltContext, salt_for};
use crate::state::{ComponentDescriptor, DeploymentState, StageId};
use crate::topology::{TRIPLES, artifact_payload};

/// Deploys the storage units.
pub struct StorageStage<'a, L: Ledger + ?Sized> {
    deployer: &'a ContentAddressedDeployer<'a, L>,
}

impl<'a, L: Ledger + ?Sized> StorageStage<'a, L> {
    /// Creates the executor.
    pub fn new(deployer: &'a ContentAddressedDeployer<'a, L>) -> Self {
        Self { deployer }
    }

    /// Deploys every storage unit in the topology and records its
    /// descriptor into `state.storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Deploy`] on creation failure; a creation
    /// mismatch aborts the whole run.
    pub fn run(&self, state: &mut DeploymentState) -> Result<StageOutcome, StageError> {
        let context = SaltContext::deployer_scoped(self.deployer.identity().clone());

        for triple in &TRIPLES {
            let salt = salt_for(triple.store, &context);
            let payload = artifact_payload(triple.store);
            let deployment =
                self.deployer
                    .deploy(triple.store, ComponentKind::Storage, &salt, &payload)?;

            DeploymentState::record_component(
                &mut state.storage,
                ComponentDescriptor {
                    name: triple.store.to_string(),
                    salt,
                    payload_hash: deployment.payload_hash,
                    predicted: deployment.id,
                    actual: Some(deployment.id),
                    stage: StageId::DeployStorage,
                },
            )?;
        }

        info!(count = TRIPLES.len(), "storage units deployed");
        Ok(StageOutcome::clean())
    }
}
