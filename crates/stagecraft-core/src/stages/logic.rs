//! Logic implementation creation.

use tracing::info;

use super::{StageError, StageOutcome};
use crate::deployer::ContentAddressedDeployer;
use crate::ledger::{ComponentKind, Ledger};
use crate::predictor::{SaltContext, salt_for};
use crate::state::{ComponentDescriptor, DeploymentState, StageId};
use crate::topology::{TRIPLES, artifact_payload};

/// Deploys the logic implementations.
pub struct LogicStage<'a, L: Ledger + ?Sized> {
    deployer: &'a ContentAddressedDeployer<'a, L>,
}

impl<'a, L: Ledger + ?Sized> LogicStage<'a, L> {
    /// Creates the executor.
    pub fn new(deployer: &'a ContentAddressedDeployer<'a, L>) -> Self {
        Self { deployer }
    }

    /// Deploys every logic implementation in the topology and records its
    /// descriptor into `state.implementations`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Deploy`] on creation failure; a creation
    /// mismatch aborts the whole run.
    pub fn run(&self, state: &mut DeploymentState) -> Result<StageOutcome, StageError> {
        let context = SaltContext::deployer_scoped(self.deployer.identity().clone());

        for triple in &TRIPLES {
            let salt = salt_for(triple.logic, &context);
            let payload = artifact_payload(triple.logic);
            let deployment =
                self.deployer
                    .deploy(triple.logic, ComponentKind::Logic, &salt, &payload)?;

            DeploymentState::record_component(
                &mut state.implementations,
                ComponentDescriptor {
                    name: triple.logic.to_string(),
                    salt,
                    payload_hash: deployment.payload_hash,
                    predicted: deployment.id,
                    actual: Some(deployment.id),
                    stage: StageId::DeployLogicImpls,
                },
            )?;
        }

        info!(count = TRIPLES.len(), "logic implementations deployed");
        Ok(StageOutcome::clean())
    }
}
