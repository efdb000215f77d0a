//! Proxy front and per-component proxy creation.

use tracing::info;

use super::{StageError, StageOutcome};
use crate::deployer::ContentAddressedDeployer;
use crate::ledger::{ComponentKind, ComponentRecord, Ledger};
use crate::predictor::{ComponentId, SaltContext, salt_for};
use crate::state::{ComponentDescriptor, DeploymentState, StageId};
use crate::topology::{FRONT, TRIPLES, artifact_payload};

/// Deploys the proxy-administration front and the per-component proxies.
pub struct ProxyStage<'a, L: Ledger + ?Sized> {
    deployer: &'a ContentAddressedDeployer<'a, L>,
}

impl<'a, L: Ledger + ?Sized> ProxyStage<'a, L> {
    /// Creates the executor.
    pub fn new(deployer: &'a ContentAddressedDeployer<'a, L>) -> Self {
        Self { deployer }
    }

    /// Deploys the proxy-administration front.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Deploy`] on creation failure.
    pub fn deploy_front(&self, state: &mut DeploymentState) -> Result<StageOutcome, StageError> {
        let context = SaltContext::deployer_scoped(self.deployer.identity().clone());
        let salt = salt_for(FRONT, &context);
        let payload = artifact_payload(FRONT);
        let deployment = self
            .deployer
            .deploy(FRONT, ComponentKind::Front, &salt, &payload)?;

        DeploymentState::record_component(
            &mut state.proxies,
            ComponentDescriptor {
                name: FRONT.to_string(),
                salt,
                payload_hash: deployment.payload_hash,
                predicted: deployment.id,
                actual: Some(deployment.id),
                stage: StageId::DeployProxyFront,
            },
        )?;

        info!(id = %deployment.id.short(), "proxy front deployed");
        Ok(StageOutcome::clean())
    }

    /// Deploys one proxy per logic component, delegating to its
    /// implementation and governed by the front.
    ///
    /// Preconditions: the front and every logic implementation must already
    /// have a created address; a missing one fails the stage before any
    /// proxy is created.
    ///
    /// # Errors
    ///
    /// - [`StageError::Precondition`] when a required address is missing.
    /// - [`StageError::Deploy`] on creation failure.
    pub fn deploy_proxies(&self, state: &mut DeploymentState) -> Result<StageOutcome, StageError> {
        let front = Self::require(state.proxy_address(FRONT), FRONT)?;
        let mut implementations = Vec::with_capacity(TRIPLES.len());
        for triple in &TRIPLES {
            implementations.push(Self::require(
                state.implementation_address(triple.logic),
                triple.logic,
            )?);
        }

        let context = SaltContext::deployer_scoped(self.deployer.identity().clone());
        for (triple, implementation) in TRIPLES.iter().zip(implementations) {
            let salt = salt_for(triple.proxy, &context);
            let payload = artifact_payload(triple.proxy);
            let record = ComponentRecord::new(
                triple.proxy,
                ComponentKind::Proxy,
                crate::crypto::Digest::of(&payload),
                self.deployer.identity().clone(),
            )
            .with_admin(front)
            .with_delegate(implementation);

            let deployment = self.deployer.deploy_with_record(&salt, &payload, record)?;

            DeploymentState::record_component(
                &mut state.proxies,
                ComponentDescriptor {
                    name: triple.proxy.to_string(),
                    salt,
                    payload_hash: deployment.payload_hash,
                    predicted: deployment.id,
                    actual: Some(deployment.id),
                    stage: StageId::DeployProxies,
                },
            )?;
        }

        info!(count = TRIPLES.len(), "proxies deployed");
        Ok(StageOutcome::clean())
    }

    fn require(address: Option<ComponentId>, name: &str) -> Result<ComponentId, StageError> {
        address.ok_or_else(|| StageError::Precondition {
            stage: StageId::DeployProxies,
            name: name.to_string(),
        })
    }
}
