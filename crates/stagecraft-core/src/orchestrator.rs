//! Sequencing of the deployment pipeline.
//!
//! The orchestrator is a state machine over [`StageId`] plus a terminal
//! complete state. It drives exactly one stage at a time, persists progress
//! after every completed stage, and finalizes a [`DeploymentRecord`] at the
//! end of every run — successful or not — so each run leaves an inspectable
//! account of what succeeded, what is missing, and what to retry.
//!
//! Recovery unit is the stage: if the process dies mid-run, the next run
//! resumes at the last incomplete stage, and idempotent creation absorbs any
//! operation that was already submitted before the crash.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::deployer::ContentAddressedDeployer;
use crate::ledger::Ledger;
use crate::stages::{
    ConfigureStage, LogicStage, ProxyStage, RoleAssignment, StageError, StageOutcome, StorageStage,
};
use crate::state::{
    DeploymentRecord, DeploymentState, RecordStatus, RecordStore, StageId, StateError,
};
use crate::topology::{FRONT, TRIPLES};

/// Errors surfaced by orchestrated runs.
#[derive(Debug, Error)]
pub enum RunError {
    /// A stage failed. The deployment record for the run has already been
    /// written when this is returned.
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// The failed stage.
        stage: StageId,
        /// The underlying stage failure.
        #[source]
        source: StageError,
    },

    /// A single-stage run was requested out of order.
    #[error("cannot run stage {stage}: earlier stage {missing} is incomplete")]
    OrderViolation {
        /// The requested stage.
        stage: StageId,
        /// The earliest incomplete predecessor.
        missing: StageId,
    },

    /// State or record persistence failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Drives stage executors in the fixed dependency order.
pub struct Orchestrator<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    deployer: ContentAddressedDeployer<'a, L>,
    assignments: Vec<RoleAssignment>,
    state: DeploymentState,
    state_path: PathBuf,
    records: RecordStore,
    warnings: Vec<String>,
}

impl<'a, L: Ledger + ?Sized> Orchestrator<'a, L> {
    /// Creates an orchestrator, resuming persisted state when present.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the state file or record store cannot be
    /// read or created.
    pub fn new(ledger: &'a L, config: &OrchestratorConfig) -> Result<Self, StateError> {
        let state = match DeploymentState::load(&config.state_file)? {
            Some(state) => {
                info!(
                    completed = state.completed.len(),
                    next = %state
                        .current_stage()
                        .map_or_else(|| "complete".to_string(), |s| s.to_string()),
                    "resuming from persisted state"
                );
                state
            },
            None => DeploymentState::new(config.deployer.clone()),
        };

        Ok(Self {
            ledger,
            deployer: ContentAddressedDeployer::new(ledger, config.deployer.clone()),
            assignments: config.assignments(),
            state,
            state_path: config.state_file.clone(),
            records: RecordStore::open(&config.records_dir)?,
            warnings: Vec::new(),
        })
    }

    /// Read access to the current deployment state.
    #[must_use]
    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// The next stage to execute, or `None` once the pipeline is complete.
    #[must_use]
    pub fn current_stage(&self) -> Option<StageId> {
        self.state.current_stage()
    }

    /// Executes every remaining stage through [`StageId::Verify`].
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Stage`] on the first stage failure; the partial
    /// deployment record has been written by then and completed stages keep
    /// their completion.
    pub fn run_all(&mut self) -> Result<DeploymentRecord, RunError> {
        while let Some(stage) = self.state.current_stage() {
            self.step(stage)?;
        }
        info!("deployment complete");
        Ok(self.finalize(RecordStatus::Success)?)
    }

    /// Executes exactly one stage, for operator-driven incremental rollout
    /// or recovery. Re-running an already-complete stage is allowed; every
    /// executor operation is idempotent or fault-isolated.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::OrderViolation`] if any earlier stage is
    /// incomplete, or [`RunError::Stage`] on failure.
    pub fn run_single(&mut self, stage: StageId) -> Result<DeploymentRecord, RunError> {
        for earlier in StageId::ALL.iter().take_while(|s| **s < stage) {
            if !self.state.is_complete(*earlier) {
                return Err(RunError::OrderViolation {
                    stage,
                    missing: *earlier,
                });
            }
        }

        self.step(stage)?;
        Ok(self.finalize(RecordStatus::Success)?)
    }

    /// Runs one stage, persists progress on success, and finalizes a
    /// partial or failed record on failure.
    fn step(&mut self, stage: StageId) -> Result<(), RunError> {
        info!(%stage, "executing stage");

        match self.execute(stage) {
            Ok(outcome) => {
                for warning in outcome.warnings {
                    self.warnings.push(format!("{stage}: {warning}"));
                }
                self.state.mark_complete(stage);
                self.state.save(&self.state_path)?;
                Ok(())
            },
            Err(source) => {
                error!(%stage, %source, "stage failed");
                self.warnings.push(format!("{stage}: {source}"));

                // A run-fatal error (broken addressing) invalidates the
                // whole run, completed stages included.
                let status = if source.is_run_fatal() || self.state.completed.is_empty() {
                    RecordStatus::Failed
                } else {
                    RecordStatus::Partial
                };
                if let Err(write_error) = self.finalize(status) {
                    // The original failure takes precedence; the lost record
                    // is only reported.
                    error!(%write_error, "failed to write deployment record");
                }

                Err(RunError::Stage { stage, source })
            },
        }
    }

    fn execute(&mut self, stage: StageId) -> Result<StageOutcome, StageError> {
        match stage {
            StageId::DeployStorage => StorageStage::new(&self.deployer).run(&mut self.state),
            StageId::DeployLogicImpls => LogicStage::new(&self.deployer).run(&mut self.state),
            StageId::DeployProxyFront => {
                ProxyStage::new(&self.deployer).deploy_front(&mut self.state)
            },
            StageId::DeployProxies => {
                ProxyStage::new(&self.deployer).deploy_proxies(&mut self.state)
            },
            StageId::WireStorage => ConfigureStage::new(self.ledger).wire_storage(&self.state),
            StageId::SetupRoles => {
                ConfigureStage::new(self.ledger).setup_roles(&self.state, &self.assignments)
            },
            StageId::Verify => self.verify(),
        }
    }

    /// Re-checks the whole deployment: every recorded address is present
    /// and matches its prediction, every component exists in the
    /// environment, and wiring reads back correctly.
    fn verify(&self) -> Result<StageOutcome, StageError> {
        let categories = [
            ("storage", &self.state.storage),
            ("implementations", &self.state.implementations),
            ("proxies", &self.state.proxies),
        ];

        for (category, descriptors) in categories {
            for descriptor in descriptors.values() {
                let actual = descriptor.actual.ok_or_else(|| StageError::Verification {
                    detail: format!("{category} '{}' has no created address", descriptor.name),
                })?;
                if actual != descriptor.predicted {
                    return Err(StageError::Verification {
                        detail: format!(
                            "{category} '{}' at {actual} does not match prediction {}",
                            descriptor.name, descriptor.predicted
                        ),
                    });
                }
                if !self.ledger.exists(&actual)? {
                    return Err(StageError::Verification {
                        detail: format!(
                            "{category} '{}' missing from environment at {actual}",
                            descriptor.name
                        ),
                    });
                }
            }
        }

        let require = |address: Option<crate::predictor::ComponentId>, name: &str| {
            address.ok_or_else(|| StageError::Verification {
                detail: format!("'{name}' has no recorded address"),
            })
        };

        require(self.state.proxy_address(FRONT), FRONT)?;

        for triple in &TRIPLES {
            let store = require(self.state.storage_address(triple.store), triple.store)?;
            let logic = require(
                self.state.implementation_address(triple.logic),
                triple.logic,
            )?;
            let proxy = require(self.state.proxy_address(triple.proxy), triple.proxy)?;

            let binding = self.ledger.storage_binding(&logic)?;
            if binding != Some(store) {
                return Err(StageError::Verification {
                    detail: format!(
                        "'{}' storage binding reads back as {binding:?}, expected {store}",
                        triple.logic
                    ),
                });
            }

            let caller = self.ledger.authorized_caller(&store)?;
            if caller != Some(proxy) {
                return Err(StageError::Verification {
                    detail: format!(
                        "'{}' authorized caller reads back as {caller:?}, expected {proxy}",
                        triple.store
                    ),
                });
            }

            // The delegate may have been upgraded since initial deployment;
            // it must point at an existing component.
            match self.ledger.delegate_of(&proxy)? {
                Some(delegate) if self.ledger.exists(&delegate)? => {},
                Some(delegate) => {
                    return Err(StageError::Verification {
                        detail: format!(
                            "'{}' delegates to {delegate}, which does not exist",
                            triple.proxy
                        ),
                    });
                },
                None => {
                    return Err(StageError::Verification {
                        detail: format!("'{}' has no delegation target", triple.proxy),
                    });
                },
            }
        }

        info!("verification passed");
        Ok(StageOutcome::clean())
    }

    fn finalize(&mut self, status: RecordStatus) -> Result<DeploymentRecord, StateError> {
        let record = DeploymentRecord::from_state(
            &self.state,
            status,
            self.warnings.clone(),
            self.ledger.metered_work(),
        );
        self.records.append(&record)?;
        if !record.errors.is_empty() {
            warn!(
                count = record.errors.len(),
                "run finished with recorded errors or warnings"
            );
        }
        Ok(record)
    }
}
