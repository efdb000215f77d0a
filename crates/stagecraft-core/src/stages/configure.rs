//! Wiring and role configuration.
//!
//! Every call in this stage is individually fault-isolated: one failed bind
//! or grant becomes a warning and the rest still run, so the operator can
//! retry exactly the calls that failed.

use tracing::{info, warn};

use super::{StageError, StageOutcome};
use crate::ledger::{Ledger, RoleId};
use crate::predictor::{ComponentId, Identity};
use crate::state::{DeploymentState, StageId};
use crate::topology::{FRONT, TRIPLES};

/// One role to grant to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    /// The role being granted.
    pub role: RoleId,
    /// The identity receiving it.
    pub grantee: Identity,
}

/// Wires components together and grants capability roles.
pub struct ConfigureStage<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: Ledger + ?Sized> ConfigureStage<'a, L> {
    /// Creates the executor.
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// Binds each logic implementation to its storage unit and configures
    /// each storage unit's single authorized caller (its triple's proxy).
    ///
    /// Preconditions: every store, logic, and proxy address must exist;
    /// a missing one fails the stage before any wiring is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Precondition`] when a required address is
    /// missing. Individual wiring failures are warnings, not errors.
    pub fn wire_storage(&self, state: &DeploymentState) -> Result<StageOutcome, StageError> {
        let mut triples = Vec::with_capacity(TRIPLES.len());
        for t in &TRIPLES {
            triples.push((
                require(state.storage_address(t.store), StageId::WireStorage, t.store)?,
                require(
                    state.implementation_address(t.logic),
                    StageId::WireStorage,
                    t.logic,
                )?,
                require(state.proxy_address(t.proxy), StageId::WireStorage, t.proxy)?,
            ));
        }

        let mut outcome = StageOutcome::clean();
        for (t, (store, logic, proxy)) in TRIPLES.iter().zip(triples) {
            if let Err(error) = self.ledger.bind_storage(&logic, &store) {
                warn!(logic = t.logic, %error, "storage binding failed");
                outcome.warn(format!("bind_storage({}, {})", t.logic, t.store), error);
            }
            if let Err(error) = self.ledger.authorize_caller(&store, &proxy) {
                warn!(store = t.store, %error, "caller authorization failed");
                outcome.warn(format!("authorize_caller({}, {})", t.store, t.proxy), error);
            }
        }

        info!(warnings = outcome.warnings.len(), "storage wiring finished");
        Ok(outcome)
    }

    /// Grants the configured roles: admin and upgrader on the front, writer
    /// on every proxy. Grants are idempotent at the ledger, so re-running
    /// this stage is safe.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Precondition`] when the front or a proxy
    /// address is missing. Individual grant failures are warnings.
    pub fn setup_roles(
        &self,
        state: &DeploymentState,
        assignments: &[RoleAssignment],
    ) -> Result<StageOutcome, StageError> {
        let front = require(state.proxy_address(FRONT), StageId::SetupRoles, FRONT)?;
        let mut proxies = Vec::with_capacity(TRIPLES.len());
        for t in &TRIPLES {
            proxies.push(require(
                state.proxy_address(t.proxy),
                StageId::SetupRoles,
                t.proxy,
            )?);
        }

        let mut outcome = StageOutcome::clean();
        for assignment in assignments {
            let targets: Vec<ComponentId> = match assignment.role {
                RoleId::Admin | RoleId::Upgrader => vec![front],
                RoleId::Writer => proxies.clone(),
            };

            for target in targets {
                if let Err(error) =
                    self.ledger
                        .grant_role(assignment.role, &assignment.grantee, &target)
                {
                    warn!(
                        role = assignment.role.as_str(),
                        grantee = %assignment.grantee,
                        %error,
                        "role grant failed"
                    );
                    outcome.warn(
                        format!(
                            "grant_role({}, {}, {})",
                            assignment.role.as_str(),
                            assignment.grantee,
                            target.short()
                        ),
                        error,
                    );
                }
            }
        }

        info!(warnings = outcome.warnings.len(), "role setup finished");
        Ok(outcome)
    }
}

fn require(
    address: Option<ComponentId>,
    stage: StageId,
    name: &str,
) -> Result<ComponentId, StageError> {
    address.ok_or_else(|| StageError::Precondition {
        stage,
        name: name.to_string(),
    })
}
