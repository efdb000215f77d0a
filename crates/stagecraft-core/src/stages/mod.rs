//! Stage executors and the outcome/warning model.
//!
//! Each executor encapsulates the creation or wiring work of one pipeline
//! category. Required dependency addresses are validated before any work is
//! attempted — a missing address fails the stage fast with no partial work.
//! Individual wiring and grant calls, by contrast, are fault-isolated: a
//! failed call becomes a [`Warning`] on the stage's [`StageOutcome`] and the
//! remaining calls still run, so an operator can retry just the failed call.

mod configure;
mod logic;
mod proxy;
mod storage;

use std::fmt;

use thiserror::Error;

pub use configure::{ConfigureStage, RoleAssignment};
pub use logic::LogicStage;
pub use proxy::ProxyStage;
pub use storage::StorageStage;

use crate::deployer::DeployError;
use crate::ledger::LedgerError;
use crate::state::{StageId, StateError};

/// A non-fatal failure of one wiring or grant call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// The call that failed, e.g. `grant_role(upgrader, operator, proxy-admin)`.
    pub operation: String,

    /// The underlying failure.
    pub detail: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.detail)
    }
}

/// Result of a successfully completed stage.
///
/// A stage with warnings still counts as complete; the warnings travel to
/// the deployment record so the operator knows what to retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Fault-isolated call failures collected during the stage.
    pub warnings: Vec<Warning>,
}

impl StageOutcome {
    /// An outcome with no warnings.
    #[must_use]
    pub const fn clean() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Whether every call in the stage succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Records a failed call.
    pub fn warn(&mut self, operation: impl Into<String>, detail: impl fmt::Display) {
        self.warnings.push(Warning {
            operation: operation.into(),
            detail: detail.to_string(),
        });
    }

    /// Merges another outcome's warnings into this one.
    pub fn absorb(&mut self, other: Self) {
        self.warnings.extend(other.warnings);
    }
}

/// Fatal stage failures.
#[derive(Debug, Error)]
pub enum StageError {
    /// A required dependency address is missing or was never created. The
    /// stage aborts before attempting any work.
    #[error("stage {stage}: required address for '{name}' is missing")]
    Precondition {
        /// The stage that failed its precondition.
        stage: StageId,
        /// The component whose address is missing.
        name: String,
    },

    /// A deployment failed. [`DeployError::CreationMismatch`] inside this
    /// variant aborts the whole run, not just the stage.
    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// The environment failed an operation that is not fault-isolated.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// State bookkeeping or persistence failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A post-stage readback did not match expectation. Fatal for the stage;
    /// previously completed stages are unaffected.
    #[error("verification failed: {detail}")]
    Verification {
        /// What did not read back correctly.
        detail: String,
    },
}

impl StageError {
    /// Whether this error invalidates the whole run rather than one stage.
    #[must_use]
    pub const fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Deploy(DeployError::CreationMismatch { .. }))
    }
}
