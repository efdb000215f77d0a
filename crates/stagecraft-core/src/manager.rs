//! Contract-manager handle for the external service layer.
//!
//! The network-facing service consumes deployed components through this
//! handle; it does not participate in deployment or upgrades. The handle is
//! built from the latest deployment record, so it always reflects the most
//! recent finished run.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ledger::{Ledger, LedgerError, RoleId};
use crate::predictor::{ComponentId, Identity};
use crate::state::{RecordStore, StateError};
use crate::topology::FRONT;

/// Errors from the contract-manager handle.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No deployment has ever finished against this record store.
    #[error("no deployment record found")]
    NoDeployment,

    /// The record store could not be read.
    #[error(transparent)]
    State(#[from] StateError),

    /// The environment could not be reached or a component is missing.
    #[error("connectivity check failed for '{name}' at {id}: {reason}")]
    Connectivity {
        /// Component name probed.
        name: String,
        /// Its recorded address.
        id: ComponentId,
        /// Why the probe failed.
        reason: String,
    },

    /// The environment failed a query.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Component addresses exposed to the service layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentHandles {
    /// Storage units by name.
    pub storage: BTreeMap<String, ComponentId>,

    /// Logic implementations by name.
    pub implementations: BTreeMap<String, ComponentId>,

    /// Proxies (front included) by name.
    pub proxies: BTreeMap<String, ComponentId>,
}

/// Read-mostly handle over a finished deployment.
pub struct ContractManager<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    caller: Identity,
    handles: ComponentHandles,
}

impl<'a, L: Ledger + ?Sized> ContractManager<'a, L> {
    /// Builds a handle from the latest deployment record.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NoDeployment`] if no run has ever finished,
    /// or [`ManagerError::State`] if the record store cannot be read.
    pub fn from_latest(
        ledger: &'a L,
        records: &RecordStore,
        caller: Identity,
    ) -> Result<Self, ManagerError> {
        let record = records.latest()?.ok_or(ManagerError::NoDeployment)?;
        Ok(Self {
            ledger,
            caller,
            handles: ComponentHandles {
                storage: record.storage,
                implementations: record.implementations,
                proxies: record.proxies,
            },
        })
    }

    /// The deployed component addresses.
    #[must_use]
    pub fn components(&self) -> &ComponentHandles {
        &self.handles
    }

    /// Whether the calling identity holds the writer role on every proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Ledger`] if a role query fails.
    pub fn has_write_access(&self) -> Result<bool, ManagerError> {
        for (name, id) in &self.handles.proxies {
            if name == FRONT {
                continue;
            }
            if !self.ledger.has_role(RoleId::Writer, &self.caller, id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Probes that every recorded component actually exists in the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Connectivity`] naming the first missing
    /// component.
    pub fn test_connectivity(&self) -> Result<(), ManagerError> {
        let all = self
            .handles
            .storage
            .iter()
            .chain(&self.handles.implementations)
            .chain(&self.handles.proxies);

        for (name, id) in all {
            if !self.ledger.exists(id)? {
                return Err(ManagerError::Connectivity {
                    name: name.clone(),
                    id: *id,
                    reason: "component missing from environment".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read model for nodes filtered by verification status.
    ///
    /// Intentionally returns no data: the filtering semantics are not yet
    /// defined, and none are invented here.
    #[must_use]
    pub fn nodes_by_verification_status(&self, _verified: bool) -> Vec<ComponentId> {
        Vec::new()
    }
}
