//! Hot-swap of proxy behavior without losing identity.
//!
//! An upgrade deploys a new implementation at a fresh deterministic location
//! (the salt mixes in a version tag, so it never collides with the initial
//! deployment), then repoints the proxy's delegation target and reads the
//! pointer back. The proxy's external address and its accumulated state are
//! untouched; only the implementation pointer changes.
//!
//! Authorization is an injected seam ([`Authorizer`]) so tests can
//! substitute a fake; the production implementation queries ledger roles.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::deployer::{ContentAddressedDeployer, DeployError};
use crate::ledger::{ComponentKind, Ledger, LedgerError, RoleId};
use crate::predictor::{ComponentId, Identity, Salt, SaltContext, salt_for};

/// Capability query seam for upgrade authorization.
pub trait Authorizer {
    /// Whether `identity` holds `role` on `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query cannot be answered.
    fn has_capability(
        &self,
        identity: &Identity,
        role: RoleId,
        target: &ComponentId,
    ) -> Result<bool, LedgerError>;
}

/// Authorizer backed by ledger role grants.
pub struct LedgerAuthorizer<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: Ledger + ?Sized> LedgerAuthorizer<'a, L> {
    /// Creates the authorizer.
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }
}

impl<L: Ledger + ?Sized> Authorizer for LedgerAuthorizer<'_, L> {
    fn has_capability(
        &self,
        identity: &Identity,
        role: RoleId,
        target: &ComponentId,
    ) -> Result<bool, LedgerError> {
        self.ledger.has_role(role, identity, target)
    }
}

/// Durable account of one completed upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    /// The proxy's address — unchanged across all upgrades of this
    /// component.
    pub proxy: ComponentId,

    /// Implementation the proxy delegated to before the upgrade.
    pub old_implementation: Option<ComponentId>,

    /// Implementation the proxy delegates to now.
    pub new_implementation: ComponentId,

    /// Version-tagged salt the new implementation was placed under.
    pub version_salt: Salt,

    /// Identity that authorized the upgrade.
    pub authorized_by: Identity,
}

/// Errors from upgrade attempts.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The caller lacks the upgrader capability on the governing component.
    /// Never retried automatically.
    #[error("identity '{identity}' is not authorized to upgrade proxy {proxy}")]
    Unauthorized {
        /// The rejected identity.
        identity: Identity,
        /// The proxy the upgrade targeted.
        proxy: ComponentId,
    },

    /// The target does not exist or is not a proxy.
    #[error("no upgradeable proxy at {id}")]
    NotAProxy {
        /// The offered identifier.
        id: ComponentId,
    },

    /// Deploying the new implementation failed.
    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// The repoint operation itself failed; the proxy still delegates to
    /// the old implementation.
    #[error("repoint of {proxy} to {attempted} failed: {source}")]
    RepointFailed {
        /// The proxy being repointed.
        proxy: ComponentId,
        /// The pointer value that was being written.
        attempted: ComponentId,
        /// The underlying environment failure.
        #[source]
        source: LedgerError,
    },

    /// The repoint was submitted but the readback does not show the new
    /// pointer. The delegation state is unconfirmed and needs operator
    /// attention.
    #[error(
        "repoint of {proxy} unconfirmed: attempted {attempted}, readback shows {actual:?}"
    )]
    RepointUnconfirmed {
        /// The proxy being repointed.
        proxy: ComponentId,
        /// The pointer value that was written.
        attempted: ComponentId,
        /// The pointer value read back.
        actual: Option<ComponentId>,
    },

    /// The environment failed a query.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Replaces a proxy's implementation while preserving its identity.
pub struct UpgradeController<'a, L: Ledger + ?Sized, A: Authorizer + ?Sized> {
    ledger: &'a L,
    authorizer: &'a A,
    deployer_identity: Identity,
}

impl<'a, L: Ledger + ?Sized, A: Authorizer + ?Sized> UpgradeController<'a, L, A> {
    /// Creates the controller.
    pub fn new(ledger: &'a L, authorizer: &'a A, deployer_identity: Identity) -> Self {
        Self {
            ledger,
            authorizer,
            deployer_identity,
        }
    }

    /// Upgrades a proxy to a new implementation payload.
    ///
    /// Steps: authorization check, content-addressed deploy of the new
    /// implementation under a version-tagged salt, repoint, readback
    /// verification. The returned record means the repoint is confirmed;
    /// every error states explicitly whether the repoint failed
    /// ([`UpgradeError::RepointFailed`]) or is unconfirmed
    /// ([`UpgradeError::RepointUnconfirmed`]).
    ///
    /// # Errors
    ///
    /// - [`UpgradeError::NotAProxy`] if `proxy` is not an existing proxy.
    /// - [`UpgradeError::Unauthorized`] if `authorized_by` lacks the
    ///   upgrader capability on the proxy's governing component.
    /// - [`UpgradeError::Deploy`], [`UpgradeError::RepointFailed`],
    ///   [`UpgradeError::RepointUnconfirmed`] as described above.
    pub fn upgrade(
        &self,
        proxy: &ComponentId,
        new_payload: &[u8],
        version_tag: &str,
        authorized_by: &Identity,
    ) -> Result<UpgradeRecord, UpgradeError> {
        let proxy_record = match self.ledger.component(proxy) {
            Ok(record) if record.kind == ComponentKind::Proxy => record,
            Ok(_) => return Err(UpgradeError::NotAProxy { id: *proxy }),
            Err(LedgerError::NotFound { .. }) => {
                return Err(UpgradeError::NotAProxy { id: *proxy });
            },
            Err(error) => return Err(error.into()),
        };

        // The capability lives on the administrative front governing the
        // proxy; a proxy without a front governs itself.
        let governing = proxy_record.admin.unwrap_or(*proxy);
        if !self
            .authorizer
            .has_capability(authorized_by, RoleId::Upgrader, &governing)?
        {
            return Err(UpgradeError::Unauthorized {
                identity: authorized_by.clone(),
                proxy: *proxy,
            });
        }

        let old_implementation = proxy_record.delegate;

        // The salt keys off the proxy's stable name, so retrying the same
        // upgrade converges on the same implementation location.
        let version_salt = salt_for(
            &proxy_record.name,
            &SaltContext::versioned(self.deployer_identity.clone(), version_tag),
        );
        let deployer = ContentAddressedDeployer::new(self.ledger, self.deployer_identity.clone());
        let new_implementation = deployer
            .deploy(
                &format!("{}-{version_tag}", proxy_record.name),
                ComponentKind::Logic,
                &version_salt,
                new_payload,
            )?
            .id;

        if let Err(source) = self.ledger.set_delegate(proxy, &new_implementation) {
            return Err(UpgradeError::RepointFailed {
                proxy: *proxy,
                attempted: new_implementation,
                source,
            });
        }

        let readback = self.ledger.delegate_of(proxy)?;
        if readback != Some(new_implementation) {
            return Err(UpgradeError::RepointUnconfirmed {
                proxy: *proxy,
                attempted: new_implementation,
                actual: readback,
            });
        }

        info!(
            proxy = %proxy.short(),
            new_implementation = %new_implementation.short(),
            version_tag,
            "upgrade confirmed"
        );
        Ok(UpgradeRecord {
            proxy: *proxy,
            old_implementation,
            new_implementation,
            version_salt,
            authorized_by: authorized_by.clone(),
        })
    }
}
