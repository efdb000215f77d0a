//! `stagecraft upgrade` - replace a proxy's implementation.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use stagecraft_core::state::RecordStore;
use stagecraft_core::topology::{TRIPLES, artifact_payload, triple_for_proxy};
use stagecraft_core::{LedgerAuthorizer, OrchestratorConfig, UpgradeController};

/// Arguments for `stagecraft upgrade`.
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Name of the proxy to upgrade (e.g. node-proxy)
    pub component: String,

    /// Version tag for the new implementation's placement salt
    #[arg(long)]
    pub version: String,

    /// Path to the new implementation artifact; a deterministic
    /// name-and-version payload is used when omitted
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Override the configured target endpoint
    #[arg(long)]
    pub endpoint: Option<String>,
}

/// Runs the upgrade command.
pub fn run(config: &OrchestratorConfig, args: &UpgradeArgs) -> Result<()> {
    let Some(triple) = triple_for_proxy(&args.component) else {
        bail!(
            "'{}' is not an upgradeable proxy; expected one of: {}",
            args.component,
            TRIPLES
                .iter()
                .map(|t| t.proxy)
                .collect::<Vec<_>>()
                .join(", ")
        );
    };

    let endpoint = args.endpoint.as_deref().unwrap_or(&config.endpoint);
    let ledger = super::connect(endpoint)?;

    let records = RecordStore::open(&config.records_dir).context("opening record store")?;
    let latest = records
        .latest()
        .context("reading latest deployment record")?
        .context("no deployment record found; deploy before upgrading")?;

    let proxy = latest
        .proxies
        .get(triple.proxy)
        .with_context(|| format!("'{}' is not in the latest deployment record", triple.proxy))?;

    let payload = match &args.artifact {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("reading artifact {}", path.display()))?,
        None => artifact_payload(&format!("{}/{}", triple.logic, args.version)),
    };

    let authorizer = LedgerAuthorizer::new(&ledger);
    let controller = UpgradeController::new(&ledger, &authorizer, config.deployer.clone());
    let record = controller.upgrade(proxy, &payload, &args.version, &config.deployer)?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use stagecraft_core::predictor::Identity;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            deployer: Identity::new("operator-01"),
            endpoint: "memory://test".to_string(),
            admins: Vec::new(),
            upgraders: Vec::new(),
            writers: Vec::new(),
            state_file: "nonexistent/state.json".into(),
            records_dir: "nonexistent/records".into(),
        }
    }

    #[test]
    fn test_only_topology_proxies_are_upgradeable() {
        // Rejected before any record store or environment access, so the
        // nonexistent paths are never touched.
        for component in ["proxy-admin", "node-store", "mystery"] {
            let args = UpgradeArgs {
                component: component.to_string(),
                version: "v2".to_string(),
                artifact: None,
                endpoint: None,
            };
            let error = run(&test_config(), &args).unwrap_err();
            assert!(
                error.to_string().contains("not an upgradeable proxy"),
                "unexpected error for '{component}': {error}"
            );
        }
    }
}
