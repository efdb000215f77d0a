//! `stagecraft deploy` - run deployment stages.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use stagecraft_core::predictor::{SaltContext, salt_for};
use stagecraft_core::topology::{FRONT, TRIPLES, artifact_payload};
use stagecraft_core::{ContentAddressedDeployer, Orchestrator, OrchestratorConfig, StageId};
use tracing::info;

/// Operator stage selection.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageArg {
    /// Deploy the storage units.
    Storage,
    /// Deploy the logic implementations.
    Logic,
    /// Deploy the proxy front and the per-component proxies.
    Proxies,
    /// Wire storage, grant roles, and verify.
    Config,
    /// Run every remaining stage.
    Complete,
}

impl StageArg {
    /// The pipeline stages this selection maps to; `None` means run all.
    #[must_use]
    pub fn stages(self) -> Option<&'static [StageId]> {
        match self {
            Self::Storage => Some(&[StageId::DeployStorage]),
            Self::Logic => Some(&[StageId::DeployLogicImpls]),
            Self::Proxies => Some(&[StageId::DeployProxyFront, StageId::DeployProxies]),
            Self::Config => Some(&[
                StageId::WireStorage,
                StageId::SetupRoles,
                StageId::Verify,
            ]),
            Self::Complete => None,
        }
    }
}

/// Arguments for `stagecraft deploy`.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Stage selection
    #[arg(long, value_enum, default_value_t = StageArg::Complete)]
    pub stage: StageArg,

    /// Submit operations to the target environment (dry-run when absent)
    #[arg(long)]
    pub broadcast: bool,

    /// Override the configured target endpoint
    #[arg(long)]
    pub endpoint: Option<String>,
}

/// Runs the deploy command. Exit code is non-zero on any stage failure; the
/// partial deployment record has been written by then.
pub fn run(config: &OrchestratorConfig, args: &DeployArgs) -> Result<()> {
    let endpoint = args.endpoint.as_deref().unwrap_or(&config.endpoint);

    if !args.broadcast {
        return dry_run(config);
    }

    let ledger = super::connect(endpoint)?;
    let mut orchestrator =
        Orchestrator::new(&ledger, config).context("initializing orchestrator")?;

    let record = match args.stage.stages() {
        None => orchestrator.run_all()?,
        Some(stages) => {
            let mut last = None;
            for stage in stages {
                last = Some(orchestrator.run_single(*stage)?);
            }
            // Stage lists are never empty.
            last.context("stage selection maps to at least one stage")?
        },
    };

    info!(endpoint, "deployment run finished");
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Prints predicted placements without touching the environment.
fn dry_run(config: &OrchestratorConfig) -> Result<()> {
    let ledger = super::connect("memory://dry-run")?;
    let deployer = ContentAddressedDeployer::new(&ledger, config.deployer.clone());
    let context = SaltContext::deployer_scoped(config.deployer.clone());

    println!("dry run (no --broadcast): predicted placements");
    let names = TRIPLES
        .iter()
        .flat_map(|t| [t.store, t.logic, t.proxy])
        .chain([FRONT]);
    for name in names {
        let salt = salt_for(name, &context);
        let predicted = deployer.predict_placement(&salt, &artifact_payload(name));
        println!("  {name}: {predicted}");
    }
    Ok(())
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        assert_eq!(StageArg::Storage.stages(), Some(&[StageId::DeployStorage][..]));
        assert_eq!(StageArg::Complete.stages(), None);
        assert_eq!(StageArg::Config.stages().unwrap().len(), 3);
    }
}
