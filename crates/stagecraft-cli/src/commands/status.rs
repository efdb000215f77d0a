//! `stagecraft status` - inspect the latest run and pipeline position.

use anyhow::{Context, Result};
use stagecraft_core::OrchestratorConfig;
use stagecraft_core::manager::ContractManager;
use stagecraft_core::state::{DeploymentState, RecordStore};

use super::connect;

/// Prints the latest deployment record and the next stage to run. With
/// `--check`, also probes the environment through the contract-manager
/// handle.
pub fn run(config: &OrchestratorConfig, check: bool) -> Result<()> {
    let records = RecordStore::open(&config.records_dir).context("opening record store")?;

    let latest = records.latest().context("reading latest record")?;
    match &latest {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("no deployment record yet"),
    }

    match DeploymentState::load(&config.state_file).context("reading state file")? {
        Some(state) => match state.current_stage() {
            Some(stage) => println!("next stage: {stage}"),
            None => println!("pipeline complete"),
        },
        None => println!("no persisted state; next stage: deploy_storage"),
    }

    if check && latest.is_some() {
        let ledger = connect(&config.endpoint)?;
        let manager = ContractManager::from_latest(&ledger, &records, config.deployer.clone())
            .context("building contract-manager handle")?;

        match manager.test_connectivity() {
            Ok(()) => println!("connectivity: ok"),
            Err(error) => println!("connectivity: {error}"),
        }
        match manager.has_write_access() {
            Ok(true) => println!("write access ({}): granted", config.deployer),
            Ok(false) => println!("write access ({}): denied", config.deployer),
            Err(error) => println!("write access ({}): {error}", config.deployer),
        }
    }
    Ok(())
}
