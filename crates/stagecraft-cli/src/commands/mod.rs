//! CLI subcommand implementations.

pub mod deploy;
pub mod status;
pub mod upgrade;

use anyhow::bail;
use stagecraft_core::MemoryLedger;

/// Connects to the target environment named by an endpoint.
///
/// `memory://` endpoints use the in-process reference backend, which is
/// useful for rehearsing a pipeline locally; remote backends implement the
/// `Ledger` trait and register their own scheme here.
pub fn connect(endpoint: &str) -> anyhow::Result<MemoryLedger> {
    if endpoint.starts_with("memory://") {
        return Ok(MemoryLedger::new());
    }
    bail!("unsupported endpoint scheme: {endpoint}");
}
