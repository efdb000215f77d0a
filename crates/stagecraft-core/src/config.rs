//! Orchestrator configuration.
//!
//! Parsed from a TOML file, then overridden by environment variables
//! (`STAGECRAFT_DEPLOYER`, `STAGECRAFT_ENDPOINT`, `STAGECRAFT_ADMINS`,
//! `STAGECRAFT_UPGRADERS`, `STAGECRAFT_WRITERS`). Role grantee lists default
//! to the deployer identity when unspecified.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ledger::RoleId;
use crate::predictor::Identity;
use crate::stages::RoleAssignment;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Inputs consumed by a deployment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Identity (credential) driving the deployment.
    pub deployer: Identity,

    /// Target environment endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Identities receiving the admin role. Defaults to the deployer.
    #[serde(default)]
    pub admins: Vec<Identity>,

    /// Identities receiving the upgrader role. Defaults to the deployer.
    #[serde(default)]
    pub upgraders: Vec<Identity>,

    /// Identities receiving the writer role. Defaults to the deployer.
    #[serde(default)]
    pub writers: Vec<Identity>,

    /// Where run progress is persisted for resumption.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory of the deployment record store.
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
}

fn default_endpoint() -> String {
    "memory://local".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("deployments/state.json")
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("deployments")
}

impl OrchestratorConfig {
    /// Loads configuration from a TOML file and applies environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string and applies environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the deployer identity is
    /// empty after overrides.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(deployer) = std::env::var("STAGECRAFT_DEPLOYER") {
            self.deployer = Identity::new(deployer);
        }
        if let Ok(endpoint) = std::env::var("STAGECRAFT_ENDPOINT") {
            self.endpoint = endpoint;
        }
        for (var, list) in [
            ("STAGECRAFT_ADMINS", &mut self.admins),
            ("STAGECRAFT_UPGRADERS", &mut self.upgraders),
            ("STAGECRAFT_WRITERS", &mut self.writers),
        ] {
            if let Ok(value) = std::env::var(var) {
                *list = parse_identity_list(&value);
            }
        }
    }

    /// Checks invariants that cannot be expressed in serde defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on an empty deployer identity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deployer.is_empty() {
            return Err(ConfigError::Validation(
                "deployer identity must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The full set of role assignments for the setup-roles stage, with
    /// each unspecified list defaulting to the deployer identity.
    #[must_use]
    pub fn assignments(&self) -> Vec<RoleAssignment> {
        let defaulted = |list: &[Identity]| -> Vec<Identity> {
            if list.is_empty() {
                vec![self.deployer.clone()]
            } else {
                list.to_vec()
            }
        };

        let mut assignments = Vec::new();
        for (role, grantees) in [
            (RoleId::Admin, defaulted(&self.admins)),
            (RoleId::Upgrader, defaulted(&self.upgraders)),
            (RoleId::Writer, defaulted(&self.writers)),
        ] {
            for grantee in grantees {
                assignments.push(RoleAssignment { role, grantee });
            }
        }
        assignments
    }
}

fn parse_identity_list(value: &str) -> Vec<Identity> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Identity::new)
        .collect()
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = OrchestratorConfig::from_toml(r#"deployer = "operator-01""#).unwrap();
        assert_eq!(config.deployer.as_str(), "operator-01");
        assert_eq!(config.endpoint, "memory://local");
        assert_eq!(config.records_dir, PathBuf::from("deployments"));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            deployer = "operator-01"
            endpoint = "ledger://prod-example"
            admins = ["governance-01"]
            upgraders = ["governance-01", "operator-01"]
            state_file = "/var/lib/stagecraft/state.json"
            records_dir = "/var/lib/stagecraft/records"
        "#;

        let config = OrchestratorConfig::from_toml(toml).unwrap();
        assert_eq!(config.endpoint, "ledger://prod-example");
        assert_eq!(config.admins.len(), 1);
        assert_eq!(config.upgraders.len(), 2);
        assert_eq!(
            config.state_file,
            PathBuf::from("/var/lib/stagecraft/state.json")
        );
    }

    #[test]
    fn test_empty_deployer_rejected() {
        let result = OrchestratorConfig::from_toml(r#"deployer = """#);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_assignments_default_to_deployer() {
        let config = OrchestratorConfig::from_toml(r#"deployer = "operator-01""#).unwrap();
        let assignments = config.assignments();

        assert_eq!(assignments.len(), 3);
        assert!(assignments
            .iter()
            .all(|a| a.grantee.as_str() == "operator-01"));
    }

    #[test]
    fn test_assignments_use_configured_grantees() {
        let toml = r#"
            deployer = "operator-01"
            upgraders = ["governance-01", "governance-02"]
        "#;
        let config = OrchestratorConfig::from_toml(toml).unwrap();
        let upgraders: Vec<_> = config
            .assignments()
            .into_iter()
            .filter(|a| a.role == RoleId::Upgrader)
            .collect();

        assert_eq!(upgraders.len(), 2);
        assert!(upgraders
            .iter()
            .all(|a| a.grantee.as_str().starts_with("governance")));
    }

    #[test]
    fn test_identity_list_parsing() {
        let parsed = parse_identity_list("a, b ,,c");
        assert_eq!(
            parsed,
            vec![Identity::new("a"), Identity::new("b"), Identity::new("c")]
        );
    }
}
