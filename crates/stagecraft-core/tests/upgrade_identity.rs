//! Identity preservation under upgrade.
//!
//! Upgrades must change a proxy's implementation pointer and nothing else:
//! the proxy's address stays fixed, wiring configured before the upgrade
//! remains intact, and an unauthorized attempt leaves the pointer untouched.

use stagecraft_core::ledger::{Ledger, MemoryLedger, RoleId};
use stagecraft_core::predictor::Identity;
use stagecraft_core::state::{RecordStatus, StageId};
use stagecraft_core::topology::FRONT;
use stagecraft_core::{
    LedgerAuthorizer, Orchestrator, OrchestratorConfig, UpgradeController, UpgradeError,
};

struct Deployed {
    ledger: MemoryLedger,
    config: OrchestratorConfig,
    _dir: tempfile::TempDir,
}

fn deploy_all() -> Deployed {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig {
        deployer: Identity::new("operator-01"),
        endpoint: "memory://test".to_string(),
        admins: Vec::new(),
        upgraders: vec![Identity::new("governance-01")],
        writers: Vec::new(),
        state_file: dir.path().join("state.json"),
        records_dir: dir.path().join("records"),
    };
    let ledger = MemoryLedger::new();
    let record = Orchestrator::new(&ledger, &config)
        .unwrap()
        .run_all()
        .unwrap();
    assert!(matches!(record.status, RecordStatus::Success));
    Deployed {
        ledger,
        config,
        _dir: dir,
    }
}

#[test]
fn upgrade_keeps_address_and_wiring() {
    let deployed = deploy_all();
    let ledger = &deployed.ledger;

    let mut orchestrator = Orchestrator::new(ledger, &deployed.config).unwrap();
    let proxy = orchestrator.state().proxy_address("node-proxy").unwrap();
    let store = orchestrator.state().storage_address("node-store").unwrap();
    let old_impl = ledger.delegate_of(&proxy).unwrap().unwrap();

    let authorizer = LedgerAuthorizer::new(ledger);
    let controller =
        UpgradeController::new(ledger, &authorizer, Identity::new("governance-01"));
    let record = controller
        .upgrade(&proxy, b"node-logic artifact v2", "v2", &Identity::new("governance-01"))
        .unwrap();

    // Same external address, new implementation pointer.
    assert_eq!(record.proxy, proxy);
    assert_eq!(record.old_implementation, Some(old_impl));
    assert_eq!(ledger.delegate_of(&proxy).unwrap(), Some(record.new_implementation));
    assert_ne!(record.new_implementation, old_impl);

    // Accumulated wiring is untouched: the storage unit still authorizes
    // the same proxy, and the old implementation still exists.
    assert_eq!(ledger.authorized_caller(&store).unwrap(), Some(proxy));
    assert!(ledger.exists(&old_impl).unwrap());

    // The deployment still verifies end to end after the upgrade.
    let verified = orchestrator.run_single(StageId::Verify).unwrap();
    assert!(matches!(verified.status, RecordStatus::Success));
}

#[test]
fn unauthorized_upgrade_is_rejected_and_harmless() {
    let deployed = deploy_all();
    let ledger = &deployed.ledger;

    let orchestrator = Orchestrator::new(ledger, &deployed.config).unwrap();
    let proxy = orchestrator.state().proxy_address("resource-proxy").unwrap();
    let pointer_before = ledger.delegate_of(&proxy).unwrap();

    let authorizer = LedgerAuthorizer::new(ledger);
    // The deployer did not receive the upgrader role in this configuration.
    let controller =
        UpgradeController::new(ledger, &authorizer, Identity::new("operator-01"));
    let result = controller.upgrade(
        &proxy,
        b"rogue artifact",
        "v2",
        &Identity::new("operator-01"),
    );

    assert!(matches!(result, Err(UpgradeError::Unauthorized { .. })));
    assert_eq!(ledger.delegate_of(&proxy).unwrap(), pointer_before);
}

#[test]
fn upgrade_is_idempotent_per_version() {
    let deployed = deploy_all();
    let ledger = &deployed.ledger;

    let orchestrator = Orchestrator::new(ledger, &deployed.config).unwrap();
    let proxy = orchestrator.state().proxy_address("user-proxy").unwrap();

    let authorizer = LedgerAuthorizer::new(ledger);
    let governance = Identity::new("governance-01");
    let controller = UpgradeController::new(ledger, &authorizer, governance.clone());

    let first = controller
        .upgrade(&proxy, b"user-logic v2", "v2", &governance)
        .unwrap();
    let created = ledger.len();

    // Re-running the same upgrade creates nothing new and converges on the
    // same implementation pointer.
    let second = controller
        .upgrade(&proxy, b"user-logic v2", "v2", &governance)
        .unwrap();
    assert_eq!(first.new_implementation, second.new_implementation);
    assert_eq!(ledger.len(), created);
}

#[test]
fn rerunning_role_setup_changes_nothing() {
    let deployed = deploy_all();
    let ledger = &deployed.ledger;

    let mut orchestrator = Orchestrator::new(ledger, &deployed.config).unwrap();
    let front = orchestrator.state().proxy_address(FRONT).unwrap();
    let roles_before = ledger.component(&front).unwrap().roles;
    let work_before = ledger.metered_work();

    let record = orchestrator.run_single(StageId::SetupRoles).unwrap();
    assert!(matches!(record.status, RecordStatus::Success));
    assert!(record.errors.is_empty());

    assert_eq!(ledger.component(&front).unwrap().roles, roles_before);
    assert_eq!(ledger.metered_work(), work_before);
    assert!(ledger
        .has_role(RoleId::Upgrader, &Identity::new("governance-01"), &front)
        .unwrap());
}
