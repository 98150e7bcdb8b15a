use std::{collections::BTreeSet, path::Path, sync::Arc};

use alloy::primitives::{Address, address};
use diamond_sdk::{
    DiamondConfig, Network,
    artifact::{ArtifactStore, ContractArtifact},
    error::{ConflictError, DiamondError, ErrorClass, RevertStage},
    executor,
    pipeline::{AddFacet, CutLocks, Outcome, Pipeline, UNDEPLOYED},
    record::{FileRecordStore, MemoryRecordStore, RecordKey, RecordStore},
    registry::RegistryState,
    selectors::selector_of,
    testing::{self, MockDeployer, MockDiamond, Stall},
    types::{CutStatus, FacetCut},
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIAMOND: Address = address!("0x000000000000000000000000000000000000d1a0");

const VAULT_V1: &[&str] = &[
    "function deposit(uint256 amount)",
    "function balanceOf(address who) view returns (uint256)",
    "function init()",
    "event Deposited(address indexed who, uint256 amount)",
];

const VAULT_V2: &[&str] = &[
    "function deposit(uint256 amount)",
    "function balanceOf(address who) view returns (uint256)",
    "function withdraw(uint256 amount)",
    "event Deposited(address indexed who, uint256 amount)",
];

const VAULT_INIT: &[&str] = &["function init(uint256 cap)"];

const LEGACY: &[&str] = &["function deposit(uint256 amount)", "function sweep()"];

const OTHER: &[&str] = &["function ping() pure returns (uint8)"];

type Mocked<S> = Pipeline<Arc<MockDiamond>, Arc<MockDeployer>, Arc<S>>;

fn write_artifact(dir: &Path, artifact: &ContractArtifact) {
    let json = serde_json::json!({
        "contractName": artifact.name(),
        "abi": artifact.abi(),
        "bytecode": artifact.bytecode(),
    });
    std::fs::write(dir.join(format!("{}.json", artifact.name())), json.to_string()).unwrap();
}

/// Chain, deployer and artifacts shared by the pipelines of a test.
struct Setup {
    artifacts: TempDir,
    diamond: Arc<MockDiamond>,
    deployer: Arc<MockDeployer>,
}

impl Setup {
    fn new() -> Self {
        let setup = Self {
            artifacts: tempfile::tempdir().unwrap(),
            diamond: Arc::new(MockDiamond::new(DIAMOND)),
            deployer: Arc::new(MockDeployer::default()),
        };
        setup.artifact("VaultFacet", VAULT_V1);
        setup.artifact("VaultInit", VAULT_INIT);
        setup.artifact("LegacyFacet", LEGACY);
        setup.artifact("OtherFacet", OTHER);
        setup
    }

    fn artifact(&self, name: &str, items: &[&str]) {
        write_artifact(self.artifacts.path(), &testing::artifact(name, items));
    }

    fn network() -> Network { Network::new("testnet", 31337, DIAMOND) }

    fn pipeline<S: RecordStore>(&self, store: Arc<S>) -> Mocked<S> {
        Pipeline::new(
            Self::network(),
            DiamondConfig::default(),
            ArtifactStore::new(self.artifacts.path()),
            self.diamond.clone(),
            self.deployer.clone(),
            store,
        )
    }

    fn deployed(&self, name: &str) -> Vec<Address> {
        self.deployer.deployed().into_iter().filter(|(n, _)| n == name).map(|(_, a)| a).collect()
    }
}

fn selectors(signatures: &[&str]) -> BTreeSet<[u8; 4]> {
    signatures.iter().map(|s| selector_of(s).0).collect()
}

fn routed(diamond: &MockDiamond, facet: Address) -> BTreeSet<[u8; 4]> {
    diamond.routes().selectors_of(facet).into_iter().map(|s| s.0).collect()
}

#[tokio::test]
async fn test_fresh_install() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());

    let outcome =
        pipeline.add_facet(&AddFacet::new("VaultFacet"), &CancellationToken::new()).await.unwrap();
    let Outcome::Applied { facet, cut, tx_hash, instant } = outcome else {
        panic!("expected applied cut, got {outcome:?}");
    };
    assert_eq!(setup.deployed("VaultFacet"), vec![facet]);
    assert_eq!(cut.entries().len(), 1);
    assert!(tx_hash.is_some());
    assert!(instant.is_some());

    // `init()` is denylisted
    assert_eq!(routed(&setup.diamond, facet), selectors(&["deposit(uint256)", "balanceOf(address)"]));

    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.facets().len(), 1);
    assert_eq!(record.facets()[0].name(), Some("VaultFacet"));
    assert_eq!(record.facets()[0].address(), facet);
    assert!(record.aggregate_abi().function("deposit").is_some());
    assert!(record.aggregate_abi().function("init").is_none());
    assert!(record.aggregate_abi().event("Deposited").is_some());
    assert_eq!(record.last_cut().map(|c| c.tx_hash), tx_hash);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_upgrade_with_initializer() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    let v1 = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap().facet();

    setup.artifact("VaultFacet", VAULT_V2);
    let request = AddFacet::new("VaultFacet").with_initializer(
        "VaultInit",
        "init",
        vec!["1000".to_string()],
    );
    let outcome = pipeline.add_facet(&request, &cancel).await.unwrap();
    let Outcome::Applied { facet: v2, cut, .. } = outcome else {
        panic!("expected applied cut, got {outcome:?}");
    };
    assert_ne!(v1, v2);

    // Remove from the old facet, then Add everything to the new one
    assert_eq!(cut.entries().len(), 2);
    assert!(matches!(&cut.entries()[0], FacetCut::Remove { previous, .. } if *previous == v1));
    assert!(matches!(&cut.entries()[1], FacetCut::Add { facet, .. } if *facet == v2));
    assert!(routed(&setup.diamond, v1).is_empty());
    assert_eq!(
        routed(&setup.diamond, v2),
        selectors(&["deposit(uint256)", "balanceOf(address)", "withdraw(uint256)"])
    );

    let init = setup.deployed("VaultInit");
    assert_eq!(init.len(), 1);
    let calls = setup.diamond.initializer_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, init[0]);
    assert_eq!(calls[0].1[..4], selector_of("init(uint256)")[..]);

    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.facets().len(), 1);
    assert_eq!(record.facets()[0].address(), v2);
    assert_eq!(record.contract("VaultInit").map(|c| c.address), Some(init[0]));
    assert!(record.aggregate_abi().function("withdraw").is_some());
}

#[tokio::test]
async fn test_rebuilt_initializer_is_redeployed() {
    let setup = Setup::new();
    let pipeline = setup.pipeline(Arc::new(MemoryRecordStore::new()));
    let cancel = CancellationToken::new();

    let request =
        AddFacet::new("VaultFacet").with_initializer("VaultInit", "init", vec!["1000".to_string()]);
    pipeline.add_facet(&request, &cancel).await.unwrap();
    assert_eq!(setup.deployed("VaultInit").len(), 1);

    setup.artifact("VaultFacet", VAULT_V2);
    setup.artifact("VaultInit", &["function init(uint256 cap)", "function migrate(uint256 cap)"]);
    let request = AddFacet::new("VaultFacet").with_initializer(
        "VaultInit",
        "migrate",
        vec!["2000".to_string()],
    );
    let outcome = pipeline.add_facet(&request, &cancel).await.unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));

    // The recorded initializer lacks `migrate`, a new one is deployed
    let init = setup.deployed("VaultInit");
    assert_eq!(init.len(), 2);
    let calls = setup.diamond.initializer_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, init[1]);
    assert_eq!(calls[1].1[..4], selector_of("migrate(uint256)")[..]);

    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.contract("VaultInit").map(|c| c.address), Some(init[1]));
}

#[tokio::test]
async fn test_initializer_not_deployed_without_cut() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    let first = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap();
    let record = pipeline.record().await.unwrap();

    let request =
        AddFacet::new("VaultFacet").with_initializer("VaultInit", "init", vec!["1000".to_string()]);
    let plan = pipeline.plan(&request).await.unwrap();
    assert!(plan.cut.is_empty());
    assert!(!plan.deploys_initializer);

    let second = pipeline.add_facet(&request, &cancel).await.unwrap();
    assert_eq!(second, Outcome::Unchanged { facet: first.facet() });
    assert!(setup.deployed("VaultInit").is_empty());
    assert!(setup.diamond.initializer_calls().is_empty());
    assert_eq!(pipeline.record().await.unwrap(), record);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_initializer_deployed_for_reused_facet() {
    let setup = Setup::new();
    let pipeline = setup.pipeline(Arc::new(MemoryRecordStore::new()));
    let cancel = CancellationToken::new();

    let request =
        AddFacet::new("VaultFacet").with_initializer("VaultInit", "init", vec!["1000".to_string()]);
    setup.diamond.stall_next(Stall::Dropped);
    pipeline.add_facet(&request, &cancel).await.unwrap_err();
    assert_eq!(setup.deployed("VaultInit").len(), 1);

    // Nothing was recorded, the facet is reused and the cut still needs an
    // initializer
    let facet = setup.deployed("VaultFacet")[0];
    let outcome = pipeline.add_facet(&request.clone().at(facet), &cancel).await.unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(setup.deployer.deploy_count(), 3);

    let init = setup.deployed("VaultInit");
    let calls = setup.diamond.initializer_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, init[1]);
    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.contract("VaultInit").map(|c| c.address), Some(init[1]));
}

#[tokio::test]
async fn test_initializer_failure_leaves_no_trace() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    let v1 = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap().facet();
    let routes = setup.diamond.routes();
    let record = pipeline.record().await.unwrap();

    setup.artifact("VaultFacet", VAULT_V2);
    setup.diamond.set_initializer_reverts(true);
    let request = AddFacet::new("VaultFacet").with_initializer(
        "VaultInit",
        "init",
        vec!["1000".to_string()],
    );

    // Refused at submission
    let err = pipeline.add_facet(&request, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        DiamondError::Rejected { stage: RevertStage::Initializer, tx_hash: None, .. }
    ));

    // Mined and reverted
    setup.diamond.set_mined_reverts(true);
    let err = pipeline.add_facet(&request, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        DiamondError::Rejected { stage: RevertStage::Initializer, tx_hash: Some(_), .. }
    ));
    assert!(!err.is_retry_safe());

    assert_eq!(setup.diamond.routes(), routes);
    assert_eq!(routed(&setup.diamond, v1).len(), 2);
    assert!(setup.diamond.initializer_calls().is_empty());
    assert_eq!(pipeline.record().await.unwrap(), record);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_redeploy_is_idempotent() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    let first = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap();
    let second = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap();

    assert_eq!(second, Outcome::Unchanged { facet: first.facet() });
    assert_eq!(setup.deployer.deploy_count(), 1);
    assert_eq!(setup.diamond.submissions(), 1);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_conflict_aborts_before_submission() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    let vault = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap().facet();

    let err = pipeline.add_facet(&AddFacet::new("LegacyFacet"), &cancel).await.unwrap_err();
    let DiamondError::Conflict(ConflictError::SelectorOwned { selector, owner, .. }) = err else {
        panic!("expected ownership conflict, got {err:?}");
    };
    assert_eq!(selector, selector_of("deposit(uint256)"));
    assert_eq!(owner, vault);
    assert_eq!(err_class(&pipeline, "LegacyFacet", &cancel).await, ErrorClass::Conflict);
    assert_eq!(setup.diamond.submissions(), 1);
    assert_eq!(store.writes(), 1);

    // Explicitly taking over the facet moves `deposit` and prunes the rest
    let legacy = pipeline
        .add_facet(&AddFacet::new("LegacyFacet").superseding("VaultFacet"), &cancel)
        .await
        .unwrap()
        .facet();
    assert!(routed(&setup.diamond, vault).is_empty());
    assert_eq!(routed(&setup.diamond, legacy), selectors(&["deposit(uint256)", "sweep()"]));

    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.facets().len(), 1);
    assert_eq!(record.facets()[0].name(), Some("LegacyFacet"));
    assert!(record.aggregate_abi().function("balanceOf").is_none());
}

async fn err_class<S: RecordStore>(
    pipeline: &Mocked<S>,
    facet: &str,
    cancel: &CancellationToken,
) -> ErrorClass {
    pipeline.add_facet(&AddFacet::new(facet), cancel).await.unwrap_err().class()
}

#[tokio::test]
async fn test_unknown_superseded_facet() {
    let setup = Setup::new();
    let pipeline = setup.pipeline(Arc::new(MemoryRecordStore::new()));

    let err = pipeline
        .add_facet(&AddFacet::new("LegacyFacet").superseding("Nope"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert_eq!(setup.diamond.submissions(), 0);
}

#[tokio::test]
async fn test_record_round_trips_through_files() {
    let setup = Setup::new();
    let deployments = tempfile::tempdir().unwrap();
    let pipeline = setup.pipeline(Arc::new(FileRecordStore::new(deployments.path())));
    let cancel = CancellationToken::new();

    pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap();
    pipeline.add_facet(&AddFacet::new("OtherFacet"), &cancel).await.unwrap();

    let store = FileRecordStore::new(deployments.path());
    let key = RecordKey::of(&Setup::network());
    assert!(store.path_for(&key).is_file());

    let record = store.load(&key).await.unwrap().unwrap();
    assert_eq!(record.facets().len(), 2);
    assert_eq!(RegistryState::from_record(&record), setup.diamond.routes());
    assert_eq!(record.chain_id(), 31337);
    assert_eq!(record.diamond(), DIAMOND);
}

#[tokio::test]
async fn test_integrity_failure_halts() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    setup.diamond.tamper_next(selector_of("deposit(uint256)"));
    let err = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Integrity);
    assert!(pipeline.is_halted());
    assert_eq!(store.writes(), 0);

    let err = pipeline.add_facet(&AddFacet::new("OtherFacet"), &cancel).await.unwrap_err();
    assert!(matches!(err, DiamondError::Halted));
    assert_eq!(setup.diamond.submissions(), 1);
}

#[tokio::test]
async fn test_record_follows_routing_changed_outside_cut() {
    let setup = Setup::new();
    let pipeline = setup.pipeline(Arc::new(MemoryRecordStore::new()));

    let foreign = address!("0x00000000000000000000000000000000000000f0");
    let stray = selector_of("stray()");
    setup.diamond.install(foreign, [stray]);
    // Unrouted while the cut lands, outside of what the cut verifies
    setup.diamond.tamper_next(stray);

    let outcome =
        pipeline.add_facet(&AddFacet::new("VaultFacet"), &CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));

    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(RegistryState::from_record(&record), setup.diamond.routes());
    assert!(record.facet_at(foreign).is_none());
    assert_eq!(record.facets().len(), 1);
    assert!(record.aggregate_abi().function("deposit").is_some());
}

#[tokio::test]
async fn test_unacknowledged_broadcast_needs_reconciling() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());

    setup.diamond.stall_next(Stall::Unacknowledged { landed: true });
    let err = pipeline
        .add_facet(&AddFacet::new("VaultFacet"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DiamondError::Broadcast { .. }));
    assert_eq!(err.class(), ErrorClass::Indeterminate);
    assert_eq!(store.writes(), 0);

    let facet = setup.deployed("VaultFacet")[0];
    assert_eq!(routed(&setup.diamond, facet).len(), 2);
}

#[tokio::test]
async fn test_indeterminate_cut_is_reconciled() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();

    setup.diamond.stall_next(Stall::Landed);
    let err = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Indeterminate);
    assert!(err.is_retry_safe());
    assert_eq!(store.writes(), 0);

    let facet = setup.deployed("VaultFacet")[0];
    let plan = pipeline.plan(&AddFacet::new("VaultFacet").at(facet)).await.unwrap();
    assert!(plan.cut.is_empty());

    let landed = diamond_sdk::types::Cut::new(
        vec![FacetCut::Add {
            facet,
            selectors: setup.diamond.routes().selectors_of(facet),
        }],
        None,
    );
    assert_eq!(executor::reconcile(&*setup.diamond, &landed).await.unwrap(), CutStatus::Applied);

    // Rerunning against the landed facet only catches the record up
    let outcome =
        pipeline.add_facet(&AddFacet::new("VaultFacet").at(facet), &cancel).await.unwrap();
    assert_eq!(outcome, Outcome::Recorded { facet });
    assert_eq!(setup.diamond.submissions(), 1);
    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.facets()[0].address(), facet);
    assert!(record.last_cut().is_none());
}

#[tokio::test]
async fn test_dropped_cut_is_resubmitted() {
    let setup = Setup::new();
    let pipeline = setup.pipeline(Arc::new(MemoryRecordStore::new()));
    let cancel = CancellationToken::new();

    setup.diamond.stall_next(Stall::Dropped);
    let err = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Indeterminate);
    assert!(setup.diamond.routes().is_empty());

    let facet = setup.deployed("VaultFacet")[0];
    let outcome =
        pipeline.add_facet(&AddFacet::new("VaultFacet").at(facet), &cancel).await.unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(setup.deployer.deploy_count(), 1);
    assert_eq!(routed(&setup.diamond, facet).len(), 2);
}

#[tokio::test]
async fn test_cancelled_before_submission() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline.add_facet(&AddFacet::new("VaultFacet"), &cancel).await.unwrap_err();
    assert!(matches!(err, DiamondError::Cancelled));
    assert!(err.is_retry_safe());
    assert_eq!(setup.deployer.deploy_count(), 0);
    assert_eq!(setup.diamond.submissions(), 0);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_run_all_stops_at_first_failure() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = setup.pipeline(store.clone());

    let requests =
        [AddFacet::new("VaultFacet"), AddFacet::new("LegacyFacet"), AddFacet::new("OtherFacet")];
    let err = pipeline.run_all(&requests, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Conflict);

    assert!(setup.deployed("OtherFacet").is_empty());
    let record = pipeline.record().await.unwrap().unwrap();
    assert_eq!(record.facets().len(), 1);
    assert_eq!(record.facets()[0].name(), Some("VaultFacet"));

    let outcomes = pipeline
        .run_all(&[AddFacet::new("VaultFacet"), AddFacet::new("OtherFacet")], &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcomes[0], Outcome::Unchanged { .. }));
    assert!(matches!(outcomes[1], Outcome::Applied { .. }));
}

#[tokio::test]
async fn test_dry_run_plan() {
    let setup = Setup::new();
    let pipeline = setup.pipeline(Arc::new(MemoryRecordStore::new()));

    let plan = pipeline
        .plan(&AddFacet::new("VaultFacet").with_initializer(
            "VaultInit",
            "init",
            vec!["1000".to_string()],
        ))
        .await
        .unwrap();
    assert!(plan.deploys_facet);
    assert!(plan.deploys_initializer);
    assert_eq!(plan.facet.address(), UNDEPLOYED);
    assert_eq!(plan.cut.entries().len(), 1);
    assert_eq!(plan.cut.selectors().len(), 2);
    assert!(plan.cut.initializer().is_some());
    assert!(plan.current.is_empty());

    assert_eq!(setup.deployer.deploy_count(), 0);
    assert_eq!(setup.diamond.submissions(), 0);
    assert!(pipeline.record().await.unwrap().is_none());

    // Bad initializer arguments fail the plan
    let err = pipeline
        .plan(&AddFacet::new("VaultFacet").with_initializer(
            "VaultInit",
            "init",
            vec!["not a number".to_string()],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn test_concurrent_pipelines_share_locks() {
    let setup = Setup::new();
    let store = Arc::new(MemoryRecordStore::new());
    let locks = Arc::new(CutLocks::new());
    let a = setup.pipeline(store.clone()).with_locks(locks.clone());
    let b = setup.pipeline(store.clone()).with_locks(locks);
    let cancel = CancellationToken::new();

    let vault_req = AddFacet::new("VaultFacet");
    let other_req = AddFacet::new("OtherFacet");
    let (vault, other) =
        tokio::join!(a.add_facet(&vault_req, &cancel), b.add_facet(&other_req, &cancel));
    let (vault, other) = (vault.unwrap().facet(), other.unwrap().facet());

    let record = a.record().await.unwrap().unwrap();
    assert_eq!(record.facets().len(), 2);
    assert!(record.facet_at(vault).is_some());
    assert!(record.facet_at(other).is_some());
    assert_eq!(RegistryState::from_record(&record), setup.diamond.routes());
}
