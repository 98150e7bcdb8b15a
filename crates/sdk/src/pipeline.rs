//! End-to-end facet installation.
//!
//! Each run deploys (or reuses) the facet and its initializer, reloads the
//! live selector table, plans and validates the cut, stages the record and
//! only then submits. The record is written once the cut is confirmed and
//! the routing verified.
//!
//! An initializer is only deployed for a cut that carries it: when the facet
//! is reused, deployment waits until a non-empty cut is planned.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use alloy::primitives::{Address, TxHash, address};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    DiamondConfig, Network,
    artifact::{ArtifactStore, ContractArtifact},
    error::{ConfigError, DiamondError},
    executor::CutExecutor,
    initializer::{self, InitBinding, InitializerSpec, ResolvedInitializer},
    planner,
    proxy::{ContractDeployer, DiamondProxy},
    record::{
        self, ContractRecord, DeploymentRecord, IncomingFacet, MergeMode, RecordKey, RecordStore,
        StagedRecord,
    },
    registry::RegistryState,
    types::{BlockInstant, Cut, Facet},
};

/// Stands in for contracts a dry run would deploy.
pub const UNDEPLOYED: Address = address!("0xffffffffffffffffffffffffffffffffffffffff");

/// Serializes cuts per proxy, across pipelines sharing the table.
#[derive(Debug, Default)]
pub struct CutLocks {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl CutLocks {
    pub fn new() -> Self { Self::default() }

    /// Waits for exclusive access to the proxy.
    pub async fn acquire(&self, diamond: Address) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(diamond).or_default().clone();
        lock.lock_owned().await
    }
}

/// Request to install a facet from its artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFacet {
    /// Contract name of the facet artifact.
    pub facet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<InitializerSpec>,
    /// Names of recorded facets the new facet takes selectors over from, in
    /// addition to earlier deployments under the same name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersede: Vec<String>,
    /// Facet already deployed at this address, skipping deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facet_address: Option<Address>,
}

impl AddFacet {
    pub fn new(facet: impl Into<String>) -> Self {
        Self { facet: facet.into(), ..Default::default() }
    }

    pub fn with_initializer(
        mut self,
        contract: impl Into<String>,
        function: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        self.initializer =
            Some(InitializerSpec { contract: contract.into(), function: function.into(), args });
        self
    }

    pub fn superseding(mut self, name: impl Into<String>) -> Self {
        self.supersede.push(name.into());
        self
    }

    pub fn at(mut self, address: Address) -> Self {
        self.facet_address = Some(address);
        self
    }
}

/// Ordered facet installations, processed by [`Pipeline::run_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub facets: Vec<AddFacet>,
}

/// Cut planned against the live routing, not submitted.
#[derive(Clone, Debug)]
pub struct Plan {
    pub facet: Facet,
    pub cut: Cut,
    pub binding: InitBinding,
    pub staged: StagedRecord,
    /// Routing the plan was computed against.
    pub current: RegistryState,
    /// Facet would be deployed, its address is [`UNDEPLOYED`].
    pub deploys_facet: bool,
    /// Initializer would be deployed for the cut, its address is
    /// [`UNDEPLOYED`].
    pub deploys_initializer: bool,
}

/// Result of a successful [`Pipeline::add_facet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Routing and record already up to date, nothing submitted or written.
    Unchanged { facet: Address },
    /// Routing already up to date, the record was brought in line.
    Recorded { facet: Address },
    /// Cut confirmed and record written.
    Applied { facet: Address, cut: Cut, tx_hash: Option<TxHash>, instant: Option<BlockInstant> },
}

impl Outcome {
    pub fn facet(&self) -> Address {
        match self {
            Outcome::Unchanged { facet }
            | Outcome::Recorded { facet }
            | Outcome::Applied { facet, .. } => *facet,
        }
    }
}

struct Prepared {
    artifact: ContractArtifact,
    facet_address: Address,
    deploys_facet: bool,
    initializer: Option<(ResolvedInitializer, InitializerSpec)>,
    init_artifact: Option<ContractArtifact>,
    deploys_initializer: bool,
}

/// Facet installation pipeline of a single Diamond proxy.
pub struct Pipeline<D, C, S> {
    network: Network,
    config: DiamondConfig,
    artifacts: ArtifactStore,
    proxy: D,
    deployer: C,
    store: S,
    locks: Arc<CutLocks>,
    halted: AtomicBool,
}

impl<D: DiamondProxy, C: ContractDeployer, S: RecordStore> Pipeline<D, C, S> {
    pub fn new(
        network: Network,
        config: DiamondConfig,
        artifacts: ArtifactStore,
        proxy: D,
        deployer: C,
        store: S,
    ) -> Self {
        Self {
            network,
            config,
            artifacts,
            proxy,
            deployer,
            store,
            locks: Arc::new(CutLocks::new()),
            halted: AtomicBool::new(false),
        }
    }

    /// Shares the lock table with other pipelines.
    pub fn with_locks(mut self, locks: Arc<CutLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn network(&self) -> &Network { &self.network }

    pub fn config(&self) -> &DiamondConfig { &self.config }

    pub fn proxy(&self) -> &D { &self.proxy }

    pub fn store(&self) -> &S { &self.store }

    /// Indicates an integrity failure stopped the pipeline, every later run
    /// fails with [`DiamondError::Halted`].
    pub fn is_halted(&self) -> bool { self.halted.load(Ordering::SeqCst) }

    /// Stored record of the proxy.
    pub async fn record(&self) -> Result<Option<DeploymentRecord>, DiamondError> {
        self.store.load(&RecordKey::of(&self.network)).await
    }

    /// Plans the installation against the live routing without deploying or
    /// submitting anything.
    pub async fn plan(&self, request: &AddFacet) -> Result<Plan, DiamondError> {
        let previous = self.record().await?;
        let prepared = self.prepare(request, previous.as_ref(), false).await?;
        let current = RegistryState::load(Some(&self.proxy)).await?;
        self.plan_against(request, &prepared, previous.as_ref(), current)
    }

    /// Installs the facet described by the request.
    ///
    /// Cancellation is honored at every stage boundary up to submission.
    /// Once the cut is submitted the run completes regardless.
    pub async fn add_facet(
        &self,
        request: &AddFacet,
        cancel: &CancellationToken,
    ) -> Result<Outcome, DiamondError> {
        if self.is_halted() {
            return Err(DiamondError::Halted);
        }
        checkpoint(cancel)?;
        info!(facet = %request.facet, diamond = %self.network.diamond(), "installing facet");

        let previous = self.record().await?;
        let mut prepared = self.prepare(request, previous.as_ref(), true).await?;
        checkpoint(cancel)?;

        let _guard = self.locks.acquire(self.network.diamond()).await;
        // Registry and record may have moved while waiting for the lock
        let previous = self.record().await?;
        let current = RegistryState::load(Some(&self.proxy)).await?;
        let mut plan = self.plan_against(request, &prepared, previous.as_ref(), current)?;
        if plan.deploys_initializer {
            self.deploy_initializer(&mut prepared).await?;
            plan = self.plan_against(request, &prepared, previous.as_ref(), plan.current)?;
        }
        checkpoint(cancel)?;

        let executor = CutExecutor::from_config(&self.config);
        let facet = plan.facet.address();
        if plan.cut.is_empty() {
            if plan.staged.is_recorded_in(previous.as_ref()) {
                info!(facet = %request.facet, %facet, "facet already installed");
                return Ok(Outcome::Unchanged { facet });
            }
            let confirmation =
                executor.confirm_unchanged(&self.proxy, &plan.staged.expected_state()).await?;
            record::persist(&self.store, plan.staged, &confirmation).await?;
            info!(facet = %request.facet, %facet, "record caught up with live routing");
            return Ok(Outcome::Recorded { facet });
        }

        let confirmation = match executor.execute(&self.proxy, &plan.cut, &plan.binding).await {
            Ok(confirmation) => confirmation,
            Err(err @ DiamondError::Integrity { .. }) => {
                self.halted.store(true, Ordering::SeqCst);
                error!(facet = %request.facet, %err, "pipeline halted");
                return Err(err);
            },
            Err(err) => return Err(err),
        };
        record::persist(&self.store, plan.staged, &confirmation).await?;

        info!(
            facet = %request.facet,
            %facet,
            tx_hash = ?confirmation.tx_hash(),
            "facet installed"
        );
        Ok(Outcome::Applied {
            facet,
            cut: plan.cut,
            tx_hash: confirmation.tx_hash(),
            instant: confirmation.instant(),
        })
    }

    /// Runs the requests in order, stopping at the first failure.
    pub async fn run_all(
        &self,
        requests: &[AddFacet],
        cancel: &CancellationToken,
    ) -> Result<Vec<Outcome>, DiamondError> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            match self.add_facet(request, cancel).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(
                        facet = %request.facet,
                        completed = i,
                        remaining = requests.len() - i - 1,
                        class = %err.class(),
                        "stopping at failed facet"
                    );
                    return Err(err);
                },
            }
        }
        Ok(outcomes)
    }

    /// Loads artifacts, then deploys or reuses the facet and initializer
    /// concurrently.
    ///
    /// A recorded initializer is reused only if deployed from the same
    /// bytecode. Next to a reused facet, an initializer to deploy is left as
    /// a placeholder until a cut is planned.
    async fn prepare(
        &self,
        request: &AddFacet,
        previous: Option<&DeploymentRecord>,
        deploy: bool,
    ) -> Result<Prepared, DiamondError> {
        let artifact = self.artifacts.load(&request.facet)?;
        let init_artifact = request
            .initializer
            .as_ref()
            .map(|spec| self.artifacts.load(&spec.contract))
            .transpose()?;

        let hash = artifact.bytecode_hash();
        let reusable = request.facet_address.or_else(|| {
            previous.and_then(|r| {
                r.facets_named(&request.facet)
                    .filter(|f| f.bytecode_hash() == Some(hash))
                    .map(|f| f.address())
                    .last()
            })
        });

        let facet_fut = async {
            match reusable {
                Some(address) => {
                    debug!(facet = %request.facet, %address, "reusing deployed facet");
                    Ok::<_, DiamondError>((address, false))
                },
                None if deploy => {
                    let deployed = self.deployer.deploy(&artifact, Default::default()).await?;
                    info!(facet = %request.facet, address = %deployed.address, "facet deployed");
                    Ok((deployed.address, false))
                },
                None => Ok((UNDEPLOYED, true)),
            }
        };

        let init_fut = async {
            let (Some(spec), Some(init_artifact)) = (&request.initializer, &init_artifact) else {
                return Ok::<_, DiamondError>((None, false));
            };
            let known = previous
                .and_then(|r| r.contract(&spec.contract))
                .filter(|c| c.is_built_from(init_artifact.bytecode_hash()))
                .map(|c| c.address);
            if (deploy && reusable.is_none()) || known.is_some() {
                let resolved = initializer::resolve(init_artifact, known, &self.deployer).await?;
                Ok((Some((resolved, spec.clone())), false))
            } else {
                let placeholder = ResolvedInitializer::new(
                    init_artifact.name(),
                    UNDEPLOYED,
                    init_artifact.abi().clone(),
                );
                Ok((Some((placeholder, spec.clone())), true))
            }
        };

        let ((facet_address, deploys_facet), (initializer, deploys_initializer)) =
            futures::try_join!(facet_fut, init_fut)?;
        Ok(Prepared {
            artifact,
            facet_address,
            deploys_facet,
            initializer,
            init_artifact,
            deploys_initializer,
        })
    }

    /// Deploys the initializer left as a placeholder by [`Self::prepare`].
    async fn deploy_initializer(&self, prepared: &mut Prepared) -> Result<(), DiamondError> {
        let (Some((init, _)), Some(artifact)) =
            (prepared.initializer.as_mut(), prepared.init_artifact.as_ref())
        else {
            return Ok(());
        };
        *init = initializer::resolve(artifact, None, &self.deployer).await?;
        prepared.deploys_initializer = false;
        Ok(())
    }

    fn plan_against(
        &self,
        request: &AddFacet,
        prepared: &Prepared,
        previous: Option<&DeploymentRecord>,
        current: RegistryState,
    ) -> Result<Plan, DiamondError> {
        let facet = Facet::from_abi(
            &request.facet,
            prepared.facet_address,
            prepared.artifact.abi(),
            &self.config.denylist,
        )?;
        let superseded = self.superseded(request, previous, facet.address())?;

        // Arguments are checked even when the initializer ends up not attached
        let initializer = prepared.initializer.as_ref().map(|(init, spec)| (init, spec));
        if let Some((init, spec)) = initializer {
            initializer::bind(Some(&init.function_call(&spec.function, spec.args.clone())?))?;
        }

        let diff = current.diff(&facet, &superseded, self.config.prune_stale)?;
        let cut = planner::plan(&facet, &diff, initializer)?;
        let expected = cut.simulate(&current)?;
        let binding = initializer::bind(cut.initializer())?;

        // Only an initializer the cut carries is recorded
        let attached = cut.initializer().is_some();
        let contracts: BTreeMap<String, ContractRecord> = prepared
            .initializer
            .iter()
            .zip(&prepared.init_artifact)
            .filter(|_| attached)
            .map(|((init, _), artifact)| {
                let contract = ContractRecord::new(init.address(), Some(artifact.bytecode_hash()));
                (init.name().to_string(), contract)
            })
            .collect();
        let staged = record::stage(
            &self.network,
            previous,
            &expected,
            IncomingFacet { facet: &facet, bytecode_hash: Some(prepared.artifact.bytecode_hash()) },
            &contracts,
            MergeMode::Check,
        )?;

        Ok(Plan {
            facet,
            cut,
            binding,
            staged,
            current,
            deploys_facet: prepared.deploys_facet,
            deploys_initializer: prepared.deploys_initializer && attached,
        })
    }

    /// Addresses of the recorded facets the incoming one takes over from.
    fn superseded(
        &self,
        request: &AddFacet,
        previous: Option<&DeploymentRecord>,
        incoming: Address,
    ) -> Result<BTreeSet<Address>, ConfigError> {
        let mut superseded: BTreeSet<Address> = previous
            .map(|r| r.facets_named(&request.facet).map(|f| f.address()).collect())
            .unwrap_or_default();
        for name in &request.supersede {
            let named: Vec<Address> = previous
                .into_iter()
                .flat_map(|r| r.facets_named(name))
                .map(|f| f.address())
                .collect();
            if named.is_empty() {
                return Err(ConfigError::UnknownFacet(name.clone()));
            }
            superseded.extend(named);
        }
        superseded.remove(&incoming);
        Ok(superseded)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), DiamondError> {
    if cancel.is_cancelled() {
        warn!("cancelled before submission");
        return Err(DiamondError::Cancelled);
    }
    Ok(())
}
