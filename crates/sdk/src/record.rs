//! Durable deployment record of a Diamond proxy.
//!
//! The record mirrors the post-cut selector table together with the ABI
//! fragments of the facets and the aggregate ABI clients use to call the
//! proxy. It is only written once a cut is confirmed, see [`persist`].

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Display,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy::{
    json_abi::{Function, JsonAbi},
    primitives::{Address, B256, TxHash},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Network,
    error::{ConflictError, DiamondError},
    executor::CutConfirmation,
    registry::RegistryState,
    types::{BlockInstant, Facet, Selector},
};

/// Facet entry of a [`DeploymentRecord`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetRecord {
    /// Contract name, absent for facets installed by other means.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    address: Address,
    selectors: BTreeSet<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bytecode_hash: Option<B256>,
    #[serde(default)]
    abi: JsonAbi,
}

impl FacetRecord {
    pub fn from_facet(facet: &Facet, bytecode_hash: Option<B256>) -> Self {
        Self {
            name: Some(facet.name().to_string()),
            address: facet.address(),
            selectors: facet.selectors().clone(),
            bytecode_hash,
            abi: facet.abi().clone(),
        }
    }

    pub fn name(&self) -> Option<&str> { self.name.as_deref() }

    pub fn address(&self) -> Address { self.address }

    pub fn selectors(&self) -> &BTreeSet<Selector> { &self.selectors }

    /// Hash of the creation bytecode the facet was deployed from.
    pub fn bytecode_hash(&self) -> Option<B256> { self.bytecode_hash }

    pub fn abi(&self) -> &JsonAbi { &self.abi }

    /// Same facet narrowed down to the selectors it still serves.
    fn narrowed(&self, selectors: BTreeSet<Selector>) -> Self {
        Self { abi: restrict_abi(&self.abi, &selectors), selectors, ..self.clone() }
    }

    /// Facet installed by other means, known only by its routing.
    fn unnamed(address: Address, selectors: BTreeSet<Selector>) -> Self {
        Self { name: None, address, selectors, bytecode_hash: None, abi: JsonAbi::default() }
    }
}

/// Auxiliary contract entry of a [`DeploymentRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub address: Address,
    /// Hash of the creation bytecode the contract was deployed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode_hash: Option<B256>,
}

impl ContractRecord {
    pub fn new(address: Address, bytecode_hash: Option<B256>) -> Self {
        Self { address, bytecode_hash }
    }

    /// Indicates the contract was deployed from the bytecode hashing to
    /// `bytecode_hash`.
    pub fn is_built_from(&self, bytecode_hash: B256) -> bool {
        self.bytecode_hash == Some(bytecode_hash)
    }
}

/// Cut the record was last updated by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCut {
    pub tx_hash: TxHash,
    #[serde(flatten)]
    pub instant: BlockInstant,
}

/// Deployment record of a single Diamond proxy on a network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    network: String,
    chain_id: u64,
    diamond: Address,
    #[serde(default)]
    facets: Vec<FacetRecord>,
    /// Auxiliary contracts by name, e.g. initializers.
    #[serde(default)]
    contracts: BTreeMap<String, ContractRecord>,
    #[serde(default)]
    aggregate_abi: JsonAbi,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_cut: Option<LastCut>,
}

impl DeploymentRecord {
    /// Empty record of the network's proxy.
    pub fn new(network: &Network) -> Self {
        Self {
            network: network.name().to_string(),
            chain_id: network.chain_id(),
            diamond: network.diamond(),
            facets: Vec::new(),
            contracts: BTreeMap::new(),
            aggregate_abi: JsonAbi::default(),
            last_cut: None,
        }
    }

    pub fn key(&self) -> RecordKey { RecordKey::new(&self.network, self.diamond) }

    pub fn network(&self) -> &str { &self.network }

    pub fn chain_id(&self) -> u64 { self.chain_id }

    pub fn diamond(&self) -> Address { self.diamond }

    pub fn facets(&self) -> &[FacetRecord] { &self.facets }

    pub fn contracts(&self) -> &BTreeMap<String, ContractRecord> { &self.contracts }

    pub fn aggregate_abi(&self) -> &JsonAbi { &self.aggregate_abi }

    pub fn last_cut(&self) -> Option<&LastCut> { self.last_cut.as_ref() }

    pub fn facet_at(&self, address: Address) -> Option<&FacetRecord> {
        self.facets.iter().find(|f| f.address == address)
    }

    /// Facets deployed under the name, oldest first.
    pub fn facets_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FacetRecord> {
        self.facets.iter().filter(move |f| f.name() == Some(name))
    }

    pub fn contract(&self, name: &str) -> Option<&ContractRecord> { self.contracts.get(name) }
}

/// How [`merge_abi`] treats a selector exposed under two signatures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// Reject the collision.
    #[default]
    Check,
    /// Incoming fragment wins.
    Overwrite,
}

/// Aggregate ABI under construction, remembering which facet exposed each
/// selector.
#[derive(Default)]
struct AbiMerger {
    abi: JsonAbi,
    owners: BTreeMap<Selector, (String, String)>,
}

impl AbiMerger {
    fn merge(&mut self, source: &str, abi: &JsonAbi, mode: MergeMode) -> Result<(), ConflictError> {
        for function in abi.functions() {
            let selector = function.selector();
            let signature = function.signature();
            if let Some((existing, existing_facet)) = self.owners.get(&selector).cloned() {
                if existing != signature && mode == MergeMode::Check {
                    return Err(ConflictError::SignatureCollision {
                        selector,
                        existing,
                        existing_facet,
                        incoming: signature,
                        incoming_facet: source.to_string(),
                    });
                }
                self.remove_function(&selector);
            }
            self.abi.functions.entry(function.name.clone()).or_default().push(function.clone());
            self.owners.insert(selector, (signature, source.to_string()));
        }

        for event in abi.events() {
            let overloads = self.abi.events.entry(event.name.clone()).or_default();
            if !overloads.contains(event) {
                overloads.push(event.clone());
            }
        }
        for error in abi.errors() {
            let overloads = self.abi.errors.entry(error.name.clone()).or_default();
            if !overloads.contains(error) {
                overloads.push(error.clone());
            }
        }
        Ok(())
    }

    fn remove_function(&mut self, selector: &Selector) {
        for overloads in self.abi.functions.values_mut() {
            overloads.retain(|f| f.selector() != *selector);
        }
        self.abi.functions.retain(|_, overloads| !overloads.is_empty());
    }
}

/// Merges `incoming` into the aggregate ABI.
///
/// Identical events and errors are kept once. A function selector exposed
/// under a different signature than in the aggregate is a collision in
/// [`MergeMode::Check`].
pub fn merge_abi(
    aggregate: &JsonAbi,
    incoming: &JsonAbi,
    mode: MergeMode,
) -> Result<JsonAbi, ConflictError> {
    let mut merger = AbiMerger::default();
    merger.merge("aggregate", aggregate, MergeMode::Overwrite)?;
    merger.merge("incoming", incoming, mode)?;
    Ok(merger.abi)
}

/// ABI keeping only the functions whose selector is in `selectors`.
fn restrict_abi(abi: &JsonAbi, selectors: &BTreeSet<Selector>) -> JsonAbi {
    let functions: BTreeMap<String, Vec<Function>> = abi
        .functions
        .iter()
        .map(|(name, overloads)| {
            let kept = overloads.iter().filter(|f| selectors.contains(&f.selector())).cloned();
            (name.clone(), kept.collect::<Vec<_>>())
        })
        .filter(|(_, overloads)| !overloads.is_empty())
        .collect();
    JsonAbi { functions, events: abi.events.clone(), errors: abi.errors.clone(), ..Default::default() }
}

/// Facet being installed, as it will appear in the record.
#[derive(Clone, Debug)]
pub struct IncomingFacet<'a> {
    pub facet: &'a Facet,
    pub bytecode_hash: Option<B256>,
}

/// Record built from the expected post-cut routing, waiting for the cut to
/// be confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedRecord {
    record: DeploymentRecord,
}

impl StagedRecord {
    pub fn record(&self) -> &DeploymentRecord { &self.record }

    /// Routing the record describes.
    pub fn expected_state(&self) -> RegistryState { RegistryState::from_record(&self.record) }

    /// Indicates `previous` already holds the staged facets, contracts and
    /// aggregate ABI, so writing would change nothing but `last_cut`.
    pub fn is_recorded_in(&self, previous: Option<&DeploymentRecord>) -> bool {
        previous.is_some_and(|p| {
            p.facets == self.record.facets
                && p.contracts == self.record.contracts
                && p.aggregate_abi == self.record.aggregate_abi
        })
    }
}

/// Builds the record describing `expected`, the routing once the cut is
/// applied.
///
/// Facets keep their recorded name and ABI, narrowed to the selectors they
/// still serve. Facets no longer serving any selector are dropped. The ABI
/// collision check runs here, before anything is submitted.
pub fn stage(
    network: &Network,
    previous: Option<&DeploymentRecord>,
    expected: &RegistryState,
    incoming: IncomingFacet<'_>,
    contracts: &BTreeMap<String, ContractRecord>,
    mode: MergeMode,
) -> Result<StagedRecord, ConflictError> {
    let mut record = previous.cloned().unwrap_or_else(|| DeploymentRecord::new(network));
    let incoming_record = FacetRecord::from_facet(incoming.facet, incoming.bytecode_hash);

    let facets = facets_of(expected, |address| {
        if address == incoming.facet.address() {
            Some(&incoming_record)
        } else {
            previous.and_then(|r| r.facet_at(address))
        }
    });

    record.facets = facets;
    record.contracts.extend(contracts.iter().map(|(name, contract)| (name.clone(), *contract)));
    record.aggregate_abi = aggregate_abi(&record.facets, Some(incoming.facet.address()), mode)?;
    debug!(
        network = %record.network,
        facets = record.facets.len(),
        functions = record.aggregate_abi.functions().count(),
        "record staged"
    );
    Ok(StagedRecord { record })
}

/// Facet records describing `routing`. Addresses `known` has a record of
/// keep their name and ABI, narrowed to the selectors they serve.
fn facets_of<'a>(
    routing: &RegistryState,
    known: impl Fn(Address) -> Option<&'a FacetRecord>,
) -> Vec<FacetRecord> {
    routing
        .facets()
        .into_iter()
        .map(|(address, selectors)| match known(address) {
            Some(facet) => facet.narrowed(selectors),
            None => FacetRecord::unnamed(address, selectors),
        })
        .collect()
}

/// Aggregate ABI of `facets`. Only the facet at `checked` is merged with
/// `mode`, after all the others.
fn aggregate_abi(
    facets: &[FacetRecord],
    checked: Option<Address>,
    mode: MergeMode,
) -> Result<JsonAbi, ConflictError> {
    let mut merger = AbiMerger::default();
    for facet in facets.iter().filter(|f| Some(f.address) != checked) {
        merger.merge(&facet_label(facet), &facet.abi, MergeMode::Overwrite)?;
    }
    if let Some(facet) = facets.iter().find(|f| Some(f.address) == checked) {
        merger.merge(&facet_label(facet), &facet.abi, mode)?;
    }
    Ok(merger.abi)
}

fn facet_label(facet: &FacetRecord) -> String {
    facet.name.clone().unwrap_or_else(|| facet.address.to_string())
}

/// Writes the staged record once the cut it describes is confirmed.
///
/// The record always describes the selector table read back after the cut:
/// routing changed outside of the cut is realigned before writing.
pub async fn persist<S: RecordStore + ?Sized>(
    store: &S,
    staged: StagedRecord,
    confirmation: &CutConfirmation,
) -> Result<DeploymentRecord, DiamondError> {
    let mut record = staged.record;
    let live = confirmation.registry();
    if RegistryState::from_record(&record) != *live {
        warn!(
            diamond = %record.diamond,
            "live routing differs from the staged record outside of the cut, realigning"
        );
        let staged_facets = std::mem::take(&mut record.facets);
        record.facets = facets_of(live, |address| staged_facets.iter().find(|f| f.address == address));
        record.aggregate_abi = aggregate_abi(&record.facets, None, MergeMode::Overwrite)?;
    }
    if let (Some(tx_hash), Some(instant)) = (confirmation.tx_hash(), confirmation.instant()) {
        record.last_cut = Some(LastCut { tx_hash, instant });
    }
    store.save(&record).await?;
    info!(key = %record.key(), facets = record.facets.len(), "record persisted");
    Ok(record)
}

/// Identifies a record: one per network and proxy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    network: String,
    diamond: Address,
}

impl RecordKey {
    pub fn new(network: impl Into<String>, diamond: Address) -> Self {
        Self { network: network.into(), diamond }
    }

    pub fn of(network: &Network) -> Self { Self::new(network.name(), network.diamond()) }

    pub fn network(&self) -> &str { &self.network }

    pub fn diamond(&self) -> Address { self.diamond }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.diamond)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, key: &RecordKey) -> Result<Option<DeploymentRecord>, DiamondError>;

    /// Replaces the record, all-or-nothing.
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DiamondError>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn load(&self, key: &RecordKey) -> Result<Option<DeploymentRecord>, DiamondError> {
        (**self).load(key).await
    }

    async fn save(&self, record: &DeploymentRecord) -> Result<(), DiamondError> {
        (**self).save(record).await
    }
}

/// Records kept in memory, for tests and dry runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: tokio::sync::RwLock<HashMap<RecordKey, DeploymentRecord>>,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self { Self::default() }

    /// Number of successful saves.
    pub fn writes(&self) -> usize { self.writes.load(Ordering::Relaxed) }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self, key: &RecordKey) -> Result<Option<DeploymentRecord>, DiamondError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, record: &DeploymentRecord) -> Result<(), DiamondError> {
        self.records.write().await.insert(record.key(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// JSON records stored as `<root>/<network>/<diamond>.json`.
///
/// Records are written to a temporary file first and renamed over the
/// previous version, so readers never observe a partial record.
#[derive(Clone, Debug)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    pub fn new(root: impl AsRef<Path>) -> Self { Self { root: root.as_ref().to_path_buf() } }

    pub fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.root.join(&key.network).join(format!("{}.json", key.diamond))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn load(&self, key: &RecordKey) -> Result<Option<DeploymentRecord>, DiamondError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_slice::<DeploymentRecord>(&bytes).map_err(|err| {
            DiamondError::Store(format!("corrupted record {}: {}", path.display(), err))
        })?;
        Ok(Some(record))
    }

    async fn save(&self, record: &DeploymentRecord) -> Result<(), DiamondError> {
        let path = self.path_for(&record.key());
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "record written");
        Ok(())
    }
}
