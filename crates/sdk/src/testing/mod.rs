//! In-memory Diamond proxy and contract deployer.
//!
//! [`MockDiamond`] applies cuts as encoded for `IDiamondCut.diamondCut`,
//! enforcing the LibDiamond rules and reverting with its errors, so both the
//! planner and the revert classification are exercised end to end. Knobs
//! allow injecting initializer reverts, failed broadcasts, stalled
//! confirmations and tampered routing.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes, TxHash, address, keccak256},
    sol_types::SolError,
};
use async_trait::async_trait;

use crate::{
    abi::{self, DiamondErrors, IDiamondCut::FacetCutAction},
    artifact::ContractArtifact,
    error::DiamondError,
    initializer::InitBinding,
    proxy::{
        ConfirmationOutcome, ContractDeployer, CutReceipt, DeployedContract, DiamondProxy,
        FacetSelectors, PendingCut,
    },
    registry::RegistryState,
    types::{BlockInstant, Cut, Selector},
};

/// Default sender of mock transactions.
pub const DEPLOYER: Address = address!("0x00000000000000000000000000000000000de91e");

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME: u64 = 12;

/// Failure injected into the next submitted cut.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stall {
    /// Confirmation times out and the cut never lands.
    Dropped,
    /// Confirmation times out but the cut is applied.
    Landed,
    /// Sending fails without a transaction hash, the cut is applied when
    /// `landed`.
    Unacknowledged { landed: bool },
}

#[derive(Default)]
struct ChainState {
    routes: RegistryState,
    block_number: u64,
    nonce: u64,
    pending: HashMap<TxHash, ConfirmationOutcome>,
    initializer_reverts: bool,
    mined_reverts: bool,
    stall: Option<Stall>,
    tamper: Option<Selector>,
    submissions: usize,
    applied: usize,
    initializer_calls: Vec<(Address, Bytes)>,
}

impl ChainState {
    /// Routing after the cut, or the revert data of the failing step.
    fn try_apply(&self, cut: &Cut, init: &InitBinding) -> Result<RegistryState, Bytes> {
        let mut next = self.routes.clone();
        for entry in abi::facet_cuts(cut) {
            let facet = entry.facetAddress;
            let selectors = entry.functionSelectors;
            match entry.action {
                FacetCutAction::Add => {
                    if facet.is_zero() {
                        return Err(revert(DiamondErrors::CannotAddSelectorsToZeroAddress {
                            _selectors: selectors,
                        }));
                    }
                    for selector in selectors {
                        if next.facet_of(&selector).is_some() {
                            return Err(revert(
                                DiamondErrors::CannotAddFunctionToDiamondThatAlreadyExists {
                                    _selector: selector,
                                },
                            ));
                        }
                        next.route(selector, facet);
                    }
                },
                FacetCutAction::Replace => {
                    if facet.is_zero() {
                        return Err(revert(
                            DiamondErrors::CannotReplaceFunctionsFromFacetWithZeroAddress {
                                _selectors: selectors,
                            },
                        ));
                    }
                    for selector in selectors {
                        match next.facet_of(&selector) {
                            None => {
                                return Err(revert(
                                    DiamondErrors::CannotReplaceFunctionThatDoesNotExists {
                                        _selector: selector,
                                    },
                                ));
                            },
                            Some(old) if old == facet => {
                                return Err(revert(
                                    DiamondErrors::CannotReplaceFunctionWithTheSameFunctionFromTheSameFacet {
                                        _selector: selector,
                                    },
                                ));
                            },
                            Some(_) => next.route(selector, facet),
                        }
                    }
                },
                FacetCutAction::Remove => {
                    if !facet.is_zero() {
                        return Err(revert(DiamondErrors::RemoveFacetAddressMustBeZeroAddress {
                            _facetAddress: facet,
                        }));
                    }
                    for selector in selectors {
                        if next.facet_of(&selector).is_none() {
                            return Err(revert(
                                DiamondErrors::CannotRemoveFunctionThatDoesNotExist {
                                    _selector: selector,
                                },
                            ));
                        }
                        next.unroute(&selector);
                    }
                },
                _ => {
                    return Err(revert(DiamondErrors::IncorrectFacetCutAction { _action: 3 }));
                },
            }
        }

        match init {
            InitBinding::Call(call) if self.initializer_reverts => {
                Err(abi::initializer_reverted(call.target(), call.calldata().clone()))
            },
            _ => Ok(next),
        }
    }

    fn commit(&mut self, next: RegistryState, init: &InitBinding, tx_hash: TxHash) -> CutReceipt {
        self.routes = next;
        if let Some(selector) = self.tamper.take() {
            self.routes.unroute(&selector);
        }
        if let InitBinding::Call(call) = init {
            self.initializer_calls.push((call.target(), call.calldata().clone()));
        }
        self.applied += 1;
        let instant = self.mine();
        CutReceipt { tx_hash, instant, gas_used: 60_000 }
    }

    fn mine(&mut self) -> BlockInstant {
        self.block_number += 1;
        BlockInstant::new(self.block_number, GENESIS_TIMESTAMP + self.block_number * BLOCK_TIME)
    }
}

fn revert(err: impl SolError) -> Bytes { err.abi_encode().into() }

/// In-memory Diamond proxy following EIP-2535 cut semantics.
pub struct MockDiamond {
    address: Address,
    from: Address,
    chain: Mutex<ChainState>,
}

impl MockDiamond {
    pub fn new(address: Address) -> Self {
        Self { address, from: DEPLOYER, chain: Mutex::new(ChainState::default()) }
    }

    fn chain(&self) -> MutexGuard<'_, ChainState> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes the selectors to the facet without a cut, as a constructor
    /// would.
    pub fn install(&self, facet: Address, selectors: impl IntoIterator<Item = Selector>) {
        let mut chain = self.chain();
        for selector in selectors {
            chain.routes.route(selector, facet);
        }
    }

    /// Initializers revert with `InitializationFunctionReverted`.
    pub fn set_initializer_reverts(&self, reverts: bool) {
        self.chain().initializer_reverts = reverts;
    }

    /// Failing cuts are mined and revert on-chain instead of being refused
    /// at submission.
    pub fn set_mined_reverts(&self, mined: bool) { self.chain().mined_reverts = mined; }

    pub fn stall_next(&self, stall: Stall) { self.chain().stall = Some(stall); }

    /// Next applied cut leaves the selector unrouted.
    pub fn tamper_next(&self, selector: Selector) { self.chain().tamper = Some(selector); }

    /// Current routing.
    pub fn routes(&self) -> RegistryState { self.chain().routes.clone() }

    /// Number of cut transactions sent, including reverted ones.
    pub fn submissions(&self) -> usize { self.chain().submissions }

    /// Number of cuts applied.
    pub fn applied_cuts(&self) -> usize { self.chain().applied }

    /// Initializer delegatecalls executed, in order.
    pub fn initializer_calls(&self) -> Vec<(Address, Bytes)> {
        self.chain().initializer_calls.clone()
    }
}

#[async_trait]
impl DiamondProxy for MockDiamond {
    fn address(&self) -> Address { self.address }

    async fn selector_table(&self) -> Result<Vec<FacetSelectors>, DiamondError> {
        Ok(self
            .chain()
            .routes
            .facets()
            .into_iter()
            .map(|(facet, selectors)| FacetSelectors {
                facet,
                selectors: selectors.into_iter().collect(),
            })
            .collect())
    }

    async fn submit_cut(&self, cut: &Cut, init: &InitBinding) -> Result<PendingCut, DiamondError> {
        let calldata = abi::encode_cut(cut, init);
        let mut chain = self.chain();
        chain.nonce += 1;
        let tx_hash = keccak256([calldata.as_ref(), &chain.nonce.to_be_bytes()[..]].concat());

        let outcome = match chain.try_apply(cut, init) {
            Err(revert_data) if !chain.mined_reverts => {
                let (stage, reason) =
                    abi::classify_revert(Some(revert_data.as_ref()), !init.is_none());
                return Err(DiamondError::Rejected { stage, reason, tx_hash: None });
            },
            Err(revert_data) => {
                chain.mine();
                ConfirmationOutcome::Reverted { tx_hash, revert_data: Some(revert_data) }
            },
            Ok(next) => match chain.stall.take() {
                Some(Stall::Dropped) => ConfirmationOutcome::TimedOut { tx_hash },
                Some(Stall::Landed) => {
                    chain.commit(next, init, tx_hash);
                    ConfirmationOutcome::TimedOut { tx_hash }
                },
                Some(Stall::Unacknowledged { landed }) => {
                    if landed {
                        chain.commit(next, init, tx_hash);
                    }
                    chain.submissions += 1;
                    return Err(DiamondError::Broadcast { reason: "connection reset".to_string() });
                },
                None => ConfirmationOutcome::Confirmed(chain.commit(next, init, tx_hash)),
            },
        };
        chain.submissions += 1;
        chain.pending.insert(tx_hash, outcome);
        Ok(PendingCut::new(tx_hash, self.from, calldata))
    }

    async fn await_confirmation(
        &self,
        pending: &PendingCut,
        _confirmations: u64,
        _timeout: Duration,
    ) -> Result<ConfirmationOutcome, DiamondError> {
        self.chain().pending.remove(&pending.tx_hash()).ok_or_else(|| {
            DiamondError::Indeterminate {
                tx_hash: pending.tx_hash(),
                reason: "unknown transaction".to_string(),
            }
        })
    }
}

/// Deployer assigning `CREATE` addresses of [`DEPLOYER`].
pub struct MockDeployer {
    from: Address,
    nonce: AtomicU64,
    deployed: Mutex<Vec<(String, Address)>>,
}

impl Default for MockDeployer {
    fn default() -> Self { Self::new(DEPLOYER) }
}

impl MockDeployer {
    pub fn new(from: Address) -> Self {
        Self { from, nonce: AtomicU64::new(0), deployed: Mutex::new(Vec::new()) }
    }

    pub fn deploy_count(&self) -> usize { self.deployed().len() }

    /// Deployed contracts by name, in order.
    pub fn deployed(&self) -> Vec<(String, Address)> {
        self.deployed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ContractDeployer for MockDeployer {
    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        _constructor_args: Bytes,
    ) -> Result<DeployedContract, DiamondError> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let address = self.from.create(nonce);
        self.deployed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((artifact.name().to_string(), address));
        Ok(DeployedContract { address, abi: artifact.abi().clone() })
    }
}

/// Artifact with the given human-readable ABI. The bytecode is derived from
/// the name and ABI, so changing either yields a different bytecode hash.
pub fn artifact(name: &str, items: &[&str]) -> ContractArtifact {
    let abi = JsonAbi::parse(items.iter().copied()).unwrap_or_default();
    let seed: BTreeSet<&str> = items.iter().copied().collect();
    let mut code = vec![0x60, 0x80, 0x60, 0x40, 0x52];
    code.extend_from_slice(keccak256(format!("{name}{seed:?}")).as_slice());
    ContractArtifact::new(name, abi, code.into())
}
