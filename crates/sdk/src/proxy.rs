//! Chain-facing collaborators of the pipeline.
//!
//! [`DiamondProxy`] and [`ContractDeployer`] are the only ways the SDK touches
//! the chain. [`crate::rpc`] implements them over an alloy provider,
//! [`crate::testing`] with an in-memory proxy.

use std::time::Duration;

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes, TxHash},
};
use async_trait::async_trait;

use crate::{
    artifact::ContractArtifact,
    error::DiamondError,
    initializer::InitBinding,
    types::{BlockInstant, Cut, Selector},
};

/// Facet and its selectors as reported by `IDiamondLoupe.facets()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacetSelectors {
    pub facet: Address,
    pub selectors: Vec<Selector>,
}

/// Submitted cut transaction awaiting confirmation.
#[derive(Clone, derive_more::Debug)]
pub struct PendingCut {
    tx_hash: TxHash,
    from: Address,
    #[debug("{}", calldata.len())]
    calldata: Bytes,
}

impl PendingCut {
    pub fn new(tx_hash: TxHash, from: Address, calldata: Bytes) -> Self {
        Self { tx_hash, from, calldata }
    }

    pub fn tx_hash(&self) -> TxHash { self.tx_hash }

    /// Sender of the transaction.
    pub fn from(&self) -> Address { self.from }

    /// Encoded `diamondCut` call, kept to replay a reverted transaction for
    /// its revert data.
    pub fn calldata(&self) -> &Bytes { &self.calldata }
}

/// Receipt of a confirmed cut transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CutReceipt {
    pub tx_hash: TxHash,
    pub instant: BlockInstant,
    pub gas_used: u64,
}

/// Definitive or indeterminate outcome of a submitted cut.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed(CutReceipt),
    /// Transaction was included but reverted. Revert data is provided when
    /// the chain exposes it.
    Reverted { tx_hash: TxHash, revert_data: Option<Bytes> },
    /// Confirmation depth not reached in time, the transaction may still land.
    TimedOut { tx_hash: TxHash },
}

/// Diamond proxy accepting cuts.
#[async_trait]
pub trait DiamondProxy: Send + Sync {
    /// Address of the proxy.
    fn address(&self) -> Address;

    /// Current routing as reported by the proxy loupe.
    async fn selector_table(&self) -> Result<Vec<FacetSelectors>, DiamondError>;

    /// Submits the cut with the initializer in a single transaction.
    ///
    /// Returns [`DiamondError::Rejected`] if the proxy refuses the cut before
    /// inclusion (e.g. during gas estimation), in which case nothing has been
    /// sent.
    async fn submit_cut(&self, cut: &Cut, init: &InitBinding) -> Result<PendingCut, DiamondError>;

    /// Waits for the submitted cut to reach `confirmations` blocks.
    async fn await_confirmation(
        &self,
        pending: &PendingCut,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<ConfirmationOutcome, DiamondError>;
}

/// Deployed contract instance.
#[derive(Clone, derive_more::Debug)]
pub struct DeployedContract {
    pub address: Address,
    #[debug(skip)]
    pub abi: JsonAbi,
}

/// Deploys contracts from compiled artifacts.
#[async_trait]
pub trait ContractDeployer: Send + Sync {
    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: Bytes,
    ) -> Result<DeployedContract, DiamondError>;
}

#[async_trait]
impl<T: DiamondProxy + ?Sized> DiamondProxy for std::sync::Arc<T> {
    fn address(&self) -> Address { (**self).address() }

    async fn selector_table(&self) -> Result<Vec<FacetSelectors>, DiamondError> {
        (**self).selector_table().await
    }

    async fn submit_cut(&self, cut: &Cut, init: &InitBinding) -> Result<PendingCut, DiamondError> {
        (**self).submit_cut(cut, init).await
    }

    async fn await_confirmation(
        &self,
        pending: &PendingCut,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<ConfirmationOutcome, DiamondError> {
        (**self).await_confirmation(pending, confirmations, timeout).await
    }
}

#[async_trait]
impl<T: ContractDeployer + ?Sized> ContractDeployer for std::sync::Arc<T> {
    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: Bytes,
    ) -> Result<DeployedContract, DiamondError> {
        (**self).deploy(artifact, constructor_args).await
    }
}
