//! Chain collaborators over an alloy provider.
//!
//! The provider is expected to sign for `from`, e.g. built with
//! `ProviderBuilder::new().wallet(..)`.

use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    network::TransactionBuilder,
    primitives::{Address, Bytes, TxHash},
    providers::{PendingTransactionBuilder, PendingTransactionError, Provider, WatchTxError},
    rpc::types::{BlockId, TransactionRequest},
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    abi::{self, IDiamondCut, IDiamondLoupe},
    artifact::ContractArtifact,
    error::{ConfigError, DiamondError, RevertStage},
    initializer::InitBinding,
    proxy::{
        ConfirmationOutcome, ContractDeployer, CutReceipt, DeployedContract, DiamondProxy,
        FacetSelectors, PendingCut,
    },
    types::{BlockInstant, Cut},
};

/// Diamond proxy reached through an RPC provider.
#[derive(Clone, Debug)]
pub struct RpcDiamond<P> {
    address: Address,
    from: Address,
    provider: P,
}

impl<P: Provider + Clone> RpcDiamond<P> {
    pub fn new(address: Address, from: Address, provider: P) -> Self {
        Self { address, from, provider }
    }

    /// Reruns the reverted call on the parent block to recover its revert
    /// data, which receipts do not carry. Best effort: the state may differ
    /// from the one the transaction saw.
    async fn replay(&self, calldata: &Bytes, block_number: Option<u64>) -> Option<Bytes> {
        let tx = TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.address)
            .with_input(calldata.clone());
        let block = block_number
            .map(|n| BlockId::number(n.saturating_sub(1)))
            .unwrap_or_else(BlockId::latest);
        match self.provider.call(tx).block(block).await {
            Ok(_) => None,
            Err(err) => err.as_error_resp().and_then(|resp| resp.as_revert_data()),
        }
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, DiamondError> {
        let block =
            self.provider.get_block_by_number(BlockNumberOrTag::Number(block_number)).await?;
        Ok(block.map(|b| b.header.timestamp).unwrap_or_default())
    }
}

#[async_trait]
impl<P: Provider + Clone> DiamondProxy for RpcDiamond<P> {
    fn address(&self) -> Address { self.address }

    async fn selector_table(&self) -> Result<Vec<FacetSelectors>, DiamondError> {
        let loupe = IDiamondLoupe::new(self.address, &self.provider);
        let facets = loupe.facets().call().await?;
        Ok(facets
            .into_iter()
            .map(|f| FacetSelectors { facet: f.facetAddress, selectors: f.functionSelectors })
            .collect())
    }

    async fn submit_cut(&self, cut: &Cut, init: &InitBinding) -> Result<PendingCut, DiamondError> {
        let diamond = IDiamondCut::new(self.address, &self.provider);
        let call = diamond
            .diamondCut(abi::facet_cuts(cut), init.target(), init.calldata())
            .from(self.from);
        let calldata = call.calldata().clone();

        // A cut failing gas estimation is rejected before anything is sent
        if let Err(err) = call.estimate_gas().await {
            return match err.as_revert_data() {
                Some(data) => {
                    let (stage, reason) =
                        abi::classify_revert(Some(data.as_ref()), !init.is_none());
                    warn!(diamond = %self.address, %stage, %reason, "cut rejected by estimation");
                    Err(DiamondError::Rejected { stage, reason, tx_hash: None })
                },
                None => Err(err.into()),
            };
        }

        let pending = call.send().await.map_err(broadcast_error)?;
        Ok(PendingCut::new(*pending.tx_hash(), self.from, calldata))
    }

    async fn await_confirmation(
        &self,
        pending: &PendingCut,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<ConfirmationOutcome, DiamondError> {
        let tx_hash = pending.tx_hash();
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_required_confirmations(confirmations)
            .with_timeout(Some(timeout))
            .get_receipt()
            .await;
        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(PendingTransactionError::TxWatcher(WatchTxError::Timeout)) => {
                return Ok(ConfirmationOutcome::TimedOut { tx_hash });
            },
            Err(err) => return Err(pending_error(tx_hash, err)),
        };

        if !receipt.status() {
            let revert_data = self.replay(pending.calldata(), receipt.block_number).await;
            return Ok(ConfirmationOutcome::Reverted { tx_hash, revert_data });
        }

        let block_number = receipt.block_number.unwrap_or_default();
        let block_timestamp = self.block_timestamp(block_number).await?;
        debug!(%tx_hash, block_number, "cut receipt received");
        Ok(ConfirmationOutcome::Confirmed(CutReceipt {
            tx_hash,
            instant: BlockInstant::new(block_number, block_timestamp),
            gas_used: receipt.gas_used,
        }))
    }
}

/// Contract deployer sending creation transactions through an RPC provider.
#[derive(Clone, Debug)]
pub struct RpcDeployer<P> {
    from: Address,
    provider: P,
    confirmations: u64,
    timeout: Duration,
}

impl<P: Provider + Clone> RpcDeployer<P> {
    pub fn new(from: Address, provider: P, confirmations: u64, timeout: Duration) -> Self {
        Self { from, provider, confirmations, timeout }
    }
}

#[async_trait]
impl<P: Provider + Clone> ContractDeployer for RpcDeployer<P> {
    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: Bytes,
    ) -> Result<DeployedContract, DiamondError> {
        if artifact.bytecode().is_empty() {
            return Err(ConfigError::InvalidArtifact {
                name: artifact.name().to_string(),
                reason: "no creation bytecode".to_string(),
            }
            .into());
        }
        let code = [artifact.bytecode().as_ref(), constructor_args.as_ref()].concat();
        let tx = TransactionRequest::default().with_from(self.from).with_deploy_code(code);

        let pending = self.provider.send_transaction(tx).await.map_err(broadcast_error)?;
        let tx_hash = *pending.tx_hash();
        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.timeout))
            .get_receipt()
            .await
            .map_err(|err| pending_error(tx_hash, err))?;

        let address = match receipt.contract_address {
            Some(address) if receipt.status() => address,
            _ => {
                return Err(DiamondError::Rejected {
                    stage: RevertStage::Unknown,
                    reason: format!("deployment of `{}` failed", artifact.name()),
                    tx_hash: Some(tx_hash),
                });
            },
        };
        debug!(contract = artifact.name(), %address, %tx_hash, "contract deployed");
        Ok(DeployedContract { address, abi: artifact.abi().clone() })
    }
}

fn pending_error(tx_hash: TxHash, err: PendingTransactionError) -> DiamondError {
    DiamondError::Indeterminate { tx_hash, reason: err.to_string() }
}

/// Failure to send: the node may have accepted the transaction before the
/// connection dropped, so no retry happens without reconciling first.
fn broadcast_error(err: impl std::fmt::Display) -> DiamondError {
    warn!(%err, "transaction broadcast failed");
    DiamondError::Broadcast { reason: err.to_string() }
}
