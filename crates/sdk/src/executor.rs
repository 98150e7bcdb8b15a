use std::time::Duration;

use alloy::primitives::TxHash;
use tracing::{error, info, warn};

use crate::{
    DiamondConfig, abi,
    error::{ConflictError, DiamondError},
    initializer::InitBinding,
    proxy::{ConfirmationOutcome, DiamondProxy},
    registry::RegistryState,
    types::{BlockInstant, Cut, CutStatus, Expectation, RouteMismatch},
};

/// Proof that the live routing of a proxy matches what was committed.
///
/// Only [`CutExecutor`] constructs it, and the persister requires it, so a
/// record can never get ahead of the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CutConfirmation {
    tx_hash: Option<TxHash>,
    instant: Option<BlockInstant>,
    registry: RegistryState,
}

impl CutConfirmation {
    /// Cut transaction, absent when no routing change was needed.
    pub fn tx_hash(&self) -> Option<TxHash> { self.tx_hash }

    /// Block the cut was confirmed at.
    pub fn instant(&self) -> Option<BlockInstant> { self.instant }

    /// Selector table read back after the cut.
    pub fn registry(&self) -> &RegistryState { &self.registry }
}

/// Submits cuts and checks their outcome against the live selector table.
#[derive(Clone, Debug)]
pub struct CutExecutor {
    confirmations: u64,
    timeout: Duration,
}

impl CutExecutor {
    pub fn new(confirmations: u64, timeout: Duration) -> Self { Self { confirmations, timeout } }

    pub fn from_config(config: &DiamondConfig) -> Self {
        Self::new(config.confirmations, config.confirmation_timeout)
    }

    /// Executes the cut and its initializer in a single transaction.
    ///
    /// Reverts are never retried. Once submitted, failing to observe a
    /// definitive outcome yields [`DiamondError::Indeterminate`] and the cut
    /// must be checked with [`reconcile`] before anything else is attempted.
    pub async fn execute<D: DiamondProxy + ?Sized>(
        &self,
        proxy: &D,
        cut: &Cut,
        init: &InitBinding,
    ) -> Result<CutConfirmation, DiamondError> {
        let pending = proxy.submit_cut(cut, init).await?;
        let tx_hash = pending.tx_hash();
        info!(
            diamond = %proxy.address(),
            %tx_hash,
            from = %pending.from(),
            entries = cut.entries().len(),
            "cut submitted"
        );

        let outcome =
            match proxy.await_confirmation(&pending, self.confirmations, self.timeout).await {
                Ok(outcome) => outcome,
                Err(DiamondError::Transport(err)) => {
                    return Err(indeterminate(tx_hash, err.to_string()));
                },
                Err(DiamondError::Contract(err)) => {
                    return Err(indeterminate(tx_hash, err.to_string()));
                },
                Err(err) => return Err(err),
            };

        match outcome {
            ConfirmationOutcome::Confirmed(receipt) => {
                let registry = RegistryState::load(Some(proxy)).await.map_err(|err| {
                    indeterminate(tx_hash, format!("confirmed but routing unreadable: {err}"))
                })?;
                let mismatches = cut.verify(&registry);
                if !mismatches.is_empty() {
                    error!(%tx_hash, mismatches = mismatches.len(), "routing differs from the cut");
                    return Err(DiamondError::Integrity { tx_hash, mismatches });
                }
                info!(
                    %tx_hash,
                    instant = %receipt.instant,
                    gas_used = receipt.gas_used,
                    "cut confirmed"
                );
                Ok(CutConfirmation {
                    tx_hash: Some(receipt.tx_hash),
                    instant: Some(receipt.instant),
                    registry,
                })
            },
            ConfirmationOutcome::Reverted { tx_hash, revert_data } => {
                let revert_data: Option<&[u8]> = revert_data.as_ref().map(|data| data.as_ref());
                let (stage, reason) = abi::classify_revert(revert_data, !init.is_none());
                warn!(%tx_hash, %stage, %reason, "cut reverted");
                Err(DiamondError::Rejected { stage, reason, tx_hash: Some(tx_hash) })
            },
            ConfirmationOutcome::TimedOut { tx_hash } => {
                warn!(%tx_hash, timeout = ?self.timeout, "cut not confirmed in time");
                Err(indeterminate(
                    tx_hash,
                    format!(
                        "{} confirmation(s) not reached within {:?}",
                        self.confirmations, self.timeout
                    ),
                ))
            },
        }
    }

    /// Confirms the live routing already matches `expected` when no cut is
    /// needed, e.g. after an indeterminate cut turned out to have landed.
    pub async fn confirm_unchanged<D: DiamondProxy + ?Sized>(
        &self,
        proxy: &D,
        expected: &RegistryState,
    ) -> Result<CutConfirmation, DiamondError> {
        let registry = RegistryState::load(Some(proxy)).await?;
        let mismatches: Vec<RouteMismatch> = expected
            .routes()
            .iter()
            .filter(|(selector, facet)| registry.facet_of(selector) != Some(**facet))
            .map(|(selector, facet)| RouteMismatch {
                selector: *selector,
                expected: Expectation::RoutesTo(*facet),
                actual: registry.facet_of(selector),
            })
            .collect();
        if !mismatches.is_empty() {
            return Err(ConflictError::Drift(mismatches).into());
        }
        Ok(CutConfirmation { tx_hash: None, instant: None, registry })
    }
}

/// How much of the cut the live selector table reflects.
pub async fn reconcile<D: DiamondProxy + ?Sized>(
    proxy: &D,
    cut: &Cut,
) -> Result<CutStatus, DiamondError> {
    let registry = RegistryState::load(Some(proxy)).await?;
    let status = cut.status_in(&registry);
    info!(diamond = %proxy.address(), ?status, "cut reconciled");
    Ok(status)
}

fn indeterminate(tx_hash: TxHash, reason: impl Into<String>) -> DiamondError {
    DiamondError::Indeterminate { tx_hash, reason: reason.into() }
}
