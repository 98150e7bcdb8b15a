use alloy::primitives::{Address, TxHash};
use itertools::Itertools;
use thiserror::Error;

use crate::types::{RouteMismatch, Selector};

/// Invalid input detected before anything is submitted on-chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("function `{function}` has unresolvable parameter type `{ty}`: {reason}")]
    UnresolvableType { function: String, ty: String, reason: String },

    #[error("duplicate function signature `{0}`")]
    DuplicateSignature(String),

    #[error("selector {selector} is shared by `{first}` and `{second}`")]
    SelectorClash { selector: Selector, first: String, second: String },

    #[error("facet `{0}` exposes no routable selectors")]
    NoRoutableSelectors(String),

    #[error("artifact `{name}` not found under {path}")]
    MissingArtifact { name: String, path: String },

    #[error("invalid artifact `{name}`: {reason}")]
    InvalidArtifact { name: String, reason: String },

    #[error("facet `{0}` is not part of the deployment record")]
    UnknownFacet(String),

    #[error("initializer contract `{contract}` has no function `{function}`")]
    UnknownInitializerFunction { contract: String, function: String },

    #[error("initializer `{contract}.{function}` is ambiguous for {arity} argument(s)")]
    AmbiguousInitializer { contract: String, function: String, arity: usize },

    #[error("cannot encode call to `{function}`: {reason}")]
    InitializerEncoding { function: String, reason: String },

    #[error("initializer target must be a deployed contract")]
    ZeroInitializerTarget,

    #[error("Diamond proxy address not configured")]
    MissingDiamond,
}

/// Ownership or ABI clash detected while planning or merging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("selector {selector} is served by {owner}, which {incoming} does not supersede")]
    SelectorOwned { selector: Selector, owner: Address, incoming: Address },

    #[error(
        "selector {selector} is exposed as `{existing}` by `{existing_facet}` and as `{incoming}` by `{incoming_facet}`"
    )]
    SignatureCollision {
        selector: Selector,
        existing: String,
        existing_facet: String,
        incoming: String,
        incoming_facet: String,
    },

    #[error("invalid cut for selector {selector}: {reason}")]
    InvalidCut { selector: Selector, reason: String },

    #[error("live routing drifted from the expected state: {}", join_mismatches(.0))]
    Drift(Vec<RouteMismatch>),
}

/// Part of the cut transaction a revert originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum RevertStage {
    #[display("initializer")]
    Initializer,
    #[display("selector application")]
    SelectorApplication,
    #[display("unknown stage")]
    Unknown,
}

/// Category of a [`DiamondError`], telling callers whether retrying is safe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum ErrorClass {
    #[display("configuration")]
    Configuration,
    #[display("conflict")]
    Conflict,
    #[display("on-chain rejection")]
    Rejection,
    #[display("integrity")]
    Integrity,
    #[display("indeterminate")]
    Indeterminate,
    #[display("transport")]
    Transport,
    #[display("storage")]
    Storage,
    #[display("aborted")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum DiamondError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("cut reverted during {stage}: {reason}")]
    Rejected { stage: RevertStage, reason: String, tx_hash: Option<TxHash> },

    #[error("routing after {tx_hash} differs from the cut: {}", join_mismatches(.mismatches))]
    Integrity { tx_hash: TxHash, mismatches: Vec<RouteMismatch> },

    #[error("outcome of {tx_hash} is indeterminate: {reason}")]
    Indeterminate { tx_hash: TxHash, reason: String },

    /// Sending failed without the node acknowledging the transaction, which
    /// may still be mined.
    #[error("transaction broadcast unacknowledged, it may still land: {reason}")]
    Broadcast { reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] alloy::transports::TransportError),

    #[error("contract call error: {0}")]
    Contract(#[from] alloy::contract::Error),

    #[error("record store error: {0}")]
    Store(String),

    #[error("cancelled before submission")]
    Cancelled,

    #[error("halted by an earlier integrity failure")]
    Halted,
}

impl DiamondError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DiamondError::Config(_) => ErrorClass::Configuration,
            DiamondError::Conflict(_) => ErrorClass::Conflict,
            DiamondError::Rejected { .. } => ErrorClass::Rejection,
            DiamondError::Integrity { .. } => ErrorClass::Integrity,
            DiamondError::Indeterminate { .. } | DiamondError::Broadcast { .. } => {
                ErrorClass::Indeterminate
            },
            DiamondError::Transport(_) | DiamondError::Contract(_) => ErrorClass::Transport,
            DiamondError::Store(_) => ErrorClass::Storage,
            DiamondError::Cancelled | DiamondError::Halted => ErrorClass::Aborted,
        }
    }

    /// Indicates the failed operation may be rerun.
    ///
    /// Transport failures surfacing as this error happen before anything is
    /// broadcast and leave no state behind. Once a transaction is sent,
    /// failures are indeterminate: the outcome must be reconciled with
    /// [`crate::executor::reconcile`] before rerunning.
    pub fn is_retry_safe(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Indeterminate | ErrorClass::Transport | ErrorClass::Aborted
        ) && !matches!(self, DiamondError::Halted)
    }
}

impl From<serde_json::Error> for DiamondError {
    fn from(err: serde_json::Error) -> Self { DiamondError::Store(err.to_string()) }
}

impl From<std::io::Error> for DiamondError {
    fn from(err: std::io::Error) -> Self { DiamondError::Store(err.to_string()) }
}

fn join_mismatches(mismatches: &[RouteMismatch]) -> String {
    mismatches.iter().map(|m| m.to_string()).join("; ")
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, fixed_bytes};

    use super::*;
    use crate::types::Expectation;

    #[test]
    fn test_error_classes() {
        let err = DiamondError::from(ConfigError::NoRoutableSelectors("F".to_string()));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.is_retry_safe());

        let err = DiamondError::Indeterminate { tx_hash: TxHash::ZERO, reason: "timeout".into() };
        assert_eq!(err.class(), ErrorClass::Indeterminate);
        assert!(err.is_retry_safe());

        let err = DiamondError::Rejected {
            stage: RevertStage::Initializer,
            reason: "boom".into(),
            tx_hash: None,
        };
        assert_eq!(err.class(), ErrorClass::Rejection);
        assert!(!err.is_retry_safe());

        let err = DiamondError::Broadcast { reason: "connection reset".into() };
        assert_eq!(err.class(), ErrorClass::Indeterminate);
        assert!(err.to_string().contains("may still land"));

        assert!(DiamondError::Cancelled.is_retry_safe());
        assert!(!DiamondError::Halted.is_retry_safe());
    }

    #[test]
    fn test_integrity_message_lists_mismatches() {
        let facet = address!("0x00000000000000000000000000000000000000f2");
        let err = DiamondError::Integrity {
            tx_hash: TxHash::ZERO,
            mismatches: vec![RouteMismatch {
                selector: fixed_bytes!("0x11111111"),
                expected: Expectation::RoutesTo(facet),
                actual: None,
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("0x11111111 expected at"));
        assert!(msg.ends_with("found unrouted"));
    }
}
