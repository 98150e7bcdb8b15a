//! Diamond ([`EIP-2535`]) facet deployment SDK.
//!
//! # Overview
//!
//! Orchestrates adding and upgrading facets of a Diamond proxy: computes
//! routable function selectors of a facet, plans a minimal cut against the
//! live selector table, binds an optional one-time initializer, executes the
//! cut and verifies the resulting routing, then persists the deployment record
//! with the aggregate ABI.
//!
//! Use [`pipeline::Pipeline`] to run the whole sequence, or the individual
//! stages ([`selectors`], [`registry`], [`planner`], [`initializer`],
//! [`executor`], [`record`]) to compose custom flows.
//!
//! Chain access goes through [`proxy::DiamondProxy`] and
//! [`proxy::ContractDeployer`], implemented over an alloy provider by
//! [`rpc::RpcDiamond`] and [`rpc::RpcDeployer`].
//!
//! # Limitations/follow-ups
//!
//! * Deploying the Diamond proxy itself is not covered, the proxy must exist
//!   and expose `IDiamondCut` and `IDiamondLoupe`.
//!
//! * Facet upgrades always use `Remove` followed by `Add`, `Replace` cuts are
//!   understood when validating but never planned.
//!
//! # Features
//!
//! | Feature | Default | Description |
//! | --- | --- | --- |
//! | `display` | yes | Enables [`std::fmt::Display`] implementation for cuts and registry state. |
//! | `testing` | yes | Enables [`testing`] module. |
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory Diamond proxy and contract deployer
//! following EIP-2535 cut semantics.
//!
//!
//! [`EIP-2535`]: https://eips.ethereum.org/EIPS/eip-2535

pub mod abi;
pub mod artifact;
pub mod error;
pub mod executor;
pub mod initializer;
pub mod pipeline;
pub mod planner;
pub mod proxy;
pub mod record;
pub mod registry;
pub mod rpc;
pub mod selectors;
#[cfg(feature = "testing")]
pub mod testing;
pub mod types;

use std::time::Duration;

use alloy::primitives::Address;

use crate::selectors::Denylist;

#[derive(Clone, Debug)]
/// Network and Diamond proxy the deployment is operating on.
pub struct Network {
    name: String,
    chain_id: u64,
    diamond: Address,
}

impl Network {
    pub fn new(name: impl Into<String>, chain_id: u64, diamond: Address) -> Self {
        Self { name: name.into(), chain_id, diamond }
    }

    /// Name used to key deployment records, e.g. `sepolia`.
    pub fn name(&self) -> &str { &self.name }

    pub fn chain_id(&self) -> u64 { self.chain_id }

    /// Address of the Diamond proxy.
    pub fn diamond(&self) -> Address { self.diamond }
}

/// Tunables of the facet deployment pipeline.
#[derive(Clone, Debug)]
pub struct DiamondConfig {
    /// Function names excluded from routing.
    pub denylist: Denylist,
    /// Confirmation depth to wait for after a cut is included.
    pub confirmations: u64,
    /// Maximum time to wait for confirmations before the outcome is reported
    /// as indeterminate.
    pub confirmation_timeout: Duration,
    /// Remove selectors of a superseded facet which its replacement no longer
    /// exposes.
    pub prune_stale: bool,
}

impl Default for DiamondConfig {
    fn default() -> Self {
        Self {
            denylist: Denylist::default(),
            confirmations: 1,
            confirmation_timeout: Duration::from_secs(120),
            prune_stale: true,
        }
    }
}
