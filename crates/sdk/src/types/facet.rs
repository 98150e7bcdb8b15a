use std::collections::BTreeSet;

use alloy::{json_abi::JsonAbi, primitives::Address};

use super::Selector;
use crate::{
    error::ConfigError,
    selectors::{self, Denylist},
};

/// Deployed contract providing a subset of the proxy's callable functions.
///
/// Facets are immutable: upgrading a facet means deploying a new one and
/// rerouting its selectors.
#[derive(Clone, derive_more::Debug, PartialEq, Eq)]
pub struct Facet {
    name: String,
    address: Address,
    selectors: BTreeSet<Selector>,
    #[debug(skip)]
    abi: JsonAbi,
}

impl Facet {
    pub fn new(
        name: impl Into<String>,
        address: Address,
        selectors: BTreeSet<Selector>,
        abi: JsonAbi,
    ) -> Self {
        Self { name: name.into(), address, selectors, abi }
    }

    /// Builds the facet from the ABI of the deployed contract, keeping only
    /// the functions allowed by the `denylist`.
    pub fn from_abi(
        name: impl Into<String>,
        address: Address,
        abi: &JsonAbi,
        denylist: &Denylist,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let selectors = selectors::compute_selectors(abi, denylist)?;
        if selectors.is_empty() {
            return Err(ConfigError::NoRoutableSelectors(name));
        }
        Ok(Self { abi: selectors::routable_abi(abi, denylist), name, address, selectors })
    }

    /// Human readable name, usually the contract name.
    pub fn name(&self) -> &str { &self.name }

    pub fn address(&self) -> Address { self.address }

    /// Selectors the facet serves through the proxy.
    pub fn selectors(&self) -> &BTreeSet<Selector> { &self.selectors }

    /// Routable functions plus events and errors of the facet contract.
    pub fn abi(&self) -> &JsonAbi { &self.abi }
}
