use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::Address;
use tracing::{debug, warn};

use crate::{
    error::{ConflictError, DiamondError},
    proxy::{DiamondProxy, FacetSelectors},
    record::DeploymentRecord,
    types::{Facet, Selector},
};

/// Selector routing of a single Diamond proxy.
///
/// Always reload with [`RegistryState::load`] right before planning, the
/// state is never cached across transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryState {
    routes: BTreeMap<Selector, Address>,
}

/// Partition of an incoming facet's selectors against the current routing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Selectors currently unrouted.
    pub to_add: BTreeSet<Selector>,
    /// Selectors served by superseded facets, grouped by the facet.
    pub to_replace: BTreeMap<Address, BTreeSet<Selector>>,
    /// Selectors of superseded facets the incoming facet no longer exposes.
    pub to_remove: BTreeMap<Address, BTreeSet<Selector>>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_replace.is_empty() && self.to_remove.is_empty()
    }
}

impl RegistryState {
    /// Current routing of the proxy, or empty state if there is no proxy
    /// deployed yet.
    pub async fn load<D: DiamondProxy + ?Sized>(proxy: Option<&D>) -> Result<Self, DiamondError> {
        let Some(proxy) = proxy else {
            return Ok(Self::default());
        };
        let table = proxy.selector_table().await?;
        let state = Self::from_table(&table);
        debug!(
            diamond = %proxy.address(),
            facets = table.len(),
            selectors = state.routes.len(),
            "selector table loaded"
        );
        Ok(state)
    }

    /// State implied by the facets of a deployment record.
    pub fn from_record(record: &DeploymentRecord) -> Self {
        let mut routes = BTreeMap::new();
        for facet in record.facets() {
            for selector in facet.selectors() {
                routes.insert(*selector, facet.address());
            }
        }
        Self { routes }
    }

    pub fn from_table(table: &[FacetSelectors]) -> Self {
        let mut routes = BTreeMap::new();
        for entry in table {
            for selector in &entry.selectors {
                if let Some(owner) = routes.insert(*selector, entry.facet) {
                    warn!(%selector, %owner, facet = %entry.facet, "selector listed twice by proxy");
                }
            }
        }
        Self { routes }
    }

    /// Facet currently serving the selector.
    pub fn facet_of(&self, selector: &Selector) -> Option<Address> {
        self.routes.get(selector).copied()
    }

    /// Selectors currently served by the facet.
    pub fn selectors_of(&self, facet: Address) -> BTreeSet<Selector> {
        self.routes
            .iter()
            .filter(|(_, owner)| **owner == facet)
            .map(|(selector, _)| *selector)
            .collect()
    }

    /// Selectors grouped by serving facet.
    pub fn facets(&self) -> BTreeMap<Address, BTreeSet<Selector>> {
        let mut facets: BTreeMap<Address, BTreeSet<Selector>> = BTreeMap::new();
        for (selector, facet) in &self.routes {
            facets.entry(*facet).or_default().insert(*selector);
        }
        facets
    }

    pub fn routes(&self) -> &BTreeMap<Selector, Address> { &self.routes }

    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    pub(crate) fn route(&mut self, selector: Selector, facet: Address) {
        self.routes.insert(selector, facet);
    }

    pub(crate) fn unroute(&mut self, selector: &Selector) { self.routes.remove(selector); }

    /// Partitions the incoming facet's selectors against the current routing.
    ///
    /// Selectors already routed to the incoming facet are dropped, so
    /// redeploying an unchanged facet yields an empty diff. A selector routed
    /// to a facet outside `superseded` is a conflict: ownership is never
    /// silently moved between unrelated facets.
    ///
    /// With `prune_stale`, selectors of superseded facets the incoming facet
    /// does not expose anymore are scheduled for removal.
    pub fn diff(
        &self,
        incoming: &Facet,
        superseded: &BTreeSet<Address>,
        prune_stale: bool,
    ) -> Result<DiffResult, ConflictError> {
        let mut diff = DiffResult::default();
        for selector in incoming.selectors() {
            match self.facet_of(selector) {
                None => {
                    diff.to_add.insert(*selector);
                },
                Some(owner) if owner == incoming.address() => (),
                Some(owner) if superseded.contains(&owner) => {
                    diff.to_replace.entry(owner).or_default().insert(*selector);
                },
                Some(owner) => {
                    return Err(ConflictError::SelectorOwned {
                        selector: *selector,
                        owner,
                        incoming: incoming.address(),
                    });
                },
            }
        }

        if prune_stale {
            for old in superseded.iter().filter(|old| **old != incoming.address()) {
                let stale: BTreeSet<_> = self
                    .selectors_of(*old)
                    .difference(incoming.selectors())
                    .copied()
                    .collect();
                if !stale.is_empty() {
                    diff.to_remove.insert(*old, stale);
                }
            }
        }

        Ok(diff)
    }
}

#[cfg(feature = "display")]
impl std::fmt::Display for RegistryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;
        use tabled::settings::Style;

        if self.routes.is_empty() {
            return writeln!(f, "{}", "No selectors routed".dimmed());
        }

        let mut builder = tabled::builder::Builder::default();
        builder.push_record(["Facet", "Count", "Selectors"]);
        for (facet, selectors) in self.facets() {
            builder.push_record([
                facet.to_string(),
                selectors.len().to_string(),
                crate::types::format_selectors(&selectors),
            ]);
        }
        let mut table = builder.build();
        table.with(Style::sharp());
        writeln!(f, "{}", table)
    }
}
