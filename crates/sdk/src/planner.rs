use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::Address;
use tracing::debug;

use crate::{
    error::DiamondError,
    initializer::{InitializerSpec, ResolvedInitializer},
    registry::DiffResult,
    types::{Cut, Facet, FacetCut, Selector},
};

/// Builds the minimal cut installing `facet` according to the diff.
///
/// Selectors moving away from a superseded facet are removed from it first,
/// then added to the incoming facet together with the fresh ones, so each
/// superseded facet gets a single `Remove` (ordered by address) followed by
/// one `Add`. The initializer function is looked up even when the diff is
/// empty, but is only attached to a cut that changes routing.
pub fn plan(
    facet: &Facet,
    diff: &DiffResult,
    initializer: Option<(&ResolvedInitializer, &InitializerSpec)>,
) -> Result<Cut, DiamondError> {
    let call = initializer
        .map(|(init, spec)| init.function_call(&spec.function, spec.args.clone()))
        .transpose()?;

    if diff.is_empty() {
        if call.is_some() {
            debug!(facet = facet.name(), "no routing changes, initializer not attached");
        }
        return Ok(Cut::default());
    }

    let mut removals: BTreeMap<Address, BTreeSet<Selector>> = BTreeMap::new();
    for (old, selectors) in diff.to_replace.iter().chain(diff.to_remove.iter()) {
        removals.entry(*old).or_default().extend(selectors);
    }

    let mut entries: Vec<FacetCut> = removals
        .into_iter()
        .map(|(previous, selectors)| FacetCut::Remove { previous, selectors })
        .collect();

    let additions: BTreeSet<Selector> =
        diff.to_add.iter().chain(diff.to_replace.values().flatten()).copied().collect();
    if !additions.is_empty() {
        entries.push(FacetCut::Add { facet: facet.address(), selectors: additions });
    }

    debug!(
        facet = facet.name(),
        address = %facet.address(),
        entries = entries.len(),
        added = diff.to_add.len(),
        moved = diff.to_replace.values().map(BTreeSet::len).sum::<usize>(),
        removed = diff.to_remove.values().map(BTreeSet::len).sum::<usize>(),
        "cut planned"
    );
    Ok(Cut::new(entries, call))
}
