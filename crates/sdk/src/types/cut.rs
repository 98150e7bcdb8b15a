use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use alloy::{json_abi::Function, primitives::Address};

use super::Selector;
use crate::{error::ConflictError, registry::RegistryState};

/// Kind of selector routing change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CutAction {
    Add,
    Replace,
    Remove,
}

impl CutAction {
    /// Value of `IDiamondCut.FacetCutAction` enum.
    pub fn as_u8(&self) -> u8 {
        match self {
            CutAction::Add => 0,
            CutAction::Replace => 1,
            CutAction::Remove => 2,
        }
    }
}

impl Display for CutAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CutAction::Add => write!(f, "Add"),
            CutAction::Replace => write!(f, "Replace"),
            CutAction::Remove => write!(f, "Remove"),
        }
    }
}

/// Single entry of a [`Cut`].
///
/// Each variant carries only what is meaningful for its action:
/// * [`FacetCut::Add`] routes currently unrouted selectors to `facet`.
/// * [`FacetCut::Replace`] reroutes selectors currently served by another
///   facet to `facet`.
/// * [`FacetCut::Remove`] unroutes selectors served by `previous`. On-chain
///   the entry is sent with the zero facet address as EIP-2535 requires,
///   `previous` is kept for validation and post-execution checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FacetCut {
    Add { facet: Address, selectors: BTreeSet<Selector> },
    Replace { facet: Address, selectors: BTreeSet<Selector> },
    Remove { previous: Address, selectors: BTreeSet<Selector> },
}

impl FacetCut {
    pub fn action(&self) -> CutAction {
        match self {
            FacetCut::Add { .. } => CutAction::Add,
            FacetCut::Replace { .. } => CutAction::Replace,
            FacetCut::Remove { .. } => CutAction::Remove,
        }
    }

    pub fn selectors(&self) -> &BTreeSet<Selector> {
        match self {
            FacetCut::Add { selectors, .. }
            | FacetCut::Replace { selectors, .. }
            | FacetCut::Remove { selectors, .. } => selectors,
        }
    }

    /// Facet address as submitted to the proxy.
    pub fn facet_address(&self) -> Address {
        match self {
            FacetCut::Add { facet, .. } | FacetCut::Replace { facet, .. } => *facet,
            FacetCut::Remove { .. } => Address::ZERO,
        }
    }
}

/// Initializer function validated against the initializer contract ABI,
/// waiting to be encoded by [`crate::initializer::bind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitializerCall {
    contract: String,
    target: Address,
    function: Function,
    args: Vec<String>,
}

impl InitializerCall {
    pub(crate) fn new(
        contract: String,
        target: Address,
        function: Function,
        args: Vec<String>,
    ) -> Self {
        Self { contract, target, function, args }
    }

    /// Name of the initializer contract.
    pub fn contract(&self) -> &str { &self.contract }

    /// Address the initializer is delegatecalled at.
    pub fn target(&self) -> Address { self.target }

    pub fn function(&self) -> &Function { &self.function }

    /// Raw arguments, coerced to the function parameter types when bound.
    pub fn args(&self) -> &[String] { &self.args }
}

/// Expected routing of a selector after a cut is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// Selector resolves to the facet.
    RoutesTo(Address),
    /// Selector no longer resolves to the previous facet.
    Unrouted { previous: Address },
}

impl Expectation {
    pub fn is_met(&self, actual: Option<Address>) -> bool {
        match self {
            Expectation::RoutesTo(facet) => actual == Some(*facet),
            Expectation::Unrouted { previous } => actual != Some(*previous),
        }
    }
}

/// Selector whose on-chain routing differs from what a cut commanded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteMismatch {
    pub selector: Selector,
    pub expected: Expectation,
    pub actual: Option<Address>,
}

impl Display for RouteMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actual = self.actual.map(|a| a.to_string()).unwrap_or_else(|| "unrouted".to_string());
        match self.expected {
            Expectation::RoutesTo(facet) => {
                write!(f, "{} expected at {}, found {}", self.selector, facet, actual)
            },
            Expectation::Unrouted { previous } => {
                write!(f, "{} expected off {}, found {}", self.selector, previous, actual)
            },
        }
    }
}

/// How much of a cut is reflected by a selector table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutStatus {
    Applied,
    NotApplied,
    Partial,
}

/// Atomic batch of selector routing changes, with an optional initializer
/// delegatecalled in the same transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cut {
    entries: Vec<FacetCut>,
    initializer: Option<InitializerCall>,
}

impl Cut {
    pub fn new(entries: Vec<FacetCut>, initializer: Option<InitializerCall>) -> Self {
        Self { entries, initializer }
    }

    pub fn entries(&self) -> &[FacetCut] { &self.entries }

    pub fn initializer(&self) -> Option<&InitializerCall> { self.initializer.as_ref() }

    /// Indicates the cut changes no routing.
    pub fn is_empty(&self) -> bool { self.entries.iter().all(|e| e.selectors().is_empty()) }

    /// All selectors touched by the cut.
    pub fn selectors(&self) -> BTreeSet<Selector> {
        self.entries.iter().flat_map(|e| e.selectors().iter().copied()).collect()
    }

    /// Applies the entries in order to a copy of `state`, enforcing the proxy
    /// cut rules, and returns the resulting state.
    pub fn simulate(&self, state: &RegistryState) -> Result<RegistryState, ConflictError> {
        let mut next = state.clone();
        let mut seen: BTreeMap<Selector, Vec<CutAction>> = BTreeMap::new();
        for entry in &self.entries {
            for selector in entry.selectors() {
                let actions = seen.entry(*selector).or_default();
                actions.push(entry.action());
                if !matches!(
                    actions.as_slice(),
                    [_] | [CutAction::Remove, CutAction::Add]
                ) {
                    return Err(invalid(*selector, "appears in conflicting cut entries"));
                }

                let current = next.facet_of(selector);
                match entry {
                    FacetCut::Add { facet, .. } => {
                        if facet.is_zero() {
                            return Err(invalid(*selector, "cannot be added to zero address"));
                        }
                        if let Some(owner) = current {
                            return Err(invalid(*selector, format!("already routed to {owner}")));
                        }
                        next.route(*selector, *facet);
                    },
                    FacetCut::Replace { facet, .. } => match current {
                        None => return Err(invalid(*selector, "cannot replace unrouted selector")),
                        Some(owner) if owner == *facet => {
                            return Err(invalid(*selector, "already routed to the same facet"));
                        },
                        Some(_) => next.route(*selector, *facet),
                    },
                    FacetCut::Remove { previous, .. } => match current {
                        Some(owner) if owner == *previous => next.unroute(selector),
                        Some(owner) => {
                            return Err(invalid(
                                *selector,
                                format!("routed to {owner}, not to {previous}"),
                            ));
                        },
                        None => return Err(invalid(*selector, "cannot remove unrouted selector")),
                    },
                }
            }
        }
        Ok(next)
    }

    /// Final routing expectation of every touched selector, later entries
    /// overriding earlier ones.
    pub fn expectations(&self) -> BTreeMap<Selector, Expectation> {
        let mut expectations = BTreeMap::new();
        for entry in &self.entries {
            for selector in entry.selectors() {
                let expectation = match entry {
                    FacetCut::Add { facet, .. } | FacetCut::Replace { facet, .. } => {
                        Expectation::RoutesTo(*facet)
                    },
                    FacetCut::Remove { previous, .. } => {
                        Expectation::Unrouted { previous: *previous }
                    },
                };
                expectations.insert(*selector, expectation);
            }
        }
        expectations
    }

    /// Selectors of `state` which do not match the cut's expectations.
    pub fn verify(&self, state: &RegistryState) -> Vec<RouteMismatch> {
        self.expectations()
            .into_iter()
            .filter_map(|(selector, expected)| {
                let actual = state.facet_of(&selector);
                (!expected.is_met(actual)).then_some(RouteMismatch { selector, expected, actual })
            })
            .collect()
    }

    /// Compares `state` against the cut's expectations.
    pub fn status_in(&self, state: &RegistryState) -> CutStatus {
        let expectations = self.expectations();
        let met = expectations
            .iter()
            .filter(|(selector, expected)| expected.is_met(state.facet_of(selector)))
            .count();
        if met == expectations.len() {
            CutStatus::Applied
        } else if met == 0 {
            CutStatus::NotApplied
        } else {
            CutStatus::Partial
        }
    }
}

fn invalid(selector: Selector, reason: impl Into<String>) -> ConflictError {
    ConflictError::InvalidCut { selector, reason: reason.into() }
}

#[cfg(feature = "display")]
impl Display for Cut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;
        use tabled::settings::Style;

        if self.is_empty() {
            return writeln!(f, "{}", "No routing changes".dimmed());
        }

        let mut builder = tabled::builder::Builder::default();
        builder.push_record(["Action", "Facet", "Selectors"]);
        for e in &self.entries {
            let facet = match e {
                FacetCut::Remove { previous, .. } => {
                    format!("{} (was {})", Address::ZERO, previous)
                },
                _ => e.facet_address().to_string(),
            };
            let action = match e.action() {
                CutAction::Add => e.action().to_string().green(),
                CutAction::Replace => e.action().to_string().yellow(),
                CutAction::Remove => e.action().to_string().red(),
            };
            let selectors = super::format_selectors(e.selectors());
            builder.push_record([action.to_string(), facet, selectors]);
        }
        let mut table = builder.build();
        table.with(Style::sharp());
        writeln!(f, "{}", table)?;

        match &self.initializer {
            Some(init) => writeln!(
                f,
                "Initializer: {}.{} at {} ({})",
                init.contract(),
                init.function().signature(),
                init.target(),
                init.args().join(", ")
            ),
            None => writeln!(f, "Initializer: {}", "none".dimmed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, fixed_bytes};

    use super::*;

    const F1: Address = address!("0x00000000000000000000000000000000000000f1");
    const F2: Address = address!("0x00000000000000000000000000000000000000f2");

    fn set(selectors: &[Selector]) -> BTreeSet<Selector> { selectors.iter().copied().collect() }

    #[test]
    fn test_simulate_remove_then_add() {
        let s = fixed_bytes!("0x11111111");
        let mut state = RegistryState::default();
        state.route(s, F1);

        let cut = Cut::new(
            vec![
                FacetCut::Remove { previous: F1, selectors: set(&[s]) },
                FacetCut::Add { facet: F2, selectors: set(&[s]) },
            ],
            None,
        );
        let next = cut.simulate(&state).unwrap();
        assert_eq!(next.facet_of(&s), Some(F2));
        assert_eq!(next.selectors_of(F1).len(), 0);
    }

    #[test]
    fn test_simulate_rejects_invalid_sequences() {
        let s = fixed_bytes!("0x11111111");
        let mut state = RegistryState::default();
        state.route(s, F1);

        // Add of a routed selector
        let cut = Cut::new(vec![FacetCut::Add { facet: F2, selectors: set(&[s]) }], None);
        assert!(matches!(cut.simulate(&state), Err(ConflictError::InvalidCut { .. })));

        // Replace followed by Remove of the same selector
        let cut = Cut::new(
            vec![
                FacetCut::Replace { facet: F2, selectors: set(&[s]) },
                FacetCut::Remove { previous: F2, selectors: set(&[s]) },
            ],
            None,
        );
        assert!(matches!(cut.simulate(&state), Err(ConflictError::InvalidCut { .. })));

        // Remove from the wrong facet
        let cut = Cut::new(vec![FacetCut::Remove { previous: F2, selectors: set(&[s]) }], None);
        assert!(matches!(cut.simulate(&state), Err(ConflictError::InvalidCut { .. })));

        // Replace with the same facet
        let cut = Cut::new(vec![FacetCut::Replace { facet: F1, selectors: set(&[s]) }], None);
        assert!(matches!(cut.simulate(&state), Err(ConflictError::InvalidCut { .. })));
    }

    #[test]
    fn test_verify_and_status() {
        let s1 = fixed_bytes!("0x11111111");
        let s2 = fixed_bytes!("0x22222222");
        let cut = Cut::new(
            vec![
                FacetCut::Remove { previous: F1, selectors: set(&[s1]) },
                FacetCut::Add { facet: F2, selectors: set(&[s1, s2]) },
            ],
            None,
        );

        let mut before = RegistryState::default();
        before.route(s1, F1);
        assert_eq!(cut.status_in(&before), CutStatus::NotApplied);
        assert_eq!(cut.verify(&before).len(), 2);

        let after = cut.simulate(&before).unwrap();
        assert_eq!(cut.status_in(&after), CutStatus::Applied);
        assert!(cut.verify(&after).is_empty());

        let mut partial = RegistryState::default();
        partial.route(s2, F2);
        partial.route(s1, F1);
        assert_eq!(cut.status_in(&partial), CutStatus::Partial);
        assert_eq!(
            cut.verify(&partial),
            vec![RouteMismatch { selector: s1, expected: Expectation::RoutesTo(F2), actual: Some(F1) }]
        );
    }

    #[test]
    fn test_remove_encodes_zero_address() {
        let entry = FacetCut::Remove { previous: F1, selectors: BTreeSet::new() };
        assert_eq!(entry.facet_address(), Address::ZERO);
        assert_eq!(entry.action().as_u8(), 2);
    }
}
