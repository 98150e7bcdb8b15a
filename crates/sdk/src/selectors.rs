//! Routable function selectors of a facet ABI.
//!
//! Only functions are routable, events and errors never produce selectors.
//! Functions whose name contains an entry of the [`Denylist`] (case
//! insensitive) are excluded, which keeps one-time initializers from becoming
//! permanently callable through the proxy.

use std::collections::{BTreeMap, BTreeSet};

use alloy::{
    dyn_abi::Specifier,
    json_abi::{Function, JsonAbi},
    primitives::keccak256,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::Selector};

/// Case-insensitive function name substrings excluded from routing.
///
/// Entries are stored lowercased whichever way the list is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Denylist(Vec<String>);

impl From<Vec<String>> for Denylist {
    fn from(entries: Vec<String>) -> Self { Self::new(entries) }
}

impl From<Denylist> for Vec<String> {
    fn from(denylist: Denylist) -> Self { denylist.0 }
}

impl Default for Denylist {
    fn default() -> Self { Self(vec!["init".to_string()]) }
}

impl Denylist {
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = S>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|e| e.into().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    /// Denylist excluding nothing.
    pub fn none() -> Self { Self(Vec::new()) }

    pub fn entries(&self) -> &[String] { &self.0 }

    pub fn is_denied(&self, function_name: &str) -> bool {
        let name = function_name.to_lowercase();
        self.0.iter().any(|e| name.contains(e.as_str()))
    }
}

/// Canonical signature `name(type1,type2,...)` of the function, with tuples
/// expanded to their component types.
///
/// Fails if any parameter type does not resolve to a concrete ABI type.
pub fn canonical_signature(function: &Function) -> Result<String, ConfigError> {
    let mut types = Vec::with_capacity(function.inputs.len());
    for param in &function.inputs {
        let ty = param.selector_type();
        param.resolve().map_err(|err| ConfigError::UnresolvableType {
            function: function.name.clone(),
            ty: ty.to_string(),
            reason: err.to_string(),
        })?;
        types.push(ty);
    }
    Ok(format!("{}({})", function.name, types.iter().join(",")))
}

/// First 4 bytes of the Keccak-256 hash of the signature.
pub fn selector_of(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

/// Functions of the ABI not excluded by the denylist.
pub fn routable_functions<'a>(
    abi: &'a JsonAbi,
    denylist: &'a Denylist,
) -> impl Iterator<Item = &'a Function> + 'a {
    abi.functions().filter(|f| !denylist.is_denied(&f.name))
}

/// Computes the set of selectors the proxy should route for the ABI.
///
/// Duplicate signatures, and distinct signatures hashing to the same
/// selector, are reported rather than merged.
pub fn compute_selectors(
    abi: &JsonAbi,
    denylist: &Denylist,
) -> Result<BTreeSet<Selector>, ConfigError> {
    let mut seen: BTreeMap<Selector, String> = BTreeMap::new();
    for function in routable_functions(abi, denylist) {
        let signature = canonical_signature(function)?;
        let selector = selector_of(&signature);
        match seen.get(&selector) {
            Some(existing) if *existing == signature => {
                return Err(ConfigError::DuplicateSignature(signature));
            },
            Some(existing) => {
                return Err(ConfigError::SelectorClash {
                    selector,
                    first: existing.clone(),
                    second: signature,
                });
            },
            None => {
                seen.insert(selector, signature);
            },
        }
    }
    Ok(seen.into_keys().collect())
}

/// ABI restricted to routable functions, keeping events and errors.
pub fn routable_abi(abi: &JsonAbi, denylist: &Denylist) -> JsonAbi {
    JsonAbi {
        functions: abi
            .functions
            .iter()
            .filter(|(name, _)| !denylist.is_denied(name))
            .map(|(name, overloads)| (name.clone(), overloads.clone()))
            .collect(),
        events: abi.events.clone(),
        errors: abi.errors.clone(),
        ..Default::default()
    }
}
