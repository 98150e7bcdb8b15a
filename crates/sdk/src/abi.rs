//! EIP-2535 contract bindings and revert decoding.

use alloy::{
    primitives::{Address, Bytes},
    sol,
    sol_types::{Revert, SolCall, SolError, SolInterface, decode_revert_reason},
};

use crate::{
    error::RevertStage,
    initializer::InitBinding,
    types::{Cut, CutAction},
};

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface IDiamondCut {
        enum FacetCutAction { Add, Replace, Remove }

        struct FacetCut {
            address facetAddress;
            FacetCutAction action;
            bytes4[] functionSelectors;
        }

        event DiamondCut(FacetCut[] _diamondCut, address _init, bytes _calldata);

        function diamondCut(FacetCut[] calldata _diamondCut, address _init, bytes calldata _calldata) external;
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface IDiamondLoupe {
        struct Facet {
            address facetAddress;
            bytes4[] functionSelectors;
        }

        function facets() external view returns (Facet[] memory facets_);

        function facetFunctionSelectors(address _facet) external view returns (bytes4[] memory facetFunctionSelectors_);

        function facetAddresses() external view returns (address[] memory facetAddresses_);

        function facetAddress(bytes4 _functionSelector) external view returns (address facetAddress_);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface DiamondErrors {
        error NotContractOwner(address _user, address _contractOwner);
        error NoSelectorsProvidedForFacetForCut(address _facetAddress);
        error CannotAddSelectorsToZeroAddress(bytes4[] _selectors);
        error NoBytecodeAtAddress(address _contractAddress, string _message);
        error IncorrectFacetCutAction(uint8 _action);
        error CannotAddFunctionToDiamondThatAlreadyExists(bytes4 _selector);
        error CannotReplaceFunctionsFromFacetWithZeroAddress(bytes4[] _selectors);
        error CannotReplaceImmutableFunction(bytes4 _selector);
        error CannotReplaceFunctionWithTheSameFunctionFromTheSameFacet(bytes4 _selector);
        error CannotReplaceFunctionThatDoesNotExists(bytes4 _selector);
        error RemoveFacetAddressMustBeZeroAddress(address _facetAddress);
        error CannotRemoveFunctionThatDoesNotExist(bytes4 _selector);
        error CannotRemoveImmutableFunction(bytes4 _selector);
        error InitializationFunctionReverted(address _initializationContractAddress, bytes _calldata);
    }
}

const LEGACY_PREFIX: &str = "LibDiamondCut:";
const LEGACY_INIT_REVERTED: &str = "LibDiamondCut: _init function reverted";

impl From<CutAction> for IDiamondCut::FacetCutAction {
    fn from(action: CutAction) -> Self {
        match action {
            CutAction::Add => IDiamondCut::FacetCutAction::Add,
            CutAction::Replace => IDiamondCut::FacetCutAction::Replace,
            CutAction::Remove => IDiamondCut::FacetCutAction::Remove,
        }
    }
}

/// Cut entries in the form accepted by `IDiamondCut.diamondCut`.
pub fn facet_cuts(cut: &Cut) -> Vec<IDiamondCut::FacetCut> {
    cut.entries()
        .iter()
        .filter(|e| !e.selectors().is_empty())
        .map(|e| IDiamondCut::FacetCut {
            facetAddress: e.facet_address(),
            action: e.action().into(),
            functionSelectors: e.selectors().iter().copied().collect(),
        })
        .collect()
}

/// Encoded `diamondCut` call for the cut and initializer binding.
pub fn encode_cut(cut: &Cut, init: &InitBinding) -> Bytes {
    IDiamondCut::diamondCutCall {
        _diamondCut: facet_cuts(cut),
        _init: init.target(),
        _calldata: init.calldata(),
    }
    .abi_encode()
    .into()
}

/// Revert data produced when the initializer of a cut fails.
pub fn initializer_reverted(target: Address, calldata: Bytes) -> Bytes {
    DiamondErrors::InitializationFunctionReverted {
        _initializationContractAddress: target,
        _calldata: calldata,
    }
    .abi_encode()
    .into()
}

/// Attributes a cut revert to the stage it originated from.
///
/// LibDiamond reports cut rule violations with dedicated errors, and reports
/// an initializer failure either with `InitializationFunctionReverted` or by
/// bubbling up the initializer's own revert data. Hence unrecognized revert
/// data is attributed to the initializer when the cut carries one.
pub fn classify_revert(data: Option<&[u8]>, has_initializer: bool) -> (RevertStage, String) {
    let Some(data) = data.filter(|d| !d.is_empty()) else {
        return (RevertStage::Unknown, "no revert data".to_string());
    };

    if let Ok(err) = DiamondErrors::DiamondErrorsErrors::abi_decode(data) {
        let stage = match err {
            DiamondErrors::DiamondErrorsErrors::InitializationFunctionReverted(_) => {
                RevertStage::Initializer
            },
            _ => RevertStage::SelectorApplication,
        };
        return (stage, format!("{err:?}"));
    }

    if let Ok(Revert { reason }) = Revert::abi_decode(data) {
        let stage = if reason.starts_with(LEGACY_INIT_REVERTED) {
            RevertStage::Initializer
        } else if reason.starts_with(LEGACY_PREFIX) {
            RevertStage::SelectorApplication
        } else if has_initializer {
            RevertStage::Initializer
        } else {
            RevertStage::Unknown
        };
        return (stage, reason);
    }

    let reason =
        decode_revert_reason(data).unwrap_or_else(|| Bytes::copy_from_slice(data).to_string());
    let stage = if has_initializer { RevertStage::Initializer } else { RevertStage::Unknown };
    (stage, reason)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use alloy::primitives::{address, fixed_bytes};

    use super::*;
    use crate::types::FacetCut;

    const F1: Address = address!("0x00000000000000000000000000000000000000f1");
    const F2: Address = address!("0x00000000000000000000000000000000000000f2");

    #[test]
    fn test_facet_cuts_encoding() {
        let s = fixed_bytes!("0x11111111");
        let cut = Cut::new(
            vec![
                FacetCut::Remove { previous: F1, selectors: BTreeSet::from([s]) },
                FacetCut::Add { facet: F2, selectors: BTreeSet::from([s]) },
                FacetCut::Add { facet: F2, selectors: BTreeSet::new() },
            ],
            None,
        );
        let entries = facet_cuts(&cut);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].facetAddress, Address::ZERO);
        assert_eq!(entries[0].action, IDiamondCut::FacetCutAction::Remove);
        assert_eq!(entries[1].facetAddress, F2);
        assert_eq!(entries[1].functionSelectors, vec![s]);

        let calldata = encode_cut(&cut, &InitBinding::None);
        assert_eq!(calldata[..4], IDiamondCut::diamondCutCall::SELECTOR);
        let decoded = IDiamondCut::diamondCutCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded._init, Address::ZERO);
        assert!(decoded._calldata.is_empty());
    }

    #[test]
    fn test_classify_custom_errors() {
        let data = initializer_reverted(F1, Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(classify_revert(Some(&data), true).0, RevertStage::Initializer);

        let data = DiamondErrors::CannotAddFunctionToDiamondThatAlreadyExists {
            _selector: fixed_bytes!("0x11111111"),
        }
        .abi_encode();
        assert_eq!(classify_revert(Some(&data), true).0, RevertStage::SelectorApplication);
    }

    #[test]
    fn test_classify_legacy_strings() {
        let revert = |reason: &str| Revert { reason: reason.to_string() }.abi_encode();

        let (stage, reason) = classify_revert(Some(&revert(LEGACY_INIT_REVERTED)), true);
        assert_eq!(stage, RevertStage::Initializer);
        assert_eq!(reason, LEGACY_INIT_REVERTED);

        let data = revert("LibDiamondCut: Can't add function that already exists");
        assert_eq!(classify_revert(Some(&data), false).0, RevertStage::SelectorApplication);

        // Initializer reverts are bubbled up as is
        let data = revert("Vault: already initialized");
        assert_eq!(classify_revert(Some(&data), true).0, RevertStage::Initializer);
        assert_eq!(classify_revert(Some(&data), false).0, RevertStage::Unknown);
    }

    #[test]
    fn test_classify_missing_data() {
        assert_eq!(classify_revert(None, true).0, RevertStage::Unknown);
        assert_eq!(classify_revert(Some(&[]), true).0, RevertStage::Unknown);
    }
}
