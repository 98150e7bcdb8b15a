//! One-time initializer delegatecalled alongside a cut.

use alloy::{
    dyn_abi::{JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi},
    primitives::{Address, Bytes},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    artifact::ContractArtifact,
    error::{ConfigError, DiamondError},
    proxy::ContractDeployer,
    types::InitializerCall,
};

/// Initializer requested by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializerSpec {
    /// Contract name of the initializer artifact.
    pub contract: String,
    /// Function name, or full signature to pick an overload explicitly.
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Deployed initializer contract.
#[derive(Clone, derive_more::Debug)]
pub struct ResolvedInitializer {
    name: String,
    address: Address,
    #[debug(skip)]
    abi: JsonAbi,
}

impl ResolvedInitializer {
    pub fn new(name: impl Into<String>, address: Address, abi: JsonAbi) -> Self {
        Self { name: name.into(), address, abi }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn address(&self) -> Address { self.address }

    pub fn abi(&self) -> &JsonAbi { &self.abi }

    /// Looks up the function to call, disambiguating overloads by the number
    /// of arguments unless a full signature is given.
    pub fn function_call(
        &self,
        function: &str,
        args: Vec<String>,
    ) -> Result<InitializerCall, ConfigError> {
        let name = function.split('(').next().unwrap_or(function);
        let unknown = || ConfigError::UnknownInitializerFunction {
            contract: self.name.clone(),
            function: function.to_string(),
        };
        let overloads = self.abi.function(name).ok_or_else(unknown)?;

        let selected: Vec<&Function> = if function.contains('(') {
            overloads.iter().filter(|f| f.signature() == function).collect()
        } else {
            overloads.iter().filter(|f| f.inputs.len() == args.len()).collect()
        };
        match selected.as_slice() {
            [f] => Ok(InitializerCall::new(self.name.clone(), self.address, (*f).clone(), args)),
            [] if function.contains('(') => Err(unknown()),
            [] => Err(ConfigError::InitializerEncoding {
                function: function.to_string(),
                reason: format!("no overload takes {} argument(s)", args.len()),
            }),
            _ => Err(ConfigError::AmbiguousInitializer {
                contract: self.name.clone(),
                function: function.to_string(),
                arity: args.len(),
            }),
        }
    }
}

/// Reuses the initializer deployed at `known`, or deploys it.
pub async fn resolve<C: ContractDeployer + ?Sized>(
    artifact: &ContractArtifact,
    known: Option<Address>,
    deployer: &C,
) -> Result<ResolvedInitializer, DiamondError> {
    if let Some(address) = known.filter(|a| !a.is_zero()) {
        debug!(contract = artifact.name(), %address, "reusing initializer");
        return Ok(ResolvedInitializer::new(artifact.name(), address, artifact.abi().clone()));
    }
    let deployed = deployer.deploy(artifact, Bytes::new()).await?;
    info!(contract = artifact.name(), address = %deployed.address, "initializer deployed");
    Ok(ResolvedInitializer::new(artifact.name(), deployed.address, deployed.abi))
}

/// Encoded initializer call ready to be submitted with a cut.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitCall {
    target: Address,
    calldata: Bytes,
}

impl InitCall {
    pub fn target(&self) -> Address { self.target }

    pub fn calldata(&self) -> &Bytes { &self.calldata }
}

/// Initializer part of a `diamondCut` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InitBinding {
    /// Encoded as the zero address with empty calldata.
    #[default]
    None,
    Call(InitCall),
}

impl InitBinding {
    /// Binding delegatecalling `calldata` at `target`.
    pub fn call(target: Address, calldata: Bytes) -> Result<Self, ConfigError> {
        if target.is_zero() {
            return Err(ConfigError::ZeroInitializerTarget);
        }
        if calldata.len() < 4 {
            return Err(ConfigError::InitializerEncoding {
                function: target.to_string(),
                reason: "calldata shorter than a selector".to_string(),
            });
        }
        Ok(InitBinding::Call(InitCall { target, calldata }))
    }

    pub fn target(&self) -> Address {
        match self {
            InitBinding::None => Address::ZERO,
            InitBinding::Call(call) => call.target,
        }
    }

    pub fn calldata(&self) -> Bytes {
        match self {
            InitBinding::None => Bytes::new(),
            InitBinding::Call(call) => call.calldata.clone(),
        }
    }

    pub fn is_none(&self) -> bool { matches!(self, InitBinding::None) }
}

/// Coerces the call arguments to the declared parameter types and encodes
/// the call.
pub fn bind(call: Option<&InitializerCall>) -> Result<InitBinding, ConfigError> {
    let Some(call) = call else {
        return Ok(InitBinding::None);
    };
    let function = call.function();
    let signature = function.signature();
    let encoding_error =
        |reason: String| ConfigError::InitializerEncoding { function: signature.clone(), reason };

    if call.args().len() != function.inputs.len() {
        return Err(encoding_error(format!(
            "expected {} argument(s), got {}",
            function.inputs.len(),
            call.args().len()
        )));
    }

    let values = function
        .inputs
        .iter()
        .zip(call.args())
        .map(|(param, arg)| {
            let ty = param.resolve().map_err(|err| encoding_error(err.to_string()))?;
            ty.coerce_str(arg)
                .map_err(|err| encoding_error(format!("argument `{}`: {}", param.name, err)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let calldata =
        function.abi_encode_input(&values).map_err(|err| encoding_error(err.to_string()))?;

    debug!(function = %signature, target = %call.target(), "initializer bound");
    InitBinding::call(call.target(), calldata.into())
}
