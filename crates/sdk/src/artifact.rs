use std::path::{Path, PathBuf};

use alloy::{
    json_abi::JsonAbi,
    primitives::{B256, Bytes, keccak256},
};
use serde::Deserialize;

use crate::error::ConfigError;

/// Compiled contract: ABI and creation bytecode.
#[derive(Clone, derive_more::Debug, PartialEq, Eq)]
pub struct ContractArtifact {
    name: String,
    #[debug(skip)]
    abi: JsonAbi,
    #[debug("{} bytes", bytecode.len())]
    bytecode: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
}

/// Hardhat stores creation code as a plain string, Foundry as
/// `{ "object": "0x..." }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Plain(Bytes),
    Object { object: Bytes },
}

impl ContractArtifact {
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self { name: name.into(), abi, bytecode }
    }

    /// Parses a Hardhat or Foundry artifact JSON.
    pub fn from_json(name: &str, json: &str) -> Result<Self, ConfigError> {
        let raw: RawArtifact = serde_json::from_str(json).map_err(|err| {
            ConfigError::InvalidArtifact { name: name.to_string(), reason: err.to_string() }
        })?;
        let bytecode = match raw.bytecode {
            RawBytecode::Plain(code) | RawBytecode::Object { object: code } => code,
        };
        Ok(Self {
            name: raw.contract_name.unwrap_or_else(|| name.to_string()),
            abi: raw.abi,
            bytecode,
        })
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn abi(&self) -> &JsonAbi { &self.abi }

    /// Creation bytecode, without constructor arguments.
    pub fn bytecode(&self) -> &Bytes { &self.bytecode }

    /// Hash of the creation bytecode, used to detect unchanged facets.
    pub fn bytecode_hash(&self) -> B256 { keccak256(&self.bytecode) }
}

/// Directory of compiled artifacts.
///
/// Looks up `<dir>/<Name>.json` (Hardhat flat export) first, then
/// `<dir>/<Name>.sol/<Name>.json` (Foundry `out` layout).
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self { Self { dir: dir.as_ref().to_path_buf() } }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn load(&self, name: &str) -> Result<ContractArtifact, ConfigError> {
        let candidates = [
            self.dir.join(format!("{name}.json")),
            self.dir.join(format!("{name}.sol")).join(format!("{name}.json")),
        ];
        let path = candidates.iter().find(|p| p.is_file()).ok_or_else(|| {
            ConfigError::MissingArtifact {
                name: name.to_string(),
                path: self.dir.display().to_string(),
            }
        })?;
        let json = std::fs::read_to_string(path).map_err(|err| ConfigError::InvalidArtifact {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        ContractArtifact::from_json(name, &json)
    }
}
