use std::path::PathBuf;

use alloy::primitives::Address;
use clap::{Args, Parser, Subcommand};
use diamond_sdk::pipeline::AddFacet;

pub(crate) const DEFAULT_RPC_PROVIDER: &str = "http://127.0.0.1:8545";

#[derive(Parser, Debug)]
#[command(name = "diamond-cli", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// RPC endpoint to connect to
    #[arg(
        long,
        global = true,
        env = "DIAMOND_RPC_URL",
        default_value_t = DEFAULT_RPC_PROVIDER.to_string()
    )]
    pub rpc: String,

    /// RPC throttling (req/sec) [default: none]
    #[arg(long, global = true)]
    pub rpc_throttle: Option<u32>,

    /// Network name deployment records are stored under
    #[arg(long, global = true, env = "DIAMOND_NETWORK", default_value = "localhost")]
    pub network: String,

    /// Diamond proxy address [required by all commands but `selectors`]
    #[arg(long, global = true, env = "DIAMOND_ADDRESS")]
    pub diamond: Option<Address>,

    /// Directory of compiled artifacts (Hardhat or Foundry layout)
    #[arg(long, global = true, default_value = "artifacts")]
    pub artifacts: PathBuf,

    /// Directory of deployment records
    #[arg(long, global = true, default_value = "deployments")]
    pub deployments: PathBuf,

    /// Private key of the deployer account [required by `add-facet` and
    /// `sync`]
    #[arg(long, global = true, env = "DEPLOYER_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Confirmations to wait for after a transaction is included
    #[arg(long, global = true, default_value_t = 1)]
    pub confirmations: u64,

    /// Seconds to wait for confirmations before giving up on a cut
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Function name excluded from routing, can be repeated [default: init]
    #[arg(long, global = true)]
    pub deny: Vec<String>,

    /// Keep selectors of superseded facets the new facet no longer exposes
    #[arg(long, global = true, default_value_t = false)]
    pub no_prune: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the routable selectors of a compiled contract
    Selectors {
        /// Contract name of the artifact
        contract: String,
    },
    /// Plan adding a facet against the live proxy without sending anything
    Plan {
        #[command(flatten)]
        facet: FacetArgs,
    },
    /// Deploy a facet and route its selectors through the proxy
    AddFacet {
        #[command(flatten)]
        facet: FacetArgs,
    },
    /// Add every facet of a JSON manifest in order, stopping at the first
    /// failure
    Sync {
        /// Manifest file (`{"facets": [{"facet": "...", ...}]}`)
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Show the live selector table and its drift from the stored record
    Show,
}

#[derive(Args, Debug)]
pub struct FacetArgs {
    /// Contract name of the facet artifact
    pub facet: String,

    /// Contract name of the initializer artifact
    #[arg(long)]
    pub initializer: Option<String>,

    /// Initializer function, by name or full signature
    #[arg(long, default_value = "init")]
    pub init_fn: String,

    /// Initializer argument, can be repeated
    #[arg(long = "init-arg", requires = "initializer")]
    pub init_args: Vec<String>,

    /// Recorded facet to take selectors over from, can be repeated
    #[arg(long)]
    pub supersede: Vec<String>,

    /// Use the facet already deployed at this address
    #[arg(long)]
    pub facet_address: Option<Address>,
}

impl FacetArgs {
    pub fn request(&self) -> AddFacet {
        let mut request = AddFacet::new(&self.facet);
        if let Some(initializer) = &self.initializer {
            request = request.with_initializer(initializer, &self.init_fn, self.init_args.clone());
        }
        for name in &self.supersede {
            request = request.superseding(name);
        }
        if let Some(address) = self.facet_address {
            request = request.at(address);
        }
        request
    }
}
