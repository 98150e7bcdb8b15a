mod add_facet;
pub mod args;
mod plan;
mod selectors;
mod show;
mod sync;

use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::client::RpcClient,
    signers::local::PrivateKeySigner,
    transports::layers::{RetryBackoffLayer, ThrottleLayer},
};
use anyhow::Context;
use args::Cli;
use diamond_sdk::{
    DiamondConfig, Network,
    artifact::ArtifactStore,
    error::{ConfigError, DiamondError, ErrorClass},
    pipeline::Pipeline,
    record::FileRecordStore,
    rpc::{RpcDeployer, RpcDiamond},
    selectors::Denylist,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::args::Commands;

pub(crate) type Deployment =
    Pipeline<RpcDiamond<DynProvider>, RpcDeployer<DynProvider>, FileRecordStore>;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancellation_signal = CancellationToken::new();
    let cancellation_token = cancellation_signal.child_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation_signal.cancel();
        }
    });

    match &cli.command {
        Commands::Selectors { contract } => {
            let artifacts = ArtifactStore::new(&cli.artifacts);
            selectors::render(&artifacts, contract, &config(&cli).denylist)?
        },
        Commands::Plan { facet } => {
            plan::render(&connect(&cli, false).await?, &facet.request()).await?
        },
        Commands::AddFacet { facet } => {
            add_facet::run(&connect(&cli, true).await?, &facet.request(), &cancellation_token)
                .await?
        },
        Commands::Sync { manifest } => {
            sync::run(&connect(&cli, true).await?, manifest, &cancellation_token).await?
        },
        Commands::Show => show::render(&connect(&cli, false).await?).await?,
    }

    Ok(())
}

/// Category of the failure, when it originates from the SDK.
pub fn error_class(err: &anyhow::Error) -> Option<ErrorClass> {
    if let Some(err) = err.downcast_ref::<DiamondError>() {
        return Some(err.class());
    }
    err.downcast_ref::<ConfigError>().map(|_| ErrorClass::Configuration)
}

fn config(cli: &Cli) -> DiamondConfig {
    let mut config = DiamondConfig {
        confirmations: cli.confirmations,
        confirmation_timeout: Duration::from_secs(cli.timeout_secs),
        prune_stale: !cli.no_prune,
        ..Default::default()
    };
    if !cli.deny.is_empty() {
        config.denylist = Denylist::new(cli.deny.iter().cloned());
    }
    config
}

/// Builds the pipeline over the RPC endpoint, signing with the deployer key
/// when `signing` is requested.
async fn connect(cli: &Cli, signing: bool) -> anyhow::Result<Deployment> {
    let diamond = cli.diamond.ok_or(DiamondError::from(ConfigError::MissingDiamond))?;

    let client = if let Some(throttle) = cli.rpc_throttle {
        RpcClient::builder()
            .layer(ThrottleLayer::new(throttle))
            .layer(RetryBackoffLayer::new(10, 100, 200))
            .connect(&cli.rpc)
            .await
            .context("connecting to RPC")?
    } else {
        RpcClient::builder()
            .layer(RetryBackoffLayer::new(10, 100, 200))
            .connect(&cli.rpc)
            .await
            .context("connecting to RPC")?
    };
    client.set_poll_interval(Duration::from_millis(250));

    let (provider, from) = match (&cli.private_key, signing) {
        (Some(key), _) => {
            let signer: PrivateKeySigner = key.parse().context("parsing deployer private key")?;
            let from = signer.address();
            let provider = ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_client(client)
                .erased();
            (provider, from)
        },
        (None, true) => {
            return Err(anyhow::anyhow!(
                "deployer private key required, see `--private-key` or `DEPLOYER_PRIVATE_KEY`"
            ));
        },
        // Read-only: nothing is signed
        (None, false) => (ProviderBuilder::new().connect_client(client).erased(), Address::ZERO),
    };

    let chain_id = provider.get_chain_id().await.context("fetching chain ID")?;
    let network = Network::new(&cli.network, chain_id, diamond);
    info!(network = %cli.network, chain_id, %diamond, %from, "connected");
    let config = config(cli);

    Ok(Pipeline::new(
        network,
        config.clone(),
        ArtifactStore::new(&cli.artifacts),
        RpcDiamond::new(diamond, from, provider.clone()),
        RpcDeployer::new(from, provider, config.confirmations, config.confirmation_timeout),
        FileRecordStore::new(&cli.deployments),
    ))
}
