use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use diamond_sdk::pipeline::Manifest;
use tokio_util::sync::CancellationToken;

use crate::{Deployment, add_facet::print_outcome};

pub(crate) async fn run(
    pipeline: &Deployment,
    manifest: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let json = tokio::fs::read_to_string(manifest)
        .await
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    let manifest: Manifest = serde_json::from_str(&json).context("parsing manifest")?;

    println!(
        "{}\n",
        format!("**** Syncing {} facet(s)", manifest.facets.len()).bold().purple()
    );
    let outcomes = pipeline.run_all(&manifest.facets, cancel).await.context("syncing facets")?;
    for (request, outcome) in manifest.facets.iter().zip(&outcomes) {
        print_outcome(&request.facet, outcome);
    }

    Ok(())
}
