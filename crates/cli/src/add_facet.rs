use anyhow::Context;
use colored::Colorize;
use diamond_sdk::{
    error::ErrorClass,
    pipeline::{AddFacet, Outcome},
};
use tokio_util::sync::CancellationToken;

use crate::Deployment;

pub(crate) async fn run(
    pipeline: &Deployment,
    request: &AddFacet,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match pipeline.add_facet(request, cancel).await {
        Ok(outcome) => {
            print_outcome(&request.facet, &outcome);
            Ok(())
        },
        Err(err) if err.class() == ErrorClass::Indeterminate => Err(err).with_context(|| {
            format!(
                "adding facet `{}`, check the proxy with `show` before rerunning",
                request.facet
            )
        }),
        Err(err) => Err(err).with_context(|| format!("adding facet `{}`", request.facet)),
    }
}

pub(crate) fn print_outcome(name: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Unchanged { facet } => {
            println!("{} {} at {}", "Unchanged".dimmed(), name, facet);
        },
        Outcome::Recorded { facet } => {
            println!("{} {} at {} (record caught up)", "Recorded".cyan(), name, facet);
        },
        Outcome::Applied { facet, cut, tx_hash, instant } => {
            println!("{} {} at {}", "Applied".green().bold(), name, facet);
            if let Some(tx_hash) = tx_hash {
                print!("  tx {}", tx_hash);
                match instant {
                    Some(instant) => println!(" confirmed {}", instant),
                    None => println!(),
                }
            }
            println!("{}", cut);
        },
    }
}
