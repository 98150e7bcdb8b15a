use anyhow::Context;
use colored::Colorize;
use diamond_sdk::pipeline::AddFacet;

use crate::Deployment;

pub(crate) async fn render(pipeline: &Deployment, request: &AddFacet) -> anyhow::Result<()> {
    let plan = pipeline
        .plan(request)
        .await
        .with_context(|| format!("planning facet `{}`", request.facet))?;

    println!(
        "{}\n",
        format!(
            "**** Plan for {} on {} ({})",
            request.facet,
            pipeline.network().diamond(),
            pipeline.network().name()
        )
        .bold()
        .purple()
    );

    if plan.deploys_facet {
        println!("Facet: {}", "to be deployed".yellow());
    } else {
        println!("Facet: {}", plan.facet.address());
    }
    if plan.deploys_initializer {
        println!("Initializer contract: {}", "to be deployed".yellow());
    }
    println!();
    println!("{}", plan.cut);

    if !plan.cut.is_empty() {
        println!("{}\n", "**** Routing after the cut".bright_blue());
        println!("{}", plan.staged.expected_state());
    }

    Ok(())
}
