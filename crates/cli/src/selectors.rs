use colored::Colorize;
use diamond_sdk::{
    artifact::ArtifactStore,
    error::DiamondError,
    selectors::{self, Denylist},
};
use itertools::Itertools;
use tabled::settings::Style;

pub(crate) fn render(
    artifacts: &ArtifactStore,
    contract: &str,
    denylist: &Denylist,
) -> anyhow::Result<()> {
    let artifact = artifacts.load(contract).map_err(DiamondError::from)?;
    // Rejects duplicate and clashing signatures
    selectors::compute_selectors(artifact.abi(), denylist).map_err(DiamondError::from)?;

    let mut rows = Vec::new();
    for function in selectors::routable_functions(artifact.abi(), denylist) {
        let signature = selectors::canonical_signature(function).map_err(DiamondError::from)?;
        rows.push((selectors::selector_of(&signature), signature));
    }
    rows.sort();

    println!("{}\n", format!("**** Routable selectors of {}", artifact.name()).bold().purple());
    let mut builder = tabled::builder::Builder::default();
    builder.push_record(["Selector", "Signature"]);
    for (selector, signature) in &rows {
        builder.push_record([selector.to_string(), signature.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    println!("{}", table);
    println!(
        "{} selector(s), excluded: {}",
        rows.len(),
        if denylist.entries().is_empty() {
            "none".to_string()
        } else {
            denylist.entries().iter().join(", ")
        }
    );

    Ok(())
}
