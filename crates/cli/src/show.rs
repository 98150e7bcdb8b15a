use std::collections::BTreeSet;

use colored::Colorize;
use diamond_sdk::{
    record::{DeploymentRecord, RecordKey},
    registry::RegistryState,
};
use tabled::settings::Style;

use crate::Deployment;

pub(crate) async fn render(pipeline: &Deployment) -> anyhow::Result<()> {
    let (live, record) =
        futures::try_join!(RegistryState::load(Some(pipeline.proxy())), pipeline.record())?;

    println!(
        "{}\n",
        format!(
            "**** Diamond {} ({}, chain {})",
            pipeline.network().diamond(),
            pipeline.network().name(),
            pipeline.network().chain_id()
        )
        .bold()
        .purple()
    );
    println!("{}", live);

    let Some(record) = record else {
        let key = RecordKey::of(pipeline.network());
        println!("{}", format!("No record stored for {}", key).yellow());
        return Ok(());
    };
    if let Some(last_cut) = record.last_cut() {
        println!("Last cut: {} at {}\n", last_cut.tx_hash, last_cut.instant);
    }
    render_drift(&live, &record);

    Ok(())
}

fn render_drift(live: &RegistryState, record: &DeploymentRecord) {
    let recorded = RegistryState::from_record(record);
    let selectors: BTreeSet<_> = live.routes().keys().chain(recorded.routes().keys()).collect();

    let label = |facet: Option<_>| match facet {
        Some(address) => match record.facet_at(address).and_then(|f| f.name()) {
            Some(name) => format!("{} ({})", address, name),
            None => address.to_string(),
        },
        None => "-".to_string(),
    };

    let mut builder = tabled::builder::Builder::default();
    builder.push_record(["Selector", "Recorded", "Live"]);
    let mut drifted = 0;
    for selector in selectors {
        let (expected, actual) = (recorded.facet_of(selector), live.facet_of(selector));
        if expected != actual {
            builder.push_record([selector.to_string(), label(expected), label(actual)]);
            drifted += 1;
        }
    }

    if drifted == 0 {
        println!("{}", "Live routing matches the record".green());
        return;
    }
    println!("{}\n", format!("**** {} selector(s) drifted from the record", drifted).red());
    let mut table = builder.build();
    table.with(Style::sharp());
    println!("{}", table);
}
