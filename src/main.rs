use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use sluice::conf::Config;
use sluice::core::{CliArgs, setup_logging};
use sluice::delivery::open_destination;
use sluice::engine::Engine;
use sluice::ledger::{WatermarkStore, open_ledger};
use sluice::source::open_source;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_logging();
    let args = CliArgs::parse();
    info!(args = args; "Sluice started.");

    let path = args
        .config
        .as_deref()
        .context("a configuration file is required (--config <path>)")?;
    let config = Config::load(path).with_context(|| format!("loading {path}"))?;
    let tables = config.select_tables(&args.tables)?;

    if args.watermarks {
        let ledger = open_ledger(&config.ledger)?;
        let store = WatermarkStore::new(ledger, config.engine.epoch);
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        for (table, watermark) in store.get_watermarks(&names).await? {
            println!("{table}\t{}", watermark.to_rfc3339());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let engine = Engine::new(
        open_source(&config.source)?,
        Arc::new(open_destination(&config.destination)?),
        open_ledger(&config.ledger)?,
        config.engine.clone(),
    );

    let report = tokio::select! {
        report = engine.run(&tables) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning in-flight table runs");
            return Ok(ExitCode::from(130));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
