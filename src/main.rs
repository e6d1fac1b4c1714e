//! splitcart
//!
//! Loads a fixture set, computes the cheapest purchase plan and prints it.

use std::{
    io::{self, Write},
    time::Instant,
};

use anyhow::Result;
use clap::Parser;
use humanize_duration::{Truncate, prelude::DurationExt};
use splitcart::fixtures::Fixture;

use crate::cli::Args;

mod cli;
mod logging;

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_subscriber(&args.logging)?;

    let mut fixture = Fixture::from_set_in(&args.fixtures_path, &args.fixture)?;
    args.apply(fixture.options_mut());

    let start = Instant::now();
    let outcome = fixture.run()?;
    let elapsed = start.elapsed();

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    outcome.plan().write_to(&mut handle)?;

    writeln!(
        handle,
        "\nOutcome: {outcome} in {}",
        elapsed.human(Truncate::Nano)
    )?;

    if let Some(source) = outcome.plan().diagnostics().source {
        writeln!(handle, "Best plan from: {source}")?;
    }

    Ok(())
}
