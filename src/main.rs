//! Split Ledger CLI
//!
//! Loads project membership, takes in and splits a batch of payments, and
//! prints the resulting company fund totals and user balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- members.csv payments.csv > balances.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `SPLIT_LEDGER_DB`: SQLite file to use instead of an in-memory database
//! - `SPLIT_LEDGER_BUSY_TIMEOUT_MS`: How long to wait on a locked database
//! - `SPLIT_LEDGER_VERIFY_ON_READ`: Reconcile balances before reporting them

use log::info;
use split_ledger::{EngineConfig, EngineError, Result, SplitEngine};
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        return Err(EngineError::MissingArgument);
    }

    let members = BufReader::new(File::open(&args[1])?);
    let payments = BufReader::new(File::open(&args[2])?);

    let engine = SplitEngine::open(EngineConfig::from_env()?)?;

    engine.load_members_csv(members)?;
    let summary = engine.process_payments_csv(payments)?;
    info!(
        "Split {} payments, skipped {}",
        summary.accepted, summary.skipped
    );

    if engine.config().verify_on_read {
        engine.reconcile_all()?;
    }

    let stdout = io::stdout();
    let handle = stdout.lock();
    engine.write_balances(handle)?;

    Ok(())
}
