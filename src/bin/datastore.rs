//! Standalone data store process.
//!
//! Usage: `datastore [config.json]`. Runs until stdin is closed or a line reading `quit` is entered.

use std::{
    env,
    io::{BufRead, stdin},
    path::Path,
    process::ExitCode,
};

use log::{error, info};

use rtmpc_link::{
    config::LinkConfig,
    datastore::server::DataStore,
    error::LinkResult,
};

fn run() -> LinkResult<()> {
    let config = match env::args().nth(1) {
        Some(path) => LinkConfig::load(Path::new(&path))?,
        None => LinkConfig::default(),
    };

    let mut store = DataStore::new(config.server.clone(), config.dimensions)?;
    store.start()?;
    match store.local_addr() {
        Some(addr) => println!(
            "Data store '{}' serving {} tags on {} (namespace {})",
            store.name(),
            store.tag_count(),
            addr,
            store.namespace().index
        ),
        None => println!("Data store '{}' started", store.name()),
    }
    println!("Type 'quit' to stop.");

    for line in stdin().lock().lines() {
        match line {
            Ok(l) if l.trim() == "quit" => break,
            Ok(l) if l.trim() == "sessions" => println!("{} session(s) open", store.session_count()),
            Ok(_) => {}
            Err(e) => {
                error!("stdin: {}", e);
                break;
            }
        }
    }

    store.stop()
}

fn main() -> ExitCode {
    env_logger::init();
    info!("=== DATA STORE START ===");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("datastore: {}", e);
            ExitCode::FAILURE
        }
    }
}
