//! # Real-Time MPC Link Demo
//! Brings up a data store and the three control-loop roles in one process, then hands
//! control to the operator console.
//!
//! ## Flow
//! - **Store:** namespace built from the dimension table, served on the configured endpoint.
//! - **Roles:** simulator (ungated), controller and estimator (gated by switches and flags).
//! - **Triggers:** one drift-compensating release thread per initialised role.
//! - **Console:** enable switches, raise/clear flags, start/stop roles, inspect status.
//!
//! ## Outputs
//! - `<export_dir>/cycle_events.csv`: one row per cycle (nanosecond timestamps).
//! - `<export_dir>/cycle_summary.csv`, `<export_dir>/step_history.csv`.
//!
//! Usage: `rtmpc_link [config.json]` (defaults when omitted).

use std::{
    env,
    fs::create_dir_all,
    path::Path,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{error, info};

use rtmpc_link::{
    client::tag_client::TagClient,
    config::{ClientType, LinkConfig},
    console::run_console,
    demo::DemoLink,
    error::LinkResult,
    utils::export::run_exports,
};

fn load_config() -> LinkResult<LinkConfig> {
    match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            LinkConfig::load(Path::new(&path))
        }
        None => {
            info!("No configuration given, using defaults");
            Ok(LinkConfig::default())
        }
    }
}

fn run() -> LinkResult<()> {
    let config = load_config()?;
    create_dir_all(&config.export_dir)?;

    let mut link = DemoLink::build(&config)?;
    if let Some(addr) = link.store.local_addr() {
        println!("Data store '{}' listening on {}", link.store.name(), addr);
    }

    let exporter_active = Arc::new(AtomicBool::new(true));
    let exporter = link.telemetry.recorder.start_exporter(
        config.export_dir.join("cycle_events.csv"),
        exporter_active.clone(),
    );

    link.start_triggers()?;

    let mut operator = TagClient::new(link.store.client_options(ClientType::Manual));
    operator.connect()?;
    run_console(&mut operator, &link.modules());
    operator.disconnect();

    link.stop_triggers();
    exporter_active.store(false, Ordering::Release);
    if exporter.join().is_err() {
        error!("Event exporter panicked");
    }
    run_exports(&link.telemetry.metrics, &config.export_dir)?;

    link.shutdown()
}

fn main() -> ExitCode {
    env_logger::init();
    info!("=== RTMPC LINK START ===");

    match run() {
        Ok(()) => {
            info!("=== RTMPC LINK FINISHED ===");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("rtmpc_link: {}", e);
            ExitCode::FAILURE
        }
    }
}
