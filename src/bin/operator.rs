//! Remote operator console: connects to a running data store as a manual client.
//!
//! Usage: `operator [config.json]`. Only the endpoint of the config is used; the
//! namespace is fetched from the store.

use std::{env, path::Path, process::ExitCode};

use log::info;

use rtmpc_link::{
    client::tag_client::TagClient,
    config::{ClientOptions, ClientType, LinkConfig},
    console::run_console,
    datastore::namespace::{FIRST_USER_NAMESPACE, Namespace},
    error::LinkResult,
};

fn run() -> LinkResult<()> {
    let config = match env::args().nth(1) {
        Some(path) => LinkConfig::load(Path::new(&path))?,
        None => LinkConfig::default(),
    };

    // Placeholder until the store's own table arrives.
    let empty = Namespace {
        index: FIRST_USER_NAMESPACE,
        tags: Vec::new(),
    };
    let options = ClientOptions::new(&config.server.address, config.server.port, ClientType::Manual, empty);

    let mut client = TagClient::new(options);
    client.connect()?;
    let namespace = client.fetch_namespace()?;
    println!(
        "Connected to {} (namespace {}, {} tags)",
        client.endpoint(),
        namespace.index,
        namespace.tag_count()
    );

    run_console(&mut client, &[]);
    client.disconnect();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    info!("=== OPERATOR START ===");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("operator: {}", e);
            ExitCode::FAILURE
        }
    }
}
