#![allow(dead_code)]

use rtmpc_link::{
    config::{ClientType, ModuleOptions, ServerOptions},
    datastore::{
        namespace::{DimensionTable, ServerType},
        server::DataStore,
    },
    client::tag_client::TagClient,
};

pub fn dims() -> DimensionTable {
    DimensionTable {
        n_x: 4,
        n_z: 0,
        n_u: 2,
        n_y: 4,
        n_p: 2,
        n_tvp: 0,
        n_aux: 3,
        n_steps_pred: 5,
    }
}

pub fn server_options(server_type: ServerType) -> ServerOptions {
    ServerOptions {
        name: "test store".into(),
        address: "tcp://127.0.0.1/rtmpc/server/".into(),
        port: 0,
        server_type,
        store_params: true,
        store_predictions: false,
        ..ServerOptions::default()
    }
}

/// Started store on an ephemeral port.
pub fn started_store(server_type: ServerType) -> DataStore {
    let mut store = DataStore::new(server_options(server_type), dims()).expect("store builds");
    store.start().expect("store starts");
    store
}

pub fn manual_client(store: &DataStore) -> TagClient {
    let mut client = TagClient::new(store.client_options(ClientType::Manual));
    client.connect().expect("manual client connects");
    client
}

pub fn module_options(user_controlled: bool, output_feedback: bool) -> ModuleOptions {
    ModuleOptions {
        cycle_time: 0.05,
        user_controlled,
        output_feedback,
    }
}
