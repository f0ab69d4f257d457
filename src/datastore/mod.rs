//! Shared data store: tag namespace, wire protocol and the TCP server hosting them.

pub mod namespace;
pub mod protocol;
pub mod server;

pub use namespace::{DimensionTable, Namespace, Section, ServerType, TagAddress, TagField};
pub use server::DataStore;
