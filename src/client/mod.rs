//! Client side of the data store: tag sessions and the flag/switch helpers built on them.

pub mod supervision;
pub mod tag_client;

pub use supervision::{Selector, Slot, SupervisionBits};
pub use tag_client::TagClient;
