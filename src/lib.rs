//! # rtmpc_link
//! Coordination layer for independently running control-loop processes
//! (plant simulator, MPC controller, state estimator) that exchange numeric vectors
//! through a shared, network-addressable data store.
//!
//! - **datastore:** tag namespace, wire protocol, TCP server.
//! - **client:** tag sessions plus flag/switch supervision.
//! - **realtime:** drift-compensating trigger and the readiness-gated module roles.
//! - **engine:** seams to the numeric step functions.

pub mod client;
pub mod config;
pub mod console;
pub mod datastore;
pub mod demo;
pub mod engine;
pub mod error;
pub mod realtime;
pub mod utils;

pub use error::{LinkError, LinkResult, StepFailure};
