//! Real-time layer: the periodic trigger and the three module roles it drives.

pub mod controller;
pub mod estimator;
pub mod module;
pub mod simulator;
pub mod trigger;

pub use controller::RealtimeController;
pub use estimator::{EstimatorCapability, EstimatorKind, RealtimeEstimator};
pub use module::{CycleOutcome, ModuleCore, ModuleState, RealtimeModule, SharedModule, StatusCheck, shared};
pub use simulator::RealtimeSimulator;
pub use trigger::{PeriodicTrigger, TriggerStats};
