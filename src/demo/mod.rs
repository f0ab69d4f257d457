//! Demo wiring: one store, the three roles on toy engines, one trigger per role.

pub mod linear;

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    client::supervision::Slot,
    config::{ClientType, LinkConfig},
    datastore::{namespace::DimensionTable, server::DataStore},
    error::{LinkError, LinkResult},
    realtime::{
        controller::RealtimeController,
        estimator::{EstimatorCapability, EstimatorKind, RealtimeEstimator},
        module::{RealtimeModule, SharedModule, shared},
        simulator::RealtimeSimulator,
        trigger::PeriodicTrigger,
    },
    utils::metrics::Telemetry,
};

use linear::{BlendingFilter, LinearPlant, SaturatedFeedbackSolver};

/// Reference plant state used to seed the demo.
pub const REFERENCE_STATE: [f64; 4] = [1.0, 0.5, 134.14, 130.0];

/// `REFERENCE_STATE` repeated or cut to `n_x` entries.
pub fn initial_state(n_x: usize) -> Vec<f64> {
    REFERENCE_STATE.iter().copied().cycle().take(n_x).collect()
}

pub fn initial_input(n_u: usize) -> Vec<f64> {
    vec![0.0; n_u.max(1)]
}

pub type DynModule = Arc<Mutex<dyn RealtimeModule>>;

pub struct DemoLink {
    pub store: DataStore,
    pub telemetry: Telemetry,
    pub simulator: SharedModule<RealtimeSimulator<LinearPlant>>,
    pub controller: SharedModule<RealtimeController<SaturatedFeedbackSolver>>,
    pub estimator: Option<SharedModule<RealtimeEstimator>>,
    triggers: Vec<PeriodicTrigger>,
}

impl DemoLink {
    /// Starts the store and initialises every role. A role whose init fails stays
    /// in the link, disabled, and gets no trigger.
    pub fn build(config: &LinkConfig) -> LinkResult<Self> {
        config.validate()?;
        let dims: DimensionTable = config.dimensions;

        let mut store = DataStore::new(config.server.clone(), dims)?;
        store.start()?;
        let telemetry = Telemetry::new();

        let x0 = initial_state(dims.n_x);
        let params = vec![1.0; dims.n_p];

        let plant = LinearPlant::new(x0.clone(), dims.n_y.max(1), params).with_noise(0.01);
        let simulator = RealtimeSimulator::new(
            store.client_options(ClientType::Simulator),
            config.simulator,
            plant,
        )?
        .with_telemetry(telemetry.clone());

        let solver = SaturatedFeedbackSolver::new(dims.n_u.max(1), vec![0.0; dims.n_x])
            .with_horizon(if config.server.store_predictions { config.server.n_steps_pred } else { 0 });
        let controller = RealtimeController::new(
            store.client_options(ClientType::Controller),
            config.controller,
            solver,
        )?
        .with_telemetry(telemetry.clone());

        let estimator = if config.server.server_type.has_estimator() {
            let kind = match config.estimator_kind {
                EstimatorCapability::StateFeedback => EstimatorKind::StateFeedback,
                EstimatorCapability::ExtendedKalman => {
                    EstimatorKind::ExtendedKalman(Box::new(BlendingFilter::new(x0.clone(), 0.3)))
                }
                EstimatorCapability::MovingHorizon => {
                    EstimatorKind::MovingHorizon(Box::new(BlendingFilter::new(x0.clone(), 0.6)))
                }
            };
            let estimator = RealtimeEstimator::new(
                store.client_options(ClientType::Estimator),
                config.estimator,
                kind,
            )?
            .with_telemetry(telemetry.clone());
            Some(shared(estimator))
        } else {
            None
        };

        let link = Self {
            store,
            telemetry,
            simulator: shared(simulator),
            controller: shared(controller),
            estimator,
            triggers: Vec::new(),
        };

        link.simulator.lock().init(&x0);
        link.controller.lock().init(&initial_input(dims.n_u));
        if let Some(estimator) = &link.estimator {
            estimator.lock().init(&x0);
        }

        Ok(link)
    }

    pub fn modules(&self) -> Vec<DynModule> {
        let mut modules: Vec<DynModule> = Vec::with_capacity(3);
        modules.push(self.simulator.clone());
        modules.push(self.controller.clone());
        if let Some(estimator) = &self.estimator {
            modules.push(estimator.clone());
        }
        modules
    }

    pub fn module(&self, slot: Slot) -> Option<DynModule> {
        self.modules().into_iter().find(|m| m.lock().slot() == slot)
    }

    /// One trigger per initialised role. Roles that never initialised are reported and left out.
    pub fn start_triggers(&mut self) -> LinkResult<usize> {
        if !self.triggers.is_empty() {
            return Ok(self.triggers.len());
        }
        for module in self.modules() {
            match PeriodicTrigger::for_module(module) {
                Ok(trigger) => self.triggers.push(trigger),
                Err(LinkError::NotInitialized(name)) => {
                    warn!("[Demo] {} not initialised, no trigger started", name)
                }
                Err(e) => return Err(e),
            }
        }
        info!("[Demo] {} trigger(s) running", self.triggers.len());
        Ok(self.triggers.len())
    }

    pub fn triggers(&self) -> &[PeriodicTrigger] {
        &self.triggers
    }

    pub fn stop_triggers(&mut self) {
        for trigger in &mut self.triggers {
            trigger.stop();
        }
        self.triggers.clear();
    }

    /// Stops triggers, disconnects every role, stops the store.
    pub fn shutdown(&mut self) -> LinkResult<()> {
        self.stop_triggers();
        for module in self.modules() {
            module.lock().stop();
        }
        self.store.stop()
    }
}

impl Drop for DemoLink {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
