//! simulator.rs
//! Plant role: reads the controller's latest optimal input, advances the plant one step,
//! publishes state and measurements. The applied input is mirrored to `Inputs`.
//! No readiness gate; it runs whenever it is enabled and connected.

use std::time::Instant;

use crate::{
    client::supervision::Slot,
    config::{ClientOptions, ModuleOptions},
    datastore::namespace::TagField,
    engine::PlantIntegrator,
    error::LinkResult,
    realtime::module::{CycleOutcome, ModuleCore, RealtimeModule},
    utils::metrics::Telemetry,
};

pub struct RealtimeSimulator<P> {
    core: ModuleCore,
    plant: P,
}

impl<P: PlantIntegrator> RealtimeSimulator<P> {
    pub fn new(client_options: ClientOptions, options: ModuleOptions, plant: P) -> LinkResult<Self> {
        let core = ModuleCore::new(Slot::Simulator, Vec::new(), TagField::X, client_options, options)?;
        core.require(TagField::Y)?;
        core.require(TagField::UOpt)?;
        Ok(Self { core, plant })
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.core.set_telemetry(telemetry);
        self
    }

    pub fn plant(&self) -> &P {
        &self.plant
    }

    fn run_cycle(&mut self) -> CycleOutcome {
        if let Some(outcome) = self.core.gate_ungated() {
            return outcome;
        }
        let started = Instant::now();

        let u = match self.core.read_critical(TagField::UOpt) {
            Ok(u) => u,
            Err(e) => return self.core.fault(e),
        };
        self.core.write_best_effort(TagField::U, &u);

        let step = match self.plant.make_step(&u) {
            Ok(step) => step,
            Err(failure) => return self.core.step_failed(failure.to_string()),
        };

        if let Err(e) = self.core.write_critical(TagField::X, &step.x) {
            return self.core.fault(e);
        }
        if let Err(e) = self.core.write_critical(TagField::Y, &step.y) {
            return self.core.fault(e);
        }

        if let Some(z) = &step.z {
            self.core.write_best_effort(TagField::Z, z);
        }
        if let Some(p) = &step.p {
            self.core.write_best_effort(TagField::P, p);
        }
        if let Some(aux) = &step.aux {
            self.core.write_best_effort(TagField::Aux, aux);
        }

        self.core.complete(started)
    }
}

impl<P: PlantIntegrator> RealtimeModule for RealtimeSimulator<P> {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn asynchronous_step(&mut self) -> CycleOutcome {
        let outcome = self.run_cycle();
        self.core.record(outcome)
    }
}
