//! controller.rs
//! MPC role: gated by `check_status`, warm-starts from the plant state (or the estimate
//! under output feedback), solves, publishes the optimal input.
//!
//! A failed solve leaves `OptimalOutputs` untouched for the cycle.

use std::time::Instant;

use log::debug;

use crate::{
    client::supervision::Slot,
    config::{ClientOptions, ModuleOptions},
    datastore::namespace::TagField,
    engine::OptimalControlSolver,
    error::LinkResult,
    realtime::module::{CycleOutcome, ModuleCore, RealtimeModule},
    utils::metrics::Telemetry,
};

pub struct RealtimeController<S> {
    core: ModuleCore,
    solver: S,
    /// Seconds left of the cycle after the last solve.
    last_residual: Option<f64>,
}

impl<S: OptimalControlSolver> RealtimeController<S> {
    pub fn new(client_options: ClientOptions, options: ModuleOptions, solver: S) -> LinkResult<Self> {
        let core = ModuleCore::new(
            Slot::Controller,
            vec![Slot::Simulator, Slot::Estimator],
            TagField::UOpt,
            client_options,
            options,
        )?;
        core.require(if options.output_feedback { TagField::XHat } else { TagField::X })?;
        Ok(Self {
            core,
            solver,
            last_residual: None,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.core.set_telemetry(telemetry);
        self
    }

    pub fn last_residual(&self) -> Option<f64> {
        self.last_residual
    }

    fn warm_start_field(&self) -> TagField {
        if self.core.options().output_feedback {
            TagField::XHat
        } else {
            TagField::X
        }
    }

    fn run_cycle(&mut self) -> CycleOutcome {
        if let Some(outcome) = self.core.gate() {
            return outcome;
        }
        let started = Instant::now();

        let x0 = match self.core.read_critical(self.warm_start_field()) {
            Ok(x0) => x0,
            Err(e) => return self.core.fault(e),
        };
        self.core.write_best_effort(TagField::XInit, &x0);

        let solve_started = Instant::now();
        let solution = self.solver.make_step(&x0);
        let solve_time = solve_started.elapsed().as_secs_f64();
        let residual = self.core.options().cycle_time - solve_time;
        self.last_residual = Some(residual);
        debug!(
            "[{}] solve took {:.4}s, residual budget {:.4}s",
            self.core.name(),
            solve_time,
            residual
        );

        let solution = match solution {
            Ok(solution) => solution,
            Err(failure) => return self.core.step_failed(failure.to_string()),
        };

        if let Err(e) = self.core.write_critical(TagField::UOpt, &solution.u) {
            return self.core.fault(e);
        }
        if let Some(x_pred) = &solution.x_pred {
            self.core.write_best_effort(TagField::XPred, x_pred);
        }
        if let Some(u_pred) = &solution.u_pred {
            self.core.write_best_effort(TagField::UPred, u_pred);
        }

        self.core.complete(started)
    }
}

impl<S: OptimalControlSolver> RealtimeModule for RealtimeController<S> {
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
