//! estimator.rs
//! Estimation role. The algorithm is picked once at construction from `EstimatorKind`:
//! state feedback passes the plant state through, the filter variants run a `FilterStep`
//! on the optimal input, measurement and parameters.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::{
    client::supervision::Slot,
    config::{ClientOptions, ModuleOptions},
    datastore::namespace::TagField,
    engine::{Estimate, FilterStep},
    error::LinkResult,
    realtime::module::{CycleOutcome, ModuleCore, RealtimeModule},
    utils::metrics::Telemetry,
};

/// Configuration-level name of an estimator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorCapability {
    #[default]
    StateFeedback,
    ExtendedKalman,
    MovingHorizon,
}

pub enum EstimatorKind {
    StateFeedback,
    ExtendedKalman(Box<dyn FilterStep>),
    MovingHorizon(Box<dyn FilterStep>),
}

impl EstimatorKind {
    pub fn capability(&self) -> EstimatorCapability {
        match self {
            EstimatorKind::StateFeedback => EstimatorCapability::StateFeedback,
            EstimatorKind::ExtendedKalman(_) => EstimatorCapability::ExtendedKalman,
            EstimatorKind::MovingHorizon(_) => EstimatorCapability::MovingHorizon,
        }
    }
}

pub struct RealtimeEstimator {
    core: ModuleCore,
    kind: EstimatorKind,
}

impl RealtimeEstimator {
    pub fn new(client_options: ClientOptions, options: ModuleOptions, kind: EstimatorKind) -> LinkResult<Self> {
        let core = ModuleCore::new(
            Slot::Estimator,
            vec![Slot::Simulator],
            TagField::XHat,
            client_options,
            options,
        )?;
        match kind {
            EstimatorKind::StateFeedback => core.require(TagField::X)?,
            EstimatorKind::ExtendedKalman(_) | EstimatorKind::MovingHorizon(_) => {
                core.require(TagField::Y)?;
                core.require(TagField::UOpt)?;
            }
        }
        Ok(Self { core, kind })
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.core.set_telemetry(telemetry);
        self
    }

    pub fn capability(&self) -> EstimatorCapability {
        self.kind.capability()
    }

    fn run_cycle(&mut self) -> CycleOutcome {
        if let Some(outcome) = self.core.gate() {
            return outcome;
        }
        let started = Instant::now();

        let estimate = match &mut self.kind {
            EstimatorKind::StateFeedback => match self.core.read_critical(TagField::X) {
                Ok(x) => Estimate {
                    x_hat: x,
                    z_hat: None,
                    p_hat: None,
                },
                Err(e) => return self.core.fault(e),
            },
            EstimatorKind::ExtendedKalman(filter) | EstimatorKind::MovingHorizon(filter) => {
                let u = match self.core.read_critical(TagField::UOpt) {
                    Ok(u) => u,
                    Err(e) => return self.core.fault(e),
                };
                let y = match self.core.read_critical(TagField::Y) {
                    Ok(y) => y,
                    Err(e) => return self.core.fault(e),
                };
                let p = self.core.read_optional(TagField::P);
                match filter.make_step(&y, &u, &p) {
                    Ok(estimate) => estimate,
                    Err(failure) => return self.core.step_failed(failure.to_string()),
                }
            }
        };

        if let Err(e) = self.core.write_critical(TagField::XHat, &estimate.x_hat) {
            return self.core.fault(e);
        }
        if let Some(z_hat) = &estimate.z_hat {
            self.core.write_best_effort(TagField::ZHat, z_hat);
        }
        if let Some(p_hat) = &estimate.p_hat {
            self.core.write_best_effort(TagField::PHat, p_hat);
        }

        self.core.complete(started)
    }
}

impl RealtimeModule for RealtimeEstimator {
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
