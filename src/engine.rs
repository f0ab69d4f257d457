//! engine.rs
//! Seams to the numeric engines. The coordination layer only sees one opaque step per cycle.

use crate::error::StepFailure;

/// Result of advancing the plant by one step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlantStep {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Option<Vec<f64>>,
    pub p: Option<Vec<f64>>,
    pub aux: Option<Vec<f64>>,
}

/// Result of one optimal-control solve.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolveOutcome {
    pub u: Vec<f64>,
    /// Flattened predicted state trajectory (n_x per step).
    pub x_pred: Option<Vec<f64>>,
    /// Flattened predicted input trajectory (n_u per step).
    pub u_pred: Option<Vec<f64>>,
}

/// Result of one filter update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Estimate {
    pub x_hat: Vec<f64>,
    pub z_hat: Option<Vec<f64>>,
    pub p_hat: Option<Vec<f64>>,
}

/// Plant integrator driven by the simulator role.
pub trait PlantIntegrator: Send {
    fn make_step(&mut self, u: &[f64]) -> Result<PlantStep, StepFailure>;
}

/// Optimal-control solver driven by the controller role; `x0` is the warm start.
pub trait OptimalControlSolver: Send {
    fn make_step(&mut self, x0: &[f64]) -> Result<SolveOutcome, StepFailure>;
}

/// Filter update shared by the Kalman-style and moving-horizon estimators.
pub trait FilterStep: Send {
    fn make_step(&mut self, y: &[f64], u: &[f64], p: &[f64]) -> Result<Estimate, StepFailure>;
}

impl<F> PlantIntegrator for F
where
    F: FnMut(&[f64]) -> Result<PlantStep, StepFailure> + Send,
{
    fn make_step(&mut self, u: &[f64]) -> Result<PlantStep, StepFailure> {
        self(u)
    }
}

impl<F> OptimalControlSolver for F
where
    F: FnMut(&[f64]) -> Result<SolveOutcome, StepFailure> + Send,
{
    fn make_step(&mut self, x0: &[f64]) -> Result<SolveOutcome, StepFailure> {
        self(x0)
    }
}

impl<F> FilterStep for F
where
    F: FnMut(&[f64], &[f64], &[f64]) -> Result<Estimate, StepFailure> + Send,
{
    fn make_step(&mut self, y: &[f64], u: &[f64], p: &[f64]) -> Result<Estimate, StepFailure> {
        self(y, u, p)
    }
}
