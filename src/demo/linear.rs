//! linear.rs
//! Toy engines for the demo binary and the tests: a noisy first-order plant,
//! a saturated proportional controller and a blending filter.

use rand::random_range;

use crate::{
    engine::{Estimate, FilterStep, OptimalControlSolver, PlantIntegrator, PlantStep, SolveOutcome},
    error::StepFailure,
};

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// x[i] <- decay * x[i] + gain * u[i % n_u] + noise; y[j] = x[j % n_x] + noise.
#[derive(Debug, Clone)]
pub struct LinearPlant {
    x: Vec<f64>,
    params: Vec<f64>,
    n_y: usize,
    decay: f64,
    gain: f64,
    noise: f64,
}

impl LinearPlant {
    pub fn new(x0: Vec<f64>, n_y: usize, params: Vec<f64>) -> Self {
        Self {
            x: x0,
            params,
            n_y,
            decay: 0.95,
            gain: 0.1,
            noise: 0.0,
        }
    }

    /// Uniform process and measurement noise in [-amplitude, amplitude).
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.abs();
        self
    }

    pub fn state(&self) -> &[f64] {
        &self.x
    }

    fn jitter(&self) -> f64 {
        if self.noise > 0.0 {
            random_range(-self.noise..self.noise)
        } else {
            0.0
        }
    }
}

impl PlantIntegrator for LinearPlant {
    fn make_step(&mut self, u: &[f64]) -> Result<PlantStep, StepFailure> {
        if self.x.is_empty() {
            return Err(StepFailure::new("integrator", "plant has no states"));
        }
        if u.is_empty() || !all_finite(u) {
            return Err(StepFailure::new("integrator", format!("unusable input {:?}", u)));
        }

        for i in 0..self.x.len() {
            let next = self.decay * self.x[i] + self.gain * u[i % u.len()] + self.jitter();
            self.x[i] = next;
        }
        let n_x = self.x.len();
        let y = (0..self.n_y).map(|j| self.x[j % n_x] + self.jitter()).collect();

        Ok(PlantStep {
            x: self.x.clone(),
            y,
            z: None,
            p: (!self.params.is_empty()).then(|| self.params.clone()),
            aux: None,
        })
    }
}

/// u[j] = clamp(-gain * (x[j % n_x] - setpoint[j % n_x]), u_min, u_max).
#[derive(Debug, Clone)]
pub struct SaturatedFeedbackSolver {
    n_u: usize,
    setpoint: Vec<f64>,
    gain: f64,
    u_min: f64,
    u_max: f64,
    horizon: usize,
}

impl SaturatedFeedbackSolver {
    pub fn new(n_u: usize, setpoint: Vec<f64>) -> Self {
        Self {
            n_u,
            setpoint,
            gain: 0.5,
            u_min: -10.0,
            u_max: 10.0,
            horizon: 0,
        }
    }

    pub fn with_bounds(mut self, u_min: f64, u_max: f64) -> Self {
        self.u_min = u_min.min(u_max);
        self.u_max = u_max.max(u_min);
        self
    }

    /// Also return flat predicted trajectories over `n_steps`.
    pub fn with_horizon(mut self, n_steps: usize) -> Self {
        self.horizon = n_steps;
        self
    }
}

impl OptimalControlSolver for SaturatedFeedbackSolver {
    fn make_step(&mut self, x0: &[f64]) -> Result<SolveOutcome, StepFailure> {
        if x0.is_empty() || !all_finite(x0) {
            return Err(StepFailure::new("solver", format!("infeasible warm start {:?}", x0)));
        }

        let n_x = x0.len();
        let u: Vec<f64> = (0..self.n_u)
            .map(|j| {
                let reference = self.setpoint.get(j % n_x).copied().unwrap_or(0.0);
                (-self.gain * (x0[j % n_x] - reference)).clamp(self.u_min, self.u_max)
            })
            .collect();

        let (x_pred, u_pred) = if self.horizon > 0 {
            (
                Some(x0.iter().copied().cycle().take(n_x * self.horizon).collect()),
                Some(u.iter().copied().cycle().take(self.n_u * self.horizon).collect()),
            )
        } else {
            (None, None)
        };

        Ok(SolveOutcome { u, x_pred, u_pred })
    }
}

/// x_hat <- alpha * y + (1 - alpha) * x_hat, with y mapped onto the states by index.
#[derive(Debug, Clone)]
pub struct BlendingFilter {
    x_hat: Vec<f64>,
    alpha: f64,
}

impl BlendingFilter {
    pub fn new(x0: Vec<f64>, alpha: f64) -> Self {
        Self {
            x_hat: x0,
            alpha: alpha.clamp(0.0, 1.0),
        }
    }
}

impl FilterStep for BlendingFilter {
    fn make_step(&mut self, y: &[f64], _u: &[f64], p: &[f64]) -> Result<Estimate, StepFailure> {
        if y.is_empty() || !all_finite(y) {
            return Err(StepFailure::new("filter", format!("unusable measurement {:?}", y)));
        }

        let n_y = y.len();
        for (i, x) in self.x_hat.iter_mut().enumerate() {
            *x = self.alpha * y[i % n_y] + (1.0 - self.alpha) * *x;
        }

        Ok(Estimate {
            x_hat: self.x_hat.clone(),
            z_hat: None,
            p_hat: (!p.is_empty()).then(|| p.to_vec()),
        })
    }
}
