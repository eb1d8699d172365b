//! Stochastic processes producing rate curves for spatio-temporal templates.
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::PatternError;

/// Number of initial samples discarded by default (burn-in).
pub const DEFAULT_BURN_IN: usize = 50;

/// Anything able to produce a rate curve of a given number of time steps.
pub trait RateProcess {
    /// Returns a sequence of `length` values.
    fn create<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> Vec<f64>;
}

/// Map applied to the raw process values before they are returned.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMap {
    /// f(x) = x
    Linear,
    /// f(x) = scale * exp(x), e.g., to turn a membrane potential into a rate.
    ScaledExp(f64),
}

impl OutputMap {
    fn apply(&self, x: f64) -> f64 {
        match self {
            OutputMap::Linear => x,
            OutputMap::ScaledExp(scale) => scale * x.exp(),
        }
    }
}

/// Ornstein-Uhlenbeck process, clipped from above at ln(50).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OuProcess {
    mean: f64,
    theta: f64,
    sigma: f64,
    dt: f64,
    burn_in: usize,
    output: OutputMap,
}

impl OuProcess {
    /// Create a new process reverting to `mean` with speed `theta` and noise scale `sigma`.
    /// Returns an error if the step size is not positive or the noise scale is negative.
    pub fn build(mean: f64, theta: f64, sigma: f64, dt: f64) -> Result<Self, PatternError> {
        if !(dt > 0.0) {
            return Err(PatternError::InvalidParameter(
                "The OU process time step must be positive.".to_string(),
            ));
        }
        if !(sigma >= 0.0) {
            return Err(PatternError::InvalidParameter(
                "The OU process noise scale must be non-negative.".to_string(),
            ));
        }
        Ok(OuProcess {
            mean,
            theta,
            sigma,
            dt,
            burn_in: DEFAULT_BURN_IN,
            output: OutputMap::Linear,
        })
    }

    /// Set the map applied to the process values.
    pub fn with_output(mut self, output: OutputMap) -> Self {
        self.output = output;
        self
    }

    /// Set the number of discarded initial samples.
    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn output(&self) -> OutputMap {
        self.output
    }
}

impl RateProcess for OuProcess {
    fn create<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> Vec<f64> {
        let ceiling = 50_f64.ln();
        let total = length + self.burn_in;
        let mut values = Vec::with_capacity(total);

        let z: f64 = StandardNormal.sample(rng);
        let mut u = self.mean + z;
        values.push(u);
        for _ in 1..total {
            let noise: f64 = StandardNormal.sample(rng);
            u = u + self.theta * (self.mean - u) * self.dt + noise * self.sigma;
            u = u.min(ceiling);
            values.push(u);
        }

        values
            .into_iter()
            .skip(self.burn_in)
            .map(|x| self.output.apply(x))
            .collect()
    }
}
