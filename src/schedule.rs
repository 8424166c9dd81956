//! Learning-rate policies.
//!
//! A policy maps the base rate and the 1-based training iteration to the rate
//! used for that iteration.

use serde::{Deserialize, Serialize};

/// Learning-rate schedule.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RatePolicy {
    /// Constant rate.
    #[default]
    Fixed,
    /// `base * gamma^floor(iteration / step_size)`.
    Step {
        /// Decay factor per step.
        gamma: f64,
        /// Iterations per step.
        step_size: u64,
    },
    /// `base * gamma^iteration`.
    Exp {
        /// Decay factor per iteration.
        gamma: f64,
    },
    /// `base * (1 + gamma * iteration)^-power`.
    Inv {
        /// Decay speed.
        gamma: f64,
        /// Decay exponent.
        power: f64,
    },
    /// Cosine annealing between `base` and `min_rate` with restarts every `period`.
    Cosine {
        /// Iterations per cycle.
        period: u64,
        /// Rate at the end of each cycle.
        min_rate: f64,
    },
}

impl RatePolicy {
    /// Step decay with the usual defaults (`gamma` 0.9 every 100 iterations).
    #[must_use]
    pub fn step() -> Self {
        Self::Step {
            gamma: 0.9,
            step_size: 100,
        }
    }

    /// Exponential decay with `gamma` 0.999.
    #[must_use]
    pub fn exp() -> Self {
        Self::Exp { gamma: 0.999 }
    }

    /// Inverse decay with `gamma` 0.001 and `power` 2.
    #[must_use]
    pub fn inv() -> Self {
        Self::Inv {
            gamma: 0.001,
            power: 2.0,
        }
    }

    /// Rate for `iteration` given the base rate.
    #[must_use]
    pub fn rate(&self, base: f64, iteration: u64) -> f64 {
        match *self {
            Self::Fixed => base,
            Self::Step { gamma, step_size } => {
                let steps = iteration / step_size.max(1);
                base * gamma.powf(steps as f64)
            }
            Self::Exp { gamma } => base * gamma.powf(iteration as f64),
            Self::Inv { gamma, power } => base * (1.0 + gamma * iteration as f64).powf(-power),
            Self::Cosine { period, min_rate } => {
                let period = period.max(1);
                let phase = (iteration % period) as f64 / period as f64;
                min_rate + (base - min_rate) * 0.5 * (1.0 + (std::f64::consts::PI * phase).cos())
            }
        }
    }
}
