//! Cost functions used by training and testing.

use serde::{Deserialize, Serialize};

/// Clamp applied to predictions before taking logarithms.
const LOG_EPSILON: f64 = 1e-15;

/// Error measure between a target vector and a network output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cost {
    /// Binary cross entropy, averaged over outputs.
    CrossEntropy,
    /// Mean squared error.
    #[default]
    Mse,
    /// Number of outputs that land in a different half-unit bucket than the target.
    Binary,
    /// Mean absolute error.
    Mae,
    /// Mean absolute percentage error.
    Mape,
    /// Mean squared logarithmic error.
    Msle,
    /// Hinge loss for targets in {-1, 1}.
    Hinge,
}

impl Cost {
    /// All cost functions.
    pub const ALL: [Self; 7] = [
        Self::CrossEntropy,
        Self::Mse,
        Self::Binary,
        Self::Mae,
        Self::Mape,
        Self::Msle,
        Self::Hinge,
    ];

    /// Evaluate the cost of `output` against `target`.
    ///
    /// Extra elements of the longer slice are ignored. Every cost except
    /// [`Cost::Binary`] is averaged over the outputs.
    #[must_use]
    pub fn evaluate(self, target: &[f64], output: &[f64]) -> f64 {
        let n = target.len().min(output.len());
        if n == 0 {
            return 0.0;
        }
        let pairs = target.iter().zip(output);

        let total: f64 = match self {
            Self::CrossEntropy => pairs
                .map(|(&t, &o)| {
                    let o = o.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
                    -(t * o.ln() + (1.0 - t) * (1.0 - o).ln())
                })
                .sum(),
            Self::Mse => pairs.map(|(&t, &o)| (t - o).powi(2)).sum(),
            Self::Binary => pairs
                .filter(|&(&t, &o)| (t * 2.0).round() != (o * 2.0).round())
                .count() as f64,
            Self::Mae => pairs.map(|(&t, &o)| (t - o).abs()).sum(),
            Self::Mape => pairs
                .map(|(&t, &o)| ((o - t) / t.abs().max(LOG_EPSILON)).abs())
                .sum(),
            Self::Msle => pairs
                .map(|(&t, &o)| {
                    let d = t.max(LOG_EPSILON).ln() - o.max(LOG_EPSILON).ln();
                    d * d
                })
                .sum(),
            Self::Hinge => pairs.map(|(&t, &o)| (1.0 - t * o).max(0.0)).sum(),
        };

        if self == Self::Binary {
            total
        } else {
            total / n as f64
        }
    }

    /// Error signal injected at an output node by the backward pass.
    ///
    /// This is the negative gradient of the per-output cost with respect to
    /// the output, with constant factors dropped so that MSE gives the plain
    /// residual `target - output`. Cross entropy and binary use the residual
    /// too: for cross entropy on a logistic output it is the exact gradient
    /// with respect to the pre-squash state, and binary has no gradient.
    #[must_use]
    pub fn output_delta(self, target: f64, output: f64) -> f64 {
        let residual = target - output;
        match self {
            Self::Mse | Self::CrossEntropy | Self::Binary => residual,
            Self::Mae => sign(residual),
            Self::Mape => sign(residual) / target.abs().max(LOG_EPSILON),
            Self::Msle => {
                if output <= LOG_EPSILON {
                    0.0
                } else {
                    (target.max(LOG_EPSILON).ln() - output.ln()) / output
                }
            }
            Self::Hinge => {
                if target * output < 1.0 {
                    target
                } else {
                    0.0
                }
            }
        }
    }

    /// Stable name, matching the serialized form.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CrossEntropy => "CROSS_ENTROPY",
            Self::Mse => "MSE",
            Self::Binary => "BINARY",
            Self::Mae => "MAE",
            Self::Mape => "MAPE",
            Self::Msle => "MSLE",
            Self::Hinge => "HINGE",
        }
    }

    /// Look a cost up by name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

/// `signum` that maps zero to zero.
fn sign(x: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x.signum()
    }
}
