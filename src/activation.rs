//! Squash functions for network nodes.
//!
//! Every function carries its derivative (needed by backpropagation), a stable
//! name used by both serialization formats, and a Rust source rendering used by
//! standalone export.

use serde::{Deserialize, Serialize};

/// Squash function applied to a node's accumulated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activation {
    /// Logistic sigmoid: f(x) = 1 / (1 + e^(-x))
    #[default]
    Logistic,
    /// Hyperbolic tangent.
    Tanh,
    /// f(x) = x
    Identity,
    /// f(x) = 1 if x > 0 else 0
    Step,
    /// f(x) = max(0, x)
    Relu,
    /// f(x) = x / (1 + |x|)
    Softsign,
    /// f(x) = sin(x)
    Sinusoid,
    /// f(x) = e^(-x^2)
    Gaussian,
    /// f(x) = (sqrt(x^2 + 1) - 1) / 2 + x
    BentIdentity,
    /// f(x) = 1 if x > 0 else -1
    Bipolar,
    /// f(x) = 2 / (1 + e^(-x)) - 1
    BipolarSigmoid,
    /// f(x) = clamp(x, -1, 1)
    HardTanh,
    /// f(x) = |x|
    Absolute,
    /// f(x) = 1 - x
    Inverse,
    /// Scaled exponential linear unit.
    Selu,
    /// f(x) = ln(1 + e^x)
    Softplus,
    /// f(x) = x if x > 0 else 0.01x
    LeakyRelu,
}

const SELU_ALPHA: f64 = 1.673_263_242_354_377_3;
const SELU_SCALE: f64 = 1.050_700_987_355_480_5;

impl Activation {
    /// All available squash functions.
    pub const ALL: [Self; 17] = [
        Self::Logistic,
        Self::Tanh,
        Self::Identity,
        Self::Step,
        Self::Relu,
        Self::Softsign,
        Self::Sinusoid,
        Self::Gaussian,
        Self::BentIdentity,
        Self::Bipolar,
        Self::BipolarSigmoid,
        Self::HardTanh,
        Self::Absolute,
        Self::Inverse,
        Self::Selu,
        Self::Softplus,
        Self::LeakyRelu,
    ];

    /// Apply the function.
    ///
    /// NaN propagates; infinities saturate where the function has a limit.
    #[inline]
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }

        match self {
            Self::Logistic => {
                // exp overflows past ~709
                let clamped = x.clamp(-700.0, 700.0);
                1.0 / (1.0 + (-clamped).exp())
            }
            Self::Tanh => x.tanh(),
            Self::Identity => x,
            Self::Step => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Relu => x.max(0.0),
            Self::Softsign => {
                if x.is_infinite() {
                    return x.signum();
                }
                x / (1.0 + x.abs())
            }
            Self::Sinusoid => {
                if x.is_infinite() {
                    return 0.0;
                }
                x.sin()
            }
            Self::Gaussian => (-x * x).exp(),
            Self::BentIdentity => ((x * x + 1.0).sqrt() - 1.0) / 2.0 + x,
            Self::Bipolar => {
                if x > 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::BipolarSigmoid => {
                let clamped = x.clamp(-700.0, 700.0);
                2.0 / (1.0 + (-clamped).exp()) - 1.0
            }
            Self::HardTanh => x.clamp(-1.0, 1.0),
            Self::Absolute => x.abs(),
            Self::Inverse => 1.0 - x,
            Self::Selu => {
                let fx = if x > 0.0 {
                    x
                } else {
                    SELU_ALPHA * x.exp() - SELU_ALPHA
                };
                fx * SELU_SCALE
            }
            Self::Softplus => {
                // ln(1 + e^x) == x for large x within f64 precision
                if x > 30.0 {
                    x
                } else {
                    x.exp().ln_1p()
                }
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
        }
    }

    /// Derivative with respect to the input, evaluated at `x`.
    #[inline]
    #[must_use]
    pub fn derivative(self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }

        match self {
            Self::Logistic => {
                let fx = self.apply(x);
                fx * (1.0 - fx)
            }
            Self::Tanh => 1.0 - x.tanh().powi(2),
            Self::Identity => 1.0,
            Self::Step | Self::Bipolar => 0.0,
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Softsign => {
                let d = 1.0 + x.abs();
                1.0 / (d * d)
            }
            Self::Sinusoid => {
                if x.is_infinite() {
                    return 0.0;
                }
                x.cos()
            }
            Self::Gaussian => -2.0 * x * (-x * x).exp(),
            Self::BentIdentity => x / (2.0 * (x * x + 1.0).sqrt()) + 1.0,
            Self::BipolarSigmoid => {
                let fx = self.apply(x);
                (1.0 + fx) * (1.0 - fx) / 2.0
            }
            Self::HardTanh => {
                if x > -1.0 && x < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Absolute => {
                if x < 0.0 {
                    -1.0
                } else {
                    1.0
                }
            }
            Self::Inverse => -1.0,
            Self::Selu => {
                if x > 0.0 {
                    SELU_SCALE
                } else {
                    SELU_ALPHA * x.exp() * SELU_SCALE
                }
            }
            Self::Softplus => Self::Logistic.apply(x),
            Self::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
        }
    }

    /// Stable name used by the serialized formats.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Logistic => "LOGISTIC",
            Self::Tanh => "TANH",
            Self::Identity => "IDENTITY",
            Self::Step => "STEP",
            Self::Relu => "RELU",
            Self::Softsign => "SOFTSIGN",
            Self::Sinusoid => "SINUSOID",
            Self::Gaussian => "GAUSSIAN",
            Self::BentIdentity => "BENT_IDENTITY",
            Self::Bipolar => "BIPOLAR",
            Self::BipolarSigmoid => "BIPOLAR_SIGMOID",
            Self::HardTanh => "HARD_TANH",
            Self::Absolute => "ABSOLUTE",
            Self::Inverse => "INVERSE",
            Self::Selu => "SELU",
            Self::Softplus => "SOFTPLUS",
            Self::LeakyRelu => "LEAKY_RELU",
        }
    }

    /// Look a function up by its serialized name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    /// Name of the helper emitted by standalone export.
    pub(crate) fn source_ident(self) -> String {
        self.name().to_ascii_lowercase()
    }

    /// Self-contained Rust definition of this function.
    pub(crate) fn rust_source(self) -> String {
        let body = match self {
            Self::Logistic => "1.0 / (1.0 + (-x.clamp(-700.0, 700.0)).exp())",
            Self::Tanh => "x.tanh()",
            Self::Identity => "x",
            Self::Step => "if x > 0.0 { 1.0 } else { 0.0 }",
            Self::Relu => "x.max(0.0)",
            Self::Softsign => "x / (1.0 + x.abs())",
            Self::Sinusoid => "x.sin()",
            Self::Gaussian => "(-x * x).exp()",
            Self::BentIdentity => "((x * x + 1.0).sqrt() - 1.0) / 2.0 + x",
            Self::Bipolar => "if x > 0.0 { 1.0 } else { -1.0 }",
            Self::BipolarSigmoid => "2.0 / (1.0 + (-x.clamp(-700.0, 700.0)).exp()) - 1.0",
            Self::HardTanh => "x.clamp(-1.0, 1.0)",
            Self::Absolute => "x.abs()",
            Self::Inverse => "1.0 - x",
            Self::Selu => {
                "let fx = if x > 0.0 { x } else { 1.6732632423543772 * x.exp() - 1.6732632423543772 };\n    fx * 1.0507009873554805"
            }
            Self::Softplus => "if x > 30.0 { x } else { x.exp().ln_1p() }",
            Self::LeakyRelu => "if x > 0.0 { x } else { 0.01 * x }",
        };
        format!(
            "fn {}(x: f64) -> f64 {{\n    {}\n}}\n",
            self.source_ident(),
            body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logistic() {
        assert!((Activation::Logistic.apply(0.0) - 0.5).abs() < 1e-12);
        assert!(Activation::Logistic.apply(10.0) > 0.99);
        assert!(Activation::Logistic.apply(-10.0) < 0.01);
        assert!((Activation::Logistic.derivative(0.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_tanh() {
        assert!(Activation::Tanh.apply(0.0).abs() < 1e-12);
        assert!((Activation::Tanh.derivative(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_relu_family() {
        assert!((Activation::Relu.apply(0.5) - 0.5).abs() < 1e-12);
        assert!(Activation::Relu.apply(-0.5).abs() < 1e-12);
        assert!((Activation::LeakyRelu.apply(-1.0) + 0.01).abs() < 1e-12);
        assert!((Activation::LeakyRelu.derivative(-1.0) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_difference() {
        let h = 1e-6;
        for act in Activation::ALL {
            if matches!(act, Activation::Step | Activation::Bipolar) {
                continue;
            }
            for &x in &[-1.3, -0.4, 0.35, 1.7] {
                let numeric = (act.apply(x + h) - act.apply(x - h)) / (2.0 * h);
                let analytic = act.derivative(x);
                assert!(
                    (numeric - analytic).abs() < 1e-4,
                    "{:?} at {}: numeric {} vs analytic {}",
                    act,
                    x,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_name_roundtrip() {
        for act in Activation::ALL {
            assert_eq!(Activation::from_name(act.name()), Some(act));
        }
        assert_eq!(Activation::from_name("logistic"), Some(Activation::Logistic));
        assert_eq!(Activation::from_name("nope"), None);
    }

    #[test]
    fn test_extreme_inputs_stay_finite() {
        for act in [
            Activation::Logistic,
            Activation::Tanh,
            Activation::Softsign,
            Activation::BipolarSigmoid,
            Activation::HardTanh,
        ] {
            assert!(act.apply(f64::INFINITY).is_finite(), "{:?}", act);
            assert!(act.apply(f64::NEG_INFINITY).is_finite(), "{:?}", act);
        }
        assert!(Activation::Logistic.apply(f64::NAN).is_nan());
    }

    #[test]
    fn test_rust_source_names_function() {
        let src = Activation::BentIdentity.rust_source();
        assert!(src.starts_with("fn bent_identity(x: f64) -> f64"));
    }
}
