//! Training loop.
//!
//! [`Network::train`] runs whole passes over a dataset until an iteration
//! limit or a target error is reached. Each sample is activated with traces,
//! backpropagated into the accumulators and applied at batch boundaries.
//! Stochastic effects draw from the network's own seeded stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::cost::Cost;
use crate::error::{NetworkError, Result};
use crate::gene::ConnectionId;
use crate::network::{Network, Regularization, Step};
use crate::schedule::RatePolicy;

/// One input/target pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f64>,
    pub output: Vec<f64>,
}

impl Sample {
    #[must_use]
    pub fn new(input: Vec<f64>, output: Vec<f64>) -> Self {
        Self { input, output }
    }
}

/// Hold out the tail of the dataset and stop once its error is low enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossValidate {
    /// Fraction of samples held out, in `(0, 1)`.
    pub test_size: f64,
    /// Held-out error that ends training.
    pub test_error: f64,
}

/// Limit applied to the accumulated deltas before each update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum GradientClip {
    /// Rescale so the global L2 norm is at most this value.
    Norm(f64),
    /// Clamp every delta to `[-v, v]`.
    Value(f64),
}

/// Loss-scale bookkeeping.
///
/// Backpropagation runs with the rate multiplied by the current scale and the
/// accumulated deltas are divided by it before each update. A batch whose
/// deltas overflow is skipped and the scale halved; after `growth_interval`
/// clean batches the scale doubles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixedPrecision {
    pub initial_scale: f64,
    pub growth_interval: u64,
    pub min_scale: f64,
}

impl Default for MixedPrecision {
    fn default() -> Self {
        Self {
            initial_scale: 65536.0,
            growth_interval: 2000,
            min_scale: 1.0,
        }
    }
}

/// Options for [`Network::train`].
///
/// At least one of `iterations`, `error` or `cross_validate` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOptions {
    /// Base learning rate.
    pub rate: f64,
    /// Maximum number of passes over the training samples.
    pub iterations: Option<u64>,
    /// Training error at which to stop.
    pub error: Option<f64>,
    pub momentum: f64,
    /// Samples per update.
    pub batch_size: usize,
    pub cost: Cost,
    pub rate_policy: RatePolicy,
    pub cross_validate: Option<CrossValidate>,
    /// Shuffle the training samples after every pass.
    pub shuffle: bool,
    /// Clear recurrent state after every pass.
    pub clear: bool,
    /// Log progress every this many iterations.
    pub log_every: Option<u64>,
    /// Overrides [`Network::dropout`] when set.
    pub dropout: Option<f64>,
    /// Probability of dropping each connection for one sample.
    pub dropconnect: f64,
    /// Standard deviation of the Gaussian noise added to weights for one sample.
    pub weight_noise: f64,
    pub regularization: Regularization,
    pub gradient_clip: Option<GradientClip>,
    pub mixed_precision: Option<MixedPrecision>,
    /// Consecutive non-finite pass errors tolerated before aborting.
    pub max_non_finite: usize,
    /// Checked before every iteration; training ends once it is set.
    #[serde(skip)]
    pub stop: Option<Arc<AtomicBool>>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            rate: 0.3,
            iterations: None,
            error: None,
            momentum: 0.0,
            batch_size: 1,
            cost: Cost::Mse,
            rate_policy: RatePolicy::Fixed,
            cross_validate: None,
            shuffle: false,
            clear: false,
            log_every: None,
            dropout: None,
            dropconnect: 0.0,
            weight_noise: 0.0,
            regularization: Regularization::None,
            gradient_clip: None,
            mixed_precision: None,
            max_non_finite: 5,
            stop: None,
        }
    }
}

impl TrainOptions {
    /// Number of training samples, after any held-out split.
    fn validate(&self, len: usize) -> Result<usize> {
        fn invalid(msg: String) -> NetworkError {
            NetworkError::InvalidOption(msg)
        }

        if len == 0 {
            return Err(NetworkError::EmptyDataset);
        }
        if self.iterations.is_none() && self.error.is_none() && self.cross_validate.is_none() {
            return Err(NetworkError::NoStopCondition);
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(invalid(format!("rate {} must be positive", self.rate)));
        }
        if !self.momentum.is_finite() {
            return Err(invalid(format!("momentum {} is not finite", self.momentum)));
        }
        if let Some(dropout) = self.dropout {
            if !(0.0..1.0).contains(&dropout) {
                return Err(invalid(format!("dropout {} is outside [0, 1)", dropout)));
            }
        }
        if !(0.0..1.0).contains(&self.dropconnect) {
            return Err(invalid(format!(
                "dropconnect {} is outside [0, 1)",
                self.dropconnect
            )));
        }
        if !(self.weight_noise.is_finite() && self.weight_noise >= 0.0) {
            return Err(invalid(format!(
                "weight noise {} must be non-negative",
                self.weight_noise
            )));
        }
        if self.log_every == Some(0) {
            return Err(invalid("log_every must be at least 1".into()));
        }
        if self.max_non_finite == 0 {
            return Err(invalid("max_non_finite must be at least 1".into()));
        }
        match self.gradient_clip {
            Some(GradientClip::Norm(v) | GradientClip::Value(v)) if !(v > 0.0) => {
                return Err(invalid(format!("gradient clip {} must be positive", v)));
            }
            _ => {}
        }
        if let Some(mp) = self.mixed_precision {
            if !(mp.initial_scale > 0.0 && mp.min_scale > 0.0) || mp.growth_interval == 0 {
                return Err(invalid(format!("bad loss-scale settings {:?}", mp)));
            }
        }

        let train_len = match self.cross_validate {
            Some(cv) => {
                if !(cv.test_size > 0.0 && cv.test_size < 1.0) {
                    return Err(invalid(format!(
                        "test size {} is outside (0, 1)",
                        cv.test_size
                    )));
                }
                let train_len = ((1.0 - cv.test_size) * len as f64).ceil() as usize;
                if train_len == 0 || train_len >= len {
                    return Err(invalid(format!(
                        "test size {} leaves no samples on one side of {}",
                        cv.test_size, len
                    )));
                }
                train_len
            }
            None => len,
        };

        if self.batch_size == 0 {
            return Err(invalid("batch size must be at least 1".into()));
        }
        if self.batch_size > train_len {
            return Err(NetworkError::BatchTooLarge {
                batch_size: self.batch_size,
                len: train_len,
            });
        }
        Ok(train_len)
    }
}

/// Outcome of [`Network::train`].
#[derive(Debug, Clone)]
pub struct TrainResult {
    /// Error of the last pass (held-out error under cross-validation).
    pub error: f64,
    /// Passes completed.
    pub iterations: u64,
    pub time: Duration,
    /// Training ended on the stop flag or on repeated non-finite errors.
    pub aborted: bool,
    /// Batches skipped because their scaled deltas overflowed.
    pub overflow_steps: u64,
}

/// Outcome of [`Network::test`].
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Mean cost over the dataset.
    pub error: f64,
    pub time: Duration,
}

#[derive(Debug)]
struct LossScaler {
    scale: f64,
    clean: u64,
    overflows: u64,
    config: MixedPrecision,
}

impl LossScaler {
    fn new(config: MixedPrecision) -> Self {
        Self {
            scale: config.initial_scale,
            clean: 0,
            overflows: 0,
            config,
        }
    }

    fn record(&mut self, finite: bool) {
        if finite {
            self.clean += 1;
            if self.clean >= self.config.growth_interval {
                self.scale *= 2.0;
                self.clean = 0;
            }
        } else {
            self.scale = (self.scale / 2.0).max(self.config.min_scale);
            self.clean = 0;
            self.overflows += 1;
            debug!("loss scale overflow, scale now {}", self.scale);
        }
    }
}

fn check_shapes(net: &Network, set: &[Sample]) -> Result<()> {
    for sample in set {
        if sample.input.len() != net.input_size() {
            return Err(NetworkError::InputSizeMismatch {
                expected: net.input_size(),
                got: sample.input.len(),
            });
        }
        if sample.output.len() != net.output_size() {
            return Err(NetworkError::TargetSizeMismatch {
                expected: net.output_size(),
                got: sample.output.len(),
            });
        }
    }
    Ok(())
}

impl Network {
    /// Train on `set` until a stop condition is met.
    ///
    /// Errors are returned before any weight changes. A run that ends on the
    /// stop flag or on `max_non_finite` consecutive non-finite errors returns
    /// `Ok` with `aborted` set.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::EmptyDataset`] for an empty `set`
    /// - [`NetworkError::NoStopCondition`] without iterations, error or cross-validation
    /// - [`NetworkError::BatchTooLarge`] if the batch exceeds the training samples
    /// - [`NetworkError::InvalidOption`] for out-of-range options
    /// - [`NetworkError::InputSizeMismatch`] / [`NetworkError::TargetSizeMismatch`]
    ///   for a wrong-sized sample
    pub fn train(&mut self, set: &[Sample], options: &TrainOptions) -> Result<TrainResult> {
        let train_len = options.validate(set.len())?;
        check_shapes(self, set)?;

        let noise = if options.weight_noise > 0.0 {
            Some(
                Normal::new(0.0, options.weight_noise)
                    .map_err(|e| NetworkError::InvalidOption(e.to_string()))?,
            )
        } else {
            None
        };
        if let Some(dropout) = options.dropout {
            self.dropout = dropout;
        }

        let (train_set, held_out) = set.split_at(train_len);
        let target_error = options
            .cross_validate
            .map(|cv| cv.test_error)
            .or(options.error)
            .unwrap_or(-1.0);

        let start = Instant::now();
        let mut order: Vec<usize> = (0..train_len).collect();
        let mut scaler = options.mixed_precision.map(LossScaler::new);
        let mut error = f64::INFINITY;
        let mut iteration = 0;
        let mut non_finite = 0;
        let mut aborted = false;

        // NaN never satisfies the target, so degenerate runs keep going until
        // the non-finite guard trips
        while !(error <= target_error) && options.iterations.map_or(true, |max| iteration < max) {
            if options
                .stop
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                debug!("training stopped at iteration {}", iteration);
                aborted = true;
                break;
            }

            iteration += 1;
            self.training_step += 1;
            let rate = options.rate_policy.rate(options.rate, iteration);

            let train_error = self.run_epoch(train_set, &order, rate, options, noise, &mut scaler)?;
            if options.clear {
                self.clear();
            }
            error = if held_out.is_empty() {
                train_error
            } else {
                self.apply_survival_masks();
                let held = self.test(held_out, options.cost)?.error;
                if options.clear {
                    self.clear();
                }
                held
            };

            if error.is_finite() {
                non_finite = 0;
            } else {
                non_finite += 1;
                warn!("non-finite error {} at iteration {}", error, iteration);
                if non_finite >= options.max_non_finite {
                    warn!(
                        "aborting training after {} non-finite iterations",
                        non_finite
                    );
                    aborted = true;
                    break;
                }
            }

            self.apply_pruning_schedule();

            if options.shuffle {
                order.shuffle(&mut self.rng);
            }
            if let Some(every) = options.log_every {
                if iteration % every == 0 {
                    info!(
                        "iteration {} error {:.6} rate {:.6}",
                        iteration, error, rate
                    );
                }
            }
        }

        self.apply_survival_masks();

        Ok(TrainResult {
            error,
            iterations: iteration,
            time: start.elapsed(),
            aborted,
            overflow_steps: scaler.map_or(0, |s| s.overflows),
        })
    }

    /// Mean cost over `set` using trace-free activation.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::EmptyDataset`] for an empty `set`
    /// - [`NetworkError::InputSizeMismatch`] / [`NetworkError::TargetSizeMismatch`]
    ///   for a wrong-sized sample
    pub fn test(&mut self, set: &[Sample], cost: Cost) -> Result<TestResult> {
        if set.is_empty() {
            return Err(NetworkError::EmptyDataset);
        }
        check_shapes(self, set)?;

        let start = Instant::now();
        let mut total = 0.0;
        for sample in set {
            let output = self.no_trace_activate(&sample.input)?;
            total += cost.evaluate(&sample.output, &output);
        }
        Ok(TestResult {
            error: total / set.len() as f64,
            time: start.elapsed(),
        })
    }

    /// Scale hidden nodes by their survival rate for inference after dropout.
    fn apply_survival_masks(&mut self) {
        if self.dropout > 0.0 {
            let survival = 1.0 - self.dropout;
            for id in self.hidden_ids() {
                self.nodes[id].mask = survival;
            }
        }
        self.cache.invalidate_params();
    }

    /// One pass over `set` in `order`. Returns the mean training error.
    fn run_epoch(
        &mut self,
        set: &[Sample],
        order: &[usize],
        rate: f64,
        options: &TrainOptions,
        noise: Option<Normal<f64>>,
        scaler: &mut Option<LossScaler>,
    ) -> Result<f64> {
        let mut total = 0.0;
        for (i, &idx) in order.iter().enumerate() {
            let sample = &set[idx];
            let saved = self.perturb(options.dropconnect, noise);

            let output = self.activate(&sample.input, true)?;
            let scale = scaler.as_ref().map_or(1.0, |s| s.scale);
            self.backward(
                &sample.output,
                Step {
                    rate: rate * scale,
                    momentum: options.momentum,
                    update: false,
                    regularization: options.regularization,
                    cost: options.cost,
                },
            )?;
            self.restore(saved, options.dropconnect > 0.0);
            total += options.cost.evaluate(&sample.output, &output);

            if (i + 1) % options.batch_size == 0 || i + 1 == order.len() {
                self.finish_batch(options, scaler);
            }
        }
        Ok(total / order.len() as f64)
    }

    /// Sample DropConnect masks and add weight noise. Returns the weights to
    /// restore.
    fn perturb(&mut self, dropconnect: f64, noise: Option<Normal<f64>>) -> Vec<(ConnectionId, f64)> {
        let mut saved = Vec::new();
        if dropconnect <= 0.0 && noise.is_none() {
            return saved;
        }
        for k in 0..self.edges.len() {
            let c = self.edges[k];
            if dropconnect > 0.0 {
                let keep = self.rng.random::<f64>() >= dropconnect;
                self.connections[c].drop_mask = if keep { 1.0 } else { 0.0 };
            }
            if let Some(normal) = &noise {
                let jitter = normal.sample(&mut self.rng);
                let conn = &mut self.connections[c];
                saved.push((c, conn.weight));
                conn.weight += jitter;
            }
        }
        saved
    }

    fn restore(&mut self, saved: Vec<(ConnectionId, f64)>, masks: bool) {
        for (c, weight) in saved {
            self.connections[c].weight = weight;
        }
        if masks {
            for &c in &self.edges {
                self.connections[c].drop_mask = 1.0;
            }
        }
    }

    /// Unscale, clip and apply the accumulated deltas.
    fn finish_batch(&mut self, options: &TrainOptions, scaler: &mut Option<LossScaler>) {
        if let Some(scaler) = scaler.as_mut() {
            let finite = self.unscale_accumulated(scaler.scale);
            scaler.record(finite);
            if !finite {
                return;
            }
        }
        match options.gradient_clip {
            Some(GradientClip::Norm(max)) => {
                let norm = self.accumulated_norm();
                if norm > max {
                    self.scale_accumulated(max / norm);
                }
            }
            Some(GradientClip::Value(limit)) => self.clamp_accumulated(limit),
            None => {}
        }
        self.apply_accumulated(options.momentum);
    }
}
