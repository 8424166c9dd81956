//! Connection pruning.
//!
//! One-shot pruning removes the lowest-scoring connections until a target
//! sparsity is met. Scheduled pruning does the same from the training loop,
//! ramping the sparsity linearly across an iteration window, and can regrow a
//! fraction of what it removed elsewhere.

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Network;
use crate::error::{NetworkError, Result};
use crate::gene::{small_random, ConnectionId};

/// How connections are ranked for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PruningMethod {
    /// Smallest `|w|` first.
    #[default]
    Magnitude,
    /// Smallest `|w * gradient|` first; falls back to magnitude before any
    /// gradient has been recorded.
    Snip,
}

/// Training-time pruning schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruningConfig {
    /// First training iteration of the ramp.
    pub start: u64,
    /// Iteration at which `target_sparsity` is reached.
    pub end: u64,
    /// Final fraction of the baseline connections to remove, in `(0, 1)`.
    pub target_sparsity: f64,
    /// Fraction of each pruning step's removals to regrow, in `[0, 1]`.
    #[serde(default)]
    pub regrow_fraction: f64,
    /// Prune every `frequency` iterations inside the window.
    #[serde(default = "default_frequency")]
    pub frequency: u64,
    /// Ranking used to choose removals.
    #[serde(default)]
    pub method: PruningMethod,
}

fn default_frequency() -> u64 {
    1
}

impl PruningConfig {
    /// Magnitude pruning every iteration from `start` to `end`.
    #[must_use]
    pub fn new(start: u64, end: u64, target_sparsity: f64) -> Self {
        Self {
            start,
            end,
            target_sparsity,
            regrow_fraction: 0.0,
            frequency: 1,
            method: PruningMethod::Magnitude,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.end < self.start {
            return Err(NetworkError::InvalidPruning(format!(
                "end ({}) is before start ({})",
                self.end, self.start
            )));
        }
        check_sparsity(self.target_sparsity)?;
        if !(0.0..=1.0).contains(&self.regrow_fraction) {
            return Err(NetworkError::InvalidPruning(format!(
                "regrow fraction {} is outside [0, 1]",
                self.regrow_fraction
            )));
        }
        if self.frequency == 0 {
            return Err(NetworkError::InvalidPruning(
                "frequency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn check_sparsity(target: f64) -> Result<()> {
    if target > 0.0 && target < 1.0 {
        Ok(())
    } else {
        Err(NetworkError::InvalidPruning(format!(
            "target sparsity {} is outside (0, 1)",
            target
        )))
    }
}

/// An active schedule and the connection count it measures sparsity against.
#[derive(Debug, Clone)]
pub(crate) struct PruningSchedule {
    pub(crate) config: PruningConfig,
    pub(crate) baseline: usize,
}

impl Network {
    /// Install a pruning schedule, measured against the current connection count.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidPruning`] if `end < start`, the target
    /// sparsity is outside `(0, 1)`, the regrow fraction is outside `[0, 1]`
    /// or the frequency is zero.
    pub fn configure_pruning(&mut self, config: PruningConfig) -> Result<()> {
        config.validate()?;
        self.pruning = Some(PruningSchedule {
            config,
            baseline: self.edges.len(),
        });
        Ok(())
    }

    /// Remove the pruning schedule.
    pub fn clear_pruning(&mut self) {
        self.pruning = None;
    }

    /// The active pruning schedule, if any.
    #[must_use]
    pub fn pruning_config(&self) -> Option<&PruningConfig> {
        self.pruning.as_ref().map(|s| &s.config)
    }

    /// Prune until `ceil(baseline * (1 - target))` connections remain.
    ///
    /// The baseline is the connection count at the first call, so repeating a
    /// call with the same target removes nothing more. Returns the number of
    /// connections removed.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidPruning`] if `target` is outside `(0, 1)`.
    pub fn prune_to_sparsity(&mut self, target: f64, method: PruningMethod) -> Result<usize> {
        check_sparsity(target)?;
        let baseline = *self.prune_baseline.get_or_insert(self.edges.len());
        let desired = (baseline as f64 * (1.0 - target)).ceil() as usize;
        Ok(self.prune_down_to(desired, method))
    }

    /// Forget the one-shot pruning baseline.
    pub fn reset_pruning_baseline(&mut self) {
        self.prune_baseline = None;
    }

    /// Fraction of the pruning baseline that has been removed.
    #[must_use]
    pub fn current_sparsity(&self) -> f64 {
        let baseline = self
            .pruning
            .as_ref()
            .map(|s| s.baseline)
            .or(self.prune_baseline)
            .unwrap_or(self.edges.len());
        if baseline == 0 {
            return 0.0;
        }
        1.0 - self.edges.len() as f64 / baseline as f64
    }

    /// Remove the lowest-ranked connections until `desired` remain.
    fn prune_down_to(&mut self, desired: usize, method: PruningMethod) -> usize {
        let count = self.edges.len();
        if count <= desired {
            return 0;
        }
        let remove = count - desired;

        let use_snip = method == PruningMethod::Snip
            && self
                .edges
                .iter()
                .any(|&c| self.connections[c].gradient != 0.0);
        let mut ranked: Vec<(ConnectionId, f64)> = self
            .edges
            .iter()
            .map(|&c| {
                let conn = &self.connections[c];
                let score = if use_snip {
                    (conn.weight * conn.gradient).abs()
                } else {
                    conn.weight.abs()
                };
                (c, score)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        for &(c, _) in ranked.iter().take(remove) {
            self.remove_connection(c);
        }
        remove
    }

    /// Add up to `count` random forward connections.
    fn regrow<R: Rng>(&mut self, count: usize, rng: &mut R) -> usize {
        let mut pairs = self.forward_pairs();
        let mut grown = 0;
        while grown < count && !pairs.is_empty() {
            let idx = rng.random_range(0..pairs.len());
            let (from, to) = pairs.swap_remove(idx);
            if self.connect(from, to, small_random(rng)).is_ok() {
                grown += 1;
            }
        }
        grown
    }

    /// Run the schedule for the current training step.
    ///
    /// Returns the number of connections removed.
    pub(crate) fn apply_pruning_schedule(&mut self) -> usize {
        let Some(schedule) = self.pruning.as_ref() else {
            return 0;
        };
        let config = schedule.config;
        let baseline = schedule.baseline;
        let step = self.training_step;
        if step < config.start || step > config.end || (step - config.start) % config.frequency != 0
        {
            return 0;
        }

        let progress = if config.end == config.start {
            1.0
        } else {
            (step - config.start) as f64 / (config.end - config.start) as f64
        };
        let sparsity = config.target_sparsity * progress;
        let desired = (baseline as f64 * (1.0 - sparsity)).ceil() as usize;
        let removed = self.prune_down_to(desired, config.method);

        let regrow = (removed as f64 * config.regrow_fraction).floor() as usize;
        let grown = if regrow > 0 {
            self.with_rng(|net, rng| net.regrow(regrow, rng))
        } else {
            0
        };
        if removed > 0 {
            debug!(
                "pruned {} connections at step {} (regrew {}, sparsity {:.3})",
                removed,
                step,
                grown,
                self.current_sparsity()
            );
        }
        removed
    }
}
