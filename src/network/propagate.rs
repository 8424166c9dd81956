//! Backpropagation with eligibility traces.
//!
//! Output nodes are processed last-to-first, then hidden nodes in reverse list
//! order. Each node derives its responsibility from downstream nodes that were
//! already processed in this pass, plus the targets of any connections it
//! gates. Deltas accumulate on each connection and bias and are applied either
//! immediately (`update`) or later by the training loop at batch boundaries.

use serde::{Deserialize, Serialize};

use super::Network;
use crate::cost::Cost;
use crate::error::{NetworkError, Result};
use crate::gene::{NodeId, NodeKind};

/// Weight penalty folded into every weight delta.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regularization {
    /// No penalty.
    #[default]
    None,
    /// Lasso: `lambda * sign(w)`.
    L1(f64),
    /// Ridge: `lambda * w`.
    L2(f64),
    /// Caller-supplied gradient of the penalty.
    #[serde(skip)]
    Custom(fn(f64) -> f64),
}

impl Regularization {
    /// Penalty gradient at weight `w`.
    #[must_use]
    pub fn gradient(&self, w: f64) -> f64 {
        match *self {
            Self::None => 0.0,
            Self::L1(lambda) => lambda * w.signum(),
            Self::L2(lambda) => lambda * w,
            Self::Custom(f) => f(w),
        }
    }
}

/// Parameters of one backward pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Step {
    pub(crate) rate: f64,
    pub(crate) momentum: f64,
    pub(crate) update: bool,
    pub(crate) regularization: Regularization,
    pub(crate) cost: Cost,
}

impl Network {
    /// Backpropagate `target` through the traces of the last [`Network::activate`].
    ///
    /// With `update`, accumulated deltas are applied at once (with momentum);
    /// otherwise they keep accumulating until [`Network::apply_accumulated`].
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::TargetSizeMismatch`] for a wrong-sized target.
    pub fn propagate(
        &mut self,
        rate: f64,
        momentum: f64,
        update: bool,
        target: &[f64],
        regularization: Regularization,
    ) -> Result<()> {
        self.backward(
            target,
            Step {
                rate,
                momentum,
                update,
                regularization,
                cost: Cost::Mse,
            },
        )
    }

    pub(crate) fn backward(&mut self, target: &[f64], step: Step) -> Result<()> {
        if target.len() != self.output_size() {
            return Err(NetworkError::TargetSizeMismatch {
                expected: self.output_size(),
                got: target.len(),
            });
        }

        let len = self.order.len();
        let out_start = len - self.output_size();
        for pos in (out_start..len).rev() {
            let id = self.order[pos];
            self.propagate_node(id, Some(target[pos - out_start]), step);
        }
        for pos in (self.input_size()..out_start).rev() {
            let id = self.order[pos];
            self.propagate_node(id, None, step);
        }

        self.cache.invalidate_params();
        Ok(())
    }

    fn propagate_node(&mut self, id: NodeId, target: Option<f64>, step: Step) {
        let node = &self.nodes[id];
        debug_assert_ne!(node.kind, NodeKind::Input);

        let (responsibility, projected, gated) = match target {
            Some(t) => {
                let delta = step.cost.output_delta(t, node.activation);
                (delta, delta, 0.0)
            }
            None => {
                let mut downstream = 0.0;
                for &c in &node.outgoing {
                    let conn = &self.connections[c];
                    if conn.enabled {
                        downstream += self.nodes[conn.to].error.responsibility
                            * conn.effective_weight()
                            * conn.gain;
                    }
                }
                let projected = node.derivative * downstream;

                let mut through_gates = 0.0;
                for &c in &node.gated {
                    let conn = &self.connections[c];
                    if !conn.enabled {
                        continue;
                    }
                    let gated_target = &self.nodes[conn.to];
                    let self_gated = gated_target
                        .self_connection
                        .is_some_and(|s| self.connections[s].gater == Some(id));
                    let mut influence = if self_gated { gated_target.old } else { 0.0 };
                    influence += conn.weight * self.nodes[conn.from].activation;
                    through_gates += gated_target.error.responsibility * influence;
                }
                let gated = node.derivative * through_gates;

                (projected + gated, projected, gated)
            }
        };

        let mask = node.mask;
        let node = &mut self.nodes[id];
        node.error.responsibility = responsibility;
        node.error.projected = projected;
        node.error.gated = gated;

        for k in 0..self.nodes[id].incoming.len() {
            let c = self.nodes[id].incoming[k];
            if !self.connections[c].enabled {
                continue;
            }
            let conn = &self.connections[c];
            let mut gradient = projected * conn.eligibility;
            for &(influenced, value) in &conn.xtrace {
                if let Some(n) = self.nodes.get(influenced) {
                    gradient += n.error.responsibility * value;
                }
            }

            let conn = &mut self.connections[c];
            conn.gradient = gradient;
            let delta = step.rate * gradient * mask * conn.drop_mask
                - step.rate * step.regularization.gradient(conn.weight);
            conn.total_delta_weight += delta;
            if step.update {
                conn.total_delta_weight += step.momentum * conn.previous_delta_weight;
                conn.weight += conn.total_delta_weight;
                conn.previous_delta_weight = conn.total_delta_weight;
                conn.total_delta_weight = 0.0;
            }
        }

        let node = &mut self.nodes[id];
        node.total_delta_bias += step.rate * responsibility;
        if step.update {
            node.total_delta_bias += step.momentum * node.previous_delta_bias;
            node.bias += node.total_delta_bias;
            node.previous_delta_bias = node.total_delta_bias;
            node.total_delta_bias = 0.0;
        }
    }

    /// Divide accumulated deltas by the loss scale.
    ///
    /// Returns `false` (and zeroes the accumulators) if any delta is not
    /// finite, so the step can be skipped.
    pub(crate) fn unscale_accumulated(&mut self, scale: f64) -> bool {
        let finite = self
            .edges
            .iter()
            .all(|&c| self.connections[c].total_delta_weight.is_finite())
            && self.nodes.values().all(|n| n.total_delta_bias.is_finite());

        for &c in &self.edges {
            let conn = &mut self.connections[c];
            conn.total_delta_weight = if finite {
                conn.total_delta_weight / scale
            } else {
                0.0
            };
        }
        for node in self.nodes.values_mut() {
            node.total_delta_bias = if finite {
                node.total_delta_bias / scale
            } else {
                0.0
            };
        }
        finite
    }

    /// Global L2 norm of the accumulated deltas.
    pub(crate) fn accumulated_norm(&self) -> f64 {
        let weights: f64 = self
            .edges
            .iter()
            .map(|&c| self.connections[c].total_delta_weight.powi(2))
            .sum();
        let biases: f64 = self
            .nodes
            .values()
            .map(|n| n.total_delta_bias.powi(2))
            .sum();
        (weights + biases).sqrt()
    }

    /// Rescale accumulated deltas by `factor`.
    pub(crate) fn scale_accumulated(&mut self, factor: f64) {
        for &c in &self.edges {
            self.connections[c].total_delta_weight *= factor;
        }
        for node in self.nodes.values_mut() {
            node.total_delta_bias *= factor;
        }
    }

    /// Clamp each accumulated delta to `[-limit, limit]`.
    pub(crate) fn clamp_accumulated(&mut self, limit: f64) {
        for &c in &self.edges {
            let delta = &mut self.connections[c].total_delta_weight;
            *delta = delta.clamp(-limit, limit);
        }
        for node in self.nodes.values_mut() {
            node.total_delta_bias = node.total_delta_bias.clamp(-limit, limit);
        }
    }

    /// Apply deltas accumulated by `propagate(.., update = false, ..)`.
    pub fn apply_accumulated(&mut self, momentum: f64) {
        for &c in &self.edges {
            let conn = &mut self.connections[c];
            if !conn.enabled {
                conn.total_delta_weight = 0.0;
                continue;
            }
            conn.total_delta_weight += momentum * conn.previous_delta_weight;
            conn.weight += conn.total_delta_weight;
            conn.previous_delta_weight = conn.total_delta_weight;
            conn.total_delta_weight = 0.0;
        }
        for node in self.nodes.values_mut() {
            if node.kind == NodeKind::Input {
                continue;
            }
            node.total_delta_bias += momentum * node.previous_delta_bias;
            node.bias += node.total_delta_bias;
            node.previous_delta_bias = node.total_delta_bias;
            node.total_delta_bias = 0.0;
        }
        self.cache.invalidate_params();
    }
}
