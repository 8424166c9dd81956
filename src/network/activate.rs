//! Forward passes.
//!
//! Nodes fire in list order. A node reads the current activation of nodes
//! before it and the previous activation of nodes after it, which is how
//! recurrent and self-connections carry memory between calls.

use log::debug;
use rand::Rng;

use super::{Network, SlabState};
use crate::error::{NetworkError, Result};
use crate::gene::{NodeId, NodeKind};
use crate::slab::Slab;

impl Network {
    /// Forward pass that records the traces needed by [`Network::propagate`].
    ///
    /// With `training`, hidden nodes are dropped with probability
    /// [`Network::dropout`]. Outside training, acyclic ungated networks run on
    /// a packed fast path that yields the same values as the generic pass.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InputSizeMismatch`] for a wrong-sized input.
    pub fn activate(&mut self, input: &[f64], training: bool) -> Result<Vec<f64>> {
        self.check_input(input)?;
        if !training {
            if let Some(out) = self.try_fast_pass(input, true) {
                return Ok(out);
            }
        }
        Ok(self.generic_pass(input, training, true))
    }

    /// Forward pass without trace bookkeeping; same outputs as [`Network::activate`].
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InputSizeMismatch`] for a wrong-sized input.
    pub fn no_trace_activate(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        self.check_input(input)?;
        if let Some(out) = self.try_fast_pass(input, false) {
            return Ok(out);
        }
        Ok(self.generic_pass(input, false, false))
    }

    /// Tracing forward pass that never takes the packed path.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InputSizeMismatch`] for a wrong-sized input.
    pub fn activate_generic(&mut self, input: &[f64], training: bool) -> Result<Vec<f64>> {
        self.check_input(input)?;
        Ok(self.generic_pass(input, training, true))
    }

    fn check_input(&self, input: &[f64]) -> Result<()> {
        if input.len() != self.input_size() {
            return Err(NetworkError::InputSizeMismatch {
                expected: self.input_size(),
                got: input.len(),
            });
        }
        Ok(())
    }

    fn try_fast_pass(&mut self, input: &[f64], trace: bool) -> Option<Vec<f64>> {
        if matches!(self.cache.slab, SlabState::Unknown) {
            let built = if self.topological_order().is_some() {
                Slab::build(self)
            } else {
                None
            };
            self.cache.slab = match built {
                Some(slab) => SlabState::Ready(slab),
                None => {
                    debug!("network is not eligible for the packed pass; using the generic pass");
                    SlabState::Unsupported
                }
            };
        }

        let SlabState::Ready(mut slab) = std::mem::take(&mut self.cache.slab) else {
            return None;
        };
        if !slab.matches(self) {
            debug!("packed pass is stale; falling back to the generic pass");
            return None;
        }

        let out = slab.run(input);
        slab.write_back(self, trace);
        self.cache.slab = SlabState::Ready(slab);
        Some(out)
    }

    fn generic_pass(&mut self, input: &[f64], training: bool, trace: bool) -> Vec<f64> {
        let dropout = self.dropout;
        for pos in 0..self.order.len() {
            let id = self.order[pos];
            match self.nodes[id].kind {
                NodeKind::Input => self.nodes[id].activation = input[pos],
                NodeKind::Hidden if training => {
                    let keep = dropout <= 0.0 || self.rng.random::<f64>() >= dropout;
                    self.nodes[id].mask = if keep { 1.0 } else { 0.0 };
                    self.fire(id, trace);
                }
                _ => self.fire(id, trace),
            }
        }
        if training {
            // masks were resampled
            self.cache.invalidate_params();
        }

        let start = self.order.len() - self.output_size();
        self.order[start..]
            .iter()
            .map(|&id| self.nodes[id].activation)
            .collect()
    }

    /// Gain times weight of a node's enabled self-connection, or 0.
    pub(crate) fn self_factor(&self, id: NodeId) -> f64 {
        self.nodes[id]
            .self_connection
            .map(|c| &self.connections[c])
            .filter(|c| c.enabled)
            .map_or(0.0, |c| c.gain * c.weight)
    }

    /// Activate one non-input node.
    fn fire(&mut self, id: NodeId, trace: bool) {
        let self_factor = self.self_factor(id);
        let node = &self.nodes[id];
        let mut state = self_factor * node.state + node.bias;
        for &c in &node.incoming {
            let conn = &self.connections[c];
            if conn.enabled {
                state += self.nodes[conn.from].activation * conn.effective_weight() * conn.gain;
            }
        }

        let squash = node.squash;
        let activation = squash.apply(state) * node.mask;
        let node = &mut self.nodes[id];
        if trace {
            node.old = node.state;
            node.derivative = squash.derivative(state);
        }
        node.state = state;
        node.activation = activation;

        // Gains follow the gater, and each gated target's influence is the
        // signal this node scales.
        let mut influences: Vec<(NodeId, f64)> = Vec::new();
        for k in 0..self.nodes[id].gated.len() {
            let c = self.nodes[id].gated[k];
            let conn = &self.connections[c];
            let target = conn.to;
            let signal = conn.weight * self.nodes[conn.from].activation;
            match influences.iter_mut().find(|(n, _)| *n == target) {
                Some((_, influence)) => *influence += signal,
                None => {
                    let target_node = &self.nodes[target];
                    let self_gated = target_node
                        .self_connection
                        .is_some_and(|s| self.connections[s].gater == Some(id));
                    let carried = if self_gated { target_node.old } else { 0.0 };
                    influences.push((target, signal + carried));
                }
            }
            self.connections[c].gain = activation;
        }

        if !trace {
            return;
        }

        let target_factors: Vec<f64> = influences
            .iter()
            .map(|&(n, _)| self.self_factor(n))
            .collect();
        let derivative = self.nodes[id].derivative;

        for k in 0..self.nodes[id].incoming.len() {
            let c = self.nodes[id].incoming[k];
            if !self.connections[c].enabled {
                continue;
            }
            let from_activation = self.nodes[self.connections[c].from].activation;
            let conn = &mut self.connections[c];
            conn.eligibility = self_factor * conn.eligibility + from_activation * conn.gain;
            let eligibility = conn.eligibility;

            for (&(target, influence), &factor) in influences.iter().zip(&target_factors) {
                let fresh = derivative * eligibility * influence;
                match conn.xtrace.iter_mut().find(|(n, _)| *n == target) {
                    Some((_, value)) => *value = factor * *value + fresh,
                    None => conn.xtrace.push((target, fresh)),
                }
            }
        }
    }
}
