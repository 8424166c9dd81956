//! Error types shared by every network operation.
//!
//! Only validation failures are errors. Structural mutations that find no
//! eligible target are not: they return normally and log a warning.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Validation errors raised by the network engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    /// An input vector does not match the network's input size.
    #[error("input size mismatch: expected {expected}, got {got}")]
    InputSizeMismatch {
        /// Configured input size.
        expected: usize,
        /// Length of the supplied vector.
        got: usize,
    },

    /// A target vector does not match the network's output size.
    #[error("target size mismatch: expected {expected}, got {got}")]
    TargetSizeMismatch {
        /// Configured output size.
        expected: usize,
        /// Length of the supplied vector.
        got: usize,
    },

    /// A node id does not belong to this network.
    #[error("node is not part of this network")]
    UnknownNode,

    /// A connection id does not belong to this network.
    #[error("connection is not part of this network")]
    UnknownConnection,

    /// The two nodes are already connected in that direction.
    #[error("a connection between these nodes already exists")]
    DuplicateConnection,

    /// Connections may not point into an input node.
    #[error("input nodes cannot receive connections")]
    InputTarget,

    /// The edge would point backwards while acyclic enforcement is active.
    #[error("connection from position {from} to position {to} violates acyclic enforcement")]
    AcyclicViolation {
        /// List position of the source node.
        from: usize,
        /// List position of the target node.
        to: usize,
    },

    /// Only hidden nodes can be removed.
    #[error("only hidden nodes can be removed")]
    NotHidden,

    /// Crossover parents disagree on their input or output size.
    #[error("parents differ in shape: {a_in}x{a_out} vs {b_in}x{b_out}")]
    ParentShapeMismatch {
        /// Input size of the first parent.
        a_in: usize,
        /// Output size of the first parent.
        a_out: usize,
        /// Input size of the second parent.
        b_in: usize,
        /// Output size of the second parent.
        b_out: usize,
    },

    /// Pruning parameters are out of range.
    #[error("invalid pruning configuration: {0}")]
    InvalidPruning(String),

    /// Training was asked to run without any stop condition.
    #[error("training needs an iteration limit or a target error")]
    NoStopCondition,

    /// The batch size is larger than the dataset.
    #[error("batch size {batch_size} exceeds dataset size {len}")]
    BatchTooLarge {
        /// Requested batch size.
        batch_size: usize,
        /// Number of samples in the dataset.
        len: usize,
    },

    /// A dataset was empty where samples are required.
    #[error("dataset is empty")]
    EmptyDataset,

    /// Training options are out of range.
    #[error("invalid training option: {0}")]
    InvalidOption(String),

    /// Standalone export needs at least one output node.
    #[error("cannot export a network without output nodes")]
    NoOutputs,

    /// A serialized genome could not be rebuilt.
    #[error("malformed genome: {0}")]
    MalformedGenome(String),

    /// A cost function name was not recognised.
    #[error("unknown cost function '{0}'")]
    UnknownCost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_sizes() {
        let err = NetworkError::InputSizeMismatch {
            expected: 3,
            got: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains('3') && msg.contains('2'), "{}", msg);
    }

    #[test]
    fn test_acyclic_violation_display() {
        let err = NetworkError::AcyclicViolation { from: 4, to: 1 };
        assert!(err.to_string().contains("acyclic"));
    }
}
