//! Error types for graphd
//!
//! Every failure the registry, the dispatcher or the service can report is a
//! variant of [`GraphError`]. Each variant maps to one wire [`Status`].

use crate::protocol::Status;
use crate::tensor::DataType;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout graphd
pub type GraphResult<T> = Result<T, GraphError>;

/// Which side of an operator a type check was made on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{op}: expected {min}..={} inputs, got {actual}{}", max_bound(.max), node_suffix(.node))]
    Arity {
        op: String,
        node: Option<i32>,
        min: usize,
        max: Option<usize>,
        actual: usize,
    },

    #[error("{op}: {direction} slot {slot} does not accept {dtype}{}", node_suffix(.node))]
    TypeMismatch {
        op: String,
        node: Option<i32>,
        direction: Direction,
        slot: usize,
        dtype: DataType,
    },

    #[error("Assertion failed for node [{node}]")]
    Assertion { node: i32 },

    #[error("Dependency cycle through node [{node}]")]
    Cycle { node: i32 },

    /// `node` is `None` when a graph output holds the dangling reference
    #[error("{} references unknown {reference}", reference_owner(.node))]
    UnresolvedReference {
        node: Option<i32>,
        reference: String,
    },

    #[error("{op}: integer result out of range{}", node_suffix(.node))]
    ArithmeticOverflow { op: String, node: Option<i32> },

    #[error("Graph '{0}' is already registered")]
    AlreadyExists(String),

    #[error("Graph '{0}' not found")]
    NotFound(String),

    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op}: {message}{}", node_suffix(.node))]
    ShapeMismatch {
        op: String,
        node: Option<i32>,
        message: String,
    },

    #[error("Invalid graph definition: {0}")]
    InvalidDefinition(String),

    #[error("No binding for placeholder '{0}'")]
    MissingPlaceholder(String),

    #[error("Operator '{op}' at node [{node}] has no backward variant")]
    NotDifferentiable { op: String, node: i32 },

    #[error("Evaluation cancelled before node [{node}]")]
    Cancelled { node: i32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn node_suffix(node: &Option<i32>) -> String {
    match node {
        Some(id) => format!(" (node [{}])", id),
        None => String::new(),
    }
}

fn reference_owner(node: &Option<i32>) -> String {
    match node {
        Some(id) => format!("Node [{}]", id),
        None => "Graph output".to_string(),
    }
}

fn max_bound(max: &Option<usize>) -> String {
    match max {
        Some(m) => m.to_string(),
        None => "*".to_string(),
    }
}

impl GraphError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GraphError::Config(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        GraphError::InvalidArgument(msg.into())
    }

    pub fn shape<S: Into<String>, M: Into<String>>(op: S, message: M) -> Self {
        GraphError::ShapeMismatch {
            op: op.into(),
            node: None,
            message: message.into(),
        }
    }

    /// Tag a dispatch error with the node that raised it.
    ///
    /// Errors that already carry a node id are left alone.
    pub fn at_node(self, id: i32) -> Self {
        match self {
            GraphError::Arity {
                op,
                node: None,
                min,
                max,
                actual,
            } => GraphError::Arity {
                op,
                node: Some(id),
                min,
                max,
                actual,
            },
            GraphError::TypeMismatch {
                op,
                node: None,
                direction,
                slot,
                dtype,
            } => GraphError::TypeMismatch {
                op,
                node: Some(id),
                direction,
                slot,
                dtype,
            },
            GraphError::ShapeMismatch {
                op,
                node: None,
                message,
            } => GraphError::ShapeMismatch {
                op,
                node: Some(id),
                message,
            },
            GraphError::ArithmeticOverflow { op, node: None } => {
                GraphError::ArithmeticOverflow { op, node: Some(id) }
            }
            other => other,
        }
    }

    /// Node id carried by the error, if any
    pub fn node(&self) -> Option<i32> {
        match self {
            GraphError::Arity { node, .. }
            | GraphError::TypeMismatch { node, .. }
            | GraphError::ShapeMismatch { node, .. }
            | GraphError::UnresolvedReference { node, .. }
            | GraphError::ArithmeticOverflow { node, .. } => *node,
            GraphError::Assertion { node }
            | GraphError::Cycle { node }
            | GraphError::NotDifferentiable { node, .. }
            | GraphError::Cancelled { node } => Some(*node),
            _ => None,
        }
    }

    /// Wire status reported to clients for this error
    pub fn status(&self) -> Status {
        match self {
            GraphError::AlreadyExists(_) => Status::AlreadyExists,
            GraphError::NotFound(_) => Status::NotFound,
            GraphError::Cycle { .. }
            | GraphError::UnresolvedReference { .. }
            | GraphError::UnknownOperator(_)
            | GraphError::InvalidDefinition(_) => Status::InvalidGraph,
            GraphError::Arity { .. }
            | GraphError::TypeMismatch { .. }
            | GraphError::ShapeMismatch { .. }
            | GraphError::ArithmeticOverflow { .. }
            | GraphError::NotDifferentiable { .. } => Status::DispatchFailed,
            GraphError::Assertion { .. } => Status::AssertionFailed,
            GraphError::Cancelled { .. } => Status::Cancelled,
            GraphError::InvalidArgument(_)
            | GraphError::MissingPlaceholder(_)
            | GraphError::Protocol(_)
            | GraphError::Serialization(_) => Status::BadRequest,
            GraphError::Config(_) | GraphError::Io(_) => Status::Internal,
        }
    }
}

impl From<bincode::Error> for GraphError {
    fn from(err: bincode::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(err: serde_yaml::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GraphError {
    fn from(err: toml::de::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_node_tags_dispatch_errors_once() {
        let err = GraphError::TypeMismatch {
            op: "relu".into(),
            node: None,
            direction: Direction::Input,
            slot: 0,
            dtype: DataType::Int32,
        }
        .at_node(4)
        .at_node(9);

        assert_eq!(err.node(), Some(4));
        assert_eq!(err.status(), Status::DispatchFailed);
        assert!(err.to_string().contains("input slot 0"));
        assert!(err.to_string().contains("int32"));
    }

    #[test]
    fn test_dangling_output_reference_message() {
        let err = GraphError::UnresolvedReference {
            node: None,
            reference: "node [99] output 0".into(),
        };
        assert_eq!(
            err.to_string(),
            "Graph output references unknown node [99] output 0"
        );
        assert_eq!(err.node(), None);
        assert_eq!(err.status(), Status::InvalidGraph);
    }

    #[test]
    fn test_overflow_is_tagged_and_fails_dispatch() {
        let err = GraphError::ArithmeticOverflow {
            op: "add".into(),
            node: None,
        }
        .at_node(2);
        assert_eq!(err.node(), Some(2));
        assert_eq!(err.status(), Status::DispatchFailed);
    }

    #[test]
    fn test_assertion_message_names_node() {
        let err = GraphError::Assertion { node: 7 };
        assert_eq!(err.to_string(), "Assertion failed for node [7]");
        assert_eq!(err.status(), Status::AssertionFailed);
    }
}
